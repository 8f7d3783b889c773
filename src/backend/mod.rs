pub mod script;

use anyhow::Result;
use async_trait::async_trait;

use crate::protocol::{PatchEmitter, RenderResult};
use crate::session::DocumentSession;
use crate::worker::executor::RenderFailure;
use crate::worker::installer::PackageSpec;

pub use script::ScriptBackend;

/// The heavyweight rendering runtime hosted by a worker.
///
/// Implementations are black boxes to the worker: it only ever drives them
/// through this seam, in bootstrap order. Every async method is a
/// suspension point; implementations are free to take their time and the
/// worker will not read further host messages meanwhile. The trait is
/// deliberately `?Send`: real runtimes tend to be thread-bound, and a
/// worker lives on a single thread anyway.
#[async_trait(?Send)]
pub trait RenderBackend {
    /// One-time runtime initialization. Failure here is fatal: the worker
    /// has no recovery path and reports itself unusable.
    async fn initialize(&mut self) -> Result<()>;

    /// Expose the worker→host patch callback inside the runtime, so the
    /// render program can emit patches without a message round-trip.
    fn bind_patch_callback(&mut self, emitter: PatchEmitter) -> Result<()>;

    /// Bring up the package-installer subsystem, itself a prerequisite of
    /// the install phase.
    async fn prepare_installer(&mut self) -> Result<()>;

    /// Install a single package. Failures are per-package and non-fatal;
    /// the installer reports them and moves on.
    async fn install(&mut self, spec: &PackageSpec) -> Result<()>;

    /// Run the render program once. The output triple is opaque and passes
    /// through unvalidated; a failure carries the formatted trace.
    async fn execute_program(
        &mut self,
        session: &mut DocumentSession,
    ) -> Result<RenderResult, RenderFailure>;
}
