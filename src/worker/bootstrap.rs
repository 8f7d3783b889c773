use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use super::executor::{RenderError, RenderExecutor};
use super::{installer, Outbound, WorkerConfig};
use crate::backend::RenderBackend;
use crate::protocol::RenderResult;
use crate::session::DocumentSession;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("runtime failed to load: {0}")]
    RuntimeLoad(anyhow::Error),
    #[error("runtime load timed out after {0:?}")]
    RuntimeLoadTimeout(Duration),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("first render timed out after {0:?}")]
    RenderTimeout(Duration),
}

/// One-shot startup sequence: load the runtime, expose the patch callback,
/// install dependencies, run the render program. Every step is announced
/// with a `status` message first. Dependency failures are tolerated; a
/// runtime-load or render failure is fatal and leaves the worker unusable.
pub async fn run<B: RenderBackend>(
    backend: &mut B,
    config: &WorkerConfig,
    outbound: &Outbound,
    session: &mut DocumentSession,
    executor: &mut RenderExecutor,
) -> Result<RenderResult, BootstrapError> {
    outbound.status("loading runtime");
    let loaded = match config.load_timeout {
        Some(limit) => match timeout(limit, backend.initialize()).await {
            Ok(loaded) => loaded,
            Err(_) => {
                outbound.status(format!("runtime load timed out after {limit:?}"));
                return Err(BootstrapError::RuntimeLoadTimeout(limit));
            }
        },
        None => backend.initialize().await,
    };
    if let Err(err) = loaded {
        outbound.status(format!("error loading runtime: {err}"));
        return Err(BootstrapError::RuntimeLoad(err));
    }

    // The callback has to be in place before the program runs so that
    // worker-originated patches never need a message round-trip.
    if let Err(err) = backend.bind_patch_callback(outbound.patch_emitter()) {
        outbound.status(format!("error loading runtime: {err}"));
        return Err(BootstrapError::RuntimeLoad(err));
    }

    if let Err(err) = backend.prepare_installer().await {
        // Degrades to per-package failures below; the program may not need
        // any installed dependency.
        tracing::error!(target = "worker", error = %err, "package installer unavailable");
        outbound.status("error installing package manager");
    }

    let installed = installer::install_all(backend, &config.packages, outbound).await;
    tracing::debug!(
        target = "worker",
        installed,
        requested = config.packages.len(),
        "dependency install phase complete"
    );

    outbound.status("executing code");
    let rendered = match config.render_timeout {
        Some(limit) => match timeout(limit, executor.execute(backend, session)).await {
            Ok(rendered) => rendered,
            Err(_) => {
                outbound.status(format!("render timed out after {limit:?}"));
                return Err(BootstrapError::RenderTimeout(limit));
            }
        },
        None => executor.execute(backend, session).await,
    };

    match rendered {
        Ok(result) => {
            outbound.render(&result);
            // Ownership of the initial model transfers to the session; the
            // worker keeps no second copy.
            session.adopt_model(result.docs_json.clone());
            Ok(result)
        }
        Err(err) => {
            outbound.status(err.status_line());
            Err(BootstrapError::Render(err))
        }
    }
}
