//! Worker-hosted rendering backend with host↔worker document sync.
//!
//! A [`Worker`] bootstraps a heavyweight [`backend::RenderBackend`]
//! (reporting progress host-ward as it goes), runs its render program once
//! to produce the initial serialized document, then spends the rest of its
//! life exchanging incremental patches with the host over a small tagged
//! message protocol.

pub mod backend;
pub mod document;
pub mod location;
pub mod protocol;
pub mod session;
pub mod worker;

pub use backend::{RenderBackend, ScriptBackend};
pub use protocol::{HostMessage, PatchEmitter, RenderResult, WorkerMessage};
pub use session::DocumentSession;
pub use worker::{Worker, WorkerConfig, WorkerError, WorkerHandle};
