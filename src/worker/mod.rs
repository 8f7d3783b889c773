pub mod bootstrap;
pub mod executor;
pub mod installer;
pub mod sync;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::backend::RenderBackend;
use crate::protocol::{HostMessage, PatchEmitter, RenderResult, WorkerMessage};
use crate::session::DocumentSession;
use self::bootstrap::BootstrapError;
use self::executor::RenderExecutor;
use self::installer::PackageSpec;
use self::sync::{SyncError, SyncHandler};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("sync handler failed: {0}")]
    Sync(#[from] SyncError),
}

/// Startup configuration for one worker instance.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Dependencies of the render program, installed in this order.
    pub packages: Vec<PackageSpec>,
    /// Bound on runtime initialization. `None` waits forever, which leaves
    /// the worker hung if the runtime never comes up.
    pub load_timeout: Option<Duration>,
    /// Bound on the first render.
    pub render_timeout: Option<Duration>,
}

impl WorkerConfig {
    pub fn with_packages(mut self, packages: Vec<PackageSpec>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_load_timeout(mut self, limit: Duration) -> Self {
        self.load_timeout = Some(limit);
        self
    }

    pub fn with_render_timeout(mut self, limit: Duration) -> Self {
        self.render_timeout = Some(limit);
        self
    }
}

/// Host-side endpoints of a worker's two message channels.
pub struct WorkerHandle {
    pub to_worker: mpsc::UnboundedSender<HostMessage>,
    pub from_worker: mpsc::UnboundedReceiver<WorkerMessage>,
}

/// Worker-side sender for host-bound messages. Sends are best-effort: once
/// the host drops its receiver the worker is shutting down anyway.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }

    pub fn status(&self, msg: impl Into<String>) {
        self.send(WorkerMessage::Status { msg: msg.into() });
    }

    pub fn render(&self, result: &RenderResult) {
        self.send(WorkerMessage::Render {
            docs_json: result.docs_json.clone(),
            render_items: result.render_items.clone(),
            root_ids: result.root_ids.clone(),
        });
    }

    pub fn idle(&self) {
        self.send(WorkerMessage::Idle);
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.send(WorkerMessage::Error { msg: msg.into() });
    }

    pub fn patch_emitter(&self) -> PatchEmitter {
        PatchEmitter::new(self.tx.clone())
    }

    fn send(&self, message: WorkerMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!(target = "worker", "host bridge closed, dropping message");
        }
    }
}

/// One isolated worker instance hosting a render backend.
///
/// The worker runs on whichever thread drives its `run` future; everything
/// inside is single-threaded and processes host messages strictly in
/// arrival order. Multiple workers are fully isolated from each other.
pub struct Worker<B: RenderBackend> {
    backend: B,
    config: WorkerConfig,
    inbound: mpsc::UnboundedReceiver<HostMessage>,
    outbound: Outbound,
}

impl<B: RenderBackend> Worker<B> {
    pub fn new(backend: B, config: WorkerConfig) -> (Self, WorkerHandle) {
        let (to_worker, inbound) = mpsc::unbounded_channel();
        let (worker_tx, from_worker) = mpsc::unbounded_channel();
        let worker = Self {
            backend,
            config,
            inbound,
            outbound: Outbound::new(worker_tx),
        };
        let handle = WorkerHandle {
            to_worker,
            from_worker,
        };
        (worker, handle)
    }

    /// Drive the worker for its whole lifetime: bootstrap once, then route
    /// host messages until the channel closes or a handler fails. Every
    /// handler step is awaited before the next message is read, so the
    /// `idle`-after-`patch` back-pressure contract holds by construction.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let mut session = DocumentSession::new();
        let mut executor = RenderExecutor::new();

        let result = bootstrap::run(
            &mut self.backend,
            &self.config,
            &self.outbound,
            &mut session,
            &mut executor,
        )
        .await;
        if let Err(err) = result {
            tracing::error!(target = "worker", error = %err, "bootstrap failed");
            return Err(WorkerError::Bootstrap(err));
        }
        tracing::debug!(target = "worker", "bootstrap complete, entering steady state");

        let mut handler = SyncHandler::new(session, self.outbound.clone());
        while let Some(message) = self.inbound.recv().await {
            if let Err(err) = handler.handle(message).await {
                tracing::error!(target = "sync", error = %err, "sync handler failed");
                self.outbound.error(err.to_string());
                return Err(WorkerError::Sync(err));
            }
        }
        Ok(())
    }
}
