use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::Outbound;
use crate::document::DocumentError;
use crate::protocol::HostMessage;
use crate::session::DocumentSession;

/// Setter identity attached to every host-originated mutation and to the
/// outbound change binding, so the document can tell host writes from
/// worker writes and never echo a patch back at its sender.
pub const HOST_SETTER: &str = "host-bridge";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Initial render sent, host has not confirmed attachment yet.
    AwaitingLink,
    /// Host document attached; patches and location overlays flow.
    Linked,
    /// A handler step failed. Terminal: no recovery, no resync.
    Failed,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("patch rejected: {0}")]
    Patch(#[from] DocumentError),
    #[error("malformed location snapshot: {0}")]
    MalformedSnapshot(#[from] serde_json::Error),
    #[error("location snapshot is not an object")]
    SnapshotNotObject,
    #[error("handler previously failed")]
    HandlerFailed,
}

/// Steady-state message loop: owns the live session and routes inbound host
/// messages for the rest of the worker's lifetime.
pub struct SyncHandler {
    state: LinkState,
    session: DocumentSession,
    outbound: Outbound,
}

impl SyncHandler {
    pub fn new(session: DocumentSession, outbound: Outbound) -> Self {
        Self {
            state: LinkState::AwaitingLink,
            session,
            outbound,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn session(&self) -> &DocumentSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DocumentSession {
        &mut self.session
    }

    /// Handle one inbound message. Messages are handled strictly one at a
    /// time; any error poisons the handler and every later call fails fast.
    pub async fn handle(&mut self, message: HostMessage) -> Result<(), SyncError> {
        if self.state == LinkState::Failed {
            return Err(SyncError::HandlerFailed);
        }
        let outcome = self.dispatch(message).await;
        if outcome.is_err() {
            self.state = LinkState::Failed;
        }
        outcome
    }

    async fn dispatch(&mut self, message: HostMessage) -> Result<(), SyncError> {
        match message {
            HostMessage::Rendered => {
                // Re-linking is permitted and replaces the previous binding;
                // it must never stack a second emitter.
                self.session
                    .link_to_host(HOST_SETTER, self.outbound.patch_emitter());
                self.state = LinkState::Linked;
                debug!(target = "sync", "document linked to host");
                Ok(())
            }
            HostMessage::Patch { patch } => {
                if self.state != LinkState::Linked {
                    warn!(target = "sync", "patch received before link, ignoring");
                    return Ok(());
                }
                self.session
                    .document_mut()
                    .apply_patch(&patch, HOST_SETTER)?;
                // The idle reply is the back-pressure signal: the host keeps
                // at most one patch in flight until it sees it.
                self.outbound.idle();
                Ok(())
            }
            HostMessage::Location { location } => {
                if self.state != LinkState::Linked {
                    warn!(target = "sync", "location received before link, ignoring");
                    return Ok(());
                }
                let snapshot: Value = serde_json::from_str(&location)?;
                let Value::Object(snapshot) = snapshot else {
                    return Err(SyncError::SnapshotNotObject);
                };
                if let Some(location) = self.session.location_mut() {
                    let applied = location.apply_overlay(&snapshot);
                    debug!(target = "sync", applied, "location overlay applied");
                }
                Ok(())
            }
            // Unrecognized tags are a deliberate no-op so newer hosts can
            // talk to older workers.
            HostMessage::Unknown => Ok(()),
        }
    }
}
