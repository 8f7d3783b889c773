use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Messages flowing from the worker to the host page.
///
/// Every message is a tagged object with a `type` field so the host bridge
/// can route on the tag alone without inspecting payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Human-readable bootstrap/runtime progress or error line.
    Status { msg: String },
    /// Initial serialized document, sent exactly once per worker lifetime.
    Render {
        docs_json: Value,
        render_items: Value,
        root_ids: Value,
    },
    /// Worker-originated document delta for the host to apply.
    Patch {
        patch: Value,
        buffers: Vec<Vec<u8>>,
        msg_id: String,
    },
    /// Worker is ready for the next inbound patch.
    Idle,
    /// Steady-state handler failure. The worker is terminal after this.
    Error { msg: String },
}

/// Messages flowing from the host page to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Host confirms the rendered document is attached; triggers linking.
    Rendered,
    /// Host-originated delta for the worker to apply.
    Patch { patch: Value },
    /// Navigation/location overlay, encoded as a JSON string.
    Location { location: String },
    /// Any tag this build does not recognize. Handled as a no-op so newer
    /// hosts can talk to older workers.
    #[serde(other)]
    Unknown,
}

/// The three-part output of the render program. The internal structure of
/// each field is opaque to the worker; it is forwarded untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub docs_json: Value,
    pub render_items: Value,
    pub root_ids: Value,
}

/// Handle for pushing worker-originated patches to the host bridge.
///
/// Cloneable so it can be handed both to the live document's change binding
/// and into the render backend's global namespace (the `sendPatch` seam).
#[derive(Debug, Clone)]
pub struct PatchEmitter {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl PatchEmitter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }

    /// Forward a patch to the host, stamped with a fresh correlation id.
    pub fn emit(&self, patch: Value, buffers: Vec<Vec<u8>>) {
        let msg_id = Uuid::new_v4().to_string();
        if self
            .tx
            .send(WorkerMessage::Patch {
                patch,
                buffers,
                msg_id,
            })
            .is_err()
        {
            tracing::debug!(target = "worker", "host bridge closed, dropping patch");
        }
    }
}
