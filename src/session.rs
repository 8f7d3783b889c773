use serde_json::Value;

use crate::document::LiveDocument;
use crate::location::LocationState;
use crate::protocol::PatchEmitter;

/// Explicit owner of the worker-side live state: the document model plus the
/// optional location schema.
///
/// An ordinary value owned by the sync handler and passed by reference into
/// every operation, so the one-document-per-worker invariant is carried by
/// ownership rather than by an ambient singleton.
#[derive(Default)]
pub struct DocumentSession {
    document: LiveDocument,
    location: Option<LocationState>,
}

impl DocumentSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &LiveDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut LiveDocument {
        &mut self.document
    }

    /// Install the initial model produced by the render program.
    pub fn adopt_model(&mut self, model: Value) {
        self.document.adopt(model);
    }

    /// Declare the location schema. Only the render program calls this; a
    /// session without one ignores location overlays entirely.
    pub fn init_location<I>(&mut self, params: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.location = Some(LocationState::new(params));
    }

    pub fn location(&self) -> Option<&LocationState> {
        self.location.as_ref()
    }

    pub fn location_mut(&mut self) -> Option<&mut LocationState> {
        self.location.as_mut()
    }

    /// Bind the document's change stream to the host bridge. Replaces any
    /// existing binding.
    pub fn link_to_host(&mut self, setter: &str, emitter: PatchEmitter) {
        self.document.bind(setter, emitter);
    }
}
