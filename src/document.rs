use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::protocol::PatchEmitter;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed patch: {0}")]
    MalformedPatch(String),
    #[error("unsupported patch op: {0}")]
    UnsupportedOp(String),
    #[error("no value at {0}")]
    MissingPath(String),
    #[error("cannot write through non-container value at {0}")]
    NotAContainer(String),
}

struct PatchBinding {
    setter: String,
    emitter: PatchEmitter,
}

/// The worker's live document model.
///
/// This is the single piece of mutable shared state inside a worker. Every
/// mutation passes through here and carries a setter tag naming its origin;
/// the optional change binding forwards mutations to the host unless they
/// came from the host in the first place, which is what breaks the
/// host→worker→host echo loop.
pub struct LiveDocument {
    model: Value,
    binding: Option<PatchBinding>,
}

impl Default for LiveDocument {
    fn default() -> Self {
        Self {
            model: Value::Object(Map::new()),
            binding: None,
        }
    }
}

impl LiveDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the initial model produced by the render program. The worker
    /// keeps no other copy; from here on this is the authoritative state.
    pub fn adopt(&mut self, model: Value) {
        self.model = model;
    }

    pub fn snapshot(&self) -> &Value {
        &self.model
    }

    /// Bind the change stream to an outbound emitter. Mutations whose setter
    /// differs from `setter` are forwarded. Rebinding replaces the previous
    /// binding; emissions never stack.
    pub fn bind(&mut self, setter: &str, emitter: PatchEmitter) {
        self.binding = Some(PatchBinding {
            setter: setter.to_string(),
            emitter,
        });
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Apply an opaque patch. Accepted shapes: a single op object, an array
    /// of ops, or a `{"events": [...]}` batch. Ops are `{op, path, value}`
    /// with `op` one of `set`/`remove` and a JSON-pointer `path`.
    pub fn apply_patch(&mut self, patch: &Value, setter: &str) -> Result<(), DocumentError> {
        for op in patch_ops(patch)? {
            self.apply_op(op)?;
        }
        self.forward(patch, setter);
        Ok(())
    }

    /// Worker-side single-value mutation, forwarded as a synthesized op.
    pub fn set(&mut self, path: &str, value: Value, setter: &str) -> Result<(), DocumentError> {
        set_at_pointer(&mut self.model, path, value.clone())?;
        self.forward(&json!({"op": "set", "path": path, "value": value}), setter);
        Ok(())
    }

    pub fn remove(&mut self, path: &str, setter: &str) -> Result<(), DocumentError> {
        remove_at_pointer(&mut self.model, path)?;
        self.forward(&json!({"op": "remove", "path": path}), setter);
        Ok(())
    }

    fn apply_op(&mut self, op: &Value) -> Result<(), DocumentError> {
        let fields = op
            .as_object()
            .ok_or_else(|| DocumentError::MalformedPatch("op must be an object".into()))?;
        let kind = fields
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| DocumentError::MalformedPatch("op is missing its kind".into()))?;
        let path = fields
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| DocumentError::MalformedPatch("op is missing its path".into()))?;

        match kind {
            "set" => {
                let value = fields.get("value").cloned().unwrap_or(Value::Null);
                set_at_pointer(&mut self.model, path, value)
            }
            "remove" => remove_at_pointer(&mut self.model, path),
            other => Err(DocumentError::UnsupportedOp(other.to_string())),
        }
    }

    fn forward(&self, patch: &Value, setter: &str) {
        if let Some(binding) = &self.binding {
            if binding.setter != setter {
                binding.emitter.emit(patch.clone(), Vec::new());
            }
        }
    }
}

fn patch_ops(patch: &Value) -> Result<Vec<&Value>, DocumentError> {
    match patch {
        Value::Array(ops) => Ok(ops.iter().collect()),
        Value::Object(fields) => {
            if let Some(events) = fields.get("events") {
                match events {
                    Value::Array(ops) => Ok(ops.iter().collect()),
                    _ => Err(DocumentError::MalformedPatch(
                        "events must be an array".into(),
                    )),
                }
            } else if fields.contains_key("op") {
                Ok(vec![patch])
            } else {
                Err(DocumentError::MalformedPatch(
                    "expected an op object, an op array, or an events batch".into(),
                ))
            }
        }
        _ => Err(DocumentError::MalformedPatch(
            "patch must be an object or an array".into(),
        )),
    }
}

fn set_at_pointer(model: &mut Value, path: &str, value: Value) -> Result<(), DocumentError> {
    if path.is_empty() {
        *model = value;
        return Ok(());
    }
    let (parent_path, leaf) = split_pointer(path)?;
    let leaf = unescape_token(leaf);

    let parent = resolve_parent(model, parent_path)?;
    match parent {
        Value::Object(map) => {
            map.insert(leaf, value);
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(&leaf, items.len(), true, path)?;
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        _ => Err(DocumentError::NotAContainer(parent_display(parent_path))),
    }
}

fn remove_at_pointer(model: &mut Value, path: &str) -> Result<(), DocumentError> {
    if path.is_empty() {
        return Err(DocumentError::MalformedPatch(
            "cannot remove the document root".into(),
        ));
    }
    let (parent_path, leaf) = split_pointer(path)?;
    let leaf = unescape_token(leaf);

    let parent = resolve_parent(model, parent_path)?;
    match parent {
        Value::Object(map) => map
            .remove(&leaf)
            .map(|_| ())
            .ok_or_else(|| DocumentError::MissingPath(path.to_string())),
        Value::Array(items) => {
            let index = parse_index(&leaf, items.len(), false, path)?;
            items.remove(index);
            Ok(())
        }
        _ => Err(DocumentError::NotAContainer(parent_display(parent_path))),
    }
}

fn split_pointer(path: &str) -> Result<(&str, &str), DocumentError> {
    if !path.starts_with('/') {
        return Err(DocumentError::MalformedPatch(format!(
            "path must start with '/': {path}"
        )));
    }
    Ok(path.rsplit_once('/').expect("pointer paths start with '/'"))
}

fn resolve_parent<'a>(model: &'a mut Value, parent_path: &str) -> Result<&'a mut Value, DocumentError> {
    if parent_path.is_empty() {
        Ok(model)
    } else {
        model
            .pointer_mut(parent_path)
            .ok_or_else(|| DocumentError::MissingPath(parent_path.to_string()))
    }
}

fn parse_index(
    token: &str,
    len: usize,
    allow_append: bool,
    path: &str,
) -> Result<usize, DocumentError> {
    if token == "-" {
        return Ok(len);
    }
    let index: usize = token
        .parse()
        .map_err(|_| DocumentError::MalformedPatch(format!("invalid array index in {path}")))?;
    let limit = if allow_append { len + 1 } else { len };
    if index >= limit {
        return Err(DocumentError::MissingPath(path.to_string()));
    }
    Ok(index)
}

// JSON-pointer token unescaping: ~1 is '/', ~0 is '~'.
fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn parent_display(parent_path: &str) -> String {
    if parent_path.is_empty() {
        "/".to_string()
    } else {
        parent_path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PatchEmitter, WorkerMessage};
    use tokio::sync::mpsc;

    fn emitter() -> (PatchEmitter, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PatchEmitter::new(tx), rx)
    }

    #[test]
    fn set_writes_through_json_pointers() {
        let mut document = LiveDocument::new();
        document.adopt(json!({"title": "old", "roots": [{"id": "a"}]}));

        document.set("/title", json!("new"), "program").expect("set title");
        document
            .set("/roots/0/id", json!("b"), "program")
            .expect("set nested");

        assert_eq!(
            document.snapshot(),
            &json!({"title": "new", "roots": [{"id": "b"}]})
        );
    }

    #[test]
    fn apply_patch_accepts_single_ops_arrays_and_event_batches() {
        let mut document = LiveDocument::new();
        document.adopt(json!({"a": 1, "b": 2, "items": []}));

        document
            .apply_patch(&json!({"op": "set", "path": "/a", "value": 10}), "host-bridge")
            .expect("single op");
        document
            .apply_patch(
                &json!([
                    {"op": "remove", "path": "/b"},
                    {"op": "set", "path": "/items/-", "value": "x"},
                ]),
                "host-bridge",
            )
            .expect("op array");
        document
            .apply_patch(
                &json!({"events": [{"op": "set", "path": "/items/0", "value": "y"}]}),
                "host-bridge",
            )
            .expect("events batch");

        assert_eq!(document.snapshot(), &json!({"a": 10, "items": ["y"]}));
    }

    #[test]
    fn missing_parents_and_unknown_ops_are_rejected() {
        let mut document = LiveDocument::new();
        document.adopt(json!({"a": 1}));

        let missing = document.apply_patch(
            &json!({"op": "set", "path": "/nested/deep", "value": 1}),
            "host-bridge",
        );
        assert!(matches!(missing, Err(DocumentError::MissingPath(_))));

        let unknown = document.apply_patch(
            &json!({"op": "transmogrify", "path": "/a"}),
            "host-bridge",
        );
        assert!(matches!(unknown, Err(DocumentError::UnsupportedOp(_))));
    }

    #[test]
    fn escaped_pointer_tokens_resolve() {
        let mut document = LiveDocument::new();
        document.adopt(json!({"a/b": 1}));
        document
            .set("/a~1b", json!(2), "program")
            .expect("escaped token");
        assert_eq!(document.snapshot(), &json!({"a/b": 2}));
    }

    #[test]
    fn host_originated_patches_are_not_echoed() {
        let (emitter, mut rx) = emitter();
        let mut document = LiveDocument::new();
        document.adopt(json!({"title": "old"}));
        document.bind("host-bridge", emitter);

        document
            .apply_patch(
                &json!({"op": "set", "path": "/title", "value": "from-host"}),
                "host-bridge",
            )
            .expect("host patch");
        assert!(rx.try_recv().is_err(), "host patch must not be echoed");

        document
            .set("/title", json!("from-program"), "program")
            .expect("program set");
        match rx.try_recv().expect("program change emitted") {
            WorkerMessage::Patch { patch, .. } => {
                assert_eq!(
                    patch,
                    json!({"op": "set", "path": "/title", "value": "from-program"})
                );
            }
            other => panic!("expected patch, got {other:?}"),
        }
    }

    #[test]
    fn rebinding_replaces_the_previous_emitter() {
        let (first, mut first_rx) = emitter();
        let (second, mut second_rx) = emitter();
        let mut document = LiveDocument::new();
        document.bind("host-bridge", first);
        document.bind("host-bridge", second);

        document.set("/x", json!(1), "program").expect("set");

        assert!(first_rx.try_recv().is_err(), "stale binding must be replaced");
        assert!(second_rx.try_recv().is_ok(), "live binding emits exactly once");
        assert!(second_rx.try_recv().is_err());
    }
}
