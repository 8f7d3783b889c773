use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location is read-only")]
    ReadOnly,
    #[error("location does not declare parameter {0}")]
    UndeclaredParam(String),
}

/// Worker-side navigation/location state.
///
/// The schema is fixed at construction: only declared parameters can ever be
/// written, and writes are refused while the read-only flag is up (it is up
/// by default). Host snapshots are overlays filtered against this schema;
/// the worker is the authority and the host cannot introduce new keys.
#[derive(Debug)]
pub struct LocationState {
    params: BTreeMap<String, Value>,
    read_only: bool,
}

impl LocationState {
    pub fn new<I>(params: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self {
            params: params.into_iter().collect(),
            read_only: true,
        }
    }

    pub fn declares(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), LocationError> {
        if self.read_only {
            return Err(LocationError::ReadOnly);
        }
        if !self.declares(name) {
            return Err(LocationError::UndeclaredParam(name.to_string()));
        }
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    /// Lift read-only protection for the lifetime of the returned guard.
    /// Protection is restored when the guard drops, on every exit path.
    pub fn edit_readonly(&mut self) -> ReadOnlyGuard<'_> {
        self.read_only = false;
        ReadOnlyGuard { location: self }
    }

    /// Apply a host snapshot: declared keys are written under a scoped
    /// read-only override, undeclared keys are silently dropped. Returns how
    /// many parameters were applied.
    pub fn apply_overlay(&mut self, snapshot: &Map<String, Value>) -> usize {
        let mut guard = self.edit_readonly();
        let mut applied = 0;
        for (name, value) in snapshot {
            if !guard.declares(name) {
                continue;
            }
            if guard.set(name, value.clone()).is_ok() {
                applied += 1;
            }
        }
        applied
    }
}

pub struct ReadOnlyGuard<'a> {
    location: &'a mut LocationState,
}

impl Deref for ReadOnlyGuard<'_> {
    type Target = LocationState;

    fn deref(&self) -> &Self::Target {
        self.location
    }
}

impl DerefMut for ReadOnlyGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.location
    }
}

impl Drop for ReadOnlyGuard<'_> {
    fn drop(&mut self) {
        self.location.read_only = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn location() -> LocationState {
        LocationState::new([
            ("a".to_string(), json!(0)),
            ("b".to_string(), json!(0)),
        ])
    }

    #[test]
    fn overlays_are_filtered_to_declared_keys() {
        let mut location = location();
        let snapshot = json!({"a": 1, "b": 2, "c": 3});
        let applied = location.apply_overlay(snapshot.as_object().expect("object"));

        assert_eq!(applied, 2);
        assert_eq!(location.get("a"), Some(&json!(1)));
        assert_eq!(location.get("b"), Some(&json!(2)));
        assert!(!location.declares("c"));
        assert!(location.is_read_only());
    }

    #[test]
    fn writes_are_refused_while_read_only() {
        let mut location = location();
        assert!(matches!(
            location.set("a", json!(5)),
            Err(LocationError::ReadOnly)
        ));
    }

    #[test]
    fn guard_restores_protection_after_a_failed_update() {
        let mut location = location();
        {
            let mut guard = location.edit_readonly();
            guard.set("a", json!(1)).expect("declared param");
            assert!(matches!(
                guard.set("zoom", json!(2)),
                Err(LocationError::UndeclaredParam(_))
            ));
        }
        assert!(location.is_read_only());
        assert_eq!(location.get("a"), Some(&json!(1)));
    }
}
