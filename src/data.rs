//! Per-process key/value data store.
//!
//! The supervisor owns one store; each worker receives a value copy of it in
//! its startup payload at spawn time. After that instant the two stores are
//! fully independent: nothing written on either side propagates to the other.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PreforkError, Result};

/// A key/value mapping owned by exactly one process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataStore {
    entries: HashMap<String, Value>,
}

impl DataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from an existing mapping.
    pub fn from_map(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }

    /// Build a store from a flat alternating key/value list.
    ///
    /// Fails on an odd-length list or when a key position is not a string.
    pub fn from_args(args: &[Value]) -> Result<Self> {
        if args.len() % 2 != 0 {
            return Err(PreforkError::Config(format!(
                "initial data takes an even-length key/value list, got {} items",
                args.len()
            )));
        }
        let mut store = Self::new();
        for (i, pair) in args.chunks_exact(2).enumerate() {
            let Value::String(key) = &pair[0] else {
                return Err(PreforkError::Config(format!(
                    "data key at position {} is not a string: {}",
                    i * 2,
                    pair[0]
                )));
            };
            store.entries.insert(key.clone(), pair[1].clone());
        }
        Ok(store)
    }

    /// Look up a single key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Insert one entry. Returns `&mut Self` for call chaining.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Merge entries into the store. Returns `&mut Self` for call chaining.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = (String, Value)>) -> &mut Self {
        self.entries.extend(entries);
        self
    }

    /// Value copy of the full mapping.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_and_chaining() {
        let mut store = DataStore::new();
        store.set("host", "localhost").set("port", 8080);
        assert_eq!(store.get("host"), Some(&json!("localhost")));
        assert_eq!(store.get("port"), Some(&json!(8080)));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_merge() {
        let mut store = DataStore::new();
        store.set("a", 1);
        store.merge(vec![
            ("b".to_string(), json!(2)),
            ("a".to_string(), json!(10)),
        ]);
        assert_eq!(store.get("a"), Some(&json!(10)));
        assert_eq!(store.get("b"), Some(&json!(2)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_from_args() {
        let store =
            DataStore::from_args(&[json!("name"), json!("worker"), json!("count"), json!(3)])
                .unwrap();
        assert_eq!(store.get("name"), Some(&json!("worker")));
        assert_eq!(store.get("count"), Some(&json!(3)));
    }

    #[test]
    fn test_from_args_odd_length_fails() {
        let err = DataStore::from_args(&[json!("a"), json!(1), json!("dangling")]).unwrap_err();
        assert!(err.to_string().contains("even-length"));
    }

    #[test]
    fn test_from_args_non_string_key_fails() {
        let err = DataStore::from_args(&[json!(1), json!("x")]).unwrap_err();
        assert!(err.to_string().contains("not a string"));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut store = DataStore::new();
        store.set("k", "v");
        let mut snap = store.snapshot();
        snap.insert("k".into(), json!("other"));
        assert_eq!(store.get("k"), Some(&json!("v")));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut store = DataStore::new();
        store.set("k", json!({"nested": [1, 2]}));
        let encoded = serde_json::to_string(&store).unwrap();
        let decoded: DataStore = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, store);
    }
}
