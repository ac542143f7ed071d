//! Shared State Store: the one sanctioned piece of cross-handler mutable
//! state. Values are opaque JSON, tagged by whatever key convention the
//! caller chooses (`task:<id>:field`, `sensor:grating`, …).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Concurrent keyed map of opaque values. Safe for concurrent use from any
/// number of handlers; `update` is linearisable per key.
pub struct StateStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries
            .write()
            .expect("state store poisoned")
            .insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().expect("state store poisoned").get(key).cloned()
    }

    /// Non-panicking variant distinguishing "missing" from "present but
    /// null".
    pub fn try_get(&self, key: &str) -> (bool, Option<Value>) {
        let entries = self.entries.read().expect("state store poisoned");
        match entries.get(key) {
            Some(value) => (true, Some(value.clone())),
            None => (false, None),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().expect("state store poisoned").contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .expect("state store poisoned")
            .remove(key)
            .is_some()
    }

    /// Atomic read-modify-write under a single write-lock acquisition.
    /// `f` receives the current value (`None` if absent) and returns the new
    /// value to store.
    pub fn update<F>(&self, key: &str, f: F)
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut entries = self.entries.write().expect("state store poisoned");
        let new_value = f(entries.get(key));
        entries.insert(key.to_string(), new_value);
    }

    pub fn count(&self) -> usize {
        self.entries.read().expect("state store poisoned").len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().expect("state store poisoned").keys().cloned().collect()
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().expect("state store poisoned").clone()
    }

    /// Removes every key whose name starts with `prefix` and ends with one
    /// of `suffixes`. Used by the workflow engine to drop `task:<id>:*temp`
    /// / `*cache` scratch keys on cancellation.
    pub fn clear_matching(&self, prefix: &str, suffixes: &[&str]) {
        let mut entries = self.entries.write().expect("state store poisoned");
        entries.retain(|key, _| {
            if !key.starts_with(prefix) {
                return true;
            }
            !suffixes.iter().any(|suffix| key.ends_with(suffix))
        });
    }

    pub fn clear_all(&self) {
        self.entries.write().expect("state store poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let store = StateStore::new();
        store.set("sensor:grating", json!("in"));
        assert_eq!(store.get("sensor:grating"), Some(json!("in")));
    }

    #[test]
    fn try_get_distinguishes_missing_from_absent() {
        let store = StateStore::new();
        assert_eq!(store.try_get("missing"), (false, None));
        store.set("present", Value::Null);
        assert_eq!(store.try_get("present"), (true, Some(Value::Null)));
    }

    #[test]
    fn update_is_atomic_read_modify_write() {
        let store = StateStore::new();
        store.set("counter", json!(1));
        store.update("counter", |current| {
            let n = current.and_then(|v| v.as_i64()).unwrap_or(0);
            json!(n + 1)
        });
        assert_eq!(store.get("counter"), Some(json!(2)));
    }

    #[test]
    fn update_on_missing_key_starts_from_none() {
        let store = StateStore::new();
        store.update("fresh", |current| {
            assert!(current.is_none());
            json!("created")
        });
        assert_eq!(store.get("fresh"), Some(json!("created")));
    }

    #[test]
    fn remove_reports_whether_a_key_existed() {
        let store = StateStore::new();
        store.set("k", json!(1));
        assert!(store.remove("k"));
        assert!(!store.remove("k"));
    }

    #[test]
    fn clear_matching_only_drops_prefixed_suffixed_keys() {
        let store = StateStore::new();
        store.set("task:1:temp", json!(1));
        store.set("task:1:cache", json!(1));
        store.set("task:1:codes", json!([]));
        store.set("task:2:temp", json!(1));

        store.clear_matching("task:1:", &["temp", "cache"]);

        assert!(!store.contains("task:1:temp"));
        assert!(!store.contains("task:1:cache"));
        assert!(store.contains("task:1:codes"));
        assert!(store.contains("task:2:temp"));
    }

    #[test]
    fn snapshot_and_keys_reflect_current_contents() {
        let store = StateStore::new();
        store.set("a", json!(1));
        store.set("b", json!(2));
        assert_eq!(store.count(), 2);
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn clear_all_empties_the_store() {
        let store = StateStore::new();
        store.set("a", json!(1));
        store.clear_all();
        assert_eq!(store.count(), 0);
    }
}
