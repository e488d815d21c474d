//! # Shared State Store
//!
//! Thread-safe keyed mapping used by handlers to share per-task and
//! per-device state between messages. Values are opaque JSON values tagged
//! by the caller. This is the only sanctioned cross-handler mutable state;
//! handlers never share state through globals.
//!
//! Reads observe either the pre-update or post-update value; `update` is a
//! linearisable read-modify-write per key.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Concurrent key-value store shared across handlers.
#[derive(Debug, Default)]
pub struct StateStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        let mut entries = self.entries.write().await;
        entries.insert(key.into(), value);
    }

    /// Fetch a value, if present.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        entries.get(key).cloned()
    }

    /// Tuple-style fetch: `(found, value)` with `Null` when absent.
    pub async fn try_get(&self, key: &str) -> (bool, Value) {
        match self.get(key).await {
            Some(value) => (true, value),
            None => (false, Value::Null),
        }
    }

    /// Whether a key is present.
    pub async fn contains(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        entries.contains_key(key)
    }

    /// Remove a key; returns whether it was present.
    pub async fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(key).is_some()
    }

    /// Atomic read-modify-write of a single key. The closure receives the
    /// current value (if any) and returns the new value.
    pub async fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut entries = self.entries.write().await;
        let next = f(entries.get(key));
        entries.insert(key.to_string(), next.clone());
        next
    }

    /// Number of stored keys.
    pub async fn count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    /// Snapshot of the key set.
    pub async fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        entries.keys().cloned().collect()
    }

    /// Keys beginning with a prefix.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let entries = self.entries.read().await;
        entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Full point-in-time copy of the map.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        let entries = self.entries.read().await;
        entries.clone()
    }

    /// Remove every entry.
    pub async fn clear_all(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = StateStore::new();
        store.set("sensor:grating", json!("out")).await;

        assert_eq!(store.get("sensor:grating").await, Some(json!("out")));
        assert!(store.contains("sensor:grating").await);
        assert_eq!(store.count().await, 1);

        assert!(store.remove("sensor:grating").await);
        assert!(!store.remove("sensor:grating").await);
        assert_eq!(store.get("sensor:grating").await, None);
    }

    #[tokio::test]
    async fn test_try_get() {
        let store = StateStore::new();
        store.set("k", json!(42)).await;

        assert_eq!(store.try_get("k").await, (true, json!(42)));
        assert_eq!(store.try_get("missing").await, (false, Value::Null));
    }

    #[tokio::test]
    async fn test_update_is_read_modify_write() {
        let store = StateStore::new();
        store.set("counter", json!(0)).await;

        for _ in 0..10 {
            store
                .update("counter", |current| {
                    let n = current.and_then(Value::as_i64).unwrap_or(0);
                    json!(n + 1)
                })
                .await;
        }
        assert_eq!(store.get("counter").await, Some(json!(10)));
    }

    #[tokio::test]
    async fn test_update_linearises_concurrent_writers() {
        let store = Arc::new(StateStore::new());
        store.set("counter", json!(0)).await;

        let mut joins = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store
                        .update("counter", |current| {
                            let n = current.and_then(Value::as_i64).unwrap_or(0);
                            json!(n + 1)
                        })
                        .await;
                }
            }));
        }
        for join in joins {
            join.await.unwrap();
        }
        assert_eq!(store.get("counter").await, Some(json!(800)));
    }

    #[tokio::test]
    async fn test_keys_and_snapshot() {
        let store = StateStore::new();
        store.set("task:1:status", json!("created")).await;
        store.set("task:2:status", json!("moving")).await;
        store.set("motion:current_position", json!(1200)).await;

        let mut keys = store.keys().await;
        keys.sort();
        assert_eq!(keys.len(), 3);

        let task_keys = store.keys_with_prefix("task:").await;
        assert_eq!(task_keys.len(), 2);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["motion:current_position"], json!(1200));

        store.clear_all().await;
        assert_eq!(store.count().await, 0);
    }
}
