//! Catch-all handler for topics nothing else claims.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::topic_keys;
use crate::messaging::{EnvelopePublisher, MessageHandler, MessagePriority};
use crate::state_store::StateStore;

/// Default handler: archives the unknown message for later inspection,
/// publishes `system/events/unknown_topic`, and performs basic
/// category-specific processing for `test/`, `debug/`, and `log/` topics.
pub struct DefaultHandler {
    store: Arc<StateStore>,
    publisher: Arc<dyn EnvelopePublisher>,
}

impl DefaultHandler {
    pub fn new(store: Arc<StateStore>, publisher: Arc<dyn EnvelopePublisher>) -> Self {
        Self { store, publisher }
    }

    /// Best-effort decode of the raw payload for archival.
    fn archive_value(topic: &str, payload: &[u8]) -> Value {
        let body = match serde_json::from_slice::<Value>(payload) {
            Ok(value) => value,
            Err(_) => json!(String::from_utf8_lossy(payload)),
        };
        json!({
            "topic": topic,
            "payload_len": payload.len(),
            "payload": body,
            "received_at": Utc::now(),
        })
    }
}

#[async_trait]
impl MessageHandler for DefaultHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        warn!(topic, payload_len = payload.len(), "unknown topic received");

        let key = format!(
            "unknown_messages:{}:{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        );
        self.store
            .set(key, Self::archive_value(topic, payload))
            .await;

        self.publisher
            .publish_data(
                topic_keys::SYSTEM_UNKNOWN_TOPIC,
                json!({ "topic": topic, "payload_len": payload.len() }),
                MessagePriority::Low,
                None,
            )
            .await;

        // Basic category processing for diagnostic namespaces.
        if topic.starts_with("test/") {
            self.store
                .set("test:last_message", Self::archive_value(topic, payload))
                .await;
        } else if topic.starts_with("debug/") {
            debug!(topic, payload = %String::from_utf8_lossy(payload), "debug message");
        } else if topic.starts_with("log/") {
            info!(topic, payload = %String::from_utf8_lossy(payload), "log message");
        }
    }

    fn supported_topics(&self) -> Vec<String> {
        // Catch-all: installed as the router's default, not under patterns.
        Vec::new()
    }

    fn can_handle(&self, _topic: &str) -> bool {
        true
    }

    fn name(&self) -> &str {
        "default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests_support::CapturePublisher;

    #[tokio::test]
    async fn test_unknown_topic_archived_and_reported() {
        let store = Arc::new(StateStore::new());
        let publisher = CapturePublisher::new();
        let handler = DefaultHandler::new(
            Arc::clone(&store),
            Arc::clone(&publisher) as Arc<dyn EnvelopePublisher>,
        );

        handler.handle("foo/bar/baz", b"\x00arbitrary\xffbytes").await;

        let keys = store.keys_with_prefix("unknown_messages:").await;
        assert_eq!(keys.len(), 1);
        let archived = store.get(&keys[0]).await.unwrap();
        assert_eq!(archived["topic"], json!("foo/bar/baz"));
        assert_eq!(archived["payload_len"], json!(16));

        assert_eq!(publisher.count_for(topic_keys::SYSTEM_UNKNOWN_TOPIC), 1);
        let report = publisher.last_payload(topic_keys::SYSTEM_UNKNOWN_TOPIC).unwrap();
        assert_eq!(report["topic"], json!("foo/bar/baz"));
    }

    #[tokio::test]
    async fn test_each_message_gets_its_own_key() {
        let store = Arc::new(StateStore::new());
        let publisher = CapturePublisher::new();
        let handler = DefaultHandler::new(
            Arc::clone(&store),
            Arc::clone(&publisher) as Arc<dyn EnvelopePublisher>,
        );

        handler.handle("foo/one", b"a").await;
        handler.handle("foo/two", b"b").await;

        assert_eq!(store.keys_with_prefix("unknown_messages:").await.len(), 2);
    }

    #[tokio::test]
    async fn test_test_namespace_processing() {
        let store = Arc::new(StateStore::new());
        let publisher = CapturePublisher::new();
        let handler = DefaultHandler::new(
            Arc::clone(&store),
            Arc::clone(&publisher) as Arc<dyn EnvelopePublisher>,
        );

        handler.handle("test/ping", br#"{"n": 1}"#).await;

        let last = store.get("test:last_message").await.unwrap();
        assert_eq!(last["payload"]["n"], json!(1));
    }

    #[tokio::test]
    async fn test_json_payload_archived_structurally() {
        let store = Arc::new(StateStore::new());
        let publisher = CapturePublisher::new();
        let handler = DefaultHandler::new(
            Arc::clone(&store),
            Arc::clone(&publisher) as Arc<dyn EnvelopePublisher>,
        );

        handler.handle("foo/json", br#"{"a": [1, 2]}"#).await;

        let keys = store.keys_with_prefix("unknown_messages:").await;
        let archived = store.get(&keys[0]).await.unwrap();
        assert_eq!(archived["payload"]["a"], json!([1, 2]));
    }
}
