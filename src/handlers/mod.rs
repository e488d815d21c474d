//! # Handler Set
//!
//! Per-domain handlers implementing the uniform dispatch contract
//! ([`crate::messaging::MessageHandler`]). Handlers translate inbound bus
//! messages into shared-state writes, outbound publishes, and workflow
//! events; they never propagate errors. A protocol error (undecodable
//! envelope, schema mismatch) is logged with the topic and payload length
//! and the message is dropped.

pub mod coder;
pub mod default;
pub mod motion;
pub mod sensor;
pub mod system;
pub mod vision;

pub use coder::CoderHandler;
pub use default::DefaultHandler;
pub use motion::MotionHandler;
pub use sensor::SensorHandler;
pub use system::SystemHandler;
pub use vision::VisionHandler;

use std::sync::Arc;
use tracing::{debug, warn};

use crate::messaging::{Envelope, EnvelopePublisher, Router, TopicRegistry};
use crate::orchestration::WorkflowEngine;
use crate::state_store::StateStore;

/// Decode an inbound envelope, applying the receiver-side drop rules:
/// undecodable and expired envelopes return `None` and are logged.
pub(crate) fn decode_envelope(topic: &str, payload: &[u8]) -> Option<Envelope> {
    let envelope = match Envelope::deserialize(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(
                topic,
                payload_len = payload.len(),
                error = %e,
                "undecodable envelope dropped"
            );
            return None;
        }
    };
    if envelope.is_expired() {
        debug!(topic, message_id = %envelope.message_id, "expired envelope dropped");
        return None;
    }
    Some(envelope)
}

/// Construct the full scheduler handler set and register it on a router.
///
/// The default handler is installed as the router's catch-all; every other
/// handler is registered under the topics it reports.
pub async fn install_handlers(
    router: &Router,
    registry: &TopicRegistry,
    store: Arc<StateStore>,
    publisher: Arc<dyn EnvelopePublisher>,
    engine: WorkflowEngine,
) {
    router
        .register_handler(Arc::new(SensorHandler::new(
            registry,
            Arc::clone(&store),
            engine.clone(),
        )))
        .await;
    router
        .register_handler(Arc::new(VisionHandler::new(
            registry,
            Arc::clone(&store),
            engine.clone(),
        )))
        .await;
    router
        .register_handler(Arc::new(MotionHandler::new(
            registry,
            Arc::clone(&store),
            Arc::clone(&publisher),
            engine.clone(),
        )))
        .await;
    router
        .register_handler(Arc::new(CoderHandler::new(
            registry,
            Arc::clone(&store),
            Arc::clone(&publisher),
            engine.clone(),
        )))
        .await;
    router
        .register_handler(Arc::new(SystemHandler::new(
            registry,
            Arc::clone(&store),
            Arc::clone(&publisher),
            engine,
        )))
        .await;
    router
        .set_default_handler(Arc::new(DefaultHandler::new(
            Arc::clone(&store),
            publisher,
        )))
        .await;
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::messaging::MessagePriority;
    use crate::orchestration::WorkflowConfig;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Publisher double recording every enveloped publish.
    pub(crate) struct CapturePublisher {
        published: Mutex<Vec<(String, Value)>>,
    }

    impl CapturePublisher {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                published: Mutex::new(Vec::new()),
            })
        }

        pub fn topics(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }

        pub fn count_for(&self, topic_key: &str) -> usize {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(key, _)| key == topic_key)
                .count()
        }

        pub fn last_payload(&self, topic_key: &str) -> Option<Value> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(key, _)| key == topic_key)
                .map(|(_, data)| data.clone())
        }

        /// Poll until a publish on `topic_key` appears.
        pub async fn wait_for(&self, topic_key: &str) -> Value {
            for _ in 0..200 {
                if let Some(payload) = self.last_payload(topic_key) {
                    return payload;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("no publish observed on {topic_key}");
        }
    }

    #[async_trait]
    impl EnvelopePublisher for CapturePublisher {
        async fn publish_data(
            &self,
            topic_key: &str,
            data: Value,
            _priority: MessagePriority,
            _correlation_id: Option<String>,
        ) -> bool {
            self.published
                .lock()
                .unwrap()
                .push((topic_key.to_string(), data));
            true
        }
    }

    /// An engine wired to a capturing publisher and a fresh store.
    pub(crate) fn engine_with_capture() -> (WorkflowEngine, Arc<CapturePublisher>) {
        let publisher = CapturePublisher::new();
        let engine = WorkflowEngine::new(
            WorkflowConfig::default(),
            Arc::new(StateStore::new()),
            Arc::clone(&publisher) as Arc<dyn EnvelopePublisher>,
        );
        (engine, publisher)
    }
}
