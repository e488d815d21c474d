//! Grating sensor handler: turns trigger events into new outbound tasks.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::constants::topic_keys;
use crate::handlers::decode_envelope;
use crate::messaging::payloads::SensorTrigger;
use crate::messaging::{MessageHandler, TopicRegistry};
use crate::orchestration::WorkflowEngine;
use crate::state_store::StateStore;

/// Handles `sensor/grating/trigger`.
///
/// Records the trigger direction under `sensor:grating` and starts a new
/// outbound task. Redelivered triggers (same envelope message id) do not
/// start a second task.
pub struct SensorHandler {
    trigger_topic: String,
    store: Arc<StateStore>,
    engine: WorkflowEngine,
    seen_triggers: Mutex<HashSet<Uuid>>,
}

impl SensorHandler {
    pub fn new(registry: &TopicRegistry, store: Arc<StateStore>, engine: WorkflowEngine) -> Self {
        let trigger_topic = registry
            .resolve_default(topic_keys::SENSOR_TRIGGER)
            .unwrap_or_else(|_| "ios/v1/sensor/grating/trigger".to_string());
        Self {
            trigger_topic,
            store,
            engine,
            seen_triggers: Mutex::new(HashSet::new()),
        }
    }

    fn first_delivery(&self, message_id: Uuid) -> bool {
        let mut seen = self
            .seen_triggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.insert(message_id)
    }
}

#[async_trait]
impl MessageHandler for SensorHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let Some(envelope) = decode_envelope(topic, payload) else {
            return;
        };
        let trigger: SensorTrigger = match envelope.payload() {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!(topic, error = %e, "malformed trigger payload dropped");
                return;
            }
        };

        if !self.first_delivery(envelope.message_id) {
            info!(message_id = %envelope.message_id, "redelivered trigger ignored");
            return;
        }

        self.store
            .set("sensor:grating", json!(trigger.direction.to_string()))
            .await;

        let task_id = self
            .engine
            .start_task(trigger.direction, envelope.message_id)
            .await;
        info!(task_id, direction = %trigger.direction, "trigger accepted");
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.trigger_topic.clone()]
    }

    fn name(&self) -> &str {
        "sensor"
    }
}
