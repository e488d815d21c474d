//! Motion handler: move completions and periodic position reports.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::topic_keys;
use crate::handlers::decode_envelope;
use crate::messaging::payloads::{MotionComplete, MotionPosition};
use crate::messaging::{
    EnvelopePublisher, MessageHandler, MessagePriority, TopicRegistry,
};
use crate::orchestration::WorkflowEngine;
use crate::state_machine::WorkflowEvent;
use crate::state_store::StateStore;

/// Handles `motion/control/complete` and `motion/control/position`.
pub struct MotionHandler {
    complete_topic: String,
    position_topic: String,
    store: Arc<StateStore>,
    publisher: Arc<dyn EnvelopePublisher>,
    engine: WorkflowEngine,
}

impl MotionHandler {
    pub fn new(
        registry: &TopicRegistry,
        store: Arc<StateStore>,
        publisher: Arc<dyn EnvelopePublisher>,
        engine: WorkflowEngine,
    ) -> Self {
        Self {
            complete_topic: registry
                .resolve_default(topic_keys::MOTION_COMPLETE)
                .unwrap_or_else(|_| "ios/v1/motion/control/complete".to_string()),
            position_topic: registry
                .resolve_default(topic_keys::MOTION_POSITION)
                .unwrap_or_else(|_| "ios/v1/motion/control/position".to_string()),
            store,
            publisher,
            engine,
        }
    }

    async fn on_complete(&self, envelope: crate::messaging::Envelope) {
        let report: MotionComplete = match envelope.payload() {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "malformed motion completion dropped");
                return;
            }
        };

        let task_id = report.task_id.clone();
        self.store
            .set(format!("task:{task_id}:motion_status"), json!("completed"))
            .await;
        self.store
            .set(
                format!("task:{task_id}:final_position"),
                json!(report.final_position),
            )
            .await;

        self.engine.submit(
            &task_id,
            envelope.message_id,
            WorkflowEvent::MotionCompleted {
                final_position: report.final_position,
                success: report.success,
            },
        );

        self.publisher
            .publish_data(
                topic_keys::TASK_NEXT_STEP,
                json!({
                    "task_id": task_id,
                    "step": "motion",
                    "final_position": report.final_position,
                    "success": report.success,
                }),
                MessagePriority::Normal,
                Some(task_id.clone()),
            )
            .await;
        debug!(task_id, final_position = report.final_position, "motion completed");
    }

    async fn on_position(&self, envelope: crate::messaging::Envelope) {
        let position: MotionPosition = match envelope.payload() {
            Ok(position) => position,
            Err(e) => {
                warn!(error = %e, "malformed position report dropped");
                return;
            }
        };
        self.store
            .set(
                "motion:current_position",
                json!({ "x": position.x, "y": position.y, "z": position.z }),
            )
            .await;
        self.store
            .set("motion:last_update", json!(position.timestamp))
            .await;
    }
}

#[async_trait]
impl MessageHandler for MotionHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let Some(envelope) = decode_envelope(topic, payload) else {
            return;
        };
        if topic == self.complete_topic {
            self.on_complete(envelope).await;
        } else if topic == self.position_topic {
            self.on_position(envelope).await;
        } else {
            debug!(topic, "motion handler ignoring unrelated topic");
        }
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.complete_topic.clone(), self.position_topic.clone()]
    }

    fn name(&self) -> &str {
        "motion"
    }
}
