//! Vision handler: height results, detections, and raw camera results.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::topic_keys;
use crate::handlers::decode_envelope;
use crate::messaging::payloads::{HeightResult, VisionDetection};
use crate::messaging::{MessageHandler, TopicRegistry};
use crate::orchestration::WorkflowEngine;
use crate::state_machine::{TaskStatus, WorkflowEvent};
use crate::state_store::StateStore;

/// Handles `vision/height/result`, `vision/camera/detection`, and
/// `vision/camera/result`.
pub struct VisionHandler {
    height_topic: String,
    detection_topic: String,
    result_topic: String,
    store: Arc<StateStore>,
    engine: WorkflowEngine,
}

impl VisionHandler {
    pub fn new(registry: &TopicRegistry, store: Arc<StateStore>, engine: WorkflowEngine) -> Self {
        Self {
            height_topic: registry
                .resolve_default(topic_keys::VISION_HEIGHT_RESULT)
                .unwrap_or_else(|_| "ios/v1/vision/height/result".to_string()),
            detection_topic: registry
                .resolve_default(topic_keys::VISION_DETECTION)
                .unwrap_or_else(|_| "ios/v1/vision/camera/detection".to_string()),
            result_topic: registry
                .resolve_default(topic_keys::VISION_RESULT)
                .unwrap_or_else(|_| "ios/v1/vision/camera/result".to_string()),
            store,
            engine,
        }
    }

    async fn on_height_result(&self, envelope: crate::messaging::Envelope) {
        let result: HeightResult = match envelope.payload() {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "malformed height result dropped");
                return;
            }
        };
        self.store.set("min_height", json!(result.min_height)).await;

        let routed = self
            .engine
            .submit_to_state(
                TaskStatus::HeightMeasured,
                envelope.message_id,
                WorkflowEvent::HeightMeasured {
                    min_height: result.min_height,
                },
            )
            .await;
        match routed {
            Some(task_id) => debug!(task_id, min_height = result.min_height, "height recorded"),
            None => debug!("height result with no task awaiting measurement"),
        }
    }

    async fn on_detection(&self, envelope: crate::messaging::Envelope) {
        let detection: VisionDetection = match envelope.payload() {
            Ok(detection) => detection,
            Err(e) => {
                warn!(error = %e, "malformed detection dropped");
                return;
            }
        };

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for object in &detection.detected_objects {
            let class = match object.object_type.as_str() {
                "package" => "package",
                "qrcode" => "qrcode",
                "barcode" => "barcode",
                _ => "other",
            };
            *counts.entry(class).or_insert(0) += 1;
        }

        let task_id = &detection.task_id;
        self.store
            .set(
                format!("vision:{task_id}:detection"),
                json!(detection.detected_objects),
            )
            .await;
        self.store
            .set(format!("vision:{task_id}:detection_counts"), json!(counts))
            .await;
        debug!(
            task_id,
            objects = detection.detected_objects.len(),
            "detections recorded"
        );
    }

    async fn on_result(&self, envelope: crate::messaging::Envelope) {
        // Raw result; keyed by the correlated task when present.
        let task_id = envelope
            .correlation_id
            .clone()
            .unwrap_or_else(|| "unassigned".to_string());
        self.store
            .set(format!("vision:{task_id}:result"), envelope.data.clone())
            .await;
    }
}

#[async_trait]
impl MessageHandler for VisionHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let Some(envelope) = decode_envelope(topic, payload) else {
            return;
        };
        if topic == self.height_topic {
            self.on_height_result(envelope).await;
        } else if topic == self.detection_topic {
            self.on_detection(envelope).await;
        } else if topic == self.result_topic {
            self.on_result(envelope).await;
        } else {
            debug!(topic, "vision handler ignoring unrelated topic");
        }
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![
            self.height_topic.clone(),
            self.detection_topic.clone(),
            self.result_topic.clone(),
        ]
    }

    fn name(&self) -> &str {
        "vision"
    }
}
