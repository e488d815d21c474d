//! Coder handler: per-code validation results and collect-window
//! completions.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::{code_format, topic_keys};
use crate::handlers::decode_envelope;
use crate::messaging::payloads::{CoderComplete, CoderResult};
use crate::messaging::{
    EnvelopePublisher, MessageHandler, MessagePriority, TopicRegistry,
};
use crate::orchestration::WorkflowEngine;
use crate::state_machine::{TaskStatus, WorkflowEvent};
use crate::state_store::StateStore;

/// Outcome of validating one decoded code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeValidation {
    Valid,
    Invalid,
    UnknownType,
}

/// Validate a decoded code against its claimed format.
///
/// QR codes are 3..=1000 characters; barcodes are 8..=20 digits;
/// datamatrix codes are at least 3 characters.
pub fn validate_code(code: &str, code_type: &str) -> CodeValidation {
    match code_type {
        "qr" | "qrcode" => {
            if (code_format::QR_MIN_LEN..=code_format::QR_MAX_LEN).contains(&code.len()) {
                CodeValidation::Valid
            } else {
                CodeValidation::Invalid
            }
        }
        "barcode" => {
            let digits_only = !code.is_empty() && code.chars().all(|c| c.is_ascii_digit());
            if digits_only
                && (code_format::BARCODE_MIN_LEN..=code_format::BARCODE_MAX_LEN)
                    .contains(&code.len())
            {
                CodeValidation::Valid
            } else {
                CodeValidation::Invalid
            }
        }
        "datamatrix" => {
            if code.len() >= code_format::DATAMATRIX_MIN_LEN {
                CodeValidation::Valid
            } else {
                CodeValidation::Invalid
            }
        }
        _ => CodeValidation::UnknownType,
    }
}

/// Handles `coder/service/result` and `coder/service/complete`.
pub struct CoderHandler {
    result_topic: String,
    complete_topic: String,
    store: Arc<StateStore>,
    publisher: Arc<dyn EnvelopePublisher>,
    engine: WorkflowEngine,
}

impl CoderHandler {
    pub fn new(
        registry: &TopicRegistry,
        store: Arc<StateStore>,
        publisher: Arc<dyn EnvelopePublisher>,
        engine: WorkflowEngine,
    ) -> Self {
        Self {
            result_topic: registry
                .resolve_default(topic_keys::CODER_RESULT)
                .unwrap_or_else(|_| "ios/v1/coder/service/result".to_string()),
            complete_topic: registry
                .resolve_default(topic_keys::CODER_COMPLETE)
                .unwrap_or_else(|_| "ios/v1/coder/service/complete".to_string()),
            store,
            publisher,
            engine,
        }
    }

    async fn on_result(&self, envelope: crate::messaging::Envelope) {
        let result: CoderResult = match envelope.payload() {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "malformed coder result dropped");
                let _ = self
                    .publisher
                    .publish_data(
                        topic_keys::CODER_VALIDATION_ERROR,
                        json!({ "error": "malformed coder result" }),
                        MessagePriority::Normal,
                        None,
                    )
                    .await;
                return;
            }
        };

        let task_id = result.task_id.clone();
        self.store
            .set(
                format!("task:{task_id}:last_code"),
                json!({ "code": result.code, "code_type": result.code_type }),
            )
            .await;

        let (topic_key, status) = match validate_code(&result.code, &result.code_type) {
            CodeValidation::Valid => (topic_keys::CODER_VALIDATION_SUCCESS, "valid"),
            CodeValidation::Invalid => (topic_keys::CODER_VALIDATION_FAILED, "invalid"),
            CodeValidation::UnknownType => (topic_keys::CODER_VALIDATION_ERROR, "unknown_type"),
        };
        self.publisher
            .publish_data(
                topic_key,
                json!({
                    "task_id": task_id,
                    "code": result.code,
                    "code_type": result.code_type,
                    "status": status,
                }),
                MessagePriority::Normal,
                Some(task_id.clone()),
            )
            .await;
        debug!(task_id, code_type = %result.code_type, status, "code validated");
    }

    async fn on_complete(&self, envelope: crate::messaging::Envelope) {
        let report: CoderComplete = match envelope.payload() {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "malformed coder completion dropped");
                return;
            }
        };

        self.store
            .set(
                "coder:last_complete",
                json!({
                    "direction": report.direction,
                    "codes": report.codes,
                    "success": report.success,
                    "timestamp": report.timestamp,
                }),
            )
            .await;

        let event = if report.success {
            WorkflowEvent::CodesCollected {
                codes: report.codes.clone(),
            }
        } else {
            WorkflowEvent::fault(
                report
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "coder reported failure".to_string()),
            )
        };

        let routed = self
            .engine
            .submit_to_state(TaskStatus::Scanning, envelope.message_id, event)
            .await;
        match routed {
            Some(task_id) => {
                self.store
                    .set(format!("task:{task_id}:coder_status"), json!("completed"))
                    .await;
            }
            None => debug!("coder completion with no task scanning"),
        }
    }
}

#[async_trait]
impl MessageHandler for CoderHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let Some(envelope) = decode_envelope(topic, payload) else {
            return;
        };
        if topic == self.result_topic {
            self.on_result(envelope).await;
        } else if topic == self.complete_topic {
            self.on_complete(envelope).await;
        } else {
            debug!(topic, "coder handler ignoring unrelated topic");
        }
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.result_topic.clone(), self.complete_topic.clone()]
    }

    fn name(&self) -> &str {
        "coder"
    }
}
