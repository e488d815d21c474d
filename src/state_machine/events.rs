use serde::{Deserialize, Serialize};

use crate::messaging::Direction;

/// Events that drive an outbound task through its workflow.
///
/// Handlers translate inbound bus messages into these events and feed
/// them to the engine; the engine owns all state writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Grating trigger starting the task.
    Trigger { direction: Direction },
    /// Vision reported the measured minimum height (metres).
    HeightMeasured { min_height: f64 },
    /// Motion reported move completion (position in pulses).
    MotionCompleted { final_position: i64, success: bool },
    /// Coder collect window closed with the gathered codes.
    CodesCollected { codes: Vec<String> },
    /// Order service assigned an order for the collected codes.
    OrderAssigned { order_id: String },
    /// Operator or restart cancellation.
    Cancel,
    /// Fatal error raised by a step.
    Fault { error: String },
}

impl WorkflowEvent {
    /// String tag for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Trigger { .. } => "trigger",
            Self::HeightMeasured { .. } => "height_measured",
            Self::MotionCompleted { .. } => "motion_completed",
            Self::CodesCollected { .. } => "codes_collected",
            Self::OrderAssigned { .. } => "order_assigned",
            Self::Cancel => "cancel",
            Self::Fault { .. } => "fault",
        }
    }

    /// Error message carried by a fault event.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fault { error } => Some(error),
            _ => None,
        }
    }

    /// Create a fault event.
    pub fn fault(error: impl Into<String>) -> Self {
        Self::Fault {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags() {
        assert_eq!(
            WorkflowEvent::Trigger {
                direction: Direction::In
            }
            .event_type(),
            "trigger"
        );
        assert_eq!(WorkflowEvent::Cancel.event_type(), "cancel");
        assert_eq!(WorkflowEvent::fault("x").event_type(), "fault");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            WorkflowEvent::fault("axis offline").error_message(),
            Some("axis offline")
        );
        assert_eq!(WorkflowEvent::Cancel.error_message(), None);
    }

    #[test]
    fn test_serde_tagged_form() {
        let event = WorkflowEvent::HeightMeasured { min_height: 1.8 };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "height_measured");
        assert_eq!(value["data"]["min_height"], 1.8);
    }
}
