//! # Wire Payloads
//!
//! Typed payload schemas carried in the `data` field of envelopes on the
//! workflow topics. Field names on the wire match the cross-service
//! contract (snake_case inside payloads, unlike the camelCase envelope
//! frame around them).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task direction through the workcell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            other => Err(format!("invalid direction: {other}")),
        }
    }
}

/// `sensor.trigger` — grating event starting a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorTrigger {
    pub direction: Direction,
}

/// `vision.height.request` — ask the vision service for the stack height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightRequest {
    pub task_id: String,
    pub direction: Direction,
}

/// `vision.height.result` — measured minimum height in metres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightResult {
    pub min_height: f64,
    pub timestamp: DateTime<Utc>,
}

/// A single classified detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// `vision.detection` — detections for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionDetection {
    pub task_id: String,
    pub detected_objects: Vec<DetectedObject>,
    pub timestamp: DateTime<Utc>,
}

/// `motion.move` — absolute move command, millimetres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionMove {
    pub task_id: String,
    pub position_mm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
}

/// `motion.complete` — move completion report, pulses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionComplete {
    pub task_id: String,
    pub final_position: i64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// `motion.position` — periodic axis position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: DateTime<Utc>,
}

/// `coder.start` — open a scanner collect window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderStart {
    pub direction: Direction,
    pub stack_height: f64,
}

/// `coder.result` — a single decoded code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderResult {
    pub task_id: String,
    pub code: String,
    pub code_type: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// `coder.complete` — the collect window result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderComplete {
    pub direction: Direction,
    pub stack_height: f64,
    pub codes: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// `order.new` — order assignment from the order service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderNew {
    pub order_id: String,
}

/// `order.request` — order lookup request for a finished scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub task_id: String,
    pub codes: Vec<String>,
    pub direction: Direction,
}

/// `coder.odoo` — the business event closing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderOdoo {
    pub order_id: String,
    pub codes: Vec<String>,
    pub direction: Direction,
    pub stack_height: f64,
    pub timestamp: DateTime<Utc>,
}

/// `status.heartbeat` — per-service liveness beat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direction_wire_form() {
        assert_eq!(serde_json::to_value(Direction::Out).unwrap(), json!("out"));
        assert_eq!(
            serde_json::from_value::<Direction>(json!("in")).unwrap(),
            Direction::In
        );
        assert!(serde_json::from_value::<Direction>(json!("sideways")).is_err());
    }

    #[test]
    fn test_detected_object_type_field() {
        let obj = DetectedObject {
            object_type: "qrcode".to_string(),
            x: 1.0,
            y: 2.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.95,
            content: Some("CODE-A".to_string()),
        };
        let value = serde_json::to_value(&obj).unwrap();
        assert_eq!(value["type"], json!("qrcode"));
    }

    #[test]
    fn test_motion_move_optional_speed() {
        let payload: MotionMove =
            serde_json::from_value(json!({"task_id": "t1", "position_mm": 120.5})).unwrap();
        assert!(payload.speed.is_none());
        assert_eq!(payload.position_mm, 120.5);
    }

    #[test]
    fn test_coder_complete_round_trip() {
        let payload = CoderComplete {
            direction: Direction::Out,
            stack_height: 320.0,
            codes: vec!["CODE-A".to_string(), "CODE-B".to_string()],
            timestamp: Utc::now(),
            success: true,
            error_message: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["codes"], json!(["CODE-A", "CODE-B"]));
        assert!(value.get("error_message").is_none());
    }
}
