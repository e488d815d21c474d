//! Outbound task record owned by the workflow engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messaging::Direction;
use crate::state_machine::TaskStatus;

/// One end-to-end unloading workflow instance, trigger to business event.
///
/// All mutations go through the engine's per-task queue; once the status
/// is terminal no further field changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub direction: Direction,
    /// Stack height in millimetres, computed from geometry once the
    /// measurement arrives.
    pub stack_height: f64,
    /// Raw camera measurement in metres.
    pub measured_height: Option<f64>,
    /// Commanded axis target in millimetres.
    pub target_position: Option<f64>,
    /// Collected codes in per-endpoint arrival order.
    pub codes: Vec<String>,
    pub order_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundTask {
    /// Create a task in its initial state.
    pub fn new(task_id: impl Into<String>, direction: Direction) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Created,
            direction,
            stack_height: 0.0,
            measured_height: None,
            target_position: None,
            codes: Vec::new(),
            order_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp a mutation time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_initial_state() {
        let task = OutboundTask::new("task-1", Direction::Out);
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.direction, Direction::Out);
        assert!(task.codes.is_empty());
        assert!(task.order_id.is_none());
        assert!(task.error.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }
}
