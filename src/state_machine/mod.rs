//! # Outbound Task State Machine
//!
//! Explicit states, events, and the `{state, event} → state` transition
//! table for the outbound workflow. The transition table lives here so the
//! workflow is readable in one place instead of being spread across
//! handlers; the engine in [`crate::orchestration`] owns all task-state
//! writes and feeds events through a per-task queue.

pub mod events;
pub mod states;

pub use events::WorkflowEvent;
pub use states::TaskStatus;

use thiserror::Error;

/// Errors raised when applying an event to a task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("No transition from {state} on {event}")]
    InvalidTransition { state: TaskStatus, event: String },

    #[error("Task is terminal in state {state}")]
    TerminalState { state: TaskStatus },
}

/// The `{state, event} → state` table.
///
/// Returns the successor state, or an error when the event is not legal
/// in the current state. Cancel and fatal-error transitions are accepted
/// from every non-terminal state.
pub fn next_status(
    current: TaskStatus,
    event: &WorkflowEvent,
) -> Result<TaskStatus, TransitionError> {
    use TaskStatus::*;
    use WorkflowEvent as E;

    if current.is_terminal() {
        return Err(TransitionError::TerminalState { state: current });
    }

    match (current, event) {
        (_, E::Cancel) => Ok(Cancelled),
        (_, E::Fault { .. }) => Ok(Failed),
        (Created, E::Trigger { .. }) => Ok(HeightMeasured),
        (HeightMeasured, E::HeightMeasured { .. }) => Ok(Moving),
        (Moving, E::MotionCompleted { .. }) => Ok(Scanning),
        (Scanning, E::CodesCollected { .. }) => Ok(OrderPending),
        (OrderPending, E::OrderAssigned { .. }) => Ok(Completed),
        (state, event) => Err(TransitionError::InvalidTransition {
            state,
            event: event.event_type().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Direction;

    fn trigger() -> WorkflowEvent {
        WorkflowEvent::Trigger {
            direction: Direction::Out,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut status = TaskStatus::Created;
        let steps = [
            trigger(),
            WorkflowEvent::HeightMeasured { min_height: 1.8 },
            WorkflowEvent::MotionCompleted {
                final_position: 120_000,
                success: true,
            },
            WorkflowEvent::CodesCollected {
                codes: vec!["CODE-A".to_string()],
            },
            WorkflowEvent::OrderAssigned {
                order_id: "ORD-1".to_string(),
            },
        ];
        let expected = [
            TaskStatus::HeightMeasured,
            TaskStatus::Moving,
            TaskStatus::Scanning,
            TaskStatus::OrderPending,
            TaskStatus::Completed,
        ];
        for (event, want) in steps.iter().zip(expected) {
            status = next_status(status, event).unwrap();
            assert_eq!(status, want);
        }
    }

    #[test]
    fn test_cancel_from_any_active_state() {
        for state in [
            TaskStatus::Created,
            TaskStatus::HeightMeasured,
            TaskStatus::Moving,
            TaskStatus::Scanning,
            TaskStatus::OrderPending,
        ] {
            assert_eq!(
                next_status(state, &WorkflowEvent::Cancel).unwrap(),
                TaskStatus::Cancelled
            );
        }
    }

    #[test]
    fn test_fault_from_any_active_state() {
        let fault = WorkflowEvent::Fault {
            error: "axis fault".to_string(),
        };
        for state in [TaskStatus::Created, TaskStatus::Moving, TaskStatus::Scanning] {
            assert_eq!(next_status(state, &fault).unwrap(), TaskStatus::Failed);
        }
    }

    #[test]
    fn test_out_of_order_event_rejected() {
        let err = next_status(
            TaskStatus::Created,
            &WorkflowEvent::OrderAssigned {
                order_id: "ORD-1".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for state in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let err = next_status(state, &trigger()).unwrap_err();
            assert!(matches!(err, TransitionError::TerminalState { .. }));
            let err = next_status(state, &WorkflowEvent::Cancel).unwrap_err();
            assert!(matches!(err, TransitionError::TerminalState { .. }));
        }
    }
}
