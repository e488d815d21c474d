use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of an outbound task.
///
/// A task is created on a grating trigger and advances through the
/// measurement, motion, scanning, and order-lookup steps; once terminal
/// (`Completed`, `Failed`, `Cancelled`) no further field is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Initial state when the task is created.
    #[default]
    Created,
    /// Waiting for the vision service to report the stack height.
    HeightMeasured,
    /// Axis move commanded; waiting for motion completion.
    Moving,
    /// Scanner collect window open; waiting for the coder service.
    Scanning,
    /// Order lookup requested; waiting for the order assignment.
    OrderPending,
    /// Task finalised with an order id.
    Completed,
    /// Task failed with a recorded error.
    Failed,
    /// Task cancelled by an operator or at restart.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the task is still progressing through the workflow.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::HeightMeasured => write!(f, "height_measured"),
            Self::Moving => write!(f, "moving"),
            Self::Scanning => write!(f, "scanning"),
            Self::OrderPending => write!(f, "order_pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "height_measured" => Ok(Self::HeightMeasured),
            "moving" => Ok(Self::Moving),
            "scanning" => Ok(Self::Scanning),
            "order_pending" => Ok(Self::OrderPending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}
