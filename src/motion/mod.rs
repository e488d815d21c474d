//! # Motion Adapter
//!
//! Thin wrapper over the vertical axis. The vendor fieldbus driver lives
//! behind the [`Axis`] trait (absolute move, home, stop, read position);
//! the adapter enforces the configured position bounds, tracks the session
//! state, and blocks callers for the physical movement duration.

pub mod adapter;
pub mod axis;

pub use adapter::{AxisStatus, MotionAdapter};
pub use axis::{Axis, AxisError, MockAxis};

use thiserror::Error;

/// Errors produced by the motion adapter.
#[derive(Error, Debug)]
pub enum MotionError {
    #[error("Axis is not initialized")]
    NotInitialized,

    #[error("Axis is already initialized")]
    AlreadyInitialized,

    #[error("Target {target} outside [{min}, {max}]")]
    OutOfRange { target: i64, min: i64, max: i64 },

    #[error("Move timed out after {timeout_ms} ms")]
    MoveTimeout { timeout_ms: u64 },

    #[error("Axis fault: {message}")]
    Axis { message: String },
}

impl From<axis::AxisError> for MotionError {
    fn from(err: axis::AxisError) -> Self {
        Self::Axis {
            message: err.to_string(),
        }
    }
}

/// Result type alias for motion operations
pub type MotionResult<T> = Result<T, MotionError>;
