//! # Workflow Orchestration
//!
//! The scheduler-side engine that drives outbound tasks across the
//! vision, motion, coder, and order services, plus the geometry used to
//! turn measurements into axis targets.

pub mod engine;
pub mod geometry;
pub mod task;

pub use engine::{WorkflowConfig, WorkflowEngine};
pub use task::OutboundTask;
