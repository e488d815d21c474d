//! Axis hardware abstraction and the mock used for desktop testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Vendor driver fault.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AxisError {
    #[error("Axis offline")]
    Offline,

    #[error("Driver fault: {0}")]
    Driver(String),
}

/// Contract the vendor fieldbus driver must honour. Positions and speeds
/// are in device pulses and pulses per second.
#[async_trait]
pub trait Axis: Send + Sync {
    /// Power the axis on.
    async fn power_on(&self) -> Result<(), AxisError>;

    /// Power the axis off.
    async fn power_off(&self) -> Result<(), AxisError>;

    /// Begin an absolute move; returns once the command is accepted.
    async fn start_move(&self, target: i64, speed: u32, accel: u32) -> Result<(), AxisError>;

    /// Command a controlled stop with the given deceleration.
    async fn stop(&self, decel: u32) -> Result<(), AxisError>;

    /// Current position in pulses.
    async fn position(&self) -> Result<i64, AxisError>;

    /// Whether a commanded move is still in progress.
    async fn is_moving(&self) -> Result<bool, AxisError>;
}

/// In-memory axis for tests: moves complete after a fixed number of
/// `is_moving` polls, and every command is counted.
pub struct MockAxis {
    powered: AtomicBool,
    position: AtomicI64,
    target: AtomicI64,
    moving_polls_left: AtomicU32,
    /// `is_moving` polls before a move reports done.
    polls_per_move: u32,
    pub move_count: AtomicU32,
    pub stop_count: AtomicU32,
    fail_next_move: AtomicBool,
}

impl MockAxis {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            powered: AtomicBool::new(false),
            position: AtomicI64::new(0),
            target: AtomicI64::new(0),
            moving_polls_left: AtomicU32::new(0),
            polls_per_move: 2,
            move_count: AtomicU32::new(0),
            stop_count: AtomicU32::new(0),
            fail_next_move: AtomicBool::new(false),
        })
    }

    /// Arrange for the next `start_move` to be rejected by the driver.
    pub fn fail_next_move(&self) {
        self.fail_next_move.store(true, Ordering::SeqCst);
    }

    pub fn powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    pub fn current_position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Axis for MockAxis {
    async fn power_on(&self) -> Result<(), AxisError> {
        self.powered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn power_off(&self) -> Result<(), AxisError> {
        self.powered.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start_move(&self, target: i64, _speed: u32, _accel: u32) -> Result<(), AxisError> {
        if !self.powered.load(Ordering::SeqCst) {
            return Err(AxisError::Offline);
        }
        if self.fail_next_move.swap(false, Ordering::SeqCst) {
            return Err(AxisError::Driver("commanded move rejected".to_string()));
        }
        self.move_count.fetch_add(1, Ordering::SeqCst);
        self.target.store(target, Ordering::SeqCst);
        self.moving_polls_left
            .store(self.polls_per_move, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _decel: u32) -> Result<(), AxisError> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        self.moving_polls_left.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn position(&self) -> Result<i64, AxisError> {
        Ok(self.position.load(Ordering::SeqCst))
    }

    async fn is_moving(&self) -> Result<bool, AxisError> {
        let left = self.moving_polls_left.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(false);
        }
        if left == 1 {
            // Move lands on the target at the final poll.
            self.position
                .store(self.target.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        self.moving_polls_left.store(left - 1, Ordering::SeqCst);
        Ok(left > 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_move_completes_after_polls() {
        let axis = MockAxis::new();
        axis.power_on().await.unwrap();
        axis.start_move(5000, 100, 1000).await.unwrap();

        assert!(axis.is_moving().await.unwrap());
        assert!(!axis.is_moving().await.unwrap());
        assert_eq!(axis.position().await.unwrap(), 5000);
    }

    #[tokio::test]
    async fn test_mock_rejects_unpowered_move() {
        let axis = MockAxis::new();
        assert_eq!(
            axis.start_move(1, 1, 1).await.unwrap_err(),
            AxisError::Offline
        );
    }
}
