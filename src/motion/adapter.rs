//! The bounds-checked adapter over the axis driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MotionConfig;
use crate::constants::motion::ACCEL_FACTOR;
use crate::motion::axis::Axis;
use crate::motion::{MotionError, MotionResult};

/// Axis session status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisStatus {
    pub position: i64,
    pub is_enabled: bool,
    pub is_moving: bool,
    pub has_error: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Thin wrapper over the axis enforcing configured position bounds.
///
/// A move is accepted only when the adapter is initialized and the target
/// lies within `[min_position, max_position]`; an out-of-range target
/// fails without side effects.
pub struct MotionAdapter {
    config: MotionConfig,
    axis: Arc<dyn Axis>,
    initialized: AtomicBool,
    moving: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl MotionAdapter {
    pub fn new(config: MotionConfig, axis: Arc<dyn Axis>) -> Self {
        Self {
            config,
            axis,
            initialized: AtomicBool::new(false),
            moving: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// One-shot bring-up; fails if already initialized.
    pub async fn initialize(&self) -> MotionResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(MotionError::AlreadyInitialized);
        }
        self.axis.power_on().await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!("axis initialized");
        Ok(())
    }

    /// Whether `initialize` has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Move to an absolute position in pulses, blocking until the axis
    /// reports the motion done or the configured move timeout elapses
    /// (which commands a stop and records the fault).
    pub async fn move_absolute(&self, position: i64, speed: Option<u32>) -> MotionResult<i64> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(MotionError::NotInitialized);
        }
        if position < self.config.min_position || position > self.config.max_position {
            return Err(MotionError::OutOfRange {
                target: position,
                min: self.config.min_position,
                max: self.config.max_position,
            });
        }

        let speed = speed.unwrap_or(self.config.default_speed).max(1);
        let accel = speed * ACCEL_FACTOR;
        let start = self.axis.position().await.map_err(MotionError::from)?;

        self.moving.store(true, Ordering::SeqCst);
        if let Err(e) = self.axis.start_move(position, speed, accel).await {
            self.moving.store(false, Ordering::SeqCst);
            self.record_error(e.to_string());
            return Err(e.into());
        }

        // The physical move cannot finish faster than distance/speed;
        // sleep that lower bound before polling for completion.
        let distance = (position - start).unsigned_abs();
        let expected_ms = distance.saturating_mul(1000) / u64::from(speed).max(1);
        let lower_bound = Duration::from_millis(expected_ms.min(self.config.move_timeout_ms));
        if !lower_bound.is_zero() {
            tokio::time::sleep(lower_bound).await;
        }

        let result = self.await_motion_done().await;
        self.moving.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                let final_position = self.axis.position().await.map_err(MotionError::from)?;
                debug!(final_position, "move complete");
                Ok(final_position)
            }
            Err(e) => {
                self.record_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Move relative to the current position.
    pub async fn move_relative(&self, delta: i64, speed: Option<u32>) -> MotionResult<i64> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(MotionError::NotInitialized);
        }
        let current = self.axis.position().await.map_err(MotionError::from)?;
        self.move_absolute(current + delta, speed).await
    }

    /// Return the axis to its zero position.
    pub async fn home(&self, speed: Option<u32>) -> MotionResult<i64> {
        self.move_absolute(0, speed).await
    }

    /// Controlled stop at `speed * 10` deceleration.
    pub async fn stop(&self) -> MotionResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(MotionError::NotInitialized);
        }
        let decel = self.config.default_speed.max(1) * ACCEL_FACTOR;
        self.axis.stop(decel).await.map_err(MotionError::from)?;
        self.moving.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Session status; before initialization the report carries
    /// `has_error=true` with an "uninitialized" marker.
    pub async fn get_status(&self) -> AxisStatus {
        if !self.initialized.load(Ordering::SeqCst) {
            return AxisStatus {
                position: 0,
                is_enabled: false,
                is_moving: false,
                has_error: true,
                error: Some("uninitialized".to_string()),
                timestamp: Utc::now(),
            };
        }

        let position = self.axis.position().await.unwrap_or(0);
        let is_moving = self.axis.is_moving().await.unwrap_or(false)
            || self.moving.load(Ordering::SeqCst);
        let error = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        AxisStatus {
            position,
            is_enabled: true,
            is_moving,
            has_error: error.is_some(),
            error,
            timestamp: Utc::now(),
        }
    }

    /// Power down, homing first when displaced. Idempotent.
    pub async fn shutdown(&self) -> MotionResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let position = self.axis.position().await.map_err(MotionError::from)?;
        if position != 0 {
            if let Err(e) = self.home(None).await {
                warn!(error = %e, "homing before shutdown failed");
            }
        }
        self.axis.power_off().await.map_err(MotionError::from)?;
        self.initialized.store(false, Ordering::SeqCst);
        info!("axis shut down");
        Ok(())
    }

    async fn await_motion_done(&self) -> MotionResult<()> {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.move_timeout_ms);
        loop {
            match self.axis.is_moving().await {
                Ok(false) => return Ok(()),
                Ok(true) => {}
                Err(e) => return Err(e.into()),
            }
            if tokio::time::Instant::now() >= deadline {
                let decel = self.config.default_speed.max(1) * ACCEL_FACTOR;
                let _ = self.axis.stop(decel).await;
                return Err(MotionError::MoveTimeout {
                    timeout_ms: self.config.move_timeout_ms,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn record_error(&self, message: String) {
        let mut last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_error = Some(message);
    }
}
