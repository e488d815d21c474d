//! # System Constants
//!
//! Core constants that define the operational boundaries of the workcell
//! coordination system: the symbolic topic-key catalogue, protocol defaults,
//! and the geometry/unit constants shared between the scheduler and the
//! motion service.

/// Symbolic topic keys known to every service.
///
/// These are the keys pre-registered in [`crate::messaging::TopicRegistry`]
/// and referenced by handlers and the workflow engine. Services address the
/// bus exclusively through these keys; concrete topic strings are produced
/// by the registry at publish/subscribe time.
pub mod topic_keys {
    // Workflow backbone
    pub const SENSOR_TRIGGER: &str = "sensor.trigger";
    pub const ORDER_NEW: &str = "order.new";
    pub const ORDER_REQUEST: &str = "order.request";
    pub const VISION_START: &str = "vision.start";
    pub const VISION_STOP: &str = "vision.stop";
    pub const VISION_RESULT: &str = "vision.result";
    pub const VISION_DETECTION: &str = "vision.detection";
    pub const VISION_HEIGHT_REQUEST: &str = "vision.height.request";
    pub const VISION_HEIGHT_RESULT: &str = "vision.height.result";
    pub const MOTION_MOVE: &str = "motion.move";
    pub const MOTION_STOP: &str = "motion.stop";
    pub const MOTION_COMPLETE: &str = "motion.complete";
    pub const MOTION_POSITION: &str = "motion.position";
    pub const CODER_START: &str = "coder.start";
    pub const CODER_RESULT: &str = "coder.result";
    pub const CODER_COMPLETE: &str = "coder.complete";
    pub const CODER_ODOO: &str = "coder.odoo";

    // Status and system plumbing
    pub const STATUS_HEARTBEAT: &str = "status.heartbeat";
    pub const SYSTEM_HEARTBEAT: &str = "system.heartbeat";
    pub const SYSTEM_STATUS: &str = "system.status";
    pub const SYSTEM_STATUS_RESULT: &str = "system.status.result";
    pub const SYSTEM_CONFIG: &str = "system.config";
    pub const SYSTEM_CONFIG_CONFIRM: &str = "system.config.confirm";
    pub const SYSTEM_CONFIG_ERROR: &str = "system.config.error";
    pub const SYSTEM_ERROR: &str = "system.error";
    pub const SYSTEM_UNKNOWN_TOPIC: &str = "system.events.unknown";

    // Task-level notifications
    pub const TASK_NEXT_STEP: &str = "task.next_step";
    pub const TASK_ERROR: &str = "task.error";

    // Coder validation results
    pub const CODER_VALIDATION_SUCCESS: &str = "coder.validation.success";
    pub const CODER_VALIDATION_FAILED: &str = "coder.validation.failed";
    pub const CODER_VALIDATION_ERROR: &str = "coder.validation.error";
}

/// Protocol-level defaults shared by every bus participant.
pub mod protocol {
    /// Current envelope/topic protocol version tag.
    pub const PROTOCOL_VERSION: &str = "v1";

    /// Default maximum redelivery attempts recorded in envelopes.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Client id prefix applied when a service config leaves it empty.
    pub const CLIENT_ID_PREFIX: &str = "IOS.";

    /// Environment applied when no deployment environment is configured.
    pub const DEFAULT_ENVIRONMENT: &str = "Production";
}

/// Liveness and timing windows.
pub mod timing {
    /// A device is considered online while its last heartbeat is younger
    /// than this window.
    pub const HEARTBEAT_ONLINE_WINDOW_SECS: i64 = 300;

    /// Delay between clearing scanner buffers and opening the collect
    /// window, giving connected scanners time to settle.
    pub const SCAN_READY_DELAY_MS: u64 = 500;

    /// Default collect window for a scan when the caller passes none.
    pub const DEFAULT_SCAN_WINDOW_MS: u64 = 5000;
}

/// Motion geometry and unit conversion.
pub mod motion {
    /// Pulses per millimetre on the vertical axis.
    ///
    /// Legacy constant: `mm * 1000 * 100 = pulses`. The configured position
    /// limits (`max_position` = 220 000 pulses and friends) are expressed
    /// against this factor; changing it requires updating those limits in
    /// the same release.
    pub const PULSES_PER_MM: f64 = 100_000.0;

    /// Default axis speed in pulses per second when a move specifies none.
    pub const DEFAULT_SPEED: u32 = 20_000;

    /// Acceleration and deceleration multiplier applied to the commanded
    /// speed.
    pub const ACCEL_FACTOR: u32 = 10;
}

/// Code format validation bounds used by the coder handler.
pub mod code_format {
    pub const QR_MIN_LEN: usize = 3;
    pub const QR_MAX_LEN: usize = 1000;
    pub const BARCODE_MIN_LEN: usize = 8;
    pub const BARCODE_MAX_LEN: usize = 20;
    pub const DATAMATRIX_MIN_LEN: usize = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulses_per_mm_matches_legacy_factor() {
        // mm * 1000 * 100
        assert_eq!(motion::PULSES_PER_MM, 1000.0 * 100.0);
    }

    #[test]
    fn heartbeat_window_is_five_minutes() {
        assert_eq!(timing::HEARTBEAT_ONLINE_WINDOW_SECS, 5 * 60);
    }
}
