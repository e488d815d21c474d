//! # Workcell Geometry
//!
//! Turns a measured stack height into the axis target position, and
//! millimetres into device pulses.
//!
//! The camera looks down on the stack from `camera_height`; the height
//! measurement it reports is the camera-to-stack distance in metres, so
//! the stack top sits at `height_init - min_height * 1000` millimetres
//! above the tray datum. The axis target places the coder head at the
//! stack top, offset by the coder mounting height, with the tray offset
//! applied on inbound moves where the stack rests on the transfer tray.

use crate::config::GeometryConfig;
use crate::messaging::Direction;

/// Stack height above the tray datum, in millimetres.
///
/// `min_height` is the camera-to-stack distance in metres as reported on
/// `vision.height.result`.
pub fn stack_height_mm(geometry: &GeometryConfig, min_height: f64) -> f64 {
    geometry.height_init - min_height * 1000.0
}

/// Axis target position in millimetres for a task.
pub fn target_position_mm(
    geometry: &GeometryConfig,
    direction: Direction,
    min_height: f64,
) -> f64 {
    let stack = stack_height_mm(geometry, min_height);
    match direction {
        // Outbound: bring the coder head level with the stack top.
        Direction::Out => geometry.camera_height - geometry.coder_height - stack,
        // Inbound: the stack rests on the transfer tray.
        Direction::In => geometry.camera_height - geometry.tray_height - stack,
    }
}

/// Convert millimetres to device pulses.
///
/// Uses the legacy factor `mm * 1000 * 100`; the configured axis limits
/// are expressed against it.
pub fn mm_to_pulses(mm: f64, pulses_per_mm: f64) -> i64 {
    (mm * pulses_per_mm).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::motion::PULSES_PER_MM;

    fn geometry() -> GeometryConfig {
        GeometryConfig {
            height_init: 2000.0,
            tray_height: 150.0,
            camera_height: 2200.0,
            coder_height: 450.0,
        }
    }

    #[test]
    fn test_stack_height_from_camera_range() {
        // 1.8 m camera-to-stack distance over a 2000 mm datum
        assert_eq!(stack_height_mm(&geometry(), 1.8), 200.0);
        // camera sees the bare tray
        assert_eq!(stack_height_mm(&geometry(), 2.0), 0.0);
    }

    #[test]
    fn test_outbound_target() {
        // 2200 - 450 - 200
        assert_eq!(target_position_mm(&geometry(), Direction::Out, 1.8), 1550.0);
    }

    #[test]
    fn test_inbound_target() {
        // 2200 - 150 - 200
        assert_eq!(target_position_mm(&geometry(), Direction::In, 1.8), 1850.0);
    }

    #[test]
    fn test_mm_to_pulses_legacy_factor() {
        assert_eq!(mm_to_pulses(1.0, PULSES_PER_MM), 100_000);
        assert_eq!(mm_to_pulses(2.2, PULSES_PER_MM), 220_000);
        assert_eq!(mm_to_pulses(0.0, PULSES_PER_MM), 0);
        // rounds to the nearest pulse
        assert_eq!(mm_to_pulses(0.000_004, PULSES_PER_MM), 0);
        assert_eq!(mm_to_pulses(0.000_006, PULSES_PER_MM), 1);
    }
}
