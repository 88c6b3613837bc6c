// Data passed between the input, shaping and actuation stages

use serde::{Deserialize, Serialize};

/// Stick position sample, axes rebased to the signed range [-32768, 32767]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisVector {
    pub x: i32,
    pub y: i32,
}

impl AxisVector {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Applies software axis inversion
    pub fn inverted(self, invert_x: bool, invert_y: bool) -> Self {
        Self {
            x: if invert_x { -self.x } else { self.x },
            y: if invert_y { -self.y } else { self.y },
        }
    }
}

/// Per-side throttle, each in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapedThrottle {
    pub left: f64,
    pub right: f64,
}

/// What the coordinator is currently doing with the motors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Following gamepad input
    Drive,
    /// Low battery, motors held stopped
    #[default]
    Standby,
    /// No input within the connection timeout, motors stopped
    InputStale,
}

/// Snapshot published by the coordinator after every change
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub left: f64,
    pub right: f64,
    pub battery_ok: bool,
    pub mode: DriveMode,
}

impl DriveTelemetry {
    pub fn stopped(mode: DriveMode, battery_ok: bool) -> Self {
        Self {
            left: 0.0,
            right: 0.0,
            battery_ok,
            mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inversion_negates_selected_axes() {
        let v = AxisVector::new(100, -32768);
        assert_eq!(v.inverted(false, false), v);
        assert_eq!(v.inverted(true, false), AxisVector::new(-100, -32768));
        // Inverting the most negative reading leaves the i16 range
        assert_eq!(v.inverted(false, true), AxisVector::new(100, 32768));
    }

    #[test]
    fn telemetry_serializes_snake_case_mode() {
        let t = DriveTelemetry::stopped(DriveMode::InputStale, true);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"mode\":\"input_stale\""), "{json}");
        assert!(json.contains("\"battery_ok\":true"));
    }
}
