// Differential-drive mixing for the two-motor base
// Converts a stick vector into left/right throttles through the shaping chain:
// IN -> [scale] -> [curve] -> [gate] -> [limit] -> x side modifiers -> OUT

use crate::config::{MAX_ABS_AXIS_VALUE, THROTTLE_CURVE, ThrottleConfig};
use crate::error::{DriveError, Result};
use crate::messages::{AxisVector, ShapedThrottle};

/// Angle between the positive x axis and `v`, in degrees within (-180, 180].
///
/// The zero vector yields 0.
pub fn vector_angle(v: AxisVector) -> f64 {
    (v.y as f64).atan2(v.x as f64).to_degrees()
}

/// Euclidean length of `v` relative to a full-scale axis, capped at 1.0
pub fn normalized_length(v: AxisVector) -> f64 {
    let length = (v.x as f64).hypot(v.y as f64);
    (length / MAX_ABS_AXIS_VALUE).min(1.0)
}

fn check_angle(angle: f64) -> Result<()> {
    // Written so that NaN is rejected as well
    if angle > -180.0 && angle <= 180.0 {
        Ok(())
    } else {
        Err(DriveError::AngleOutOfRange { angle })
    }
}

/// Steering factor for the left motor.
///
/// ```text
/// (-180, -90]  -1
/// (-90, 0)     ramp -1 -> 1
/// [0, 90]       1
/// (90, 180]    ramp 1 -> -1
/// ```
pub fn left_modifier(angle: f64) -> Result<f64> {
    check_angle(angle)?;
    let modifier = if angle <= -90.0 {
        -1.0
    } else if angle < 0.0 {
        angle / 45.0 + 1.0
    } else if angle <= 90.0 {
        1.0
    } else {
        -angle / 45.0 + 3.0
    };
    Ok(modifier)
}

/// Steering factor for the right motor, the point-symmetric counterpart of
/// [`left_modifier`].
///
/// ```text
/// (-180, -90)  ramp 1 -> -1
/// [-90, 0]     -1
/// (0, 90)      ramp -1 -> 1
/// [90, 180]     1
/// ```
pub fn right_modifier(angle: f64) -> Result<f64> {
    check_angle(angle)?;
    let modifier = if angle < -90.0 {
        -angle / 45.0 - 3.0
    } else if angle <= 0.0 {
        -1.0
    } else if angle < 90.0 {
        angle / 45.0 - 1.0
    } else {
        1.0
    };
    Ok(modifier)
}

/// Maps throttle through the cubic desensitizing curve.
///
/// The polynomial is only shaped for [0, 1]. Anything it produces outside
/// that range is saturated to the nearest bound.
pub fn apply_curve(throttle: f64) -> f64 {
    let curved = THROTTLE_CURVE
        .iter()
        .rev()
        .fold(0.0, |acc, &coeff| acc * throttle + coeff);

    if (0.0..=1.0).contains(&curved) {
        curved
    } else if curved < 0.0 {
        0.0
    } else {
        1.0
    }
}

/// Deadzone: zero for any magnitude below `threshold`
pub fn apply_gate(throttle: f64, threshold: f64) -> f64 {
    if throttle.abs() < threshold { 0.0 } else { throttle }
}

/// Caps the magnitude at `limit`, keeping the sign
pub fn apply_limit(throttle: f64, limit: f64) -> f64 {
    if throttle.abs() > limit {
        limit.copysign(throttle)
    } else {
        throttle
    }
}

/// Runs the full shaping chain for one stick sample
pub fn shape(v: AxisVector, config: &ThrottleConfig) -> Result<ShapedThrottle> {
    let angle = vector_angle(v);
    let left_mod = left_modifier(angle)?;
    let right_mod = right_modifier(angle)?;

    let mut throttle = config.scale * normalized_length(v);
    if config.enable_curve {
        throttle = apply_curve(throttle);
    }
    if config.enable_gate {
        throttle = apply_gate(throttle, config.gate_threshold);
    }
    if config.enable_limit {
        throttle = apply_limit(throttle, config.limit);
    }

    Ok(ShapedThrottle {
        left: (throttle * left_mod).clamp(-1.0, 1.0),
        right: (throttle * right_mod).clamp(-1.0, 1.0),
    })
}
