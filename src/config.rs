// Defaults, config file layout and validation
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, Result};
use crate::input::DeviceSelector;

// Gamepad
pub const DEFAULT_DEVICE_NAME: &str = "Xbox Wireless Controller";
pub const EV_ABS: u16 = 3;
pub const ABS_RIGHT_X: u16 = 2; // ABS_Z on the Xbox pad
pub const ABS_RIGHT_Y: u16 = 5; // ABS_RZ on the Xbox pad
pub const AXIS_MIDPOINT: i32 = 1 << 15;
pub const DEVICE_SCAN_INTERVAL: Duration = Duration::from_millis(500);

// Largest magnitude a single rebased axis can reach
pub const MAX_ABS_AXIS_VALUE: f64 = 32768.0;

// Throttle curve, coefficients for degree 0..3.
// Only meaningful for inputs in [0, 1]; outputs leaving [0, 1] are saturated.
pub const THROTTLE_CURVE: [f64; 4] = [0.0, -0.1666667, 1.722222, -0.5555556];

// Battery sense: HIGH while the discharge limiter still outputs power
pub const BATTERY_SENSE_LINE: u32 = 5;
pub const BATTERY_CHECK_PERIOD: Duration = Duration::from_secs(1);
pub const LOW_BATTERY_TIMEOUT: Duration = Duration::from_secs(5);

// Motor PWM channels (BCM numbering)
pub const LEFT_MOTOR_POSITIVE: u32 = 13;
pub const LEFT_MOTOR_NEGATIVE: u32 = 6;
pub const RIGHT_MOTOR_POSITIVE: u32 = 26;
pub const RIGHT_MOTOR_NEGATIVE: u32 = 19;
pub const PWM_PERIOD_NS: u64 = 10_000_000; // 100 Hz

// Coordinator wake-up interval while no vector is pending
pub const IDLE_POLL: Duration = Duration::from_millis(20);

// Zenoh topics
pub const TOPIC_DRIVE: &str = "tadpole/rt/drive";
pub const TOPIC_HEALTH: &str = "tadpole/state/health";
pub const TELEMETRY_HZ: u64 = 10;

/// Complete runtime configuration, loaded from TOML. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub gamepad: GamepadConfig,
    pub throttle: ThrottleConfig,
    pub battery: BatteryConfig,
    pub motors: MotorsConfig,
    pub runtime: RuntimeConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GamepadConfig {
    /// Explicit device node, e.g. `/dev/input/event0`. Takes precedence over the name.
    pub device_path: Option<PathBuf>,
    pub device_name: String,
    /// Stop the motors when no input arrives for this long. Unset means never.
    pub connection_timeout_ms: Option<u64>,
    /// Process one of every N matching events (1 = all of them).
    pub accept_every_nth_event: u32,
    pub invert_x: bool,
    pub invert_y: bool,
    pub event_type: u16,
    pub x_axis_code: u16,
    pub y_axis_code: u16,
    pub axis_midpoint: i32,
    pub scan_interval_ms: u64,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            connection_timeout_ms: None,
            accept_every_nth_event: 1,
            invert_x: false,
            invert_y: true,
            event_type: EV_ABS,
            x_axis_code: ABS_RIGHT_X,
            y_axis_code: ABS_RIGHT_Y,
            axis_midpoint: AXIS_MIDPOINT,
            scan_interval_ms: DEVICE_SCAN_INTERVAL.as_millis() as u64,
        }
    }
}

impl GamepadConfig {
    pub fn selector(&self) -> DeviceSelector {
        match &self.device_path {
            Some(path) => DeviceSelector::Path(path.clone()),
            None => DeviceSelector::Name(self.device_name.clone()),
        }
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_ms.map(Duration::from_millis)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_path.is_none() && self.device_name.trim().is_empty() {
            return invalid("gamepad: device_path or device_name must be set");
        }
        if self.connection_timeout_ms == Some(0) {
            return invalid("gamepad: connection_timeout_ms must be greater than 0");
        }
        if self.accept_every_nth_event == 0 {
            return invalid("gamepad: accept_every_nth_event must be at least 1");
        }
        if self.x_axis_code == self.y_axis_code {
            return invalid("gamepad: x_axis_code and y_axis_code must differ");
        }
        if self.scan_interval_ms == 0 {
            return invalid("gamepad: scan_interval_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Throttle shaping chain: IN -> [scale] -> [curve] -> [gate] -> [limit] -> OUT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    pub enable_curve: bool,
    pub enable_gate: bool,
    /// Throttle magnitudes below this are zeroed, in [0, 1).
    pub gate_threshold: f64,
    /// Multiplier applied to the normalized stick length, > 0.
    pub scale: f64,
    pub enable_limit: bool,
    /// Largest throttle magnitude after shaping, in (0, 1].
    pub limit: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enable_curve: false,
            enable_gate: true,
            gate_threshold: 0.1,
            scale: 1.0,
            enable_limit: true,
            limit: 1.0,
        }
    }
}

impl ThrottleConfig {
    /// Pass-through chain: only the scale stage is active.
    pub fn linear(scale: f64) -> Self {
        Self {
            enable_curve: false,
            enable_gate: false,
            scale,
            enable_limit: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return invalid(format!("throttle: scale must be positive, got {}", self.scale));
        }
        // The curve is only monotone on [0, 1]; past that a larger stick gives less throttle
        if self.enable_curve && self.scale > 1.0 {
            return invalid(format!(
                "throttle: scale must be at most 1 with the curve enabled, got {}",
                self.scale
            ));
        }
        if !(0.0..1.0).contains(&self.gate_threshold) {
            return invalid(format!(
                "throttle: gate_threshold must be in [0, 1), got {}",
                self.gate_threshold
            ));
        }
        if !(self.limit > 0.0 && self.limit <= 1.0) {
            return invalid(format!("throttle: limit must be in (0, 1], got {}", self.limit));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    pub sense_line: u32,
    pub check_period_ms: u64,
    pub low_timeout_ms: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            sense_line: BATTERY_SENSE_LINE,
            check_period_ms: BATTERY_CHECK_PERIOD.as_millis() as u64,
            low_timeout_ms: LOW_BATTERY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl BatteryConfig {
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms)
    }

    pub fn low_timeout(&self) -> Duration {
        Duration::from_millis(self.low_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.check_period_ms == 0 {
            return invalid("battery: check_period_ms must be greater than 0");
        }
        if self.low_timeout_ms == 0 {
            return invalid("battery: low_timeout_ms must be greater than 0");
        }
        Ok(())
    }
}

/// H-bridge channel pair for one motor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorPins {
    pub positive: u32,
    pub negative: u32,
    #[serde(default)]
    pub reversed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotorsConfig {
    pub pwm_chip: u32,
    pub pwm_period_ns: u64,
    pub left: MotorPins,
    pub right: MotorPins,
}

impl Default for MotorsConfig {
    fn default() -> Self {
        Self {
            pwm_chip: 0,
            pwm_period_ns: PWM_PERIOD_NS,
            // Mirrored mounting: the left motor runs reversed
            left: MotorPins {
                positive: LEFT_MOTOR_POSITIVE,
                negative: LEFT_MOTOR_NEGATIVE,
                reversed: true,
            },
            right: MotorPins {
                positive: RIGHT_MOTOR_POSITIVE,
                negative: RIGHT_MOTOR_NEGATIVE,
                reversed: false,
            },
        }
    }
}

impl MotorsConfig {
    fn validate(&self) -> Result<()> {
        if self.pwm_period_ns == 0 {
            return invalid("motors: pwm_period_ns must be greater than 0");
        }
        let channels = [
            self.left.positive,
            self.left.negative,
            self.right.positive,
            self.right.negative,
        ];
        for (i, a) in channels.iter().enumerate() {
            if channels[i + 1..].contains(a) {
                return invalid(format!("motors: channel {} is assigned more than once", a));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub idle_poll_ms: u64,
    /// Log motor output and report a healthy battery instead of touching hardware
    pub simulated: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: IDLE_POLL.as_millis() as u64,
            simulated: false,
        }
    }
}

impl RuntimeConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub rate_hz: u64,
    pub topic_drive: String,
    pub topic_health: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_hz: TELEMETRY_HZ,
            topic_drive: TOPIC_DRIVE.to_string(),
            topic_health: TOPIC_HEALTH.to_string(),
        }
    }
}

impl TelemetryConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.rate_hz == 0 {
            return invalid("telemetry: rate_hz must be greater than 0");
        }
        if self.topic_drive.is_empty() || self.topic_health.is_empty() {
            return invalid("telemetry: topics must not be empty");
        }
        Ok(())
    }
}

impl Config {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.gamepad.validate()?;
        self.throttle.validate()?;
        self.battery.validate()?;
        self.motors.validate()?;
        if self.runtime.idle_poll_ms == 0 {
            return invalid("runtime: idle_poll_ms must be greater than 0");
        }
        self.telemetry.validate()
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(DriveError::InvalidConfig(msg.into()))
}
