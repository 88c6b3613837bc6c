// Error type shared by every part of the drive runtime

use std::path::PathBuf;

/// Errors raised by the shaping pipeline, the hardware bindings and startup
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Angle {angle} is out of permitted range (-180, 180]")]
    AngleOutOfRange { angle: f64 },

    #[error("Throttle {throttle} is out of permitted range [-1, 1]")]
    ThrottleOutOfRange { throttle: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Battery sense line {line} unreadable: {source}")]
    BatterySense {
        line: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("PWM channel {path:?} write failed: {source}")]
    Pwm {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Vector source stopped")]
    VectorSourceClosed,

    #[error("{0} task aborted")]
    TaskAborted(&'static str),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, DriveError>;
