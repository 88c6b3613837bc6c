// Tadpole drive runtime
//
// Gamepad stick -> throttle shaping -> two H-bridge motors, with a battery
// guard that holds the motors stopped while the pack is flat.

pub mod battery;
pub mod config;
pub mod drive;
pub mod error;
pub mod input;
pub mod messages;
pub mod runtime;
pub mod telemetry;

pub use error::{DriveError, Result};
