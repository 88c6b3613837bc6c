// Drive module for the two-motor differential base
//
// Provides:
// - Stick vector to left/right throttle shaping
// - H-bridge motor abstraction
// - Sysfs and simulated PWM outputs

mod motor;
pub mod pwm;
pub mod shaper;

pub use motor::Motor;
pub use pwm::{DutyProbe, PwmChannel, SimulatedPwm, SysfsPwm};
pub use shaper::{
    apply_curve, apply_gate, apply_limit, left_modifier, normalized_length, right_modifier, shape,
    vector_angle,
};

use crate::config::{MotorPins, MotorsConfig};
use crate::error::Result;

pub type DynMotor = Motor<Box<dyn PwmChannel>>;

/// Open one motor from its pin assignment, simulated or on sysfs PWM
pub fn open_motor(name: &str, pins: MotorPins, config: &MotorsConfig, simulated: bool) -> Result<DynMotor> {
    let (positive, negative): (Box<dyn PwmChannel>, Box<dyn PwmChannel>) = if simulated {
        (
            Box::new(SimulatedPwm::new(format!("{}+", name))),
            Box::new(SimulatedPwm::new(format!("{}-", name))),
        )
    } else {
        (
            Box::new(SysfsPwm::open(config.pwm_chip, pins.positive, config.pwm_period_ns)?),
            Box::new(SysfsPwm::open(config.pwm_chip, pins.negative, config.pwm_period_ns)?),
        )
    };
    Motor::new(name, positive, negative, pins.reversed)
}

/// Open the left and right motors
pub fn open_motors(config: &MotorsConfig, simulated: bool) -> Result<(DynMotor, DynMotor)> {
    let left = open_motor("left", config.left, config, simulated)?;
    let right = open_motor("right", config.right, config, simulated)?;
    Ok((left, right))
}
