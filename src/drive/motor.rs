// Single DC motor behind an H-bridge
//
// Each motor has two PWM inputs. The sign of the throttle picks which one is
// driven; the other is held at zero.

use tracing::{debug, info, warn};

use super::pwm::PwmChannel;
use crate::error::{DriveError, Result};

pub struct Motor<P: PwmChannel> {
    name: String,
    positive: P,
    negative: P,
    is_reversed: bool,
    throttle: f64,
}

impl<P: PwmChannel> Motor<P> {
    /// Create a motor with both channels at zero
    pub fn new(name: impl Into<String>, positive: P, negative: P, is_reversed: bool) -> Result<Self> {
        let mut motor = Self {
            name: name.into(),
            positive,
            negative,
            is_reversed,
            throttle: 0.0,
        };
        motor.write_channels(0, 0)?;
        Ok(motor)
    }

    /// Drive the motor with a throttle in [-1, 1]
    pub fn set_throttle(&mut self, throttle: f64) -> Result<()> {
        if !(-1.0..=1.0).contains(&throttle) {
            return Err(DriveError::ThrottleOutOfRange { throttle });
        }

        let throttle = if self.is_reversed { -throttle } else { throttle };
        let duty = (throttle.abs() * 100.0).round() as u8;

        if throttle >= 0.0 {
            self.write_channels(duty, 0)?;
        } else {
            self.write_channels(0, duty)?;
        }
        self.throttle = throttle;
        debug!("{} motor throttle {:.3} ({}%)", self.name, throttle, duty);
        Ok(())
    }

    /// Zero both channels
    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping {} motor", self.name);
        self.write_channels(0, 0)?;
        self.throttle = 0.0;
        Ok(())
    }

    /// Last applied throttle, after reversal
    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn is_reversed(&self) -> bool {
        self.is_reversed
    }

    // Zero first so both bridge inputs are never driven at once
    fn write_channels(&mut self, positive: u8, negative: u8) -> Result<()> {
        if positive == 0 {
            self.positive.set_duty_cycle(0)?;
            self.negative.set_duty_cycle(negative)
        } else {
            self.negative.set_duty_cycle(0)?;
            self.positive.set_duty_cycle(positive)
        }
    }
}

impl<P: PwmChannel> Drop for Motor<P> {
    fn drop(&mut self) {
        // Never leave a bridge energized
        if let Err(e) = self.write_channels(0, 0) {
            warn!("Failed to stop {} motor on drop: {}", self.name, e);
        }
    }
}
