// PWM outputs driving the H-bridge inputs
//
// Hardware channels go through the Linux sysfs PWM interface:
// /sys/class/pwm/pwmchipN/pwmM/{period, duty_cycle, enable}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use crate::error::{DriveError, Result};

pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

/// One PWM output line
pub trait PwmChannel: Send {
    /// Set the duty cycle as a percentage in [0, 100]
    fn set_duty_cycle(&mut self, percent: u8) -> Result<()>;
}

impl<P: PwmChannel + ?Sized> PwmChannel for Box<P> {
    fn set_duty_cycle(&mut self, percent: u8) -> Result<()> {
        (**self).set_duty_cycle(percent)
    }
}

/// PWM channel exported through sysfs
pub struct SysfsPwm {
    dir: PathBuf,
    period_ns: u64,
}

impl SysfsPwm {
    pub fn open(chip: u32, channel: u32, period_ns: u64) -> Result<Self> {
        Self::open_at(Path::new(SYSFS_PWM_ROOT), chip, channel, period_ns)
    }

    /// Open under a custom sysfs root
    pub fn open_at(root: &Path, chip: u32, channel: u32, period_ns: u64) -> Result<Self> {
        let chip_dir = root.join(format!("pwmchip{}", chip));
        let dir = chip_dir.join(format!("pwm{}", channel));

        if !dir.exists() {
            debug!("Exporting PWM channel {} on chip {}", channel, chip);
            write_attr(&chip_dir.join("export"), &channel.to_string())?;
        }

        let pwm = Self { dir, period_ns };
        // Duty must never exceed the period, so zero it before changing the period
        pwm.write("duty_cycle", "0")?;
        pwm.write("period", &period_ns.to_string())?;
        pwm.write("enable", "1")?;
        Ok(pwm)
    }

    fn write(&self, attr: &str, value: &str) -> Result<()> {
        write_attr(&self.dir.join(attr), value)
    }
}

impl PwmChannel for SysfsPwm {
    fn set_duty_cycle(&mut self, percent: u8) -> Result<()> {
        let percent = percent.min(100) as u64;
        let duty_ns = self.period_ns * percent / 100;
        self.write("duty_cycle", &duty_ns.to_string())
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|source| DriveError::Pwm {
        path: path.to_path_buf(),
        source,
    })
}

/// Shared view of a simulated channel's last duty cycle
#[derive(Debug, Clone, Default)]
pub struct DutyProbe(Arc<AtomicU8>);

impl DutyProbe {
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Channel that only logs, for running without the H-bridge attached
#[derive(Debug)]
pub struct SimulatedPwm {
    label: String,
    duty: DutyProbe,
}

impl SimulatedPwm {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            duty: DutyProbe::default(),
        }
    }

    pub fn probe(&self) -> DutyProbe {
        self.duty.clone()
    }
}

impl PwmChannel for SimulatedPwm {
    fn set_duty_cycle(&mut self, percent: u8) -> Result<()> {
        let percent = percent.min(100);
        if self.duty.0.swap(percent, Ordering::Relaxed) != percent {
            debug!("[sim] {} duty cycle {}%", self.label, percent);
        }
        Ok(())
    }
}

/// Records every duty cycle written to it
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingPwm(Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl RecordingPwm {
    pub(crate) fn last(&self) -> Option<u8> {
        self.0.lock().unwrap().last().copied()
    }

    pub(crate) fn history(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl PwmChannel for RecordingPwm {
    fn set_duty_cycle(&mut self, percent: u8) -> Result<()> {
        self.0.lock().unwrap().push(percent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_chip(root: &Path, chip: u32, channel: u32) -> PathBuf {
        let dir = root.join(format!("pwmchip{}", chip)).join(format!("pwm{}", channel));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read(dir: &Path, attr: &str) -> String {
        fs::read_to_string(dir.join(attr)).unwrap()
    }

    #[test]
    fn test_open_configures_channel() {
        let root = tempfile::tempdir().expect("tmp dir");
        let dir = fake_chip(root.path(), 0, 13);

        SysfsPwm::open_at(root.path(), 0, 13, 10_000_000).unwrap();
        assert_eq!(read(&dir, "period"), "10000000");
        assert_eq!(read(&dir, "duty_cycle"), "0");
        assert_eq!(read(&dir, "enable"), "1");
    }

    #[test]
    fn test_duty_cycle_scaled_to_period() {
        let root = tempfile::tempdir().expect("tmp dir");
        let dir = fake_chip(root.path(), 1, 6);

        let mut pwm = SysfsPwm::open_at(root.path(), 1, 6, 10_000_000).unwrap();
        pwm.set_duty_cycle(42).unwrap();
        assert_eq!(read(&dir, "duty_cycle"), "4200000");
        pwm.set_duty_cycle(250).unwrap();
        assert_eq!(read(&dir, "duty_cycle"), "10000000");
    }

    #[test]
    fn test_missing_chip_reports_path() {
        let root = tempfile::tempdir().expect("tmp dir");
        let err = SysfsPwm::open_at(root.path(), 3, 0, 1000).err().unwrap();
        match err {
            DriveError::Pwm { path, .. } => assert!(path.ends_with("pwmchip3/export")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_simulated_channel_probe() {
        let mut pwm = SimulatedPwm::new("left+");
        let probe = pwm.probe();
        pwm.set_duty_cycle(55).unwrap();
        assert_eq!(probe.get(), 55);
        pwm.set_duty_cycle(0).unwrap();
        assert_eq!(probe.get(), 0);
    }
}
