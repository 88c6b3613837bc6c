// Battery guard
//
// The discharge limiter drives the sense line HIGH while the battery is above
// its cutoff. A LOW reading only counts as a flat battery once it has lasted
// longer than the timeout, so short glitches do not trip the motors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::task;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::error::{DriveError, Result};

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Binary input line
pub trait DigitalInput: Send {
    /// Current level, `true` for HIGH
    fn read(&mut self) -> Result<bool>;
}

impl<I: DigitalInput + ?Sized> DigitalInput for Box<I> {
    fn read(&mut self) -> Result<bool> {
        (**self).read()
    }
}

/// GPIO line through the sysfs interface
#[derive(Debug)]
pub struct SysfsDigitalInput {
    line: u32,
    value_path: PathBuf,
}

impl SysfsDigitalInput {
    pub fn open(line: u32) -> Result<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), line)
    }

    pub fn open_at(root: &Path, line: u32) -> Result<Self> {
        let dir = root.join(format!("gpio{}", line));
        let sense_err = |source| DriveError::BatterySense { line, source };

        if !dir.exists() {
            debug!("Exporting GPIO line {}", line);
            fs::write(root.join("export"), line.to_string()).map_err(sense_err)?;
        }
        fs::write(dir.join("direction"), "in").map_err(sense_err)?;

        Ok(Self {
            line,
            value_path: dir.join("value"),
        })
    }
}

impl DigitalInput for SysfsDigitalInput {
    fn read(&mut self) -> Result<bool> {
        let raw = fs::read_to_string(&self.value_path).map_err(|source| DriveError::BatterySense {
            line: self.line,
            source,
        })?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(DriveError::BatterySense {
                line: self.line,
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected value {:?}", other),
                ),
            }),
        }
    }
}

/// Input whose level is set in software. Used in simulated mode and tests.
#[derive(Debug, Clone)]
pub struct SimulatedInput(Arc<AtomicBool>);

impl SimulatedInput {
    pub fn new(level: bool) -> Self {
        Self(Arc::new(AtomicBool::new(level)))
    }

    pub fn set(&self, level: bool) {
        self.0.store(level, Ordering::Relaxed);
    }
}

impl DigitalInput for SimulatedInput {
    fn read(&mut self) -> Result<bool> {
        Ok(self.0.load(Ordering::Relaxed))
    }
}

/// Shared battery state. Written only by the [`BatteryMonitor`].
#[derive(Debug, Clone, Default)]
pub struct BatteryFlag(Arc<AtomicBool>);

impl BatteryFlag {
    pub fn is_ok(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, ok: bool) {
        self.0.store(ok, Ordering::Release);
    }
}

/// Debounced battery state machine
#[derive(Debug)]
pub struct BatteryMonitor {
    flag: BatteryFlag,
    last_ok_time: Instant,
    low_timeout: Duration,
}

impl BatteryMonitor {
    /// Starts not-ok: the motors stay stopped until the first HIGH reading
    pub fn new(low_timeout: Duration, now: Instant) -> Result<Self> {
        if low_timeout.is_zero() {
            return Err(DriveError::InvalidConfig(
                "battery: low timeout must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            flag: BatteryFlag::default(),
            last_ok_time: now,
            low_timeout,
        })
    }

    pub fn flag(&self) -> BatteryFlag {
        self.flag.clone()
    }

    pub fn is_ok(&self) -> bool {
        self.flag.is_ok()
    }

    /// Apply one reading taken at `now`. Returns the resulting state.
    pub fn update(&mut self, reading: bool, now: Instant) -> bool {
        let was_ok = self.flag.is_ok();

        if reading {
            self.last_ok_time = now;
            if !was_ok {
                info!("Battery ok");
            }
            self.flag.set(true);
            return true;
        }

        let low_for = now.saturating_duration_since(self.last_ok_time);
        if low_for > self.low_timeout {
            if was_ok {
                warn!("Battery low for {:?}, cutting motor power", low_for);
            }
            self.flag.set(false);
            return false;
        }

        if was_ok {
            debug!("Battery sense low for {:?}, tolerating", low_for);
        }
        was_ok
    }
}

/// Sample `input` every `period` until a read fails.
///
/// A failed read is returned as-is: there is no safe default for an
/// unreadable battery line. Reads run on the blocking pool.
pub async fn run<I: DigitalInput + 'static>(
    mut input: I,
    mut monitor: BatteryMonitor,
    period: Duration,
) -> Result<()> {
    if period.is_zero() {
        return Err(DriveError::InvalidConfig(
            "battery: check period must be greater than 0".to_string(),
        ));
    }
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Battery monitor started: {:?} period, {:?} low timeout", period, monitor.low_timeout);
    loop {
        tick.tick().await;
        let (returned, reading) = task::spawn_blocking(move || {
            let reading = input.read();
            (input, reading)
        })
        .await
        .map_err(|_| DriveError::TaskAborted("battery read"))?;
        input = returned;
        monitor.update(reading?, Instant::now());
    }
}
