// Input device enumeration and raw event reads
//
// The Linux backend reads kernel `input_event` records straight from
// /dev/input/eventN, with device names taken from sysfs.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

/// Raw event as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub path: PathBuf,
}

/// How to find the gamepad
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Path(PathBuf),
    Name(String),
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Path(path) => write!(f, "{}", path.display()),
            DeviceSelector::Name(name) => write!(f, "\"{}\"", name),
        }
    }
}

/// An open input device, owned by exactly one reader
pub trait InputDevice: Send {
    /// Block until the next event arrives
    fn read_blocking(&mut self) -> io::Result<InputEvent>;

    /// Drop input already buffered on our side without blocking
    fn discard_pending(&mut self) {}
}

pub trait InputBackend: Send {
    fn list(&self) -> io::Result<Vec<DeviceDescriptor>>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>>;
}

/// Find and open the selected device, retrying every `scan_interval` until it works.
///
/// Never gives up: the usual cause is a controller that is not powered on yet.
pub fn acquire(
    backend: &dyn InputBackend,
    selector: &DeviceSelector,
    scan_interval: Duration,
) -> Box<dyn InputDevice> {
    let mut announced = false;
    loop {
        match resolve(backend, selector) {
            Some(path) => match backend.open(&path) {
                Ok(device) => {
                    info!("Connected to input device {}", path.display());
                    return device;
                }
                Err(e) => debug!("Failed to open {}: {}", path.display(), e),
            },
            None => debug!("No input device matching {}", selector),
        }

        if !announced {
            info!("Waiting for input device {}...", selector);
            announced = true;
        }
        thread::sleep(scan_interval);
    }
}

fn resolve(backend: &dyn InputBackend, selector: &DeviceSelector) -> Option<PathBuf> {
    match selector {
        DeviceSelector::Path(path) => Some(path.clone()),
        DeviceSelector::Name(name) => match backend.list() {
            Ok(devices) => devices.into_iter().find(|d| &d.name == name).map(|d| d.path),
            Err(e) => {
                debug!("Failed to list input devices: {}", e);
                None
            }
        },
    }
}

// struct input_event: struct timeval, __u16 type, __u16 code, __s32 value
#[cfg(target_pointer_width = "64")]
const TIMEVAL_SIZE: usize = 16;
#[cfg(not(target_pointer_width = "64"))]
const TIMEVAL_SIZE: usize = 8;
const EVENT_SIZE: usize = TIMEVAL_SIZE + 8;

fn decode_event(raw: &[u8; EVENT_SIZE]) -> InputEvent {
    let body = &raw[TIMEVAL_SIZE..];
    InputEvent {
        event_type: u16::from_ne_bytes([body[0], body[1]]),
        code: u16::from_ne_bytes([body[2], body[3]]),
        value: i32::from_ne_bytes([body[4], body[5], body[6], body[7]]),
    }
}

/// evdev character devices on Linux
#[derive(Debug, Clone)]
pub struct EvdevBackend {
    dev_dir: PathBuf,
    sys_dir: PathBuf,
}

impl Default for EvdevBackend {
    fn default() -> Self {
        Self::with_roots("/dev/input", "/sys/class/input")
    }
}

impl EvdevBackend {
    pub fn with_roots(dev_dir: impl Into<PathBuf>, sys_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            sys_dir: sys_dir.into(),
        }
    }
}

impl InputBackend for EvdevBackend {
    fn list(&self) -> io::Result<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();
        for entry in fs::read_dir(&self.dev_dir)? {
            let entry = entry?;
            let node = entry.file_name().to_string_lossy().into_owned();
            if !node.starts_with("event") {
                continue;
            }
            // Nodes without a readable name are skipped rather than failing the scan
            let name_path = self.sys_dir.join(&node).join("device").join("name");
            if let Ok(name) = fs::read_to_string(name_path) {
                devices.push(DeviceDescriptor {
                    name: name.trim_end().to_string(),
                    path: entry.path(),
                });
            }
        }
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(devices)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>> {
        let file = File::open(path)?;
        Ok(Box::new(EvdevDevice {
            reader: BufReader::with_capacity(EVENT_SIZE * 64, file),
        }))
    }
}

struct EvdevDevice<R> {
    reader: BufReader<R>,
}

impl<R: Read + Send> InputDevice for EvdevDevice<R> {
    fn read_blocking(&mut self) -> io::Result<InputEvent> {
        let mut raw = [0u8; EVENT_SIZE];
        self.reader.read_exact(&mut raw)?;
        Ok(decode_event(&raw))
    }

    fn discard_pending(&mut self) {
        let buffered = self.reader.buffer().len();
        // Whole records only, so the stream stays aligned
        self.reader.consume(buffered - buffered % EVENT_SIZE);
    }
}
