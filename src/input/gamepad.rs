// Gamepad stick reader
//
// Runs on its own OS thread because device reads block. Publishes the latest
// stick vector into a single-slot watch channel: a newer vector replaces an
// unread one, so the consumer always sees the freshest position.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use super::device::{DeviceSelector, InputBackend, InputDevice, InputEvent, acquire};
use crate::config::GamepadConfig;
use crate::error::Result;
use crate::messages::AxisVector;

const AXIS_MIN: i32 = i16::MIN as i32;
const AXIS_MAX: i32 = i16::MAX as i32;

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Producer half: owns the device and feeds the handoff
pub struct VectorSource<B: InputBackend> {
    backend: B,
    selector: DeviceSelector,
    scan_interval: Duration,
    event_type: u16,
    x_code: u16,
    y_code: u16,
    midpoint: i32,
    accept_every_nth: u64,
    device: Option<Box<dyn InputDevice>>,
    last: AxisVector,
    matched_events: u64,
    tx: watch::Sender<AxisVector>,
    flush_requested: Arc<AtomicBool>,
}

/// Consumer half, held by the drive coordinator
#[derive(Debug)]
pub struct VectorReceiver {
    rx: watch::Receiver<AxisVector>,
    invert_x: bool,
    invert_y: bool,
    flush_requested: Arc<AtomicBool>,
}

impl<B: InputBackend + 'static> VectorSource<B> {
    /// Create a disconnected source and its receiver. Nothing blocks until
    /// [`connect`](Self::connect) or [`run`](Self::run).
    pub fn new(backend: B, config: &GamepadConfig) -> Result<(Self, VectorReceiver)> {
        config.validate()?;
        let (tx, rx) = watch::channel(AxisVector::default());
        let flush_requested = Arc::new(AtomicBool::new(false));

        let source = Self {
            backend,
            selector: config.selector(),
            scan_interval: config.scan_interval(),
            event_type: config.event_type,
            x_code: config.x_axis_code,
            y_code: config.y_axis_code,
            midpoint: config.axis_midpoint,
            accept_every_nth: u64::from(config.accept_every_nth_event),
            device: None,
            last: AxisVector::default(),
            matched_events: 0,
            tx,
            flush_requested: flush_requested.clone(),
        };
        let receiver = VectorReceiver {
            rx,
            invert_x: config.invert_x,
            invert_y: config.invert_y,
            flush_requested,
        };
        Ok((source, receiver))
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    /// Block until the selected device is found and opened
    pub fn connect(&mut self) {
        let device = acquire(&self.backend, &self.selector, self.scan_interval);
        self.device = Some(device);
    }

    /// Read events forever, reconnecting whenever the device fails.
    ///
    /// Returns only once every receiver has been dropped.
    pub fn run(mut self) {
        info!("Vector source reading from {}", self.selector);
        loop {
            if self.tx.is_closed() {
                info!("Vector receiver dropped, stopping vector source");
                return;
            }

            let Some(device) = self.device.as_mut() else {
                self.connect();
                continue;
            };

            if self.flush_requested.swap(false, Ordering::Relaxed) {
                device.discard_pending();
            }

            match device.read_blocking() {
                Ok(event) => {
                    self.handle_event(event);
                }
                Err(e) => self.disconnect(e),
            }
        }
    }

    /// Start [`run`](Self::run) on a dedicated thread
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("vector-source".to_string())
            .spawn(move || self.run())
    }

    fn disconnect(&mut self, error: io::Error) {
        warn!("Input device lost ({}), reconnecting", error);
        // Dropping the handle closes it
        self.device = None;
    }

    /// Apply one raw event. Returns the vector it published, if any.
    pub fn handle_event(&mut self, event: InputEvent) -> Option<AxisVector> {
        if event.event_type != self.event_type {
            return None;
        }
        let axis = if event.code == self.x_code {
            Axis::X
        } else if event.code == self.y_code {
            Axis::Y
        } else {
            return None;
        };

        self.matched_events += 1;
        if self.matched_events % self.accept_every_nth != 0 {
            return None;
        }

        let value = event.value.saturating_sub(self.midpoint).clamp(AXIS_MIN, AXIS_MAX);
        match axis {
            Axis::X => self.last.x = value,
            Axis::Y => self.last.y = value,
        }
        self.tx.send_replace(self.last);
        Some(self.last)
    }
}

impl VectorReceiver {
    /// Latest vector if one arrived since the last read, without waiting
    pub fn try_vector(&mut self) -> Option<AxisVector> {
        match self.rx.has_changed() {
            Ok(true) => Some(self.take()),
            _ => None,
        }
    }

    /// Wait for a vector newer than the last one read.
    ///
    /// Returns `None` only if the source has stopped.
    pub async fn wait_vector(&mut self) -> Option<AxisVector> {
        self.rx.changed().await.ok()?;
        Some(self.take())
    }

    /// Forget the unread vector and ask the source to drop buffered input.
    ///
    /// Best effort: the source acts on the request before its next device
    /// read, so an event it is already handling is still published.
    pub fn flush(&mut self) {
        self.rx.borrow_and_update();
        self.flush_requested.store(true, Ordering::Relaxed);
    }

    /// True once the source has stopped publishing
    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    fn take(&mut self) -> AxisVector {
        let vector = *self.rx.borrow_and_update();
        vector.inverted(self.invert_x, self.invert_y)
    }
}
