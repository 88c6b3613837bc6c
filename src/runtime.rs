// Drive coordinator and process wiring
//
// The loop has no fixed rate: it runs whenever a stick vector arrives and
// otherwise wakes every idle_poll, so battery and input-timeout checks keep
// happening while the gamepad is quiet.
//
// Three activities run in parallel:
// - vector source: OS thread, blocking device reads
// - battery monitor: tokio task
// - coordinator: this loop, owns both motors

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::battery::{self, BatteryFlag, BatteryMonitor, DigitalInput, SimulatedInput, SysfsDigitalInput};
use crate::config::{Config, ThrottleConfig};
use crate::drive::{Motor, PwmChannel, open_motors, shape};
use crate::error::{DriveError, Result};
use crate::input::{EvdevBackend, VectorReceiver, VectorSource};
use crate::messages::{AxisVector, DriveMode, DriveTelemetry, ShapedThrottle};
use crate::telemetry::TelemetryPublisher;

pub struct Coordinator<P: PwmChannel> {
    left: Motor<P>,
    right: Motor<P>,
    throttle: ThrottleConfig,
    vectors: VectorReceiver,
    battery: BatteryFlag,
    idle_poll: Duration,
    connection_timeout: Option<Duration>,
    last_input: Instant,
    mode: DriveMode,
    telemetry: watch::Sender<DriveTelemetry>,
}

impl<P: PwmChannel> Coordinator<P> {
    pub fn new(
        left: Motor<P>,
        right: Motor<P>,
        vectors: VectorReceiver,
        battery: BatteryFlag,
        throttle: ThrottleConfig,
        idle_poll: Duration,
    ) -> Result<Self> {
        throttle.validate()?;
        if idle_poll.is_zero() {
            return Err(DriveError::InvalidConfig(
                "runtime: idle poll must be greater than 0".to_string(),
            ));
        }
        info!(
            "Motors ready (left reversed: {}, right reversed: {})",
            left.is_reversed(),
            right.is_reversed()
        );

        let (telemetry, _) = watch::channel(DriveTelemetry::stopped(DriveMode::Drive, false));
        Ok(Self {
            left,
            right,
            throttle,
            vectors,
            battery,
            idle_poll,
            connection_timeout: None,
            last_input: Instant::now(),
            mode: DriveMode::Drive,
            telemetry,
        })
    }

    /// Stop the motors when no vector arrives for `timeout`
    pub fn with_connection_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(DriveError::InvalidConfig(
                "gamepad: connection timeout must be greater than 0".to_string(),
            ));
        }
        self.connection_timeout = timeout;
        Ok(self)
    }

    pub fn telemetry(&self) -> watch::Receiver<DriveTelemetry> {
        self.telemetry.subscribe()
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    /// Run until the vector source stops or a motor write fails
    pub async fn run(mut self) -> Result<()> {
        info!("Drive coordinator started");
        loop {
            if self.step().await?.is_none() {
                self.idle().await?;
            }
        }
    }

    /// One control iteration.
    ///
    /// Enters standby first if the battery is low. Returns the throttles
    /// applied, or `None` when no new vector was waiting (the motors keep
    /// their previous output).
    pub async fn step(&mut self) -> Result<Option<ShapedThrottle>> {
        if !self.battery.is_ok() {
            self.standby().await?;
        }

        match self.vectors.try_vector() {
            Some(vector) => self.apply(vector).map(Some),
            None => {
                self.check_input_timeout()?;
                Ok(None)
            }
        }
    }

    // Wait for the next vector, but no longer than idle_poll
    async fn idle(&mut self) -> Result<()> {
        match self.next_vector_or_tick().await? {
            Some(vector) if self.battery.is_ok() => self.apply(vector).map(|_| ()),
            // Dropped: the next step enters standby
            _ => Ok(()),
        }
    }

    async fn standby(&mut self) -> Result<()> {
        self.stop_motors()?;
        warn!("Battery low, switching to standby");
        self.publish_stopped(DriveMode::Standby);

        // Input keeps being consumed and thrown away so nothing stale is replayed
        while !self.battery.is_ok() {
            self.next_vector_or_tick().await?;
        }

        self.vectors.flush();
        self.last_input = Instant::now();
        info!("Battery ok, leaving standby");
        self.publish_stopped(DriveMode::Drive);
        Ok(())
    }

    async fn next_vector_or_tick(&mut self) -> Result<Option<AxisVector>> {
        let next = tokio::select! {
            vector = self.vectors.wait_vector() => Some(vector),
            _ = sleep(self.idle_poll) => None,
        };
        match next {
            Some(None) => Err(DriveError::VectorSourceClosed),
            Some(vector) => Ok(vector),
            None => Ok(None),
        }
    }

    fn apply(&mut self, vector: AxisVector) -> Result<ShapedThrottle> {
        let out = shape(vector, &self.throttle)?;
        self.left.set_throttle(out.left)?;
        self.right.set_throttle(out.right)?;

        self.last_input = Instant::now();
        if self.mode != DriveMode::Drive {
            info!("Input resumed");
            self.mode = DriveMode::Drive;
        }
        self.telemetry.send_replace(DriveTelemetry {
            left: out.left,
            right: out.right,
            battery_ok: true,
            mode: DriveMode::Drive,
        });
        Ok(out)
    }

    fn check_input_timeout(&mut self) -> Result<()> {
        let Some(timeout) = self.connection_timeout else {
            return Ok(());
        };
        let age = self.last_input.elapsed();
        if self.mode == DriveMode::Drive && age > timeout {
            warn!("No input for {:?}, stopping motors", age);
            self.stop_motors()?;
            self.publish_stopped(DriveMode::InputStale);
        }
        Ok(())
    }

    fn stop_motors(&mut self) -> Result<()> {
        self.left.stop()?;
        self.right.stop()
    }

    fn publish_stopped(&mut self, mode: DriveMode) {
        self.mode = mode;
        self.telemetry
            .send_replace(DriveTelemetry::stopped(mode, self.battery.is_ok()));
    }
}

/// Start every activity and drive until one of them fails or the process is interrupted
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    let simulated = config.runtime.simulated;
    if simulated {
        info!("Simulated hardware: motor output is logged, battery reads ok");
    }

    let (left, right) = open_motors(&config.motors, simulated)?;

    let sense: Box<dyn DigitalInput> = if simulated {
        Box::new(SimulatedInput::new(true))
    } else {
        Box::new(SysfsDigitalInput::open(config.battery.sense_line)?)
    };
    let monitor = BatteryMonitor::new(config.battery.low_timeout(), Instant::now())?;
    let battery = monitor.flag();
    let mut battery_task = tokio::spawn(battery::run(sense, monitor, config.battery.check_period()));

    let (source, vectors) = VectorSource::new(EvdevBackend::default(), &config.gamepad)?;
    source.spawn()?;

    let coordinator = Coordinator::new(
        left,
        right,
        vectors,
        battery,
        config.throttle.clone(),
        config.runtime.idle_poll(),
    )?
    .with_connection_timeout(config.gamepad.connection_timeout())?;

    let telemetry_task = if config.telemetry.enabled {
        let publisher = TelemetryPublisher::open(&config.telemetry).await?;
        Some(tokio::spawn(publisher.run(coordinator.telemetry())))
    } else {
        None
    };

    info!(
        "Runtime started: battery every {:?}, {:?} low timeout",
        config.battery.check_period(),
        config.battery.low_timeout()
    );

    // Whichever branch wins, dropping the coordinator stops both motors
    let result = tokio::select! {
        r = coordinator.run() => r,
        r = &mut battery_task => {
            let r = r.unwrap_or(Err(DriveError::TaskAborted("battery monitor")));
            if let Err(e) = &r {
                error!("Battery monitor failed: {}", e);
            }
            r
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping motors");
            Ok(())
        }
    };

    battery_task.abort();
    if let Some(task) = telemetry_task {
        task.abort();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GamepadConfig;
    use crate::drive::pwm::RecordingPwm;
    use crate::input::{DeviceDescriptor, InputBackend, InputDevice, InputEvent};
    use std::io;
    use std::path::Path;

    const IDLE: Duration = Duration::from_millis(1);

    struct NoDevices;

    impl InputBackend for NoDevices {
        fn list(&self) -> io::Result<Vec<DeviceDescriptor>> {
            Ok(Vec::new())
        }

        fn open(&self, _path: &Path) -> io::Result<Box<dyn InputDevice>> {
            Err(io::ErrorKind::NotFound.into())
        }
    }

    struct Channels {
        left_pos: RecordingPwm,
        left_neg: RecordingPwm,
        right_pos: RecordingPwm,
        right_neg: RecordingPwm,
    }

    impl Channels {
        fn all(&self) -> [&RecordingPwm; 4] {
            [&self.left_pos, &self.left_neg, &self.right_pos, &self.right_neg]
        }

        fn write_counts(&self) -> Vec<usize> {
            self.all().iter().map(|c| c.history().len()).collect()
        }

        /// Every duty cycle written after the given write counts
        fn writes_since(&self, counts: &[usize]) -> Vec<u8> {
            self.all()
                .iter()
                .zip(counts)
                .flat_map(|(c, &n)| c.history()[n..].to_vec())
                .collect()
        }
    }

    fn abs(code: u16, value: i32) -> InputEvent {
        InputEvent {
            event_type: 3,
            code,
            value,
        }
    }

    // Stick fully up: raw y = 0, inverted to +32768
    const STICK_UP: InputEvent = InputEvent {
        event_type: 3,
        code: 5,
        value: 0,
    };

    fn rig(
        throttle: ThrottleConfig,
        left_reversed: bool,
    ) -> (Coordinator<RecordingPwm>, VectorSource<NoDevices>, BatteryFlag, Channels) {
        let channels = Channels {
            left_pos: RecordingPwm::default(),
            left_neg: RecordingPwm::default(),
            right_pos: RecordingPwm::default(),
            right_neg: RecordingPwm::default(),
        };
        let left = Motor::new(
            "left",
            channels.left_pos.clone(),
            channels.left_neg.clone(),
            left_reversed,
        )
        .unwrap();
        let right = Motor::new(
            "right",
            channels.right_pos.clone(),
            channels.right_neg.clone(),
            false,
        )
        .unwrap();

        let (source, vectors) = VectorSource::new(NoDevices, &GamepadConfig::default()).unwrap();
        let battery = BatteryFlag::default();
        let coordinator = Coordinator::new(left, right, vectors, battery.clone(), throttle, IDLE).unwrap();
        (coordinator, source, battery, channels)
    }

    #[tokio::test]
    async fn test_forward_vector_drives_both_motors() {
        let (mut coordinator, mut source, battery, ch) = rig(ThrottleConfig::linear(0.6), false);
        battery.set(true);

        source.handle_event(STICK_UP);
        let out = coordinator.step().await.unwrap().unwrap();
        assert!((out.left - 0.6).abs() < 1e-9);
        assert!((out.right - 0.6).abs() < 1e-9);
        assert_eq!(ch.left_pos.last(), Some(60));
        assert_eq!(ch.right_pos.last(), Some(60));
        assert_eq!(ch.left_neg.last(), Some(0));
        assert_eq!(ch.right_neg.last(), Some(0));
    }

    #[tokio::test]
    async fn test_mirrored_left_motor_uses_negative_channel() {
        let (mut coordinator, mut source, battery, ch) = rig(ThrottleConfig::linear(1.0), true);
        battery.set(true);

        source.handle_event(STICK_UP);
        coordinator.step().await.unwrap().unwrap();
        assert_eq!(ch.left_pos.last(), Some(0));
        assert_eq!(ch.left_neg.last(), Some(100));
        assert_eq!(ch.right_pos.last(), Some(100));
    }

    #[tokio::test]
    async fn test_no_vector_keeps_previous_throttle() {
        let (mut coordinator, mut source, battery, ch) = rig(ThrottleConfig::linear(0.5), false);
        battery.set(true);

        source.handle_event(STICK_UP);
        coordinator.step().await.unwrap();
        let counts = ch.write_counts();

        assert_eq!(coordinator.step().await.unwrap(), None);
        assert_eq!(coordinator.step().await.unwrap(), None);
        assert_eq!(ch.write_counts(), counts);
        assert_eq!(ch.left_pos.last(), Some(50));
    }

    #[tokio::test]
    async fn test_low_battery_holds_motors_stopped() {
        let (mut coordinator, mut source, battery, ch) = rig(ThrottleConfig::linear(1.0), false);
        battery.set(true);
        source.handle_event(STICK_UP);
        coordinator.step().await.unwrap();
        assert_eq!(ch.left_pos.last(), Some(100));

        battery.set(false);
        let counts = ch.write_counts();
        let flag = battery.clone();
        let feeder = async {
            // Input keeps arriving while the battery is flagged low
            for value in [40000, 50000, 65535] {
                sleep(Duration::from_millis(5)).await;
                source.handle_event(abs(2, value));
            }
            sleep(Duration::from_millis(5)).await;
            flag.set(true);
        };

        let (result, ()) = tokio::join!(coordinator.step(), feeder);
        // Nothing from standby is replayed after recovery
        assert_eq!(result.unwrap(), None);
        assert!(ch.writes_since(&counts).iter().all(|&duty| duty == 0));
        assert_eq!(ch.left_pos.last(), Some(0));
        assert_eq!(coordinator.mode(), DriveMode::Drive);

        // The first fresh vector is the first command applied
        source.handle_event(STICK_UP);
        assert!(coordinator.step().await.unwrap().is_some());
        assert!(ch.left_pos.last().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_starts_in_standby_until_first_ok_reading() {
        let (mut coordinator, mut source, battery, ch) = rig(ThrottleConfig::linear(1.0), false);
        source.handle_event(STICK_UP);

        let flag = battery.clone();
        let feeder = async {
            sleep(Duration::from_millis(10)).await;
            assert_eq!(ch.left_pos.last(), Some(0));
            flag.set(true);
        };
        let (result, ()) = tokio::join!(coordinator.step(), feeder);
        assert_eq!(result.unwrap(), None);
        assert!(ch.left_pos.history().iter().all(|&duty| duty == 0));
    }

    #[tokio::test]
    async fn test_telemetry_follows_commands_and_standby() {
        let (mut coordinator, mut source, battery, _ch) = rig(ThrottleConfig::linear(0.5), false);
        let telemetry = coordinator.telemetry();
        battery.set(true);

        source.handle_event(STICK_UP);
        coordinator.step().await.unwrap();
        let snapshot = *telemetry.borrow();
        assert_eq!(snapshot.mode, DriveMode::Drive);
        assert!((snapshot.left - 0.5).abs() < 1e-9);
        assert!(snapshot.battery_ok);

        battery.set(false);
        let mut watcher = telemetry.clone();
        watcher.borrow_and_update();
        let flag = battery.clone();
        let feeder = async {
            watcher.changed().await.unwrap();
            assert_eq!(watcher.borrow().mode, DriveMode::Standby);
            assert_eq!(watcher.borrow().left, 0.0);
            flag.set(true);
        };
        let (result, ()) = tokio::join!(coordinator.step(), feeder);
        result.unwrap();
        assert_eq!(telemetry.borrow().mode, DriveMode::Drive);
    }

    #[tokio::test]
    async fn test_input_timeout_stops_motors() {
        let (coordinator, mut source, battery, ch) = rig(ThrottleConfig::linear(1.0), false);
        let mut coordinator = coordinator
            .with_connection_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        battery.set(true);

        source.handle_event(STICK_UP);
        coordinator.step().await.unwrap();
        assert_eq!(ch.right_pos.last(), Some(100));

        sleep(Duration::from_millis(40)).await;
        assert_eq!(coordinator.step().await.unwrap(), None);
        assert_eq!(coordinator.mode(), DriveMode::InputStale);
        assert_eq!(ch.right_pos.last(), Some(0));

        source.handle_event(STICK_UP);
        assert!(coordinator.step().await.unwrap().is_some());
        assert_eq!(coordinator.mode(), DriveMode::Drive);
    }

    #[test]
    fn test_malformed_settings_rejected() {
        let motors = || {
            (
                Motor::new("left", RecordingPwm::default(), RecordingPwm::default(), false).unwrap(),
                Motor::new("right", RecordingPwm::default(), RecordingPwm::default(), false).unwrap(),
            )
        };
        let vectors = || VectorSource::new(NoDevices, &GamepadConfig::default()).unwrap().1;
        let invalid = |r: Result<Coordinator<RecordingPwm>>| matches!(r, Err(DriveError::InvalidConfig(_)));

        let (left, right) = motors();
        let zero_poll = Coordinator::new(
            left,
            right,
            vectors(),
            BatteryFlag::default(),
            ThrottleConfig::default(),
            Duration::ZERO,
        );
        assert!(invalid(zero_poll));

        let (left, right) = motors();
        let steep_curve = ThrottleConfig {
            enable_curve: true,
            scale: 3.0,
            ..ThrottleConfig::default()
        };
        let curved = Coordinator::new(left, right, vectors(), BatteryFlag::default(), steep_curve, IDLE);
        assert!(invalid(curved));

        let (coordinator, _source, _battery, _ch) = rig(ThrottleConfig::default(), false);
        assert!(invalid(coordinator.with_connection_timeout(Some(Duration::ZERO))));
    }

    #[tokio::test]
    async fn test_no_timeout_means_no_decay() {
        let (mut coordinator, mut source, battery, ch) = rig(ThrottleConfig::linear(1.0), false);
        battery.set(true);
        source.handle_event(STICK_UP);
        coordinator.step().await.unwrap();

        sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.step().await.unwrap(), None);
        assert_eq!(ch.right_pos.last(), Some(100));
        assert_eq!(coordinator.mode(), DriveMode::Drive);
    }

    #[tokio::test]
    async fn test_run_ends_when_source_stops() {
        let (coordinator, source, battery, _ch) = rig(ThrottleConfig::default(), false);
        battery.set(true);
        drop(source);
        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, DriveError::VectorSourceClosed));
    }

    #[tokio::test]
    async fn test_standby_ends_when_source_stops() {
        let (mut coordinator, source, _battery, _ch) = rig(ThrottleConfig::default(), false);
        drop(source);
        let err = coordinator.step().await.unwrap_err();
        assert!(matches!(err, DriveError::VectorSourceClosed));
    }
}
