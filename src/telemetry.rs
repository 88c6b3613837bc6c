// Zenoh telemetry publisher
//
// Topics:
// - tadpole/rt/drive: DriveTelemetry JSON
// - tadpole/state/health: DriveMode JSON

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use zenoh::pubsub::Publisher;

use crate::config::TelemetryConfig;
use crate::error::{DriveError, Result};
use crate::messages::DriveTelemetry;

fn telemetry_err(e: impl std::fmt::Display) -> DriveError {
    DriveError::Telemetry(e.to_string())
}

pub struct TelemetryPublisher {
    _session: zenoh::Session,
    drive: Publisher<'static>,
    health: Publisher<'static>,
    period: Duration,
}

impl TelemetryPublisher {
    /// Open the session and declare both publishers
    pub async fn open(config: &TelemetryConfig) -> Result<Self> {
        info!("Opening Zenoh session...");
        let session = zenoh::open(zenoh::Config::default())
            .await
            .map_err(telemetry_err)?;
        let drive = session
            .declare_publisher(config.topic_drive.clone())
            .await
            .map_err(telemetry_err)?;
        let health = session
            .declare_publisher(config.topic_health.clone())
            .await
            .map_err(telemetry_err)?;

        info!(
            "Publishing {} and {} at {} Hz",
            config.topic_drive, config.topic_health, config.rate_hz
        );
        Ok(Self {
            _session: session,
            drive,
            health,
            period: Duration::from_secs_f64(1.0 / config.rate_hz.max(1) as f64),
        })
    }

    /// Publish the latest snapshot every period. A failed put is logged and skipped.
    pub async fn run(self, snapshots: watch::Receiver<DriveTelemetry>) {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            let snapshot = *snapshots.borrow();
            if let Err(e) = self.publish(&snapshot).await {
                warn!("Telemetry publish failed: {}", e);
            }
        }
    }

    async fn publish(&self, snapshot: &DriveTelemetry) -> Result<()> {
        let drive = serde_json::to_string(snapshot).map_err(telemetry_err)?;
        let health = serde_json::to_string(&snapshot.mode).map_err(telemetry_err)?;
        self.drive.put(drive).await.map_err(telemetry_err)?;
        self.health.put(health).await.map_err(telemetry_err)?;
        Ok(())
    }
}
