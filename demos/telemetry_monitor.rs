// Prints drive telemetry published by a runtime started with telemetry.enabled = true
use tadpole_drive::config::{TOPIC_DRIVE, TOPIC_HEALTH};
use tadpole_drive::messages::{DriveMode, DriveTelemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let drive = session.declare_subscriber(TOPIC_DRIVE).await?;
    let health = session.declare_subscriber(TOPIC_HEALTH).await?;
    info!("Listening on {} and {}, Ctrl+C to quit", TOPIC_DRIVE, TOPIC_HEALTH);

    let mut last_mode = None;
    loop {
        tokio::select! {
            sample = drive.recv_async() => {
                let sample = sample?;
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<DriveTelemetry>(&payload) {
                    Ok(t) => println!(
                        "left {:+.2}  right {:+.2}  battery {}",
                        t.left,
                        t.right,
                        if t.battery_ok { "ok" } else { "LOW" }
                    ),
                    Err(e) => warn!("Bad drive payload: {}", e),
                }
            }
            sample = health.recv_async() => {
                let sample = sample?;
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<DriveMode>(&payload) {
                    // Only print mode changes
                    Ok(mode) if last_mode != Some(mode) => {
                        info!("Mode: {:?}", mode);
                        last_mode = Some(mode);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Bad health payload: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
