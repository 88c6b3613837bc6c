use std::path::PathBuf;

use clap::Parser;
use tadpole_drive::config::Config;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Gamepad-driven differential drive runtime")]
struct Args {
    /// TOML config file, built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gamepad device node, skips the name search
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Log motor output instead of driving the H-bridge
    #[arg(long)]
    simulate: bool,
}

fn load_config(args: &Args) -> tadpole_drive::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(device) = &args.device {
        config.gamepad.device_path = Some(device.clone());
    }
    if args.simulate {
        config.runtime.simulated = true;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for per-write motor output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = tadpole_drive::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
