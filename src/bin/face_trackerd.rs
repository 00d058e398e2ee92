//! face_trackerd - face tracking server
//!
//! This daemon:
//! 1. Loads configuration (file named by TRACKER_CONFIG, env overrides, CLI)
//! 2. Listens for one robot connection at a time
//! 3. Per connection, reads the configured camera transport, detects faces
//!    and answers each robot `OK` with a pan/tilt command
//! 4. Shuts down cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use face_tracker::{BackendRegistry, ConnectionSupervisor, StopSignal, TrackerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Track a face with a pan/tilt robot head")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "TRACKER_CONFIG")]
    config: Option<PathBuf>,

    /// Robot control listener (overrides configuration).
    #[arg(long)]
    listen_addr: Option<String>,

    /// Camera transport: stream, datagram or mjpeg (overrides configuration).
    #[arg(long)]
    transport: Option<String>,

    /// Detector backend (overrides configuration).
    #[arg(long)]
    detector: Option<String>,

    /// Print the available detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = BackendRegistry::with_defaults();
    if args.list_detectors {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = TrackerConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.listen_addr {
        config.listen_addr = addr;
    }
    if let Some(kind) = args.transport {
        config.transport.kind = kind.parse()?;
    }
    if let Some(detector) = args.detector {
        config.detector = detector;
    }
    config.validate()?;
    // Fail at startup rather than on the first connection.
    registry.create(&config.detector)?;

    log::info!(
        "face_trackerd {} starting: transport {:?}, detector {}",
        env!("CARGO_PKG_VERSION"),
        config.transport.kind,
        config.detector
    );

    let supervisor = ConnectionSupervisor::bind(config)?;

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_stop.stop();
    })
    .expect("error setting Ctrl-C handler");

    supervisor.run(&stop)
}
