//! CLI entry point for the RTSP to HLS stream supervisor
//!
//! Parses command line arguments, installs logging and runs the daemon until
//! Ctrl-C.

use clap::Parser;
use rtsp_hls::{Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Supervises ffmpeg processes turning RTSP camera feeds into HLS playlists
#[derive(Parser, Debug)]
#[command(name = "rtsp-hls")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the HLS output root
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Override the heartbeat overtime in seconds
    #[arg(long)]
    overtime_secs: Option<u64>,

    /// Skip transcoder startup checks. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn load_config(args: &Args) -> Result<Config, rtsp_hls::config::ConfigError> {
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        warn!(path = %args.config.display(), "Config file not found, using defaults");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };

    if let Some(base_dir) = &args.base_dir {
        config.stream.base_dir = base_dir.clone();
    }
    if let Some(overtime) = args.overtime_secs {
        config.stream.overtime_secs = overtime;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        base_dir = %config.stream.base_dir.display(),
        transcoder = %config.transcoder.program.display(),
        overtime_secs = config.stream.overtime_secs,
        "RTSP to HLS supervisor starting"
    );

    let daemon = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        match Daemon::with_config(config) {
            Ok(daemon) => daemon,
            Err(e) => {
                error!(error = %e, "Failed to initialize daemon");
                return ExitCode::FAILURE;
            }
        }
    };

    if daemon.config.status.enabled {
        info!(
            "Status endpoint on http://{}/status",
            daemon.config.status.bind
        );
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    match daemon.run_until(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon error");
            ExitCode::FAILURE
        }
    }
}
