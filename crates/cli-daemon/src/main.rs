//! CLI entry point for the HLS relay daemon
//!
//! Parses command line arguments, sets up logging and starts the daemon.

use clap::Parser;
use hls_relay::{Daemon, VideoFileSource};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// HLS relay - transcodes remote video files into locally served HLS streams
#[derive(Parser, Debug)]
#[command(name = "hls-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip the transcoder availability check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// JSON file describing a video file source to stream on startup.
    /// May be given more than once.
    #[arg(short, long = "source", value_name = "FILE")]
    sources: Vec<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_source(path: &Path) -> Result<VideoFileSource, Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    info!(config = %args.config.display(), "HLS relay starting");
    if args.skip_checks {
        warn!("Skipping transcoder availability check (--skip-checks enabled)");
    }

    let daemon = match Daemon::new(&args.config, args.skip_checks).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    info!(
        total_cores = daemon.concurrency_plan.total_cores,
        max_concurrent_streams = daemon.concurrency_plan.max_concurrent_streams,
        bind_address = %daemon.config.server.bind_address,
        "Daemon initialized"
    );

    for path in &args.sources {
        let source = match load_source(path) {
            Ok(source) => source,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read source");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = daemon.submit_source(source).await {
            error!(path = %path.display(), error = %e, "Failed to submit source");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = daemon.run_with_server().await {
        error!(error = %e, "Daemon error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
