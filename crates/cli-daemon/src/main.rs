//! CLI entry point for the auto-encode daemon
//!
//! Parses command line arguments, sets up logging and starts the daemon.

use auto_encode::{
    prepare_state_dir, run_startup_checks, shutdown, spawn_signal_listener, Config, Daemon,
    DaemonError, PlexClient, ToolVersions,
};
use clap::Parser;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Auto Encode - watch folders, transcode new media, publish to Plex
#[derive(Parser, Debug)]
#[command(name = "auto-encode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "/etc/auto-encode/config.toml")]
    config: PathBuf,

    /// Skip startup checks (ffmpeg, ffprobe). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where log events go.
#[derive(Debug)]
enum LogTarget {
    File(File),
    /// stderr, optionally because the configured log file was unusable.
    Stderr {
        unusable: Option<(PathBuf, io::Error)>,
    },
}

/// Open `log_file` for appending, creating its parent directory. An unusable
/// path falls back to stderr.
fn log_target(log_file: Option<&Path>) -> LogTarget {
    let Some(path) = log_file else {
        return LogTarget::Stderr { unusable: None };
    };

    let opened = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(path));
    match opened {
        Ok(file) => LogTarget::File(file),
        Err(e) => LogTarget::Stderr {
            unusable: Some((path.to_path_buf(), e)),
        },
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// level.
fn init_logging(target: LogTarget) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());

    match target {
        LogTarget::File(file) => {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_timer(timer)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .with(env_filter)
                .init();
        }
        LogTarget::Stderr { unusable } => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_timer(timer).with_writer(io::stderr))
                .with(env_filter)
                .init();
            if let Some((path, e)) = unusable {
                warn!(
                    log_file = %path.display(),
                    error = %e,
                    "Cannot write to log file, logging to stderr instead"
                );
            }
        }
    }
}

/// Every non-blank line of the tool version output, ffmpeg first.
fn banner_lines(versions: &ToolVersions) -> Vec<&str> {
    versions
        .ffmpeg
        .lines()
        .chain(std::iter::once(versions.ffprobe.as_str()))
        .filter(|line| !line.trim().is_empty())
        .collect()
}

async fn run(args: &Args, config: Config) -> Result<(), DaemonError> {
    info!(config = %args.config.display(), "Auto Encode starting");

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else {
        let versions = run_startup_checks(&config.encode).await?;
        for line in banner_lines(&versions) {
            info!("{}", line);
        }
        if versions.ffmpeg_major.is_none() {
            warn!("Could not parse the ffmpeg version; continuing anyway");
        }
    }

    prepare_state_dir(&config.daemon)?;

    let notifier = PlexClient::new(&config.plex)?;
    let (trigger, shutdown) = shutdown::channel();
    let mut daemon = Daemon::new(&config, notifier, shutdown)?;

    for pair in daemon.pairs() {
        info!(
            pair = pair.index,
            source = %pair.source.display(),
            encoded = %pair.encoded.display(),
            publish = %pair.publish.display(),
            section = %pair.section,
            "Watching directory pair"
        );
    }
    info!(url = %config.plex.url, "Plex server");

    spawn_signal_listener(trigger, daemon.current_job()).map_err(DaemonError::Signals)?;

    daemon.run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(log_target(config.daemon.log_file.as_deref()));

    match run(&args, config).await {
        // Every termination path exits non-zero, including a clean signal shutdown.
        Err(DaemonError::Terminated) => {
            info!("Shutdown complete");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
        Ok(()) => ExitCode::SUCCESS,
    }
}
