//! tonepool - Main entry point
//!
//! Streams the configured tone mix to an output device until interrupted
//! (Ctrl+C / SIGTERM) or until `--duration` has been played.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tonepool_player::audio::{self, CpalDevice, Pacing};
use tonepool_player::build_info;
use tonepool_player::config::{ConfigOverrides, DeviceKind, PlayerConfig};
use tonepool_player::playback::Session;

const DEFAULT_LOG_FILTER: &str = "tonepool=info,tonepool_player=info";

/// Command-line arguments for tonepool
#[derive(Parser, Debug)]
#[command(name = "tonepool")]
#[command(about = "Stream a synthesized tone through a fixed pool of audio buffers")]
#[command(version)]
struct Args {
    /// Configuration file (default: <config dir>/tonepool/config.toml if present)
    #[arg(short, long, env = "TONEPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Output device kind
    #[arg(long, value_enum, env = "TONEPOOL_DEVICE")]
    device: Option<DeviceKind>,

    /// Output device name (cpal); falls back to the default device
    #[arg(long, env = "TONEPOOL_DEVICE_NAME")]
    device_name: Option<String>,

    /// Sample rate in Hz
    #[arg(short = 'r', long, env = "TONEPOOL_SAMPLE_RATE")]
    sample_rate: Option<u32>,

    /// Number of buffers in the pool
    #[arg(short = 'n', long, env = "TONEPOOL_POOL_CAPACITY")]
    pool_capacity: Option<usize>,

    /// Length of each buffer in seconds
    #[arg(short, long, env = "TONEPOOL_BUFFER_DURATION")]
    buffer_duration: Option<f64>,

    /// Maximum time to wait for in-flight buffers at shutdown, in milliseconds
    #[arg(long, env = "TONEPOOL_DRAIN_TIMEOUT_MS")]
    drain_timeout_ms: Option<u64>,

    /// Stop after this many seconds of audio (default: run until interrupted)
    #[arg(short, long, env = "TONEPOOL_DURATION")]
    duration: Option<f64>,

    /// Virtual device pacing
    #[arg(long, value_enum, env = "TONEPOOL_PACING")]
    pacing: Option<Pacing>,

    /// Render to a WAV file (virtual device only)
    #[arg(long, env = "TONEPOOL_WAV_OUTPUT")]
    wav_output: Option<PathBuf>,

    /// Log filter, e.g. "debug" (RUST_LOG takes precedence)
    #[arg(long, env = "TONEPOOL_LOG_LEVEL")]
    log_level: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the session report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            device: self.device,
            device_name: self.device_name.clone(),
            sample_rate: self.sample_rate,
            pool_capacity: self.pool_capacity,
            buffer_duration_secs: self.buffer_duration,
            drain_timeout_ms: self.drain_timeout_ms,
            duration_secs: self.duration,
            pacing: self.pacing,
            wav_output: self.wav_output.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_source) = PlayerConfig::load(args.config.as_deref(), args.overrides())
        .context("Failed to load configuration")?;

    // Initialize tracing
    let default_filter = config.log_level.clone().unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "tonepool v{} [{}] built {} ({})",
        build_info::VERSION,
        build_info::GIT_HASH,
        build_info::BUILD_TIMESTAMP,
        build_info::BUILD_PROFILE
    );

    if args.list_devices {
        let devices = CpalDevice::list_devices().context("Failed to list output devices")?;
        for name in devices {
            println!("{}", name);
        }
        return Ok(());
    }

    match config_source.as_ref() {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let session_config = config.session_config();
    info!(
        "{} buffers x {} samples ({} s) at {}, device {:?}",
        session_config.pool_capacity,
        session_config.buffer_len,
        config.buffer_duration_secs,
        session_config.format,
        config.device
    );

    let session = Session::new(session_config).with_runtime(tokio::runtime::Handle::current());
    let control = session.control();

    let signal_control = session.control();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        signal_control.request_shutdown();
    });

    let signal_mix = config.tone_mix();
    let device_config = config.clone();
    let report = tokio::task::spawn_blocking(move || {
        session.run(signal_mix, |format, handler| {
            audio::open_device(&device_config, format, handler)
        })
    })
    .await
    .context("Session thread failed")?
    .context("Failed to start playback")?;

    signal_task.abort();
    if control.is_shutdown_requested() && report.fault.is_none() {
        info!("Stopped on request");
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", json);
    }

    if let Some(fault) = report.fault {
        error!("Playback ended with a fault: {}", fault);
        bail!("playback failed: {}", fault);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
