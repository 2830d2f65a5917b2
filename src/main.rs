//! Mixer GW - Rust implementation
//!
//! Serves a mixer engine's device tree to browsers and forwards their fader,
//! pan, mute and solo changes back to the engine.

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mixer_gw::api::{self, ApiState};
use mixer_gw::config::AppConfig;
use mixer_gw::mirror::Device;
use mixer_gw::paths::AppPaths;
use mixer_gw::upstream::{self, SharedEngine, UpstreamLink};

/// Mixer GW - Browser control surface for a networked mixer engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (detected when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Mixer engine address, overrides the config file
    #[arg(long, env = "MIXER_UPSTREAM", value_name = "HOST:PORT")]
    upstream: Option<String>,

    /// HTTP port, overrides the config file
    #[arg(long, env = "MIXER_HTTP_PORT")]
    http_port: Option<u16>,

    /// Discover the device tree, print it and exit
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = match &args.config {
        Some(path) => AppPaths::for_config(path),
        None => AppPaths::detect(),
    };
    let config = load_config(&args, &paths).await?;

    let _log_guard = init_logging(&args.log_level, &config, &paths)?;

    info!("Starting Mixer GW v{}...", env!("CARGO_PKG_VERSION"));
    info!(
        "Base directory: {} ({})",
        paths.base_dir().display(),
        if paths.is_local { "local" } else { "installed" }
    );
    info!("Configuration file: {}", paths.config.display());

    if args.dump {
        return dump_devices(&config).await;
    }

    run_app(config, shutdown_signal()).await?;

    info!("Mixer GW shutdown complete");
    Ok(())
}

async fn load_config(args: &Args, paths: &AppPaths) -> Result<AppConfig> {
    let mut config = AppConfig::load_or_default(&paths.config).await?;

    if let Some(address) = &args.upstream {
        config.override_upstream(address)?;
    }
    if let Some(port) = args.http_port {
        config.http.port = port;
    }
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

async fn run_app(config: AppConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    tokio::pin!(shutdown);

    let shared: SharedEngine = Arc::new(RwLock::new(None));
    let (ready_tx, ready_rx) = oneshot::channel();
    let mut supervisor = tokio::spawn(upstream::run_supervised(
        config.upstream.clone(),
        shared.clone(),
        ready_tx,
    ));

    info!("Connecting to mixer at {}...", config.upstream.address());

    // The HTTP server only starts once the first discovery has completed
    tokio::select! {
        ready = ready_rx => {
            if ready.is_err() {
                return joined(supervisor.await);
            }
        }
        _ = &mut shutdown => {
            supervisor.abort();
            return Ok(());
        }
    }

    let state = Arc::new(ApiState {
        engine: shared,
        static_dir: PathBuf::from(&config.http.static_dir),
    });
    let mut server = tokio::spawn(api::start_server(state, config.http.socket_addr()?));

    let result = tokio::select! {
        result = &mut supervisor => joined(result),
        result = &mut server => joined(result),
        _ = &mut shutdown => Ok(()),
    };

    supervisor.abort();
    server.abort();
    result
}

fn joined(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.context("Task panicked")?
}

/// Connect, discover and print the device tree
async fn dump_devices(config: &AppConfig) -> Result<()> {
    use colored::*;

    let link = UpstreamLink::connect(&config.upstream).await?;
    let summary = link.discover().await.context("Device discovery failed")?;
    let devices = link.handle().snapshot().await?;

    println!("\n{}", "=== Mixer Devices ===".bold().cyan());
    for device in &devices {
        print_device(device);
    }
    println!(
        "\n{} devices, {} channels, {} sends ({} hidden, {} failed)",
        summary.devices.to_string().green(),
        summary.inputs.to_string().green(),
        summary.sends.to_string().green(),
        summary.hidden,
        summary.failed
    );

    Ok(())
}

fn print_device(device: &Device) {
    use colored::*;

    let status = if device.online {
        "online".green()
    } else {
        "offline".red()
    };
    println!("\n{} [{}] {}", device.name.bold(), device.device_id, status);

    for input in &device.inputs {
        let mute = if input.mute {
            " MUTE".red().to_string()
        } else {
            String::new()
        };
        let solo = if input.solo == Some(true) {
            " SOLO".yellow().to_string()
        } else {
            String::new()
        };
        let pan = input.pan.map(|p| format!("  pan {:+.2}", p)).unwrap_or_default();
        println!(
            "  {}/{:<4} {:<20} {:>7.1} dB  ({:.2}){}{}{}",
            input.input_type,
            input.input_id,
            input.name.bright_white(),
            input.gain,
            input.gain_tapered,
            pan,
            mute,
            solo
        );

        for send in &input.sends {
            let bypass = if send.mute == Some(true) {
                " BYPASS".red().to_string()
            } else {
                String::new()
            };
            println!(
                "      send {:<4} {:<18} {:>7.1} dB  ({:.2})  id {}{}",
                send.send_id,
                send.name,
                send.gain,
                send.gain_tapered,
                send.id.dimmed(),
                bypass
            );
        }
    }
}

fn init_logging(level: &str, config: &AppConfig, paths: &AppPaths) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = if config.logging.file {
        paths.ensure_logs_dir()?;
        let appender = tracing_appender::rolling::daily(&paths.logs_dir, "mixer-gw.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
