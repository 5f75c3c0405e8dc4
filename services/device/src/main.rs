//! Camlink device service entry point.
//!
//! Configuration is loaded from `config/device.toml`, `/etc/camlink/device.toml`
//! and `DEVICE__*` environment variables. See `config.rs` for the options.

use anyhow::{Context, Result};
use camlink_device::config::{DeviceConfig, LoggingConfig};
use camlink_device::{
    build_link, build_sensor, FrameValidator, LocalDurableStage, Orchestrator, ReqwestTransport,
    RetryPolicy, Schedule, Uploader, UploaderSettings,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = DeviceConfig::load().context("Failed to load configuration")?;

    init_logging(&config.logging)?;

    info!(
        service = "camlink-device",
        version = env!("CARGO_PKG_VERSION"),
        device_id = %config.device.id,
        "Starting camera device service"
    );

    config.validate()?;

    let orchestrator = build_orchestrator(&config)?;
    let accounting = orchestrator.run(shutdown_signal()).await;

    let stats = accounting.snapshot();
    info!(
        attempts = stats.attempts,
        successes = stats.successes,
        failures = stats.failures,
        total_bytes = stats.total_bytes,
        success_rate = format!("{:.1}", stats.success_rate),
        "Final delivery stats"
    );

    info!("Shutdown complete");
    Ok(())
}

/// Wire the pipeline collaborators from configuration.
fn build_orchestrator(config: &DeviceConfig) -> Result<Orchestrator> {
    let sensor = build_sensor(&config.sensor).context("Failed to initialize sensor")?;
    let link = build_link(&config.link, &config.upload)?;

    let transport = ReqwestTransport::new(config.upload.timeout(), config.upload.max_redirects)
        .context("Failed to build HTTP client")?;
    let uploader = Uploader::new(
        UploaderSettings::from(&config.upload),
        Box::new(transport),
        link,
    );

    info!(
        url = %config.upload.url,
        cadence_secs = config.schedule.cadence_secs,
        max_attempts = config.retry.max_attempts,
        "Pipeline configured"
    );

    let mut orchestrator = Orchestrator::new(
        config.device.id.clone(),
        sensor,
        FrameValidator::from(&config.validation),
        uploader,
        RetryPolicy::from(&config.retry),
        Schedule::from(&config.schedule),
    );

    if config.storage.enabled {
        let stage = LocalDurableStage::new(&config.storage);
        info!(dir = %stage.images_dir().display(), "Durable staging enabled");
        orchestrator = orchestrator.with_durable_store(Arc::new(stage));
    }

    Ok(orchestrator)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("camlink_device={}", level).parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
