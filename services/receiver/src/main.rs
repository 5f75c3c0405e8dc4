use anyhow::{Context, Result};
use camlink_receiver::config::{Config, StorageBackend};
use camlink_receiver::{start_api_server, AppState, ArtifactStore, FilesystemStore, S3Store};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before reading the environment
    let dotenv = dotenvy::dotenv();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    if dotenv.is_err() {
        info!("No .env file found, using system environment variables");
    }

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting camlink receiver"
    );

    config.validate()?;

    // Initialize metrics
    if config.service.metrics_enabled {
        init_metrics(config.service.metrics_port)?;
    }

    let store = build_store(&config).await?;
    info!(storage = %store.describe(), "Write target ready");

    let state = AppState::new(store, &config.api);
    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Receiver stopped");

    Ok(())
}

/// Build the configured write target
async fn build_store(config: &Config) -> Result<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match config.storage.backend {
        StorageBackend::Filesystem => Arc::new(
            FilesystemStore::open(&config.storage.directory)
                .await
                .context("Failed to open upload directory")?,
        ),
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .context("s3 section is required for the s3 backend")?;
            if s3.public_read {
                warn!(bucket = %s3.bucket, "Uploaded objects will be publicly readable");
            }
            Arc::new(
                S3Store::new(s3)
                    .await
                    .context("Failed to initialize S3 store")?,
            )
        }
    };
    Ok(store)
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

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
