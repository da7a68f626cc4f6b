use anyhow::{Context, Result};
use std::sync::Arc;
use thumbnail_service::api::{start_api_server, AppState};
use thumbnail_service::config::{Config, FileStoreBackend, FileStoreConfig};
use thumbnail_service::file_store::{FileStore, LocalFileStore};
use thumbnail_service::image_service::{CallTimeouts, ImageService};
use thumbnail_service::job_queue::KafkaJobQueue;
use thumbnail_service::metadata_store::RedisMetadataStore;
use thumbnail_service::s3_store::S3FileStore;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Nier Thumbnail Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let files = build_file_store(&config.file_store).await?;

    let metadata = Arc::new(
        RedisMetadataStore::new(&config.redis)
            .await
            .context("Failed to initialize metadata store")?,
    );

    // The producer connects on the first upload
    let queue = Arc::new(KafkaJobQueue::new(config.kafka.clone()));

    let service = Arc::new(ImageService::new(
        files,
        metadata,
        queue,
        CallTimeouts::from(&config.timeouts),
    ));

    info!("Thumbnail service started successfully");

    // Serve until SIGINT/SIGTERM, then let in-flight requests finish
    start_api_server(AppState { service }, &config.api, shutdown_signal()).await?;

    info!("Thumbnail service stopped");

    Ok(())
}

/// Construct the configured file storage backend
async fn build_file_store(config: &FileStoreConfig) -> Result<Arc<dyn FileStore>> {
    match config.backend {
        FileStoreBackend::Local => {
            let store = LocalFileStore::new(&config.upload_dir)
                .await
                .context("Failed to initialize local file store")?;
            Ok(Arc::new(store))
        }
        FileStoreBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .context("file_store.s3 must be set for the s3 backend")?;
            Ok(Arc::new(S3FileStore::new(s3).await))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
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
