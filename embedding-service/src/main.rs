use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

mod api;
mod config;
mod error;
mod model;
mod preprocess;
mod service;

use crate::api::AppState;
use crate::config::EmbeddingConfig;
use crate::model::VisualEncoder;
use crate::service::EmbeddingService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EmbeddingConfig::from_env()?;
    init_logging(&config.log_level);

    info!(
        model = %config.model_name,
        "Starting embedding service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable, /metrics will be empty");
            None
        }
    };

    // A failed load keeps the process up in degraded mode
    let load_config = config.clone();
    let encoder: Option<Arc<dyn VisualEncoder>> =
        match tokio::task::spawn_blocking(move || model::load_encoder(&load_config)).await? {
            Ok(encoder) => Some(Arc::from(encoder)),
            Err(e) => {
                error!(
                    error = %e,
                    path = %config.model_path().display(),
                    "Failed to load model, serving in degraded mode"
                );
                None
            }
        };

    let service = Arc::new(EmbeddingService::new(&config, encoder));
    let state = Arc::new(AppState { service, metrics });

    // Base64 inflates payloads by a third; leave room for a handful of images per batch
    let body_limit = config.max_image_bytes.saturating_mul(8);
    let app = api::router(state, body_limit);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Embedding service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise the configured level for our crate
    let level = level.to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("embedding_service={level},tower_http={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
