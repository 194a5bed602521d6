use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod config;
mod engine;
mod error;
mod ingestion;
mod llm;
mod service;
mod vector_store;

use crate::api::AppState;
use crate::config::RagConfig;
use crate::engine::{MultimodalRag, RagEngine};
use crate::service::RagService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RagConfig::from_env()?;
    init_logging(&config.log_level);

    info!(
        localai = %config.localai_url,
        qdrant = %config.qdrant_url,
        parser = %config.parser,
        "Starting RAG service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable, /metrics will be empty");
            None
        }
    };

    for dir in [&config.working_dir, &config.documents_dir, &config.cache_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    // Without an engine the process stays up and answers rag_not_initialized
    let engine: Option<Arc<dyn RagEngine>> = match MultimodalRag::new(&config) {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            error!(error = %e, "Failed to initialize RAG engine, serving in degraded mode");
            None
        }
    };

    let service = Arc::new(RagService::new(config.clone(), engine)?);

    let shutdown = CancellationToken::new();
    let workers = RagService::start_processing_workers(service.clone(), shutdown.clone());

    let state = Arc::new(AppState {
        service,
        metrics,
    });
    let app = api::router(state);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Processing worker panicked");
        }
    }

    info!("RAG service stopped");
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

    let level = level.to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("rag_service={level},tower_http={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
