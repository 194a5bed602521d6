//! HTTP API for the RAG service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Document upload, status and deletion
//! - Direct insertion, queries and product analysis

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::{HealthReport, RagService};

pub mod documents;
pub mod query;
use documents::{
    delete_document_handler, document_status_handler, list_documents_handler,
    upload_document_handler,
};
use query::{analyze_product_handler, insert_handler, query_handler, query_multimodal_handler};

/// Room for multipart framing on top of the document itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<RagService>,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_upload = usize::try_from(state.service.config().max_document_size_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Documents - with a larger body limit for uploads
        .route(
            "/documents/upload",
            post(upload_document_handler).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/documents", get(list_documents_handler))
        .route("/documents/{id}/status", get(document_status_handler))
        .route("/documents/{id}", delete(delete_document_handler))
        // Retrieval
        .route("/insert", post(insert_handler))
        .route("/query", post(query_handler))
        .route("/query/multimodal", post(query_multimodal_handler))
        .route("/analyze/product", post(analyze_product_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.service.health().await)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "Multimodal RAG API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/documents/upload",
            "/documents",
            "/insert",
            "/query",
            "/query/multimodal",
            "/analyze/product",
        ],
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
