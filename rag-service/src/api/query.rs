//! Retrieval API endpoints.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::engine::QueryMode;
use crate::error::ServiceError;
use crate::service::{DEFAULT_TOP_K, ProductAnalysis};

use super::AppState;

#[derive(Deserialize)]
pub struct InsertRequest {
    pub content: String,
    pub metadata: Option<Map<String, Value>>,
    pub doc_id: Option<String>,
}

#[derive(Serialize)]
pub struct InsertResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub doc_id: String,
}

/// Query request body
#[derive(Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub multimodal: bool,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_mode() -> String {
    QueryMode::default().to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Always empty; the engine does not attribute answers
    pub sources: Vec<Value>,
    pub mode: QueryMode,
    pub processing_time: f64,
}

#[derive(Deserialize)]
pub struct ProductAnalysisRequest {
    pub product_info: Map<String, Value>,
    pub context_query: Option<String>,
}

/// Index text content directly
pub async fn insert_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InsertRequest>,
) -> Result<Json<InsertResponse>, ServiceError> {
    let doc_id = state
        .service
        .insert_content(&request.content, request.metadata, request.doc_id)
        .await?;

    Ok(Json(InsertResponse {
        status: "ok",
        message: "Content inserted",
        doc_id,
    }))
}

/// Answer a question over the indexed documents
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ServiceError> {
    run_query(&state, request, false).await
}

/// Same as [`query_handler`], always using every chunk kind
pub async fn query_multimodal_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ServiceError> {
    run_query(&state, request, true).await
}

async fn run_query(
    state: &AppState,
    request: QueryRequest,
    force_multimodal: bool,
) -> Result<Json<QueryResponse>, ServiceError> {
    let outcome = state
        .service
        .query(
            &request.query,
            &request.mode,
            request.multimodal || force_multimodal,
            request.top_k,
        )
        .await?;

    Ok(Json(QueryResponse {
        answer: outcome.answer,
        sources: Vec::new(),
        mode: outcome.mode,
        processing_time: outcome.processing_time,
    }))
}

pub async fn analyze_product_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProductAnalysisRequest>,
) -> Result<Json<ProductAnalysis>, ServiceError> {
    let analysis = state
        .service
        .analyze_product(&request.product_info, request.context_query.as_deref())
        .await?;
    Ok(Json(analysis))
}
