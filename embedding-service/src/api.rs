//! HTTP API for the embedding service.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServiceResult;
use crate::service::EmbeddingService;

/// Application state
pub struct AppState {
    pub service: Arc<EmbeddingService>,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(state: Arc<AppState>, max_body_size: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/embed", post(embed_handler))
        .route("/embed_batch", post(embed_batch_handler))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
pub struct EmbedRequest {
    /// Base64-encoded image
    pub image: String,
}

#[derive(Serialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
    pub dim: usize,
}

#[derive(Deserialize)]
pub struct EmbedBatchRequest {
    pub images: Vec<String>,
}

#[derive(Serialize)]
pub struct EmbedBatchResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub count: usize,
    pub dim: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    gpu_available: bool,
    model_loaded: bool,
    model_name: String,
    device: &'static str,
    embedding_dim: Option<usize>,
}

async fn embed_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmbedRequest>,
) -> ServiceResult<Json<EmbedResponse>> {
    let embedding = state.service.embed(&request.image).await?;
    Ok(Json(EmbedResponse {
        dim: embedding.len(),
        embedding,
    }))
}

async fn embed_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmbedBatchRequest>,
) -> ServiceResult<Json<EmbedBatchResponse>> {
    let embeddings = state.service.embed_batch(&request.images).await?;
    Ok(Json(EmbedBatchResponse {
        count: embeddings.len(),
        dim: embeddings.first().map_or(0, Vec::len),
        embeddings,
    }))
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let service = &state.service;
    let device = service.device();

    Json(HealthResponse {
        status: if service.model_loaded() {
            "healthy"
        } else {
            "degraded"
        },
        gpu_available: device == Some(crate::model::Device::Cuda),
        model_loaded: service.model_loaded(),
        model_name: service.model_name().to_string(),
        device: device.map_or("none", |d| d.as_str()),
        embedding_dim: service.dimension(),
    })
}

async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "Visual Document Embedding API",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.service.model_name(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VisualEncoder;
    use crate::preprocess::tests::png_base64;
    use crate::service::tests::{FakeEncoder, test_config};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(encoder: Option<Arc<dyn VisualEncoder>>) -> Router {
        let service = Arc::new(EmbeddingService::new(&test_config(), encoder));
        router(
            Arc::new(AppState {
                service,
                metrics: None,
            }),
            1024 * 1024,
        )
    }

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_with_model() {
        let (status, body) = call(app(Some(FakeEncoder::new())), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["device"], "cpu");
        assert_eq!(body["gpu_available"], false);
        assert_eq!(body["embedding_dim"], 4);
    }

    #[tokio::test]
    async fn test_health_degraded() {
        let (status, body) = call(app(None), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["model_loaded"], false);
        assert_eq!(body["device"], "none");
        assert_eq!(body["model_name"], "vidore/colqwen2-v1.0");
    }

    #[tokio::test]
    async fn test_embed_endpoint() {
        let request = serde_json::json!({ "image": png_base64(2, 2, [5, 6, 7]) });
        let (status, body) = call(app(Some(FakeEncoder::new())), "POST", "/embed", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dim"], 4);
        assert_eq!(body["embedding"][0], 5.0);
    }

    #[tokio::test]
    async fn test_embed_invalid_image_is_bad_request() {
        let request = serde_json::json!({ "image": "bm90IGFuIGltYWdl" });
        let (status, body) = call(app(Some(FakeEncoder::new())), "POST", "/embed", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_image");
        assert!(body["message"].as_str().unwrap().starts_with("Invalid image data"));
    }

    #[tokio::test]
    async fn test_embed_without_model_is_unavailable() {
        let request = serde_json::json!({ "image": png_base64(1, 1, [0, 0, 0]) });
        let (status, body) = call(app(None), "POST", "/embed", Some(request)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "model_not_loaded");
    }

    #[tokio::test]
    async fn test_embed_batch_endpoint() {
        let request = serde_json::json!({
            "images": [png_base64(1, 1, [1, 1, 1]), png_base64(3, 3, [2, 2, 2])]
        });
        let (status, body) = call(app(Some(FakeEncoder::new())), "POST", "/embed_batch", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["dim"], 4);
        assert_eq!(body["embeddings"][1][3], 3.0);
    }

    #[tokio::test]
    async fn test_embed_batch_empty() {
        let request = serde_json::json!({ "images": [] });
        let (status, body) = call(app(Some(FakeEncoder::new())), "POST", "/embed_batch", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["dim"], 0);
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_invalid_member() {
        let request = serde_json::json!({ "images": [png_base64(1, 1, [1, 1, 1]), "@@@"] });
        let (status, _) = call(app(Some(FakeEncoder::new())), "POST", "/embed_batch", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_root_reports_model() {
        let (status, body) = call(app(None), "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "vidore/colqwen2-v1.0");
    }
}
