//! Document API endpoints.
//!
//! Handlers for upload, status polling, listing and deletion.

use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::service::{DocumentState, DocumentStatus};

use super::AppState;

/// Response for a queued upload
#[derive(Serialize)]
pub struct UploadResponse {
    pub document_id: String,
    pub status: DocumentState,
}

#[derive(Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<DocumentStatus>,
}

/// Response for delete operations
#[derive(Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
}

/// Upload a document for background processing
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let max = state.service.config().max_document_size_bytes;
    let multipart_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServiceError::BodyTooLarge { max }
        } else {
            ServiceError::InvalidRequest {
                message: e.to_string(),
            }
        }
    };

    let mut file_data: Option<(Vec<u8>, String)> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("document").to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        file_data = Some((data.to_vec(), filename));
    }

    let (data, filename) = file_data.ok_or_else(|| ServiceError::InvalidRequest {
        message: "No file provided".to_string(),
    })?;

    let status = state.service.upload_document(&filename, &data).await?;
    Ok(Json(UploadResponse {
        document_id: status.document_id,
        status: status.status,
    }))
}

pub async fn document_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentStatus>, ServiceError> {
    Ok(Json(state.service.document_status(&id)?))
}

/// List tracked documents, oldest first
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ListDocumentsResponse> {
    Json(ListDocumentsResponse {
        documents: state.service.list_documents(),
    })
}

/// Delete a document and everything derived from it
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceError> {
    state.service.delete_document(&id).await?;
    Ok(Json(DeleteResponse { status: "deleted" }))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{app, call, multipart_request, send};
    use crate::service::tests::MockEngine;
    use axum::http::StatusCode;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_upload_status_list_delete() {
        let engine = Arc::new(MockEngine::default());
        let (app, _service, _dir) = app(Some(engine.clone()));

        let (status, body) = send(&app, multipart_request("file", "notes.md", b"# Notes")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        let id = body["document_id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, "GET", &format!("/documents/{id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filename"], "notes.md");
        assert_eq!(body["status"], "pending");
        assert_eq!(body["progress"], 0.0);
        assert!(body["error"].is_null());

        let (status, body) = call(&app, "GET", "/documents", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents"].as_array().unwrap().len(), 1);
        assert_eq!(body["documents"][0]["document_id"], id.as_str());

        let (status, body) = call(&app, "DELETE", &format!("/documents/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "deleted");
        assert_eq!(engine.calls(), [format!("delete:{id}")]);

        let (status, body) = call(&app, "GET", &format!("/documents/{id}/status"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "document_not_found");
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let (app, _service, _dir) = app(Some(Arc::new(MockEngine::default())));

        let (status, body) = send(&app, multipart_request("attachment", "a.txt", b"x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid request: No file provided");
    }

    #[tokio::test]
    async fn test_upload_without_engine() {
        let (app, _service, _dir) = app(None);

        let (status, body) = send(&app, multipart_request("file", "a.txt", b"x")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "rag_not_initialized");
    }

    #[tokio::test]
    async fn test_upload_over_document_limit() {
        let (app, service, _dir) = app(Some(Arc::new(MockEngine::default())));

        let content = vec![b'a'; 2048];
        let (status, body) = send(&app, multipart_request("file", "big.txt", &content)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "file_too_large");
        assert!(service.list_documents().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_document() {
        let (app, _service, _dir) = app(Some(Arc::new(MockEngine::default())));

        let (status, _) = call(&app, "DELETE", "/documents/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
