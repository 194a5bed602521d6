use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Seconds a client should wait before retrying a rejected upload
const QUEUE_RETRY_AFTER_SECS: u64 = 30;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("RAG not initialized")]
    EngineUnavailable,

    #[error("Processing queue is full ({capacity} documents waiting)")]
    QueueFull { capacity: usize },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Request body exceeds the {max} byte upload limit")]
    BodyTooLarge { max: u64 },

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by the retrieval engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Inference error: {0}")]
    Llm(#[from] LlmError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Document processing failed: {0}")]
    Processing(#[from] ProcessingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Processing cancelled")]
    Cancelled,
}

/// OpenAI-compatible inference server errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request failed (status {status}): {message}")]
    Request { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

/// Qdrant errors
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Connection failed to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request failed (status {status}): {message}")]
    Request { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

/// Document parsing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Failed to extract text: {message}")]
    TextExtraction { message: String },

    #[error("Failed to read EPUB: {0}")]
    EpubRead(String),

    #[error("Failed to parse Markdown: {0}")]
    Markdown(String),

    #[error("{parser} parser failed: {message}")]
    ExternalParser { parser: String, message: String },

    #[error("No content could be extracted")]
    NoContent,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::EngineUnavailable | ServiceError::QueueFull { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::FileTooLarge { .. } | ServiceError::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::EngineUnavailable => "rag_not_initialized",
            ServiceError::QueueFull { .. } => "queue_full",
            ServiceError::FileTooLarge { .. } | ServiceError::BodyTooLarge { .. } => {
                "file_too_large"
            }
            ServiceError::Engine(EngineError::Llm(_)) => "inference_error",
            ServiceError::Engine(EngineError::VectorStore(_)) => "vector_store_error",
            ServiceError::Engine(EngineError::Processing(_)) => "processing_error",
            ServiceError::Engine(EngineError::Io(_)) => "io_error",
            ServiceError::Engine(EngineError::Cancelled) => "cancelled",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServiceError::QueueFull { .. } => Some(QUEUE_RETRY_AFTER_SECS),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let retry_after_secs = self.retry_after_secs();
        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
            retry_after_secs,
        };

        match retry_after_secs {
            Some(secs) => (
                status,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(response),
            )
                .into_response(),
            None => (status, Json(response)).into_response(),
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServiceError::DocumentNotFound {
                document_id: "x".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::EngineUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Engine(EngineError::Cancelled).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_queue_full_sets_retry_after() {
        let response = ServiceError::QueueFull { capacity: 4 }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers()[header::RETRY_AFTER].to_str().unwrap(),
            QUEUE_RETRY_AFTER_SECS.to_string()
        );
    }

    #[test]
    fn test_engine_message_carries_cause() {
        let err: ServiceError = EngineError::from(LlmError::Request {
            status: 500,
            message: "model crashed".into(),
        })
        .into();
        assert_eq!(
            err.to_string(),
            "Inference error: Request failed (status 500): model crashed"
        );
    }
}
