use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid image data: {0}")]
    InvalidImage(#[from] ImageError),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("{0}")]
    Model(#[from] ModelError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Image decoding errors
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("empty image payload")]
    Empty,

    #[error("image payload too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unrecognised image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Visual encoder errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file not found: {path}")]
    NotFound { path: String },

    #[error("Model runtime error: {message}")]
    Runtime { message: String },

    #[error("Unexpected model output shape {shape:?}")]
    OutputShape { shape: Vec<usize> },

    #[error("Model backend unavailable: {message}")]
    Unavailable { message: String },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ServiceError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::InvalidImage(_) => "invalid_image",
            ServiceError::ModelNotLoaded => "model_not_loaded",
            ServiceError::Model(ModelError::OutputShape { .. }) => "model_output_shape",
            ServiceError::Model(_) => "model_error",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
