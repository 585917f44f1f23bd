//! Common error types for the image generation dispatcher

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::backend::traits::{BackendId, Capability};

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend {0} is not registered")]
    BackendNotRegistered(BackendId),

    #[error("Backend {0} is not configured. Please add an API key.")]
    NotConfigured(BackendId),

    #[error("{backend} does not support {capability}")]
    CapabilityUnsupported {
        backend: BackendId,
        capability: Capability,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error payload returned by a vendor API, with its structured code when present.
    #[error("{backend} returned {status}: {message}")]
    Api {
        backend: BackendId,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Job {job_id} did not finish after {attempts} polls")]
    JobTimeout { job_id: String, attempts: u32 },

    #[error("Request expired after waiting {waited:?} for a rate limit slot")]
    QueueExpired { waited: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
            }
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::Transport(_) | AppError::Backend(_) | AppError::Api { .. } => {
                (StatusCode::BAD_GATEWAY, "backend_error", None)
            }
            AppError::BackendNotRegistered(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("backend_not_found")),
            AppError::NotConfigured(_) => (StatusCode::PRECONDITION_FAILED, "configuration_error", Some("backend_not_configured")),
            AppError::CapabilityUnsupported { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request_error", Some("capability_unsupported"))
            }
            AppError::AuthenticationFailed(_) => (StatusCode::UNAUTHORIZED, "authentication_error", Some("invalid_api_key")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::JobFailed { .. } => (StatusCode::BAD_GATEWAY, "backend_error", Some("job_failed")),
            AppError::JobTimeout { .. } | AppError::QueueExpired { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, "timeout_error", None)
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
