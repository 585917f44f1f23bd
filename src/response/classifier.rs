//! Maps dispatch failures to a structured, retry-aware error
//!
//! Structured signals win: vendor error codes first, then HTTP status, then
//! the error variant itself. Free-text messages are only matched against the
//! substring list when nothing structured is available.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// Message fragments that mark a free-text failure as worth retrying
const RETRYABLE_PATTERNS: [&str; 6] = [
    "rate limit",
    "timeout",
    "temporarily unavailable",
    "503",
    "429",
    "quota",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    QuotaExceeded,
    ServiceUnavailable,
    Timeout,
    AuthenticationFailed,
    InvalidRequest,
    ContentRejected,
    CapabilityUnsupported,
    NotConfigured,
    JobFailed,
    QueueExpired,
    EmptyResult,
    GenerationFailed,
}

impl ErrorCode {
    /// Retryability implied by the code alone.
    ///
    /// `None` for codes that only carry a vendor message; those fall back to
    /// the substring heuristic.
    pub fn retryable(self) -> Option<bool> {
        match self {
            ErrorCode::RateLimited
            | ErrorCode::QuotaExceeded
            | ErrorCode::ServiceUnavailable
            | ErrorCode::Timeout
            | ErrorCode::QueueExpired => Some(true),
            ErrorCode::AuthenticationFailed
            | ErrorCode::InvalidRequest
            | ErrorCode::ContentRejected
            | ErrorCode::CapabilityUnsupported
            | ErrorCode::NotConfigured
            | ErrorCode::EmptyResult => Some(false),
            ErrorCode::JobFailed | ErrorCode::GenerationFailed => None,
        }
    }

    /// Map a vendor's structured error code (`rate_limit_exceeded`, `insufficient_quota`, ...)
    pub fn from_vendor_code(code: &str) -> Option<Self> {
        let code = code.to_ascii_lowercase();
        let matches = |needles: &[&str]| needles.iter().any(|n| code.contains(n));

        if matches(&["insufficient_quota", "quota", "billing", "credits"]) {
            Some(ErrorCode::QuotaExceeded)
        } else if matches(&["rate_limit", "too_many_requests", "throttl", "resource_exhausted"]) {
            Some(ErrorCode::RateLimited)
        } else if matches(&["content_policy", "safety", "moderation", "nsfw"]) {
            Some(ErrorCode::ContentRejected)
        } else if matches(&["invalid_api_key", "unauthorized", "authentication", "permission"]) {
            Some(ErrorCode::AuthenticationFailed)
        } else if matches(&["overloaded", "unavailable", "server_error"]) {
            Some(ErrorCode::ServiceUnavailable)
        } else if matches(&["timeout"]) {
            Some(ErrorCode::Timeout)
        } else if matches(&["invalid", "bad_request", "unknown_parameter"]) {
            Some(ErrorCode::InvalidRequest)
        } else {
            None
        }
    }

    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(ErrorCode::RateLimited),
            402 => Some(ErrorCode::QuotaExceeded),
            408 | 504 => Some(ErrorCode::Timeout),
            502 | 503 => Some(ErrorCode::ServiceUnavailable),
            401 | 403 => Some(ErrorCode::AuthenticationFailed),
            400 | 404 | 413 | 415 | 422 => Some(ErrorCode::InvalidRequest),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&name)
    }
}

/// Structured error delivered inside a failed `GenerationResponse`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl GenerationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = code
            .retryable()
            .unwrap_or_else(|| is_retryable_message(&message));
        Self {
            code,
            message,
            retryable,
        }
    }

    /// Like `new`, but the retry heuristic only sees `detail` (the vendor's own
    /// words) rather than the full display message with ids and URLs.
    pub fn with_detail(code: ErrorCode, message: impl Into<String>, detail: &str) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable().unwrap_or_else(|| is_retryable_message(detail)),
        }
    }
}

/// Last-resort heuristic over free-text messages, case-insensitive
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Classify any failure raised after a request was enqueued
pub fn classify(error: &AppError) -> GenerationError {
    let code = match error {
        AppError::Api { status, code, .. } => code
            .as_deref()
            .and_then(ErrorCode::from_vendor_code)
            .or_else(|| ErrorCode::from_status(*status))
            .unwrap_or(ErrorCode::GenerationFailed),
        AppError::Transport(e) if e.is_timeout() => ErrorCode::Timeout,
        AppError::Transport(e) if e.is_connect() => ErrorCode::ServiceUnavailable,
        AppError::Transport(e) => e
            .status()
            .and_then(|s| ErrorCode::from_status(s.as_u16()))
            .unwrap_or(ErrorCode::GenerationFailed),
        AppError::JobTimeout { .. } => ErrorCode::Timeout,
        AppError::JobFailed { .. } => ErrorCode::JobFailed,
        AppError::QueueExpired { .. } => ErrorCode::QueueExpired,
        AppError::CapabilityUnsupported { .. } => ErrorCode::CapabilityUnsupported,
        AppError::NotConfigured(_) | AppError::BackendNotRegistered(_) => ErrorCode::NotConfigured,
        AppError::AuthenticationFailed(_) => ErrorCode::AuthenticationFailed,
        AppError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        _ => ErrorCode::GenerationFailed,
    };

    let display = error.to_string();
    let detail = match error {
        AppError::Api { message, .. } | AppError::JobFailed { message, .. } | AppError::Backend(message) => {
            message.as_str()
        }
        _ => display.as_str(),
    };

    GenerationError::with_detail(code, display.clone(), detail)
}
