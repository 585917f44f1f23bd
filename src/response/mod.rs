//! Response handling module - uniform response shape, error classification, base64

pub mod base64;
pub mod classifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::backend::traits::{BackendId, GeneratedImage};
pub use classifier::{classify, ErrorCode, GenerationError};

/// Bookkeeping attached to every response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    /// USD, when the model declares a price
    pub cost: Option<f64>,
}

impl GenerationMetadata {
    pub fn new(request_id: Uuid, duration: Duration, cost: Option<f64>) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            cost,
        }
    }
}

/// Result of one generation request.
///
/// `success` holds exactly when `images` is non-empty and `error` is absent.
/// The fields are private and the two constructors are the only way in, so
/// the invariant cannot be broken after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResponse {
    success: bool,
    backend: BackendId,
    model: String,
    images: Vec<GeneratedImage>,
    metadata: GenerationMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<GenerationError>,
}

impl GenerationResponse {
    /// Successful response. An empty image list degrades into an `EmptyResult` failure.
    pub fn succeeded(
        backend: BackendId,
        model: impl Into<String>,
        images: Vec<GeneratedImage>,
        metadata: GenerationMetadata,
    ) -> Self {
        if images.is_empty() {
            let error = GenerationError::new(
                ErrorCode::EmptyResult,
                format!("{} returned no images", backend),
            );
            return Self::failed(backend, model, error, GenerationMetadata { cost: None, ..metadata });
        }

        Self {
            success: true,
            backend,
            model: model.into(),
            images,
            metadata,
            error: None,
        }
    }

    pub fn failed(
        backend: BackendId,
        model: impl Into<String>,
        error: GenerationError,
        metadata: GenerationMetadata,
    ) -> Self {
        Self {
            success: false,
            backend,
            model: model.into(),
            images: Vec::new(),
            metadata,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn images(&self) -> &[GeneratedImage] {
        &self.images
    }

    pub fn into_images(self) -> Vec<GeneratedImage> {
        self.images
    }

    pub fn metadata(&self) -> &GenerationMetadata {
        &self.metadata
    }

    pub fn error(&self) -> Option<&GenerationError> {
        self.error.as_ref()
    }
}

/// Detect an image media type from binary data using magic bytes
pub fn sniff_media_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

/// File extension for a media type, used for multipart file names
pub fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}
