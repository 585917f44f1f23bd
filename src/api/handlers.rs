//! Axum request handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::backend::registry::BackendSummary;
use crate::backend::traits::{BackendId, GenerationRequest};
use crate::error::{AppError, Result};
use crate::queue::rate_limiter::RateLimitStatus;
use crate::response::GenerationResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialPayload {
    pub api_key: String,
    /// Store without asking the vendor first
    #[serde(default)]
    pub trust: bool,
}

#[derive(Debug, Serialize)]
pub struct RateLimitReport {
    pub backend: BackendId,
    pub limited: bool,
    #[serde(flatten)]
    pub status: Option<RateLimitStatus>,
    pub queued: usize,
}

fn registered(state: &AppState, id: &str) -> Result<BackendId> {
    let id: BackendId = id.parse()?;
    if state.registry.get(id).is_none() {
        return Err(AppError::BackendNotRegistered(id));
    }
    Ok(id)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.dispatcher.stats();
    Json(json!({
        "status": "ok",
        "queued": stats.queued,
        "dispatched": stats.dispatched,
        "expired": stats.expired,
    }))
}

pub async fn list_backends(State(state): State<Arc<AppState>>) -> Json<Vec<BackendSummary>> {
    Json(state.registry.summaries())
}

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RateLimitReport>> {
    let backend = registered(&state, &id)?;
    let status = state.dispatcher.rate_limit_status(backend);
    Ok(Json(RateLimitReport {
        backend,
        limited: status.is_some(),
        status,
        queued: state.dispatcher.queue_len(backend),
    }))
}

pub async fn set_credentials(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<CredentialPayload>,
) -> Result<StatusCode> {
    let backend = registered(&state, &id)?;
    state
        .registry
        .set_credential(backend, &payload.api_key, payload.trust)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_credentials(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let backend = registered(&state, &id)?;
    if state.registry.remove_credential(backend) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotConfigured(backend))
    }
}

/// Waits for the dispatcher's answer. Failures after admission arrive as a
/// 200 with `success: false`; only pre-enqueue rejections are HTTP errors.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>> {
    if request.prompt.trim().is_empty() && request.source_image.is_none() {
        return Err(AppError::InvalidRequest("Prompt cannot be empty".to_string()));
    }

    info!(backend = %request.backend, model = %request.model, mode = ?request.mode, "Generation requested");
    let response = state.dispatcher.generate(request).await?;
    Ok(Json(response))
}
