//! Route table

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::api::handlers;
use crate::middleware::ApiKeyLayer;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = &state.settings.auth;
    let guard = auth.enabled.then(|| ApiKeyLayer::new(auth.api_keys.clone()));

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/backends", get(handlers::list_backends))
        .route("/v1/backends/:id/rate-limit", get(handlers::rate_limit))
        .route(
            "/v1/backends/:id/credentials",
            put(handlers::set_credentials).delete(handlers::remove_credentials),
        )
        .route("/v1/images/generations", post(handlers::generate));

    match guard {
        Some(layer) if layer.key_count() > 0 => {
            info!(keys = layer.key_count(), "API key authentication enabled");
            router = router.layer(layer);
        }
        Some(_) => warn!("Authentication enabled but no API keys configured; API is open"),
        None => info!("API key authentication disabled"),
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
