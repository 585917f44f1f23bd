//! API key guard for the dispatcher's HTTP API

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    collections::HashSet,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::error::AppError;

const API_KEY_HEADER: &str = "x-api-key";

/// Paths reachable without a key
const OPEN_PATHS: [&str; 1] = ["/health"];

/// Layer that rejects requests without a known API key
#[derive(Clone)]
pub struct ApiKeyLayer {
    api_keys: Arc<HashSet<String>>,
}

impl ApiKeyLayer {
    pub fn new(api_keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            api_keys: Arc::new(
                api_keys
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn key_count(&self) -> usize {
        self.api_keys.len()
    }
}

impl<S> Layer<S> for ApiKeyLayer {
    type Service = ApiKeyMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyMiddleware {
            inner,
            api_keys: self.api_keys.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ApiKeyMiddleware<S> {
    inner: S,
    api_keys: Arc<HashSet<String>>,
}

/// Key from `x-api-key`, else `Authorization` with or without the `Bearer ` prefix
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|h| h.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim())
}

impl<S> Service<Request<Body>> for ApiKeyMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let open = OPEN_PATHS.contains(&request.uri().path());

        // No keys configured means the guard is off
        if open || self.api_keys.is_empty() {
            return Box::pin(self.inner.call(request));
        }

        let rejection = match presented_key(request.headers()) {
            Some(key) if self.api_keys.contains(key) => None,
            Some(_) => Some("Invalid API key"),
            None => Some("API key required. Provide via 'Authorization: Bearer <key>' or 'x-api-key'"),
        };

        match rejection {
            None => Box::pin(self.inner.call(request)),
            Some(message) => {
                warn!(path = %request.uri().path(), "{}", message);
                let response = AppError::AuthenticationFailed(message.to_string()).into_response();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
