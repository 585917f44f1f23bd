//! Functional tests for the HTTP API

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use gen_image_dispatcher::backend::traits::{BackendId, ImageBackend, RateLimitPolicy};
use gen_image_dispatcher::config::{BackendSettings, Settings};
use gen_image_dispatcher::{api, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// App with auth off and no stored keys, whatever the environment holds
fn test_state(configure: impl FnOnce(&mut Settings)) -> Arc<AppState> {
    let mut settings = Settings::default();
    settings.auth.enabled = false;
    configure(&mut settings);

    let state = AppState::from_settings(settings).unwrap();
    for id in BackendId::ALL {
        state.registry.remove_credential(id);
    }
    Arc::new(state)
}

fn app(state: &Arc<AppState>) -> Router {
    api::create_router(state.clone())
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_queue_stats() {
    let state = test_state(|_| {});

    let response = app(&state).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["queued"], 0);
    assert_eq!(json["dispatched"], 0);
}

#[tokio::test]
async fn test_list_backends_skips_disabled() {
    let state = test_state(|settings| {
        let mut clipdrop = BackendSettings::new(BackendId::Clipdrop);
        clipdrop.enabled = false;
        settings.backends.push(clipdrop);
    });

    let response = app(&state).oneshot(get("/v1/backends")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let backends = json.as_array().unwrap();
    assert_eq!(backends.len(), 8);
    assert!(backends.iter().all(|b| b["id"] != "clipdrop"));

    let dalle = backends.iter().find(|b| b["id"] == "openai-dalle").unwrap();
    assert_eq!(dalle["configured"], false);
    assert_eq!(dalle["effective_rate_limit"]["requests_per_window"], 5);
}

#[tokio::test]
async fn test_rate_limit_endpoint() {
    let state = test_state(|settings| {
        let mut replicate = BackendSettings::new(BackendId::Replicate);
        replicate.rate_limit = Some(RateLimitPolicy {
            requests_per_window: 7,
            window_ms: 60_000,
            images_per_request: 1,
        });
        settings.backends.push(replicate);
    });

    let response = app(&state)
        .oneshot(get("/v1/backends/replicate/rate-limit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["backend"], "replicate");
    assert_eq!(json["limited"], true);
    assert_eq!(json["limit"], 7);
    assert_eq!(json["current_usage"], 0);
    assert_eq!(json["queued"], 0);
}

#[tokio::test]
async fn test_rate_limit_unknown_backend() {
    let state = test_state(|_| {});

    let response = app(&state)
        .oneshot(get("/v1/backends/midjourney/rate-limit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_credentials_lifecycle() {
    let state = test_state(|_| {});
    let uri = "/v1/backends/stability-ai/credentials";

    let response = app(&state)
        .oneshot(json_request(Method::PUT, uri, json!({"api_key": "sk-live", "trust": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(state.registry.get(BackendId::StabilityAi).unwrap().is_configured());

    let response = app(&state)
        .oneshot(Request::builder().method(Method::DELETE).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!state.registry.get(BackendId::StabilityAi).unwrap().is_configured());

    let response = app(&state)
        .oneshot(Request::builder().method(Method::DELETE).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_blank_credential_rejected() {
    let state = test_state(|_| {});

    let response = app(&state)
        .oneshot(json_request(
            Method::PUT,
            "/v1/backends/replicate/credentials",
            json!({"api_key": "   ", "trust": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generation_rejections_before_enqueue() {
    let state = test_state(|_| {});

    let unconfigured = json!({
        "backend": "openai-dalle",
        "model": "dall-e-2",
        "mode": "text-to-image",
        "prompt": "a red fox"
    });
    let response = app(&state)
        .oneshot(json_request(Method::POST, "/v1/images/generations", unconfigured))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "backend_not_configured");

    let empty_prompt = json!({
        "backend": "openai-dalle",
        "model": "dall-e-2",
        "mode": "text-to-image",
        "prompt": "  "
    });
    let response = app(&state)
        .oneshot(json_request(Method::POST, "/v1/images/generations", empty_prompt))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    state
        .registry
        .set_credential(BackendId::OpenAiDalle, "sk-test", true)
        .await
        .unwrap();
    let unsupported = json!({
        "backend": "openai-dalle",
        "model": "dall-e-2",
        "mode": "background-removal",
        "prompt": "",
        "source_image": "iVBORw0KGgo="
    });
    let response = app(&state)
        .oneshot(json_request(Method::POST, "/v1/images/generations", unsupported))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(state.dispatcher.stats().queued, 0);
}

#[tokio::test]
async fn test_auth_applies_to_router() {
    let mut settings = Settings::default();
    settings.auth.api_keys = vec!["secret".to_string()];
    let state = Arc::new(AppState::from_settings(settings).unwrap());

    let response = app(&state).oneshot(get("/v1/backends")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(&state)
        .oneshot(
            Request::builder()
                .uri("/v1/backends")
                .header("x-api-key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(&state).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
