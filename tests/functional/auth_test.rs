//! Functional tests for API key authentication

use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use gen_image_dispatcher::middleware::ApiKeyLayer;
use tower::ServiceExt;

fn create_test_app(keys: &[&str]) -> Router {
    Router::new()
        .route("/v1/backends", axum::routing::get(|| async { "OK" }))
        .route("/health", axum::routing::get(|| async { "healthy" }))
        .layer(ApiKeyLayer::new(keys.iter().map(|k| k.to_string())))
}

fn request(uri: &str, header: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some((name, value)) = header {
        builder = builder.header(name, value);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_auth_with_valid_bearer_token() {
    let app = create_test_app(&["valid-key-1", "valid-key-2"]);

    let response = app
        .oneshot(request("/v1/backends", Some((AUTHORIZATION.as_str(), "Bearer valid-key-1"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_with_raw_authorization_value() {
    let app = create_test_app(&["valid-key-1"]);

    let response = app
        .oneshot(request("/v1/backends", Some((AUTHORIZATION.as_str(), "valid-key-1"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_with_x_api_key_header() {
    let app = create_test_app(&["valid-key-1", "valid-key-2"]);

    let response = app
        .oneshot(request("/v1/backends", Some(("x-api-key", "valid-key-2"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_with_invalid_key() {
    let app = create_test_app(&["valid-key-1"]);

    let response = app
        .oneshot(request("/v1/backends", Some((AUTHORIZATION.as_str(), "Bearer invalid-key"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["type"], "authentication_error");
    assert_eq!(json["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn test_auth_without_header() {
    let app = create_test_app(&["valid-key-1"]);

    let response = app.oneshot(request("/v1/backends", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_health_endpoint_bypass() {
    let app = create_test_app(&["valid-key-1"]);

    let response = app.oneshot(request("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_empty_keys_allows_all() {
    let app = create_test_app(&[]);

    let response = app.oneshot(request("/v1/backends", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_blank_keys_do_not_count() {
    let app = create_test_app(&["  ", ""]);

    let response = app
        .oneshot(request("/v1/backends", Some((AUTHORIZATION.as_str(), "Bearer "))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
