//! Unit tests for the uniform response shape and base64 helpers

use gen_image_dispatcher::backend::traits::{BackendId, GeneratedImage, ImagePayload, ImageSize};
use gen_image_dispatcher::response::{
    base64, sniff_media_type, ErrorCode, GenerationError, GenerationMetadata, GenerationResponse,
};
use std::time::Duration;
use uuid::Uuid;

fn metadata(cost: Option<f64>) -> GenerationMetadata {
    GenerationMetadata::new(Uuid::new_v4(), Duration::from_millis(1500), cost)
}

#[test]
fn test_success_requires_images() {
    let image = GeneratedImage::from_url("https://cdn.test/a.png", ImageSize::SQUARE_1024);
    let response = GenerationResponse::succeeded(BackendId::Replicate, "flux", vec![image], metadata(Some(0.003)));

    assert!(response.success());
    assert!(response.error().is_none());
    assert_eq!(response.images().len(), 1);
    assert_eq!(response.metadata().duration_ms, 1500);
}

#[test]
fn test_empty_success_degrades_to_failure() {
    let response = GenerationResponse::succeeded(BackendId::Replicate, "flux", vec![], metadata(Some(0.003)));

    assert!(!response.success());
    assert!(response.images().is_empty());
    let error = response.error().unwrap();
    assert_eq!(error.code, ErrorCode::EmptyResult);
    assert!(!error.retryable);
    assert_eq!(response.metadata().cost, None);
}

#[test]
fn test_failed_response_has_no_images() {
    let error = GenerationError::new(ErrorCode::RateLimited, "Too many requests");
    let response = GenerationResponse::failed(BackendId::OpenAiDalle, "dall-e-3", error.clone(), metadata(None));

    assert!(!response.success());
    assert!(response.images().is_empty());
    assert_eq!(response.error(), Some(&error));
}

#[test]
fn test_response_json_shape() {
    let image = GeneratedImage::from_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0], ImageSize::SQUARE_512).with_seed(Some(42));
    let response = GenerationResponse::succeeded(BackendId::StabilityAi, "sd3.5-large", vec![image], metadata(None));
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["success"], true);
    assert_eq!(json["backend"], "stability-ai");
    assert!(json.get("error").is_none());
    let payload = &json["images"][0]["payload"]["inline"];
    assert_eq!(payload["media_type"], "image/jpeg");
    assert_eq!(payload["data"], "/9j/4A==");
    assert_eq!(json["images"][0]["seed"], 42);
}

#[test]
fn test_image_payload_from_bytes_sniffs_type() {
    let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
    let image = GeneratedImage::from_bytes(png, ImageSize::SQUARE_1024);
    assert!(matches!(image.payload, ImagePayload::Inline { ref media_type, .. } if media_type == "image/png"));
    assert_eq!(sniff_media_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
}

#[test]
fn test_base64_encode_decode() {
    let original = b"Hello, World!";
    let encoded = base64::encode(original);
    assert_eq!(base64::decode(&encoded).unwrap(), original.to_vec());
}

#[test]
fn test_base64_decode_data_url() {
    let decoded = base64::decode("data:image/png;base64,SGVsbG8sIFdvcmxkIQ==").unwrap();
    assert_eq!(b"Hello, World!", decoded.as_slice());
    assert!(base64::decode("not valid base64!!!").is_err());
}

#[test]
fn test_data_url_helpers() {
    let url = base64::create_data_url(b"test data", "image/webp");
    assert!(url.starts_with("data:image/webp;base64,"));
    assert_eq!(base64::media_type_of_data_url(&url), Some("image/webp"));
    assert_eq!(base64::media_type_of_data_url("plain"), None);
    assert_eq!(base64::strip_data_url("abc"), "abc");
}
