//! Unit tests for failure classification

use gen_image_dispatcher::backend::traits::{BackendId, Capability};
use gen_image_dispatcher::response::classifier::is_retryable_message;
use gen_image_dispatcher::response::{classify, ErrorCode, GenerationError};
use gen_image_dispatcher::AppError;
use std::time::Duration;

fn api(status: u16, code: Option<&str>, message: &str) -> AppError {
    AppError::Api {
        backend: BackendId::OpenAiDalle,
        status,
        code: code.map(str::to_string),
        message: message.to_string(),
    }
}

#[test]
fn test_service_unavailable_message_is_retryable() {
    let error = classify(&AppError::Backend("503 Service Unavailable".to_string()));
    assert!(error.retryable);
}

#[test]
fn test_invalid_prompt_message_is_not_retryable() {
    let error = classify(&AppError::Backend("Invalid prompt: empty".to_string()));
    assert!(!error.retryable);
    assert_eq!(error.code, ErrorCode::GenerationFailed);
}

#[test]
fn test_vendor_code_wins_over_status() {
    // Quota exhaustion arrives as a 429 but is its own kind of failure
    let error = classify(&api(429, Some("insufficient_quota"), "You exceeded your current quota"));
    assert_eq!(error.code, ErrorCode::QuotaExceeded);
    assert!(error.retryable);

    let error = classify(&api(400, Some("content_policy_violation"), "Your request was rejected"));
    assert_eq!(error.code, ErrorCode::ContentRejected);
    assert!(!error.retryable);
}

#[test]
fn test_status_used_without_vendor_code() {
    assert_eq!(classify(&api(429, None, "slow down")).code, ErrorCode::RateLimited);
    assert_eq!(classify(&api(503, None, "busy")).code, ErrorCode::ServiceUnavailable);
    assert_eq!(classify(&api(401, None, "bad key")).code, ErrorCode::AuthenticationFailed);
    assert!(!classify(&api(401, None, "bad key")).retryable);
}

#[test]
fn test_structured_code_overrides_misleading_text() {
    // Message mentions a timeout but the vendor says the request was invalid
    let error = classify(&api(400, Some("invalid_request_error"), "timeout must be positive"));
    assert_eq!(error.code, ErrorCode::InvalidRequest);
    assert!(!error.retryable);
}

#[test]
fn test_unknown_status_falls_back_to_message() {
    let error = classify(&api(500, None, "The server is temporarily unavailable"));
    assert_eq!(error.code, ErrorCode::GenerationFailed);
    assert!(error.retryable);

    let error = classify(&api(500, None, "Unexpected output shape"));
    assert!(!error.retryable);
}

#[test]
fn test_dispatch_level_variants() {
    let expired = classify(&AppError::QueueExpired {
        waited: Duration::from_secs(30),
    });
    assert_eq!(expired.code, ErrorCode::QueueExpired);
    assert!(expired.retryable);

    let unsupported = classify(&AppError::CapabilityUnsupported {
        backend: BackendId::RemoveBg,
        capability: Capability::Inpaint,
    });
    assert_eq!(unsupported.code, ErrorCode::CapabilityUnsupported);
    assert!(!unsupported.retryable);

    let missing = classify(&AppError::NotConfigured(BackendId::Clipdrop));
    assert_eq!(missing.code, ErrorCode::NotConfigured);
    assert!(!missing.retryable);
}

#[test]
fn test_heuristic_patterns() {
    for message in ["Rate limit exceeded", "Request TIMEOUT", "HTTP 429", "quota used up", "got 503"] {
        assert!(is_retryable_message(message), "{message}");
    }
    assert!(!is_retryable_message("Model not found"));
}

#[test]
fn test_error_code_serialization() {
    let error = GenerationError::new(ErrorCode::RateLimited, "slow down");
    let json = serde_json::to_value(&error).unwrap();
    assert_eq!(json["code"], "RATE_LIMITED");
    assert_eq!(json["retryable"], true);
    assert_eq!(ErrorCode::from_vendor_code("RESOURCE_EXHAUSTED"), Some(ErrorCode::RateLimited));
}

#[test]
fn test_heuristic_ignores_job_ids_and_urls() {
    let error = classify(&AppError::JobFailed {
        job_id: "abc503xyz".to_string(),
        message: "NSFW content detected".to_string(),
    });
    assert_eq!(error.code, ErrorCode::JobFailed);
    assert!(!error.retryable);
    assert!(error.message.contains("abc503xyz"));

    let error = classify(&AppError::Api {
        backend: BackendId::Replicate,
        status: 500,
        code: None,
        message: "Unexpected output shape".to_string(),
    });
    assert!(!error.retryable);

    let error = classify(&AppError::JobFailed {
        job_id: "p1".to_string(),
        message: "Upstream rate limit hit, try again".to_string(),
    });
    assert!(error.retryable);
}

#[test]
fn test_timeout_codes_do_not_rely_on_message_text() {
    let expired = AppError::QueueExpired {
        waited: Duration::from_secs(30),
    };
    assert!(!expired.to_string().contains("timeout"));
    assert!(classify(&expired).retryable);

    let stalled = AppError::JobTimeout {
        job_id: "p9".to_string(),
        attempts: 60,
    };
    assert!(!stalled.to_string().contains("timeout"));
    let error = classify(&stalled);
    assert_eq!(error.code, ErrorCode::Timeout);
    assert!(error.retryable);
}
