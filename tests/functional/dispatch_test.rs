//! Functional tests for queueing, rate-limited admission and response delivery

use async_trait::async_trait;
use gen_image_dispatcher::backend::credentials::CredentialStore;
use gen_image_dispatcher::backend::registry::BackendRegistry;
use gen_image_dispatcher::backend::traits::{
    BackendDescriptor, BackendId, GeneratedImage, GenerationMode, GenerationRequest, ImageBackend,
    ImageSize, ModelInfo, RateLimitPolicy,
};
use gen_image_dispatcher::queue::dispatcher::{Dispatcher, DispatcherConfig};
use gen_image_dispatcher::response::ErrorCode;
use gen_image_dispatcher::{AppError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;
use tokio_test::assert_pending;

const FAKE_MODES: &[GenerationMode] = &[
    GenerationMode::TextToImage,
    GenerationMode::ImageToImage,
    GenerationMode::Inpainting,
    GenerationMode::BackgroundRemoval,
];

const FAKE_MODELS: &[ModelInfo] = &[ModelInfo {
    id: "fake-v1",
    name: "Fake v1",
    capabilities: FAKE_MODES,
    default_size: ImageSize::SQUARE_512,
    max_images: 4,
    estimated_time: 1,
    cost_per_image: Some(0.5),
}];

#[derive(Debug, Clone, PartialEq)]
struct Call {
    entry: &'static str,
    prompt: String,
    image_count: u32,
}

enum Outcome {
    Images,
    Empty,
    Fail(&'static str),
    Panic(&'static str),
}

/// Records every call and answers according to its outcome
struct FakeBackend {
    descriptor: BackendDescriptor,
    configured: AtomicBool,
    outcome: Outcome,
    calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    fn new(id: BackendId, outcome: Outcome) -> Self {
        Self {
            descriptor: BackendDescriptor {
                id,
                name: "Fake",
                description: "In-process test backend",
                supported_modes: FAKE_MODES,
                models: FAKE_MODELS,
                rate_limit: None,
                requires_api_key: false,
            },
            configured: AtomicBool::new(true),
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, entry: &'static str, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.calls.lock().push(Call {
            entry,
            prompt: request.prompt.clone(),
            image_count: request.image_count,
        });
        match self.outcome {
            Outcome::Images => Ok((0..request.image_count)
                .map(|i| GeneratedImage::from_url(format!("https://img.test/{}/{}", request.prompt, i), ImageSize::SQUARE_512))
                .collect()),
            Outcome::Empty => Ok(Vec::new()),
            Outcome::Fail(message) => Err(AppError::Backend(message.to_string())),
            Outcome::Panic(message) => panic!("{}", message),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.prompt.clone()).collect()
    }
}

#[async_trait]
impl ImageBackend for FakeBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn validate_api_key(&self, api_key: &str) -> Result<bool> {
        Ok(api_key == "good-key")
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.record("generate", request)
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.record("edit_image", request)
    }

    async fn inpaint(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.record("inpaint", request)
    }
}

const FAKE_ID: BackendId = BackendId::Replicate;

fn dispatcher_with(backend: Arc<FakeBackend>, policy: Option<RateLimitPolicy>, config: DispatcherConfig) -> Dispatcher {
    let mut registry = BackendRegistry::new(Arc::new(CredentialStore::new()));
    registry.register_with_policy(backend, policy);
    Dispatcher::with_config(Arc::new(registry), config)
}

fn limited(requests: u32) -> Option<RateLimitPolicy> {
    Some(RateLimitPolicy::per_minute(requests, 4))
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(FAKE_ID, "fake-v1", GenerationMode::TextToImage, prompt)
}

#[tokio::test(start_paused = true)]
async fn test_third_request_waits_for_window() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = dispatcher_with(backend.clone(), limited(2), DispatcherConfig::default());

    let first = dispatcher.submit(request("one")).unwrap();
    let second = dispatcher.submit(request("two")).unwrap();
    let mut third = dispatcher.submit(request("three")).unwrap();

    // One admission per backend per tick
    assert_eq!(dispatcher.tick(), 1);
    assert_eq!(dispatcher.tick(), 1);
    assert_eq!(dispatcher.tick(), 0);

    assert!(first.await.unwrap().success());
    assert!(second.await.unwrap().success());
    assert_pending!(futures::poll!(&mut third));
    assert_eq!(dispatcher.queue_len(FAKE_ID), 1);

    advance(Duration::from_millis(59_999)).await;
    assert_eq!(dispatcher.tick(), 0);

    advance(Duration::from_millis(1)).await;
    assert_eq!(dispatcher.tick(), 1);
    let response = third.await.unwrap();
    assert!(response.success());
    assert_eq!(backend.prompts(), vec!["one", "two", "three"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_slot() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = dispatcher_with(backend, limited(1), DispatcherConfig::default());

    let first = dispatcher.submit(request("a")).unwrap();
    let mut second = dispatcher.submit(request("b")).unwrap();

    assert_eq!(dispatcher.tick(), 1);
    assert!(first.await.unwrap().success());
    assert_pending!(futures::poll!(&mut second));

    advance(Duration::from_secs(30)).await;
    assert_eq!(dispatcher.tick(), 0);
    assert_pending!(futures::poll!(&mut second));

    advance(Duration::from_secs(30)).await;
    assert_eq!(dispatcher.tick(), 1);
    let response = second.await.unwrap();
    assert!(response.success());
    assert_eq!(response.images().len(), 1);
}

#[tokio::test]
async fn test_fifo_order_within_backend() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = dispatcher_with(backend.clone(), None, DispatcherConfig::default());

    let pending: Vec<_> = ["p1", "p2", "p3", "p4"]
        .iter()
        .map(|p| dispatcher.submit(request(p)).unwrap())
        .collect();
    for _ in 0..4 {
        assert_eq!(dispatcher.tick(), 1);
        // Let the spawned adapter call run before the next admission
        tokio::task::yield_now().await;
    }
    for p in pending {
        assert!(p.await.unwrap().success());
    }
    assert_eq!(backend.prompts(), vec!["p1", "p2", "p3", "p4"]);
}

#[tokio::test]
async fn test_modes_route_to_adapter_entry_points() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = Arc::new(dispatcher_with(backend.clone(), None, DispatcherConfig::default()));
    dispatcher.start();

    let cases = [
        (GenerationMode::TextToImage, "generate"),
        (GenerationMode::ImageToImage, "edit_image"),
        (GenerationMode::Inpainting, "inpaint"),
    ];
    for (mode, _) in cases {
        let req = GenerationRequest::new(FAKE_ID, "fake-v1", mode, "route").with_source_image(vec![1, 2, 3]);
        assert!(dispatcher.generate(req).await.unwrap().success());
    }
    let entries: Vec<_> = backend.calls.lock().iter().map(|c| c.entry).collect();
    assert_eq!(entries, cases.iter().map(|(_, e)| *e).collect::<Vec<_>>());

    // Declared mode without an adapter override
    let req = GenerationRequest::new(FAKE_ID, "fake-v1", GenerationMode::BackgroundRemoval, "bg");
    let response = dispatcher.generate(req).await.unwrap();
    assert!(!response.success());
    assert_eq!(response.error().unwrap().code, ErrorCode::CapabilityUnsupported);

    dispatcher.stop();
}

#[tokio::test]
async fn test_rejections_before_enqueue() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = dispatcher_with(backend.clone(), None, DispatcherConfig::default());

    let err = dispatcher
        .submit(GenerationRequest::new(BackendId::Clipdrop, "cleanup", GenerationMode::Inpainting, "x"))
        .unwrap_err();
    assert!(matches!(err, AppError::BackendNotRegistered(BackendId::Clipdrop)));

    let err = dispatcher
        .submit(GenerationRequest::new(FAKE_ID, "fake-v1", GenerationMode::Outpainting, "x"))
        .unwrap_err();
    assert!(matches!(err, AppError::CapabilityUnsupported { .. }));

    backend.configured.store(false, Ordering::SeqCst);
    let err = dispatcher.submit(request("x")).unwrap_err();
    assert!(matches!(err, AppError::NotConfigured(FAKE_ID)));

    assert_eq!(dispatcher.stats().queued, 0);
    assert!(backend.calls.lock().is_empty());
}

#[tokio::test]
async fn test_full_queue_rejects() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let config = DispatcherConfig {
        max_queue_size: 2,
        ..DispatcherConfig::default()
    };
    let dispatcher = dispatcher_with(backend, limited(1), config);

    let _a = dispatcher.submit(request("a")).unwrap();
    let _b = dispatcher.submit(request("b")).unwrap();
    assert!(dispatcher.submit(request("c")).is_err());
}

#[tokio::test]
async fn test_failures_are_classified_not_raised() {
    let unavailable = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Fail("503 Service Unavailable")));
    let dispatcher = dispatcher_with(unavailable, None, DispatcherConfig::default());
    let pending = dispatcher.submit(request("x")).unwrap();
    dispatcher.tick();
    let response = pending.await.unwrap();
    assert!(!response.success());
    assert!(response.images().is_empty());
    assert!(response.error().unwrap().retryable);

    let invalid = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Fail("Invalid prompt: empty")));
    let dispatcher = dispatcher_with(invalid, None, DispatcherConfig::default());
    let pending = dispatcher.submit(request("x")).unwrap();
    dispatcher.tick();
    let response = pending.await.unwrap();
    assert!(!response.success());
    assert!(!response.error().unwrap().retryable);
    assert_eq!(response.metadata().cost, None);
}

#[tokio::test]
async fn test_adapter_panic_becomes_failed_response() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Panic("decoder blew up")));
    let dispatcher = dispatcher_with(backend.clone(), None, DispatcherConfig::default());
    let pending = dispatcher.submit(request("boom")).unwrap();
    dispatcher.tick();

    let response = pending.await.unwrap();
    assert!(!response.success());
    let error = response.error().unwrap();
    assert_eq!(error.code, ErrorCode::GenerationFailed);
    assert!(error.message.contains("decoder blew up"));
    assert!(!error.retryable);

    // The dispatcher keeps serving after the panic
    let pending = dispatcher.submit(request("again")).unwrap();
    dispatcher.tick();
    assert!(!pending.await.unwrap().success());
    assert_eq!(backend.prompts(), vec!["boom", "again"]);
}

#[tokio::test]
async fn test_empty_result_is_a_failure() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Empty));
    let dispatcher = dispatcher_with(backend, None, DispatcherConfig::default());
    let pending = dispatcher.submit(request("nothing")).unwrap();
    dispatcher.tick();

    let response = pending.await.unwrap();
    assert!(!response.success());
    assert_eq!(response.error().unwrap().code, ErrorCode::EmptyResult);
}

#[tokio::test]
async fn test_image_count_clamped_and_cost_reported() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let policy = Some(RateLimitPolicy::per_minute(10, 2));
    let dispatcher = dispatcher_with(backend.clone(), policy, DispatcherConfig::default());

    let pending = dispatcher.submit(request("many").with_image_count(5)).unwrap();
    dispatcher.tick();
    let response = pending.await.unwrap();

    assert!(response.success());
    assert_eq!(backend.calls.lock()[0].image_count, 2);
    assert_eq!(response.images().len(), 2);
    assert_eq!(response.metadata().cost, Some(1.0));
    assert_eq!(response.backend(), FAKE_ID);
    assert_eq!(response.model(), "fake-v1");
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_expires() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let config = DispatcherConfig {
        max_queue_residency: Some(Duration::from_secs(30)),
        ..DispatcherConfig::default()
    };
    let dispatcher = dispatcher_with(backend.clone(), limited(1), config);

    let first = dispatcher.submit(request("first")).unwrap();
    let second = dispatcher.submit(request("second")).unwrap();
    assert_eq!(dispatcher.tick(), 1);
    assert!(first.await.unwrap().success());

    advance(Duration::from_secs(30)).await;
    assert_eq!(dispatcher.tick(), 0);

    let response = second.await.unwrap();
    assert!(!response.success());
    let error = response.error().unwrap();
    assert_eq!(error.code, ErrorCode::QueueExpired);
    assert!(error.retryable);
    assert_eq!(backend.prompts(), vec!["first"]);
    assert_eq!(dispatcher.stats().expired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_request_is_withdrawn() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = dispatcher_with(backend.clone(), limited(1), DispatcherConfig::default());

    let first = dispatcher.submit(request("kept")).unwrap();
    let withdrawn = dispatcher.submit(request("withdrawn")).unwrap();
    let last = dispatcher.submit(request("last")).unwrap();

    assert_eq!(dispatcher.tick(), 1);
    assert!(first.await.unwrap().success());
    drop(withdrawn);

    advance(Duration::from_secs(60)).await;
    assert_eq!(dispatcher.tick(), 1);
    assert!(last.await.unwrap().success());
    assert_eq!(backend.prompts(), vec!["kept", "last"]);
}

#[tokio::test]
async fn test_pending_generation_reports_dropped_dispatcher() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = dispatcher_with(backend, None, DispatcherConfig::default());
    let pending = dispatcher.submit(request("orphan")).unwrap();
    assert_eq!(pending.backend(), FAKE_ID);

    drop(dispatcher);
    let err = pending.await.unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_status_snapshot() {
    let backend = Arc::new(FakeBackend::new(FAKE_ID, Outcome::Images));
    let dispatcher = dispatcher_with(backend, limited(3), DispatcherConfig::default());

    let status = dispatcher.rate_limit_status(FAKE_ID).unwrap();
    assert_eq!((status.current_usage, status.limit, status.remaining_time_ms), (0, 3, 0));

    let pending = dispatcher.submit(request("x")).unwrap();
    dispatcher.tick();
    pending.await.unwrap();

    advance(Duration::from_secs(20)).await;
    let status = dispatcher.rate_limit_status(FAKE_ID).unwrap();
    assert_eq!(status.current_usage, 1);
    assert_eq!(status.remaining_time_ms, 40_000);

    assert!(dispatcher.rate_limit_status(BackendId::Clipdrop).is_none());
}
