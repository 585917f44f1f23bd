//! Per-backend FIFO dispatch of generation requests
//!
//! `submit` validates and enqueues; a recurring tick admits at most one
//! request per backend per pass, subject to the rate limiter, and runs it on
//! its own task. Ordering is strictly first-in first-out within a backend.
//! Requests carry no priority.

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::registry::BackendRegistry;
use crate::backend::traits::{
    BackendId, Capability, GeneratedImage, GenerationRequest, ImageBackend,
};
use crate::error::{AppError, Result};
use crate::queue::rate_limiter::{RateLimitStatus, RateLimiter};
use crate::response::{classify, GenerationMetadata, GenerationResponse};

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Period of the dispatch tick
    pub tick_interval: Duration,
    /// Maximum number of queued requests across all backends
    pub max_queue_size: usize,
    /// How long a request may wait for a rate limit slot; `None` waits forever
    pub max_queue_residency: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_queue_size: 1000,
            max_queue_residency: None,
        }
    }
}

/// A request waiting in a backend queue
struct QueueEntry {
    request_id: Uuid,
    request: GenerationRequest,
    enqueued_at: Instant,
    respond: oneshot::Sender<GenerationResponse>,
}

/// Eventual response for a submitted request.
///
/// Dropping it withdraws the request if it has not been dispatched yet.
#[derive(Debug)]
pub struct PendingGeneration {
    request_id: Uuid,
    backend: BackendId,
    rx: oneshot::Receiver<GenerationResponse>,
}

impl PendingGeneration {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }
}

impl Future for PendingGeneration {
    type Output = Result<GenerationResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.map_err(|_| {
                AppError::Internal("Dispatcher dropped the request before responding".to_string())
            })
        })
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    pub queued: usize,
    pub dispatched: u64,
    pub expired: u64,
    pub max_queue_size: usize,
}

/// Clears the tick flag when a tick finishes
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| TickGuard(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Queues generation requests per backend and releases them as rate limits allow
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    limiter: RateLimiter,
    queues: Mutex<BTreeMap<BackendId, VecDeque<QueueEntry>>>,
    ticking: AtomicBool,
    wake: Arc<Notify>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    config: DispatcherConfig,
    dispatched_count: AtomicU64,
    expired_count: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with default configuration
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self::with_config(registry, DispatcherConfig::default())
    }

    /// Create a dispatcher with custom configuration
    pub fn with_config(registry: Arc<BackendRegistry>, config: DispatcherConfig) -> Self {
        let limiter = RateLimiter::new(registry.rate_limit_policies());
        Self {
            registry,
            limiter,
            queues: Mutex::new(BTreeMap::new()),
            ticking: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            loop_task: Mutex::new(None),
            config,
            dispatched_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Start the background tick loop. Also runs a tick right after each submit.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.loop_task.lock();
        if slot.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let wake = self.wake.clone();
        let period = self.config.tick_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                }

                let Some(dispatcher) = weak.upgrade() else {
                    break;
                };
                dispatcher.tick();
            }
        });

        *slot = Some(handle);
        info!(tick_ms = period.as_millis() as u64, "Started dispatch loop");
    }

    /// Stop the background tick loop. Queued requests stay queued.
    pub fn stop(&self) {
        if let Some(handle) = self.loop_task.lock().take() {
            handle.abort();
            info!("Stopped dispatch loop");
        }
    }

    /// Submit a request and wait for its response
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        self.submit(request)?.await
    }

    /// Validate and enqueue a request, returning immediately.
    ///
    /// Fails only when the backend is unknown or unconfigured, lacks the
    /// requested mode, or the queue is full. Anything that goes wrong later is
    /// reported inside the eventual `GenerationResponse`.
    pub fn submit(&self, mut request: GenerationRequest) -> Result<PendingGeneration> {
        let backend_id = request.backend;
        let backend = self
            .registry
            .get(backend_id)
            .ok_or(AppError::BackendNotRegistered(backend_id))?;

        if !backend.is_configured() {
            return Err(AppError::NotConfigured(backend_id));
        }
        if !backend.supports_mode(request.mode) {
            return Err(AppError::CapabilityUnsupported {
                backend: backend_id,
                capability: Capability::for_mode(request.mode),
            });
        }

        let cap = self
            .limiter
            .policy(backend_id)
            .map(|p| p.images_per_request.max(1))
            .unwrap_or(u32::MAX);
        let image_count = request.image_count.clamp(1, cap);
        if image_count != request.image_count {
            debug!(
                backend = %backend_id,
                requested = request.image_count,
                allowed = image_count,
                "Clamped image count to backend limit"
            );
            request.image_count = image_count;
        }

        let (respond, rx) = oneshot::channel();
        let request_id = Uuid::new_v4();

        let queued = {
            let mut queues = self.queues.lock();
            let total: usize = queues.values().map(VecDeque::len).sum();
            if total >= self.config.max_queue_size {
                return Err(AppError::Internal("Request queue is full".to_string()));
            }

            let queue = queues.entry(backend_id).or_default();
            queue.push_back(QueueEntry {
                request_id,
                request,
                enqueued_at: Instant::now(),
                respond,
            });
            queue.len()
        };

        debug!(backend = %backend_id, request_id = %request_id, queued, "Request queued");
        self.wake.notify_one();

        Ok(PendingGeneration {
            request_id,
            backend: backend_id,
            rx,
        })
    }

    /// Run one dispatch pass; returns how many requests were admitted.
    ///
    /// Each backend with queued work gets at most one admission per pass.
    /// A pass that starts while another is running does nothing.
    pub fn tick(&self) -> usize {
        let Some(_guard) = TickGuard::acquire(&self.ticking) else {
            debug!("Dispatch tick already running, skipping");
            return 0;
        };

        let now = Instant::now();
        let mut admitted = Vec::new();

        {
            let mut queues = self.queues.lock();
            for (backend, queue) in queues.iter_mut() {
                self.discard_stale(*backend, queue, now);
                if queue.is_empty() {
                    continue;
                }

                if !self.limiter.try_admit(*backend) {
                    debug!(backend = %backend, queued = queue.len(), "Rate limited, request stays queued");
                    continue;
                }

                if let Some(entry) = queue.pop_front() {
                    admitted.push(entry);
                }
            }
            queues.retain(|_, queue| !queue.is_empty());
        }

        let count = admitted.len();
        for entry in admitted {
            self.dispatch(entry);
        }
        count
    }

    /// Drop withdrawn requests and expire ones that waited too long, from the front
    fn discard_stale(&self, backend: BackendId, queue: &mut VecDeque<QueueEntry>, now: Instant) {
        while let Some(front) = queue.front() {
            if front.respond.is_closed() {
                debug!(backend = %backend, request_id = %front.request_id, "Request withdrawn by caller");
                queue.pop_front();
                continue;
            }

            let waited = now.saturating_duration_since(front.enqueued_at);
            let expired = self
                .config
                .max_queue_residency
                .is_some_and(|limit| waited >= limit);
            if !expired {
                break;
            }

            let Some(entry) = queue.pop_front() else {
                break;
            };
            warn!(
                backend = %backend,
                request_id = %entry.request_id,
                waited_ms = waited.as_millis() as u64,
                "Request expired while waiting for a rate limit slot"
            );
            self.expired_count.fetch_add(1, Ordering::Relaxed);

            let error = classify(&AppError::QueueExpired { waited });
            let response = GenerationResponse::failed(
                backend,
                entry.request.model.clone(),
                error,
                GenerationMetadata::new(entry.request_id, waited, None),
            );
            let _ = entry.respond.send(response);
        }
    }

    fn dispatch(&self, entry: QueueEntry) {
        let backend_id = entry.request.backend;
        let Some(backend) = self.registry.get(backend_id) else {
            let error = classify(&AppError::BackendNotRegistered(backend_id));
            let response = GenerationResponse::failed(
                backend_id,
                entry.request.model.clone(),
                error,
                GenerationMetadata::new(entry.request_id, Duration::ZERO, None),
            );
            let _ = entry.respond.send(response);
            return;
        };

        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        debug!(backend = %backend_id, request_id = %entry.request_id, mode = ?entry.request.mode, "Dispatching request");

        tokio::spawn(async move {
            let QueueEntry {
                request_id,
                request,
                respond,
                ..
            } = entry;

            let started = Instant::now();
            let result = AssertUnwindSafe(execute(backend.as_ref(), &request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(AppError::Internal(format!("Backend panicked: {}", panic_message(panic.as_ref()))))
                });
            let elapsed = started.elapsed();

            let response = match result {
                Ok(images) => {
                    let cost = backend.estimate_cost(&request);
                    GenerationResponse::succeeded(
                        backend_id,
                        request.model.clone(),
                        images,
                        GenerationMetadata::new(request_id, elapsed, cost),
                    )
                }
                Err(e) => {
                    let error = classify(&e);
                    warn!(
                        backend = %backend_id,
                        request_id = %request_id,
                        code = %error.code,
                        retryable = error.retryable,
                        error = %e,
                        "Generation failed"
                    );
                    GenerationResponse::failed(
                        backend_id,
                        request.model.clone(),
                        error,
                        GenerationMetadata::new(request_id, elapsed, None),
                    )
                }
            };

            if respond.send(response).is_err() {
                debug!(backend = %backend_id, request_id = %request_id, "Caller went away before the response arrived");
            }
        });
    }

    /// Current usage against the backend's limit; `None` when it has no limit
    pub fn rate_limit_status(&self, backend: BackendId) -> Option<RateLimitStatus> {
        self.limiter.status(backend)
    }

    pub fn queue_len(&self, backend: BackendId) -> usize {
        self.queues.lock().get(&backend).map_or(0, VecDeque::len)
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            queued: self.queues.lock().values().map(VecDeque::len).sum(),
            dispatched: self.dispatched_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
            max_queue_size: self.config.max_queue_size,
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_task.lock().take() {
            handle.abort();
        }
    }
}

/// Route a request to the adapter entry point for its mode
async fn execute(backend: &dyn ImageBackend, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
    match Capability::for_mode(request.mode) {
        Capability::Inpaint => backend.inpaint(request).await,
        Capability::EditImage => backend.edit_image(request).await,
        Capability::RemoveBackground => backend.remove_background(request).await,
        Capability::Generate => backend.generate(request).await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
