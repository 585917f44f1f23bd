//! Per-backend sliding window admission control
//!
//! Each backend with a policy owns a [`RateLimitWindow`]: an ordered list of
//! time buckets (one minute wide, or narrower when the window itself is
//! shorter) with an admission count. A bucket ages out once its most recent
//! admission is a full window old, so a bucket is never dropped while any of
//! its admissions could still be inside the window. Pacing inside a bucket is
//! not smoothed.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::traits::{BackendId, RateLimitPolicy};

const MAX_BUCKET_WIDTH: Duration = Duration::from_secs(60);

/// Snapshot for display: usage against the limit and time until a slot frees up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub current_usage: u32,
    pub limit: u32,
    pub remaining_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    pub bucket: u64,
    pub count: u32,
    pub last_admission: Instant,
}

/// Rolling admission record for one backend
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    policy: RateLimitPolicy,
    epoch: Instant,
    bucket_width: Duration,
    entries: VecDeque<WindowEntry>,
}

impl RateLimitWindow {
    pub fn new(policy: RateLimitPolicy, epoch: Instant) -> Self {
        let bucket_width = policy
            .window()
            .min(MAX_BUCKET_WIDTH)
            .max(Duration::from_millis(1));
        Self {
            policy,
            epoch,
            bucket_width,
            entries: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }

    fn is_expired(&self, entry: &WindowEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_admission) >= self.policy.window()
    }

    /// Drop buckets whose latest admission is a full window old
    pub fn prune(&mut self, now: Instant) {
        let window = self.policy.window();
        self.entries
            .retain(|e| now.saturating_duration_since(e.last_admission) < window);
    }

    /// Admissions still inside the window, without pruning
    pub fn usage(&self, now: Instant) -> u32 {
        self.entries
            .iter()
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.count)
            .sum()
    }

    pub fn can_admit(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.usage(now) < self.policy.requests_per_window
    }

    pub fn record(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.epoch);
        let bucket = (elapsed.as_millis() / self.bucket_width.as_millis()) as u64;

        match self.entries.back_mut() {
            Some(entry) if entry.bucket == bucket => {
                entry.count += 1;
                entry.last_admission = now;
            }
            _ => self.entries.push_back(WindowEntry {
                bucket,
                count: 1,
                last_admission: now,
            }),
        }
    }

    /// Check and record under one borrow
    pub fn try_admit(&mut self, now: Instant) -> bool {
        if !self.can_admit(now) {
            return false;
        }
        self.record(now);
        true
    }

    pub fn status(&self, now: Instant) -> RateLimitStatus {
        let window = self.policy.window();
        let remaining = self
            .entries
            .iter()
            .find(|e| !self.is_expired(e, now))
            .map(|e| window.saturating_sub(now.saturating_duration_since(e.last_admission)))
            .unwrap_or_default();

        RateLimitStatus {
            current_usage: self.usage(now),
            limit: self.policy.requests_per_window,
            remaining_time_ms: remaining.as_millis() as u64,
        }
    }
}

/// Admission control across all backends.
///
/// Backends without a policy are always admitted.
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<BackendId, RateLimitWindow>>,
}

impl RateLimiter {
    pub fn new(policies: impl IntoIterator<Item = (BackendId, RateLimitPolicy)>) -> Self {
        let epoch = Instant::now();
        let windows = policies
            .into_iter()
            .map(|(backend, policy)| (backend, RateLimitWindow::new(policy, epoch)))
            .collect();
        Self {
            windows: Mutex::new(windows),
        }
    }

    pub fn policy(&self, backend: BackendId) -> Option<RateLimitPolicy> {
        self.windows.lock().get(&backend).map(|w| *w.policy())
    }

    pub fn can_admit(&self, backend: BackendId) -> bool {
        match self.windows.lock().get_mut(&backend) {
            Some(window) => window.can_admit(Instant::now()),
            None => true,
        }
    }

    pub fn record_admission(&self, backend: BackendId) {
        if let Some(window) = self.windows.lock().get_mut(&backend) {
            window.record(Instant::now());
        }
    }

    /// Check and record in one critical section, so a slot is never handed out twice
    pub fn try_admit(&self, backend: BackendId) -> bool {
        match self.windows.lock().get_mut(&backend) {
            Some(window) => window.try_admit(Instant::now()),
            None => true,
        }
    }

    /// `None` when the backend has no configured limit
    pub fn status(&self, backend: BackendId) -> Option<RateLimitStatus> {
        self.windows
            .lock()
            .get(&backend)
            .map(|w| w.status(Instant::now()))
    }
}
