//! Queue module - per-backend dispatch, rate limiting and remote job polling

pub mod dispatcher;
pub mod poller;
pub mod rate_limiter;

pub use dispatcher::{Dispatcher, DispatcherConfig, PendingGeneration};
pub use poller::{AsyncJob, JobPoller, JobSnapshot, JobSource, JobStatus};
pub use rate_limiter::{RateLimitStatus, RateLimiter};
