//! Create-then-poll support for backends that defer work to a remote job

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::backend::traits::BackendId;
use crate::error::{AppError, Result};

/// Remote job status. Ordered so that transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One status report from the vendor
#[derive(Debug, Clone)]
pub struct JobSnapshot<T> {
    pub status: JobStatus,
    pub output: Option<T>,
    pub error: Option<String>,
}

impl<T> JobSnapshot<T> {
    pub fn in_progress(status: JobStatus) -> Self {
        Self {
            status,
            output: None,
            error: None,
        }
    }

    pub fn succeeded(output: T) -> Self {
        Self {
            status: JobStatus::Succeeded,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Vendor side of a deferred job
#[async_trait]
pub trait JobSource: Send + Sync {
    type Output: Send;

    async fn poll(&self, job_id: &str) -> Result<JobSnapshot<Self::Output>>;
}

/// A job handle being tracked by the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncJob {
    pub id: String,
    pub backend: BackendId,
    pub status: JobStatus,
    pub attempts: u32,
}

impl AsyncJob {
    pub fn new(id: impl Into<String>, backend: BackendId) -> Self {
        Self {
            id: id.into(),
            backend,
            status: JobStatus::Pending,
            attempts: 0,
        }
    }

    /// Apply a reported status. Backward or post-terminal moves are ignored.
    pub fn observe(&mut self, status: JobStatus) -> bool {
        if self.status.is_terminal() || status <= self.status {
            return false;
        }
        self.status = status;
        true
    }
}

/// Fixed-interval poller with an attempt ceiling
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
    max_attempts: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 60)
    }
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on how long `wait` may take
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Poll until the job succeeds, fails, or the attempt budget runs out
    pub async fn wait<S>(&self, mut job: AsyncJob, source: &S) -> Result<S::Output>
    where
        S: JobSource + ?Sized,
    {
        let outcome = tokio::time::timeout(self.deadline(), self.poll_until_terminal(&mut job, source)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::JobTimeout {
                job_id: job.id,
                attempts: job.attempts,
            }),
        }
    }

    async fn poll_until_terminal<S>(&self, job: &mut AsyncJob, source: &S) -> Result<S::Output>
    where
        S: JobSource + ?Sized,
    {
        loop {
            job.attempts += 1;
            let snapshot = source.poll(&job.id).await?;
            job.observe(snapshot.status);

            match job.status {
                JobStatus::Succeeded => {
                    return snapshot.output.ok_or_else(|| {
                        AppError::Backend(format!("Job {} succeeded without output", job.id))
                    });
                }
                JobStatus::Failed => {
                    return Err(AppError::JobFailed {
                        job_id: job.id.clone(),
                        message: snapshot.error.unwrap_or_else(|| "Generation failed".to_string()),
                    });
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            if job.attempts >= self.max_attempts {
                return Err(AppError::JobTimeout {
                    job_id: job.id.clone(),
                    attempts: job.attempts,
                });
            }

            debug!(
                backend = %job.backend,
                job_id = %job.id,
                attempt = job.attempts,
                status = ?job.status,
                "Job not finished, polling again"
            );
            tokio::time::sleep(self.interval).await;
        }
    }
}
