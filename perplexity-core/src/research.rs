//! Async deep-research jobs: status derivation and the bounded wait loop.
//!
//! A job is created remotely and identified by an opaque id. Its state is
//! never cached here; every observation is a fresh [`PerplexityApi::get_research`]
//! call. Status is derived from the lifecycle timestamps in strict priority
//! order: failed > completed > in progress > pending.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::PerplexityApi;
use crate::error::{ApiError, Result};
use crate::types::{ChatResponse, QueryResult};

/// Derived lifecycle status of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and Failed admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A research job as reported by `GET /async/chat/completions/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsyncJob {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ChatResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Zero or absent means the stage has not been reached.
fn reached(timestamp: Option<i64>) -> bool {
    timestamp.is_some_and(|t| t > 0)
}

impl AsyncJob {
    /// Derive the status from the lifecycle timestamps.
    ///
    /// Failure is authoritative: a job reporting both completion and failure
    /// is failed.
    pub fn status(&self) -> JobStatus {
        if reached(self.failed_at) {
            JobStatus::Failed
        } else if reached(self.completed_at) {
            JobStatus::Completed
        } else if reached(self.started_at) {
            JobStatus::InProgress
        } else {
            JobStatus::Pending
        }
    }

    /// Classify the job once into a tagged outcome.
    pub fn outcome(&self) -> JobOutcome {
        match self.status() {
            JobStatus::Pending => JobOutcome::Pending,
            JobStatus::InProgress => JobOutcome::InProgress,
            JobStatus::Failed => JobOutcome::Failed {
                reason: self.error.clone().unwrap_or_default(),
            },
            JobStatus::Completed => match self
                .response
                .as_ref()
                .and_then(ChatResponse::to_query_result)
            {
                Some(result) => JobOutcome::Completed(result),
                None => JobOutcome::CompletedEmpty,
            },
        }
    }
}

/// What a single observation of a job means for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Pending,
    InProgress,
    Completed(QueryResult),
    /// Completed without any choices. Benign, not an error.
    CompletedEmpty,
    Failed {
        reason: String,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Pending => JobStatus::Pending,
            JobOutcome::InProgress => JobStatus::InProgress,
            JobOutcome::Completed(_) | JobOutcome::CompletedEmpty => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Bounds applied to a caller-requested wait timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBounds {
    /// Used when the caller gives no timeout or a non-positive one.
    pub default: Duration,
    /// Ceiling for any requested timeout.
    pub max: Duration,
}

impl Default for WaitBounds {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(300),
            max: Duration::from_secs(600),
        }
    }
}

impl WaitBounds {
    /// Clamp a requested timeout in seconds into `[1, max]`, defaulting unset values.
    pub fn clamp(&self, requested_secs: Option<i64>) -> Duration {
        match requested_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64).min(self.max),
            _ => self.default.min(self.max),
        }
    }
}

/// Polling policy for a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: WaitBounds::default().default,
        }
    }
}

/// Poll a job until it is terminal, the deadline passes, or `cancel` fires.
///
/// A failed poll ends the wait immediately with that error; nothing is
/// retried. The deadline and the cancellation token are raced against both
/// the in-flight poll and the sleep between polls, so an expired or cancelled
/// wait never outlives its deadline by more than scheduling jitter.
///
/// Returns [`ApiError::DeadlineExceeded`] when the deadline passes first and
/// [`ApiError::Transport`] when cancelled.
pub async fn wait_for_research<A>(
    api: &A,
    request_id: &str,
    options: WaitOptions,
    cancel: &CancellationToken,
) -> Result<AsyncJob>
where
    A: PerplexityApi + ?Sized,
{
    let deadline = Instant::now() + options.timeout;
    let mut polls: u32 = 0;

    info!(
        request_id = %request_id,
        timeout_secs = options.timeout.as_secs(),
        poll_interval_ms = options.poll_interval.as_millis() as u64,
        "Waiting for research job"
    );

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(request_id)),
            _ = tokio::time::sleep_until(deadline) => return Err(ApiError::deadline(options.timeout)),
            polled = api.get_research(request_id) => polled?,
        };
        polls += 1;

        let status = job.status();
        debug!(request_id = %request_id, polls, status = %status, "Polled research job");
        if status.is_terminal() {
            info!(request_id = %request_id, polls, status = %status, "Research job finished");
            return Ok(job);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(request_id)),
            _ = tokio::time::sleep_until(deadline) => return Err(ApiError::deadline(options.timeout)),
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}

fn cancelled(request_id: &str) -> ApiError {
    ApiError::Transport {
        message: format!("wait for research {} cancelled", request_id),
    }
}
