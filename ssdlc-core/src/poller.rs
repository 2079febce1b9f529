//! Bounded polling of asynchronous backend analyses.
//!
//! Some backends accept a scan and finish it later. The poller asks the
//! backend for the task's status until it reaches a terminal state, the
//! attempt budget runs out, or the job is cancelled.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelSignal;
use crate::config::PollSettings;
use crate::error::{Result, ScanError};
use crate::observability::metrics;
use crate::types::TaskHandle;

/// Status reported by a backend for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTaskStatus {
    Success,
    Failed(String),
    Canceled(String),
    /// Any non-terminal status (e.g. `PENDING`, `IN_PROGRESS`).
    InProgress(String),
}

impl RemoteTaskStatus {
    /// Map a backend status string, carrying the optional error message.
    pub fn parse(status: &str, message: Option<&str>) -> Self {
        let message = || message.unwrap_or("no error message reported").to_string();
        match status.to_ascii_uppercase().as_str() {
            "SUCCESS" => RemoteTaskStatus::Success,
            "FAILED" => RemoteTaskStatus::Failed(message()),
            "CANCELED" | "CANCELLED" => RemoteTaskStatus::Canceled(message()),
            other => RemoteTaskStatus::InProgress(other.to_string()),
        }
    }
}

/// A backend that can be asked about a task's progress.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus>;

    /// Report location for a finished task.
    fn report_url(&self, handle: &TaskHandle) -> String;
}

/// Polling budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl From<&PollSettings> for PollConfig {
    fn from(settings: &PollSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            delay: Duration::from_secs(settings.delay_secs),
            backoff_factor: settings.backoff_factor.max(1.0),
            max_delay: Duration::from_secs(settings.max_delay_secs),
        }
    }
}

impl PollConfig {
    /// Delay after attempt `attempt` (1-based), capped at `max_delay`.
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay = self.delay.mul_f64(factor.min(1e6));
        delay.min(self.max_delay.max(self.delay))
    }
}

/// Terminal state of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Result of polling one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub state: PollState,
    /// Status requests made, including failed requests.
    pub attempts: u32,
    /// Final report URL on success, best-effort location otherwise.
    pub report_url: Option<String>,
    /// Backend error message on failure.
    pub message: Option<String>,
}

impl PollOutcome {
    /// Convert into the job-level result for `task_id`.
    pub fn into_result(self, task_id: &str, job_id: &str) -> Result<Option<String>> {
        match self.state {
            PollState::Succeeded => Ok(self.report_url),
            PollState::Failed => Err(ScanError::BackendReportedFailure {
                task_id: task_id.to_string(),
                message: self.message.unwrap_or_default(),
            }),
            PollState::TimedOut => Err(ScanError::PollTimedOut {
                task_id: task_id.to_string(),
                attempts: self.attempts,
                report_url: self.report_url,
            }),
            PollState::Cancelled => Err(ScanError::Cancelled { job_id: job_id.to_string() }),
        }
    }
}

/// Polls a [`TaskStatusSource`] within a [`PollConfig`] budget.
pub struct CompletionPoller {
    source: Arc<dyn TaskStatusSource>,
    config: PollConfig,
}

impl CompletionPoller {
    pub fn new(source: Arc<dyn TaskStatusSource>, config: PollConfig) -> Self {
        Self { source, config }
    }

    /// Poll until the task is terminal, the budget is spent, or `cancel` fires.
    ///
    /// Makes at most `max_attempts` status requests and never sleeps after
    /// the last one. Request errors count as attempts and are retried.
    #[instrument(skip(self, cancel), fields(task_id = %handle.task_id))]
    pub async fn poll(&self, handle: &TaskHandle, cancel: &CancelSignal) -> PollOutcome {
        let max = self.config.max_attempts.max(1);

        for attempt in 1..=max {
            if cancel.is_cancelled() {
                return self.cancelled(attempt - 1);
            }

            let status = tokio::select! {
                status = self.source.task_status(&handle.task_id) => status,
                _ = cancel.cancelled() => return self.cancelled(attempt),
            };

            match status {
                Ok(RemoteTaskStatus::Success) => {
                    metrics::record_poll_attempt("success");
                    info!(attempt, "Backend task succeeded");
                    return PollOutcome {
                        state: PollState::Succeeded,
                        attempts: attempt,
                        report_url: Some(self.source.report_url(handle)),
                        message: None,
                    };
                }
                Ok(RemoteTaskStatus::Failed(message)) | Ok(RemoteTaskStatus::Canceled(message)) => {
                    metrics::record_poll_attempt("failed");
                    warn!(attempt, %message, "Backend task failed");
                    return PollOutcome {
                        state: PollState::Failed,
                        attempts: attempt,
                        report_url: None,
                        message: Some(message),
                    };
                }
                Ok(RemoteTaskStatus::InProgress(status)) => {
                    metrics::record_poll_attempt("pending");
                    debug!(attempt, %status, "Backend task still running");
                }
                Err(e) => {
                    metrics::record_poll_attempt("error");
                    warn!(attempt, error = %e, "Task status request failed");
                }
            }

            if attempt == max {
                break;
            }

            let delay = self.config.delay_after(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return self.cancelled(attempt),
            }
        }

        warn!(attempts = max, "Backend task did not finish within the polling budget");
        PollOutcome {
            state: PollState::TimedOut,
            attempts: max,
            report_url: Some(self.source.report_url(handle)),
            message: None,
        }
    }

    fn cancelled(&self, attempts: u32) -> PollOutcome {
        info!(attempts, "Polling cancelled");
        PollOutcome { state: PollState::Cancelled, attempts, report_url: None, message: None }
    }
}
