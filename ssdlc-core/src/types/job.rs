//! Scan job lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use super::request::ScanRequest;

/// State of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Validating,
    AcquiringWorkspace,
    Scanning,
    Polling,
    Publishing,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Validating => "validating",
            JobState::AcquiringWorkspace => "acquiring_workspace",
            JobState::Scanning => "scanning",
            JobState::Polling => "polling",
            JobState::Publishing => "publishing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backend-issued handle for an analysis still running remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Remote task id (e.g. a SonarQube compute-engine task).
    pub task_id: String,
    /// Project key used to resolve the final report URL.
    pub project_key: String,
}

/// What an adapter run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Terminal result. The report URL may be absent when the backend did not print one.
    Completed(Option<String>),
    /// The backend is still analysing; poll the handle.
    Pending(TaskHandle),
}

/// Successful response returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    #[serde(rename = "Reporturl")]
    pub report_url: Option<String>,
}

/// The unit of orchestration: one request driven to a terminal state.
#[derive(Debug)]
pub struct ScanJob {
    pub id: Uuid,
    pub request: ScanRequest,
    pub state: JobState,
    pub workspace: String,
    pub task: Option<TaskHandle>,
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(request: ScanRequest) -> Self {
        let workspace = request.workspace_name();
        Self {
            id: Uuid::new_v4(),
            request,
            state: JobState::Validating,
            workspace,
            task: None,
            created_at: Utc::now(),
        }
    }

    /// Move to a new state. Terminal states are final.
    pub fn transition(&mut self, next: JobState) {
        if self.state.is_terminal() {
            debug!(job_id = %self.id, from = %self.state, to = %next, "Ignoring transition out of terminal state");
            return;
        }
        debug!(job_id = %self.id, from = %self.state, to = %next, "Job state transition");
        self.state = next;
    }

    /// Seconds since the job was created.
    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0
    }
}
