//! Error types for the scan orchestration engine.
//!
//! All errors use `thiserror`. Every variant maps to a stable [`ErrorKind`]
//! that callers can match on without parsing messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Main error type for scan jobs.
#[derive(Error, Debug)]
pub enum ScanError {
    // Input validation errors (raised before any side effect)
    #[error("Invalid metadata format: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Tool not supported: {tool}. Supported tools: {}", supported.join(", "))]
    UnsupportedTool { tool: String, supported: Vec<String> },

    #[error("Invalid scan request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid scan path '{path}': {reason}")]
    InvalidScanPath { path: String, reason: String },

    // Workspace errors
    #[error("Failed to clone {url} (branch {branch}): {reason}")]
    CloneFailed { url: String, branch: String, reason: String },

    #[error("Workspace '{name}' is already held by another scan job")]
    WorkspaceBusy { name: String },

    #[error("Path to scan does not exist: {path:?}")]
    ScanPathNotFound { path: PathBuf },

    // Backend errors
    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("{scanner} scan failed (exit code {}): {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()), summary(stderr, stdout))]
    ScanExecutionFailed {
        scanner: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{backend} request failed{}: {detail}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    BackendRequestFailed { backend: String, status: Option<u16>, detail: String },

    #[error("Analysis task {task_id} did not complete after {attempts} attempts")]
    PollTimedOut { task_id: String, attempts: u32, report_url: Option<String> },

    #[error("Backend reported analysis failure for task {task_id}: {message}")]
    BackendReportedFailure { task_id: String, message: String },

    // Publish errors
    #[error("Failed to send scan results to signature store on {endpoint}: {reason}")]
    PublishFailed { endpoint: String, status: Option<u16>, reason: String },

    // Lifecycle errors
    #[error("Scan job {job_id} was cancelled")]
    Cancelled { job_id: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Prefer stderr for the error summary, fall back to stdout.
fn summary(stderr: &str, stdout: &str) -> String {
    let text = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
    if text.is_empty() {
        "No error message.".to_string()
    } else {
        text.lines().last().unwrap_or(text).to_string()
    }
}

impl ScanError {
    /// Create an I/O error bound to a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Stable discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::InvalidMetadata { .. } => ErrorKind::InvalidMetadata,
            ScanError::UnsupportedTool { .. } => ErrorKind::UnsupportedTool,
            ScanError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            ScanError::InvalidScanPath { .. } => ErrorKind::InvalidScanPath,
            ScanError::CloneFailed { .. } => ErrorKind::CloneFailed,
            ScanError::WorkspaceBusy { .. } => ErrorKind::WorkspaceBusy,
            ScanError::ScanPathNotFound { .. } => ErrorKind::ScanPathNotFound,
            ScanError::ImagePullFailed { .. } => ErrorKind::ImagePullFailed,
            ScanError::ScanExecutionFailed { .. } => ErrorKind::ScanExecutionFailed,
            ScanError::BackendRequestFailed { .. } => ErrorKind::BackendRequestFailed,
            ScanError::PollTimedOut { .. } => ErrorKind::PollTimedOut,
            ScanError::BackendReportedFailure { .. } => ErrorKind::BackendReportedFailure,
            ScanError::PublishFailed { .. } => ErrorKind::PublishFailed,
            ScanError::Cancelled { .. } => ErrorKind::Cancelled,
            ScanError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            ScanError::Io { .. } => ErrorKind::Io,
            ScanError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for errors detected before any filesystem or network work.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidMetadata
                | ErrorKind::UnsupportedTool
                | ErrorKind::InvalidRequest
                | ErrorKind::InvalidScanPath
        )
    }

    /// Structured body for callers.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody { kind: self.kind(), detail: self.to_string() }
    }
}

/// Stable error discriminant, serialized as the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidMetadata,
    UnsupportedTool,
    InvalidRequest,
    InvalidScanPath,
    CloneFailed,
    WorkspaceBusy,
    ScanPathNotFound,
    ImagePullFailed,
    ScanExecutionFailed,
    BackendRequestFailed,
    PollTimedOut,
    BackendReportedFailure,
    PublishFailed,
    Cancelled,
    InvalidConfig,
    Io,
    Internal,
}

impl ErrorKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidMetadata => "InvalidMetadata",
            ErrorKind::UnsupportedTool => "UnsupportedTool",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::InvalidScanPath => "InvalidScanPath",
            ErrorKind::CloneFailed => "CloneFailed",
            ErrorKind::WorkspaceBusy => "WorkspaceBusy",
            ErrorKind::ScanPathNotFound => "ScanPathNotFound",
            ErrorKind::ImagePullFailed => "ImagePullFailed",
            ErrorKind::ScanExecutionFailed => "ScanExecutionFailed",
            ErrorKind::BackendRequestFailed => "BackendRequestFailed",
            ErrorKind::PollTimedOut => "PollTimedOut",
            ErrorKind::BackendReportedFailure => "BackendReportedFailure",
            ErrorKind::PublishFailed => "PublishFailed",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::Io => "Io",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure response returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub detail: String,
}
