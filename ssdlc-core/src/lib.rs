//! SSDLC Scan Core Library
//!
//! Orchestrates security scans of repositories and container images: an
//! exclusive workspace per target, a scanner adapter per scan kind, bounded
//! polling for backends that finish asynchronously, and a signature record
//! published for every completed scan.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod observability;
pub mod paths;
pub mod poller;
pub mod publisher;
pub mod scanners;
pub mod types;
pub mod workspace;

#[cfg(test)]
mod test_support;

// Re-export commonly used items
pub use cancel::CancelSignal;
pub use config::Config;
pub use engine::ScanEngine;
pub use error::{ErrorBody, ErrorKind, Result, ScanError};
pub use observability::{init as init_observability, ObservabilityGuard};
pub use poller::{CompletionPoller, PollConfig, PollOutcome, PollState, RemoteTaskStatus, TaskStatusSource};
pub use publisher::{HttpSignatureStore, SignatureStore};
pub use scanners::{AdapterRegistry, ScannerAdapter};
pub use types::{
    JobState, RawScanRequest, ScanJob, ScanKind, ScanOutcome, ScanRequest, ScanResponse, SignatureRecord,
    TaskHandle, Target,
};
pub use workspace::{RepoFetcher, Workspace, WorkspaceLease, WorkspaceManager};
