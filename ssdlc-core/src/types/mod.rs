//! Core domain types.

pub mod job;
pub mod request;
pub mod signature;

pub use job::{JobState, ScanJob, ScanOutcome, ScanResponse, TaskHandle};
pub use request::{
    parse_metadata, Metadata, RawScanRequest, ScanKind, ScanParams, ScanRequest, Target,
    DEFAULT_BRANCH, DEFAULT_SCAN_PATH,
};
pub use signature::{SignatureRecord, SCAN_SOURCE};
