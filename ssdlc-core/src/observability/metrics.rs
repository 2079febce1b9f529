//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration
//!
//! Recording is a no-op until a recorder is installed, so library callers and
//! tests need no setup.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Job metrics
    describe_counter!("ssdlc_scan_jobs_total", "Total number of scan jobs (by kind, outcome)");
    describe_histogram!(
        "ssdlc_scan_duration_seconds",
        "Time from request validation to terminal state (by kind)"
    );

    // Workspace metrics
    describe_gauge!("ssdlc_workspace_active", "Workspaces currently held by a job");
    describe_counter!(
        "ssdlc_workspace_busy_total",
        "Requests refused because their workspace was held"
    );

    // Backend metrics
    describe_counter!(
        "ssdlc_poll_attempts_total",
        "Task status requests (by outcome: pending, success, failed, error)"
    );
    describe_counter!("ssdlc_publish_failures_total", "Signature store writes that failed");
}

pub fn record_scan(kind: &str, outcome: &str, duration_secs: f64) {
    counter!("ssdlc_scan_jobs_total", "kind" => kind.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    histogram!("ssdlc_scan_duration_seconds", "kind" => kind.to_string()).record(duration_secs);
}

pub fn set_active_workspaces(count: usize) {
    gauge!("ssdlc_workspace_active").set(count as f64);
}

pub fn record_workspace_busy() {
    counter!("ssdlc_workspace_busy_total").increment(1);
}

pub fn record_poll_attempt(outcome: &str) {
    counter!("ssdlc_poll_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_publish_failure() {
    counter!("ssdlc_publish_failures_total").increment(1);
}
