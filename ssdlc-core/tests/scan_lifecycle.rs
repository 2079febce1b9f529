//! Integration tests for the scan job lifecycle.
//!
//! These tests drive [`ScanEngine`] through its public API:
//! - Workspace acquisition and cleanup
//! - Synchronous and polled scanner outcomes
//! - Signature publishing
//! - Orphan sweeping
//!
//! Tests use mock collaborators so no scanner CLI or network is required.

use async_trait::async_trait;
use ssdlc_core::{
    error::{Result, ScanError},
    poller::{CompletionPoller, PollConfig, RemoteTaskStatus, TaskStatusSource},
    publisher::SignatureStore,
    scanners::{
        AdapterRegistry, CommandError, CommandOutput, CommandRunner, CommandSpec, ScannerAdapter,
        WizCli, WizIacAdapter,
    },
    types::{RawScanRequest, ScanKind, ScanOutcome, ScanRequest, SignatureRecord, TaskHandle},
    workspace::{RepoFetcher, Workspace, WorkspaceManager},
    CancelSignal, ScanEngine,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Mock fetcher that lays out a small repository instead of cloning.
struct MockFetcher;

#[async_trait]
impl RepoFetcher for MockFetcher {
    async fn clone_or_checkout(&self, url: &str, branch: &str, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest.join("deploy")).unwrap();
        std::fs::write(dest.join("deploy/main.tf"), "resource \"null_resource\" \"x\" {}\n").unwrap();
        std::fs::write(dest.join(".origin"), format!("{url}#{branch}")).unwrap();
        Ok(())
    }
}

/// Mock store keeping every published record.
#[derive(Default)]
struct MockStore {
    records: Mutex<Vec<SignatureRecord>>,
}

#[async_trait]
impl SignatureStore for MockStore {
    async fn publish(&self, record: &SignatureRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Mock static analysis backend that hands back a task to poll.
struct PendingAdapter;

#[async_trait]
impl ScannerAdapter for PendingAdapter {
    fn kind(&self) -> ScanKind {
        ScanKind::StaticCodeScan
    }

    fn name(&self) -> &str {
        "mock-sonar"
    }

    async fn run(&self, workspace: &Workspace, _request: &ScanRequest) -> Result<ScanOutcome> {
        Ok(ScanOutcome::Pending(TaskHandle {
            task_id: "AX-1".to_string(),
            project_key: workspace.name().to_string(),
        }))
    }
}

/// Mock task source replaying statuses; the last one repeats.
struct MockTasks {
    statuses: Mutex<VecDeque<RemoteTaskStatus>>,
}

impl MockTasks {
    fn new(statuses: Vec<RemoteTaskStatus>) -> Arc<Self> {
        Arc::new(Self { statuses: Mutex::new(statuses.into()) })
    }
}

#[async_trait]
impl TaskStatusSource for MockTasks {
    async fn task_status(&self, _task_id: &str) -> Result<RemoteTaskStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 { statuses.pop_front() } else { statuses.front().cloned() };
        Ok(status.unwrap_or(RemoteTaskStatus::Success))
    }

    fn report_url(&self, handle: &TaskHandle) -> String {
        format!("https://sonar.example/dashboard?id={}", handle.project_key)
    }
}

/// Mock runner printing a fixed wizcli output.
struct MockRunner {
    stdout: String,
    calls: Mutex<Vec<CommandSpec>>,
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _timeout: Duration,
    ) -> std::result::Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        Ok(CommandOutput { exit_code: Some(0), stdout: self.stdout.clone(), stderr: String::new() })
    }
}

fn fast_poll() -> PollConfig {
    PollConfig {
        max_attempts: 5,
        delay: Duration::from_millis(10),
        backoff_factor: 1.0,
        max_delay: Duration::from_millis(10),
    }
}

fn setup(adapters: AdapterRegistry) -> (TempDir, Arc<MockStore>, ScanEngine) {
    let temp_dir = TempDir::new().unwrap();
    let workspaces = Arc::new(WorkspaceManager::new(temp_dir.path().join("workspaces"), Arc::new(MockFetcher)));
    let store = Arc::new(MockStore::default());
    let engine = ScanEngine::new(workspaces, adapters, store.clone());
    (temp_dir, store, engine)
}

fn repo_request(kind: ScanKind, url: &str) -> RawScanRequest {
    RawScanRequest {
        kind: Some(kind),
        url: Some(url.to_string()),
        commit_id: Some("5d1f0a7".to_string()),
        metadata: Some(r#"{"team": "platform"}"#.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_static_scan_polls_until_success() {
    let mut adapters = AdapterRegistry::new();
    adapters.register(Arc::new(PendingAdapter));
    let (temp_dir, store, engine) = setup(adapters);
    let tasks = MockTasks::new(vec![
        RemoteTaskStatus::InProgress("PENDING".into()),
        RemoteTaskStatus::InProgress("IN_PROGRESS".into()),
        RemoteTaskStatus::Success,
    ]);
    let engine = engine.with_poller(CompletionPoller::new(tasks, fast_poll()));

    let response = engine
        .run(repo_request(ScanKind::StaticCodeScan, "https://scm.example/team/billing.git"), &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(response.report_url.as_deref(), Some("https://sonar.example/dashboard?id=billing"));

    let records = store.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    let json = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(json["ScanSource"], "ssdlc-scan-api");
    assert_eq!(json["ScanType"], "staticCodeScan");
    assert_eq!(json["RepoName"], "billing");
    assert_eq!(json["BranchName"], "develop");
    assert_eq!(json["CommitId"], "5d1f0a7");
    assert_eq!(json["Metadata"]["team"], "platform");

    assert!(!temp_dir.path().join("workspaces/billing").exists());
}

#[tokio::test]
async fn test_backend_failure_publishes_nothing() {
    let mut adapters = AdapterRegistry::new();
    adapters.register(Arc::new(PendingAdapter));
    let (temp_dir, store, engine) = setup(adapters);
    let tasks = MockTasks::new(vec![RemoteTaskStatus::Failed("Unsupported language".into())]);
    let engine = engine.with_poller(CompletionPoller::new(tasks, fast_poll()));

    let err = engine
        .run(repo_request(ScanKind::StaticCodeScan, "https://scm.example/team/billing.git"), &CancelSignal::new())
        .await
        .unwrap_err();

    match err {
        ScanError::BackendReportedFailure { task_id, message } => {
            assert_eq!(task_id, "AX-1");
            assert_eq!(message, "Unsupported language");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(store.records.lock().unwrap().is_empty());
    assert!(!temp_dir.path().join("workspaces/billing").exists());
    assert_eq!(engine.workspaces().held_count(), 0);
}

#[tokio::test]
async fn test_iac_scan_with_wiz_adapter() {
    let runner = Arc::new(MockRunner {
        stdout: "Scan results: https://app.wiz.io/findings/cicd-scans?id=77\n".to_string(),
        calls: Mutex::new(Vec::new()),
    });
    let wiz = Arc::new(WizCli::new("wizcli", runner.clone(), Duration::from_secs(30)));
    let mut adapters = AdapterRegistry::new();
    adapters.register(Arc::new(WizIacAdapter::new(wiz)));
    let (temp_dir, store, engine) = setup(adapters);

    let mut request = repo_request(ScanKind::IacScan, "https://scm.example/team/infra");
    request.path = Some("deploy".to_string());
    let response = engine.run(request, &CancelSignal::new()).await.unwrap();

    assert_eq!(response.report_url.as_deref(), Some("https://app.wiz.io/findings/cicd-scans?id=77"));
    assert_eq!(store.records.lock().unwrap()[0].scan_type, "IacScan");

    let calls = runner.calls.lock().unwrap();
    let scanned = PathBuf::from(&calls[0].args[3]);
    assert!(scanned.ends_with("workspaces/infra/deploy"));
    assert!(!temp_dir.path().join("workspaces/infra").exists());
}

#[tokio::test]
async fn test_missing_scan_path_fails_before_scanner() {
    let runner = Arc::new(MockRunner { stdout: String::new(), calls: Mutex::new(Vec::new()) });
    let wiz = Arc::new(WizCli::new("wizcli", runner.clone(), Duration::from_secs(30)));
    let mut adapters = AdapterRegistry::new();
    adapters.register(Arc::new(WizIacAdapter::new(wiz)));
    let (_temp_dir, store, engine) = setup(adapters);

    let mut request = repo_request(ScanKind::IacScan, "https://scm.example/team/infra");
    request.path = Some("charts".to_string());
    let err = engine.run(request, &CancelSignal::new()).await.unwrap_err();

    assert!(matches!(err, ScanError::ScanPathNotFound { .. }));
    assert!(runner.calls.lock().unwrap().is_empty());
    assert!(store.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_different_repositories_run_concurrently() {
    let mut adapters = AdapterRegistry::new();
    adapters.register(Arc::new(PendingAdapter));
    let (_temp_dir, store, engine) = setup(adapters);
    let engine = Arc::new(
        engine.with_poller(CompletionPoller::new(MockTasks::new(vec![RemoteTaskStatus::Success]), fast_poll())),
    );

    let jobs: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|name| {
            let engine = engine.clone();
            let request = repo_request(ScanKind::StaticCodeScan, &format!("https://scm.example/team/{name}.git"));
            tokio::spawn(async move { engine.run(request, &CancelSignal::new()).await })
        })
        .collect();

    for job in jobs {
        job.await.unwrap().unwrap();
    }

    let mut names: Vec<_> = store
        .records
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.repo_name.clone().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn test_sweep_removes_orphaned_workspaces() {
    let (temp_dir, _store, engine) = setup(AdapterRegistry::new());
    let root = temp_dir.path().join("workspaces");
    std::fs::create_dir_all(root.join("crashed-job/src")).unwrap();

    let removed = engine.workspaces().sweep_orphans().await.unwrap();
    assert_eq!(removed, vec!["crashed-job"]);
    assert!(!root.join("crashed-job").exists());
}

#[test]
fn test_error_body_for_callers() {
    let err = ScanError::UnsupportedTool { tool: "trivy".into(), supported: vec!["wiz".into(), "nexus".into()] };
    let body = serde_json::to_value(err.to_body()).unwrap();
    assert_eq!(body["kind"], "UnsupportedTool");
    assert_eq!(body["detail"], "Tool not supported: trivy. Supported tools: wiz, nexus");
}
