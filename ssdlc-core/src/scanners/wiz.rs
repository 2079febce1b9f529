//! Wiz CLI scanners: Dockerfile and IaC scans, plus image archive scans.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{execution_error, extract_report_url, resolve_scan_path, CommandRunner, CommandSpec, ScannerAdapter};
use crate::config::Secret;
use crate::error::{Result, ScanError};
use crate::types::{ScanKind, ScanOutcome, ScanRequest};
use crate::workspace::Workspace;

const SCANNER: &str = "wizcli";

/// Report link printed by wizcli at the end of a scan.
static REPORT_URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(https://\S*wiz\.io/\S+)").expect("Invalid Wiz report URL regex"));

/// Wrapper around the `wizcli` binary.
pub struct WizCli {
    binary: PathBuf,
    client_id: Option<String>,
    secret: Option<Secret>,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl WizCli {
    pub fn new(binary: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { binary: binary.into(), client_id: None, secret: None, runner, timeout }
    }

    /// Service account used to authenticate before each scan.
    pub fn with_credentials(mut self, client_id: Option<String>, secret: Option<Secret>) -> Self {
        self.client_id = client_id;
        self.secret = secret;
        self
    }

    async fn authenticate(&self) -> Result<()> {
        let (Some(id), Some(secret)) = (&self.client_id, &self.secret) else {
            return Ok(());
        };
        let spec = CommandSpec::new(&self.binary)
            .args(["auth", "--id", id.as_str(), "--secret"])
            .secret_arg(secret.expose(), secret.expose());
        let output = self.runner.run(&spec, self.timeout).await.map_err(|e| execution_error(SCANNER, e))?;
        if !output.success() {
            return Err(ScanError::ScanExecutionFailed {
                scanner: SCANNER.to_string(),
                exit_code: output.exit_code,
                stdout: spec.redacted(&output.stdout),
                stderr: spec.redacted(&output.stderr),
            });
        }
        Ok(())
    }

    /// Run a scan command and pull the report URL from its output.
    ///
    /// A non-zero exit that still printed a report URL is a completed scan
    /// with policy findings; without a URL it is an execution failure.
    #[instrument(skip(self, args), fields(cwd = %cwd.display()))]
    pub async fn scan(&self, args: Vec<String>, cwd: &Path) -> Result<Option<String>> {
        self.authenticate().await?;

        let spec = CommandSpec::new(&self.binary).args(args).current_dir(cwd);
        let output = self.runner.run(&spec, self.timeout).await.map_err(|e| execution_error(SCANNER, e))?;

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        match (extract_report_url(&combined, &REPORT_URL_REGEX), output.success()) {
            (Some(url), success) => {
                if !success {
                    warn!(exit_code = ?output.exit_code, "wizcli reported policy failures");
                }
                info!(report_url = %url, "Wiz scan finished");
                Ok(Some(url))
            }
            (None, true) => {
                warn!("wizcli finished without printing a report URL");
                Ok(None)
            }
            (None, false) => Err(ScanError::ScanExecutionFailed {
                scanner: SCANNER.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
        }
    }

    /// Scan a container image archive.
    pub async fn scan_image(&self, archive: &Path, cwd: &Path) -> Result<Option<String>> {
        let args = vec!["docker".into(), "scan".into(), "--image".into(), archive.to_string_lossy().into_owned()];
        self.scan(args, cwd).await
    }
}

fn iac_args(path: &Path, types: Option<&str>) -> Vec<String> {
    let mut args = vec!["iac".to_string(), "scan".to_string(), "--path".to_string(), path.to_string_lossy().into_owned()];
    if let Some(types) = types {
        args.push("--types".to_string());
        args.push(types.to_string());
    }
    args
}

/// Dockerfile misconfiguration scan.
pub struct WizDockerfileAdapter {
    wiz: Arc<WizCli>,
}

impl WizDockerfileAdapter {
    pub fn new(wiz: Arc<WizCli>) -> Self {
        Self { wiz }
    }
}

#[async_trait]
impl ScannerAdapter for WizDockerfileAdapter {
    fn kind(&self) -> ScanKind {
        ScanKind::DockerFileScan
    }

    fn name(&self) -> &str {
        "wiz-dockerfile"
    }

    async fn run(&self, workspace: &Workspace, request: &ScanRequest) -> Result<ScanOutcome> {
        let path = resolve_scan_path(workspace, request).await?;
        let url = self.wiz.scan(iac_args(&path, Some("Dockerfile")), workspace.path()).await?;
        Ok(ScanOutcome::Completed(url))
    }
}

/// Infrastructure-as-code scan.
pub struct WizIacAdapter {
    wiz: Arc<WizCli>,
}

impl WizIacAdapter {
    pub fn new(wiz: Arc<WizCli>) -> Self {
        Self { wiz }
    }
}

#[async_trait]
impl ScannerAdapter for WizIacAdapter {
    fn kind(&self) -> ScanKind {
        ScanKind::IacScan
    }

    fn name(&self) -> &str {
        "wiz-iac"
    }

    async fn run(&self, workspace: &Workspace, request: &ScanRequest) -> Result<ScanOutcome> {
        let path = resolve_scan_path(workspace, request).await?;
        let url = self.wiz.scan(iac_args(&path, None), workspace.path()).await?;
        Ok(ScanOutcome::Completed(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{output, ScriptedRunner};
    use crate::types::RawScanRequest;

    fn request(kind: ScanKind, path: &str) -> ScanRequest {
        ScanRequest::from_raw(RawScanRequest {
            kind: Some(kind),
            url: Some("https://host/org/service.git".into()),
            path: Some(path.into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:3.20\n").unwrap();
        let ws = Workspace::new("service", dir.path());
        (dir, ws)
    }

    #[tokio::test]
    async fn test_dockerfile_scan_reports_url() {
        let runner = ScriptedRunner::new(vec![output(
            0,
            "Scan results: https://app.wiz.io/findings/cicd-scans?scan=abc123\n",
            "",
        )]);
        let adapter = WizDockerfileAdapter::new(Arc::new(WizCli::new("wizcli", runner.clone(), Duration::from_secs(60))));
        let (_dir, ws) = workspace();

        let outcome = adapter.run(&ws, &request(ScanKind::DockerFileScan, "Dockerfile")).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::Completed(Some("https://app.wiz.io/findings/cicd-scans?scan=abc123".into()))
        );

        let seen = runner.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0].args[..2], ["iac", "scan"]);
        assert_eq!(&seen[0].args[4..], ["--types", "Dockerfile"]);
    }

    #[tokio::test]
    async fn test_authenticates_before_scan() {
        let runner = ScriptedRunner::new(vec![
            output(0, "Authenticated successfully", ""),
            output(0, "https://app.wiz.io/scan/1", ""),
        ]);
        let wiz = WizCli::new("wizcli", runner.clone(), Duration::from_secs(60))
            .with_credentials(Some("client-1".into()), Some(Secret::new("s3cret")));
        let adapter = WizIacAdapter::new(Arc::new(wiz));
        let (_dir, ws) = workspace();

        adapter.run(&ws, &request(ScanKind::IacScan, ".")).await.unwrap();

        let seen = runner.seen();
        assert_eq!(seen[0].args[0], "auth");
        assert!(!seen[0].to_string().contains("s3cret"));
        assert_eq!(seen[1].args[0], "iac");
    }

    #[tokio::test]
    async fn test_policy_failure_with_url_completes() {
        let runner = ScriptedRunner::new(vec![output(4, "Policy failed\nhttps://app.wiz.io/scan/2", "")]);
        let adapter = WizIacAdapter::new(Arc::new(WizCli::new("wizcli", runner, Duration::from_secs(60))));
        let (_dir, ws) = workspace();

        let outcome = adapter.run(&ws, &request(ScanKind::IacScan, ".")).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Completed(Some("https://app.wiz.io/scan/2".into())));
    }

    #[tokio::test]
    async fn test_failure_without_url_is_execution_error() {
        let runner = ScriptedRunner::new(vec![output(1, "", "error: not authenticated")]);
        let adapter = WizIacAdapter::new(Arc::new(WizCli::new("wizcli", runner, Duration::from_secs(60))));
        let (_dir, ws) = workspace();

        let err = adapter.run(&ws, &request(ScanKind::IacScan, ".")).await.unwrap_err();
        match err {
            ScanError::ScanExecutionFailed { scanner, exit_code, stderr, .. } => {
                assert_eq!(scanner, "wizcli");
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("not authenticated"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_path_never_runs_scanner() {
        let runner = ScriptedRunner::new(vec![]);
        let adapter = WizDockerfileAdapter::new(Arc::new(WizCli::new("wizcli", runner.clone(), Duration::from_secs(60))));
        let (_dir, ws) = workspace();

        let err = adapter.run(&ws, &request(ScanKind::DockerFileScan, "docker/Dockerfile")).await.unwrap_err();
        assert!(matches!(err, ScanError::ScanPathNotFound { .. }));
        assert!(runner.seen().is_empty());
    }
}
