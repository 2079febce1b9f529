//! SonarQube static code analysis.
//!
//! The scanner CLI uploads the analysis; the server then processes it as a
//! compute-engine task. Depending on configuration the adapter either trusts
//! the scanner's own success line or hands the task back for polling.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{execution_error, extract_report_url, resolve_scan_path, CommandRunner, CommandSpec, ScannerAdapter};
use crate::config::{Secret, SonarCompletion};
use crate::error::{Result, ScanError};
use crate::poller::{RemoteTaskStatus, TaskStatusSource};
use crate::types::{ScanKind, ScanOutcome, ScanRequest, TaskHandle, Target};
use crate::workspace::Workspace;

const BACKEND: &str = "sonarqube";
const SCANNER: &str = "sonar-scanner";

static ANALYSIS_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ANALYSIS SUCCESSFUL, you can find the results at: (https?://\S+)")
        .expect("Invalid Sonar analysis URL regex")
});

static CE_TASK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"api/ce/task\?id=([\w-]+)").expect("Invalid Sonar task regex"));

/// Result of registering a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectRegistration {
    Created,
    AlreadyExists,
}

#[derive(Deserialize)]
struct TaskEnvelope {
    task: TaskBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskBody {
    status: String,
    error_message: Option<String>,
}

/// SonarQube web API client authenticated with a user token.
pub struct SonarClient {
    http: reqwest::Client,
    host: String,
    token: Secret,
}

impl SonarClient {
    pub fn new(host: impl Into<String>, token: Secret, timeout: Duration) -> Result<Self> {
        let host = host.into().trim_end_matches('/').to_string();
        url::Url::parse(&host).map_err(|e| ScanError::InvalidConfig {
            reason: format!("invalid SonarQube host URL '{}': {}", host, e),
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::InvalidConfig { reason: format!("failed to build HTTP client: {}", e) })?;
        Ok(Self { http, host, token })
    }

    /// Dashboard for a project.
    pub fn dashboard_url(&self, project_key: &str) -> String {
        format!("{}/dashboard?id={}", self.host, project_key)
    }

    fn request_failed(status: Option<u16>, detail: impl Into<String>) -> ScanError {
        ScanError::BackendRequestFailed { backend: BACKEND.to_string(), status, detail: detail.into() }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(reqwest::StatusCode, String)> {
        let response = request
            .basic_auth(self.token.expose(), Some(""))
            .send()
            .await
            .map_err(|e| Self::request_failed(None, e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| Self::request_failed(Some(status.as_u16()), e.to_string()))?;
        Ok((status, body))
    }

    /// Create the project, treating an existing one as success.
    #[instrument(skip(self))]
    pub async fn ensure_project(&self, key: &str, name: &str) -> Result<ProjectRegistration> {
        let url = format!("{}/api/projects/create", self.host);
        let (status, body) = self.send(self.http.post(url).query(&[("name", name), ("project", key)])).await?;

        if status.is_success() {
            info!("Created SonarQube project");
            return Ok(ProjectRegistration::Created);
        }
        if status == reqwest::StatusCode::BAD_REQUEST && body.contains("already exists") {
            debug!("SonarQube project already exists");
            return Ok(ProjectRegistration::AlreadyExists);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Self::request_failed(Some(401), "unauthorized, check the SonarQube token"));
        }
        Err(Self::request_failed(Some(status.as_u16()), format!("project creation failed: {}", body.trim())))
    }
}

#[async_trait]
impl TaskStatusSource for SonarClient {
    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus> {
        let url = format!("{}/api/ce/task", self.host);
        let (status, body) = self.send(self.http.get(url).query(&[("id", task_id)])).await?;
        if !status.is_success() {
            return Err(Self::request_failed(Some(status.as_u16()), body.trim().to_string()));
        }
        let envelope: TaskEnvelope = serde_json::from_str(&body)
            .map_err(|e| Self::request_failed(Some(status.as_u16()), format!("unexpected task response: {}", e)))?;
        Ok(RemoteTaskStatus::parse(&envelope.task.status, envelope.task.error_message.as_deref()))
    }

    fn report_url(&self, handle: &TaskHandle) -> String {
        self.dashboard_url(&handle.project_key)
    }
}

/// Compute-engine task id from `report-task.txt` written by the scanner.
async fn read_report_task(workspace: &Path) -> Option<String> {
    let path = workspace.join(".scannerwork").join("report-task.txt");
    let contents = tokio::fs::read_to_string(&path).await.ok()?;
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "ceTaskId")
        .map(|(_, value)| value.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Static analysis of a repository directory.
pub struct SonarStaticAdapter {
    client: Arc<SonarClient>,
    runner: Arc<dyn CommandRunner>,
    scanner: PathBuf,
    completion: SonarCompletion,
    timeout: Duration,
}

impl SonarStaticAdapter {
    pub fn new(
        client: Arc<SonarClient>,
        runner: Arc<dyn CommandRunner>,
        scanner: impl Into<PathBuf>,
        completion: SonarCompletion,
        timeout: Duration,
    ) -> Self {
        Self { client, runner, scanner: scanner.into(), completion, timeout }
    }

    fn command(&self, workspace: &Workspace, request: &ScanRequest) -> CommandSpec {
        let key = workspace.name();
        let token = self.client.token.expose();
        let mut spec = CommandSpec::new(&self.scanner)
            .arg(format!("-Dsonar.projectKey={}", key))
            .arg(format!("-Dsonar.projectName={}", key))
            .arg(format!("-Dsonar.sources={}", request.params().path))
            .arg(format!("-Dsonar.host.url={}", self.client.host))
            .secret_arg(format!("-Dsonar.token={}", token), token)
            .args(["-Dsonar.scm.provider=git", "-Dsonar.scm.forceReloadAll=true"])
            .current_dir(workspace.path());
        if let Target::Repository { branch, .. } = request.target() {
            spec = spec.arg(format!("-Dsonar.branch.name={}", branch));
        }
        if let Some(commit) = &request.params().commit_id {
            spec = spec.arg(format!("-Dsonar.scm.revision={}", commit));
        }
        spec
    }
}

#[async_trait]
impl ScannerAdapter for SonarStaticAdapter {
    fn kind(&self) -> ScanKind {
        ScanKind::StaticCodeScan
    }

    fn name(&self) -> &str {
        "sonarqube"
    }

    #[instrument(skip_all, fields(project = %workspace.name()))]
    async fn run(&self, workspace: &Workspace, request: &ScanRequest) -> Result<ScanOutcome> {
        let source_dir = resolve_scan_path(workspace, request).await?;
        if !source_dir.is_dir() {
            return Err(ScanError::ScanPathNotFound { path: source_dir });
        }

        let key = workspace.name();
        self.client.ensure_project(key, key).await?;

        let spec = self.command(workspace, request);
        let output = self.runner.run(&spec, self.timeout).await.map_err(|e| execution_error(SCANNER, e))?;
        if !output.success() {
            return Err(ScanError::ScanExecutionFailed {
                scanner: SCANNER.to_string(),
                exit_code: output.exit_code,
                stdout: spec.redacted(&output.stdout),
                stderr: spec.redacted(&output.stderr),
            });
        }

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        let printed_url = || {
            let url = extract_report_url(&combined, &ANALYSIS_URL_REGEX);
            if url.is_none() {
                warn!("Scanner did not print an analysis URL");
            }
            url
        };

        match self.completion {
            SonarCompletion::ScannerOutput => Ok(ScanOutcome::Completed(printed_url())),
            SonarCompletion::ServerTask => {
                let task_id = match read_report_task(workspace.path()).await {
                    Some(id) => Some(id),
                    None => CE_TASK_REGEX.captures(&combined).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()),
                };
                match task_id {
                    Some(task_id) => {
                        info!(%task_id, "Analysis submitted, awaiting compute-engine task");
                        Ok(ScanOutcome::Pending(TaskHandle { task_id, project_key: key.to_string() }))
                    }
                    None => {
                        warn!("No compute-engine task reported, falling back to scanner output");
                        Ok(ScanOutcome::Completed(printed_url()))
                    }
                }
            }
        }
    }
}
