//! Nexus IQ software composition analysis.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{execution_error, extract_report_url, CommandRunner, CommandSpec, ScannerAdapter};
use crate::config::Secret;
use crate::error::{Result, ScanError};
use crate::types::{ScanKind, ScanOutcome, ScanRequest};
use crate::workspace::Workspace;

const SCANNER: &str = "nexus-iq-cli";

static REPORT_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)the detailed report can be viewed online at (https?://\S+)")
        .expect("Invalid Nexus IQ report URL regex")
});

/// The Nexus IQ CLI jar, run through a JVM.
pub struct NexusIqCli {
    java: PathBuf,
    jar: PathBuf,
    server_url: String,
    /// `user:password` pair passed to `-a`.
    auth: Secret,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl NexusIqCli {
    pub fn new(
        java: impl Into<PathBuf>,
        jar: impl Into<PathBuf>,
        server_url: String,
        auth: Secret,
        runner: Arc<dyn CommandRunner>,
        timeout: Duration,
    ) -> Self {
        Self { java: java.into(), jar: jar.into(), server_url, auth, runner, timeout }
    }

    fn command(&self, application_id: &str, target: &Path) -> CommandSpec {
        CommandSpec::new(&self.java)
            .args([
                "--add-opens",
                "java.base/java.lang=ALL-UNNAMED",
                "--add-opens",
                "java.base/java.nio=ALL-UNNAMED",
                "-jar",
            ])
            .arg(self.jar.to_string_lossy())
            .arg("-a")
            .secret_arg(self.auth.expose(), self.auth.expose())
            .args(["-i", application_id, "-s", self.server_url.as_str()])
            .arg(target.to_string_lossy())
    }

    /// Evaluate `target` against the policy of `application_id`.
    ///
    /// A missing report link is logged and tolerated.
    #[instrument(skip(self), fields(target = %target.display()))]
    pub async fn scan(&self, application_id: &str, target: &Path) -> Result<Option<String>> {
        let spec = self.command(application_id, target);
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
        match extract_report_url(&combined, &REPORT_URL_REGEX) {
            Some(url) => {
                info!(report_url = %url, "Nexus IQ evaluation finished");
                Ok(Some(url))
            }
            None => {
                warn!("Nexus IQ finished without printing a report URL");
                Ok(None)
            }
        }
    }
}

/// Dependency scan of a repository, registered under the workspace name.
pub struct NexusScaAdapter {
    nexus: Arc<NexusIqCli>,
}

impl NexusScaAdapter {
    pub fn new(nexus: Arc<NexusIqCli>) -> Self {
        Self { nexus }
    }
}

#[async_trait]
impl ScannerAdapter for NexusScaAdapter {
    fn kind(&self) -> ScanKind {
        ScanKind::ScaScan
    }

    fn name(&self) -> &str {
        "nexus-iq"
    }

    async fn run(&self, workspace: &Workspace, _request: &ScanRequest) -> Result<ScanOutcome> {
        let url = self.nexus.scan(workspace.name(), workspace.path()).await?;
        Ok(ScanOutcome::Completed(url))
    }
}
