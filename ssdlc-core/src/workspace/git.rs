//! Repository checkout via the git CLI.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::Secret;
use crate::error::{Result, ScanError};
use crate::scanners::{CommandRunner, CommandSpec};

/// Materializes a repository branch into a directory.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Clone `url` at `branch` into `dest`, which does not exist yet.
    async fn clone_or_checkout(&self, url: &str, branch: &str, dest: &Path) -> Result<()>;
}

/// Clones with `git`, injecting optional basic credentials into the URL.
pub struct GitCli {
    git: PathBuf,
    user: Option<String>,
    token: Option<Secret>,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl GitCli {
    pub fn new(git: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { git: git.into(), user: None, token: None, runner, timeout }
    }

    /// Authenticate clones as `user` with `token`.
    pub fn with_credentials(mut self, user: Option<String>, token: Option<Secret>) -> Self {
        self.user = user;
        self.token = token;
        self
    }

    fn authenticated_url(&self, url: &str) -> Result<String> {
        let (Some(user), Some(token)) = (&self.user, &self.token) else {
            return Ok(url.to_string());
        };
        let mut parsed = url::Url::parse(url).map_err(|e| ScanError::InvalidRequest {
            reason: format!("invalid repository URL '{}': {}", url, e),
        })?;
        parsed
            .set_username(user)
            .and_then(|_| parsed.set_password(Some(token.expose())))
            .map_err(|_| ScanError::InvalidRequest {
                reason: format!("cannot attach credentials to '{}'", url),
            })?;
        Ok(parsed.to_string())
    }

    fn clone_spec(&self, url: &str, branch: &str, dest: &Path) -> Result<CommandSpec> {
        let remote = self.authenticated_url(url)?;
        let mut spec = CommandSpec::new(&self.git)
            .args(["clone", "--branch", branch, "--single-branch", "--"])
            .arg(remote.clone())
            .arg(dest.to_string_lossy())
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(token) = &self.token {
            spec = spec.redact(token.expose());
            // git echoes the URL percent-encoded in some errors
            if let Some(encoded) = url::Url::parse(&remote).ok().and_then(|u| u.password().map(str::to_string)) {
                spec = spec.redact(&encoded);
            }
        }
        Ok(spec)
    }
}

#[async_trait]
impl RepoFetcher for GitCli {
    #[instrument(skip(self, dest), fields(url = %url, branch = %branch))]
    async fn clone_or_checkout(&self, url: &str, branch: &str, dest: &Path) -> Result<()> {
        let spec = self.clone_spec(url, branch, dest)?;
        let clone_failed = |reason: String| ScanError::CloneFailed {
            url: url.to_string(),
            branch: branch.to_string(),
            reason,
        };

        let output =
            self.runner.run(&spec, self.timeout).await.map_err(|e| clone_failed(e.to_string()))?;

        if !output.success() {
            let reason = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| spec.redacted(l.trim()))
                .unwrap_or_else(|| format!("git exited with {:?}", output.exit_code));
            return Err(clone_failed(reason));
        }

        debug!(dest = %dest.display(), "Repository cloned");
        Ok(())
    }
}
