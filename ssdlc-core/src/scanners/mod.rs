//! Scanner adapters.
//!
//! One adapter exists per [`ScanKind`]. An adapter receives a prepared
//! workspace and a validated request, drives its backend CLI or API, and
//! reports either a terminal report URL or a handle to poll.

mod command;
pub mod container;
pub mod nexus;
pub mod sonar;
pub mod wiz;

pub use command::{
    extract_report_url, CommandError, CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner,
};
pub use container::{ContainerImageAdapter, CranePuller, ImagePuller, ImageTool};
pub use nexus::{NexusIqCli, NexusScaAdapter};
pub use sonar::{SonarClient, SonarStaticAdapter};
pub use wiz::{WizCli, WizDockerfileAdapter, WizIacAdapter};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, ScanError};
use crate::types::{ScanKind, ScanOutcome, ScanRequest};
use crate::workspace::Workspace;

/// Scanner adapter contract.
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    /// Scan kind this adapter serves.
    fn kind(&self) -> ScanKind;

    /// Backend name, used in logs and errors.
    fn name(&self) -> &str;

    /// Adapter-specific request checks. Runs before any side effect.
    fn validate(&self, _request: &ScanRequest) -> Result<()> {
        Ok(())
    }

    /// Run the scan inside `workspace`.
    async fn run(&self, workspace: &Workspace, request: &ScanRequest) -> Result<ScanOutcome>;
}

/// Resolve the request's scan path inside the workspace and check it exists.
pub(crate) async fn resolve_scan_path(workspace: &Workspace, request: &ScanRequest) -> Result<PathBuf> {
    let path = workspace.path().join(&request.params().path);
    match tokio::fs::try_exists(&path).await {
        Ok(true) => Ok(path),
        Ok(false) => Err(ScanError::ScanPathNotFound { path }),
        Err(e) => Err(ScanError::io(path, e)),
    }
}

/// Map a runner failure onto the scanner's error.
pub(crate) fn execution_error(scanner: &str, err: CommandError) -> ScanError {
    ScanError::ScanExecutionFailed {
        scanner: scanner.to_string(),
        exit_code: None,
        stdout: String::new(),
        stderr: err.to_string(),
    }
}

/// Adapters by scan kind.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ScanKind, Arc<dyn ScannerAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for its kind.
    pub fn register(&mut self, adapter: Arc<dyn ScannerAdapter>) {
        debug!(kind = %adapter.kind(), adapter = adapter.name(), "Registering scanner adapter");
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Adapter for `kind`; `InvalidConfig` when its backend is not configured.
    pub fn get(&self, kind: ScanKind) -> Result<Arc<dyn ScannerAdapter>> {
        self.adapters.get(&kind).cloned().ok_or_else(|| ScanError::InvalidConfig {
            reason: format!("no scanner configured for {}", kind),
        })
    }

    pub fn kinds(&self) -> Vec<ScanKind> {
        ScanKind::ALL.into_iter().filter(|k| self.adapters.contains_key(k)).collect()
    }

    /// Build the standard adapter set from configuration.
    ///
    /// Wiz-backed kinds are always registered; the CLI may already be
    /// authenticated on the host. SCA and static analysis need their server
    /// URLs and secrets and are skipped without them.
    pub fn from_config(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        puller: Arc<dyn ImagePuller>,
        sonar: Option<Arc<SonarClient>>,
    ) -> Self {
        let scanners = &config.scanners;
        let creds = &config.credentials;
        let timeout = scanners.timeout();

        let wiz = Arc::new(
            WizCli::new(&scanners.wizcli_path, runner.clone(), timeout)
                .with_credentials(creds.wiz_client_id.clone(), creds.wiz_secret.clone()),
        );

        let nexus = match (&creds.nexus_iq_url, &creds.nexus_secret) {
            (Some(url), Some(secret)) => Some(Arc::new(NexusIqCli::new(
                &scanners.java_path,
                &scanners.nexus_iq_cli_jar,
                url.clone(),
                secret.clone(),
                runner.clone(),
                timeout,
            ))),
            _ => {
                warn!("NEXUS_IQ_URL or NEXUS_SECRET not set, SCA scans are disabled");
                None
            }
        };

        let mut registry = Self::new();
        registry.register(Arc::new(WizDockerfileAdapter::new(wiz.clone())));
        registry.register(Arc::new(WizIacAdapter::new(wiz.clone())));
        registry.register(Arc::new(ContainerImageAdapter::new(
            puller,
            Some(wiz),
            nexus.clone(),
            scanners.supported_image_tools.clone(),
        )));
        if let Some(nexus) = nexus {
            registry.register(Arc::new(NexusScaAdapter::new(nexus)));
        }
        match sonar {
            Some(client) => registry.register(Arc::new(SonarStaticAdapter::new(
                client,
                runner,
                &scanners.sonar_scanner_path,
                scanners.sonar_completion,
                timeout,
            ))),
            None => warn!("SONAR_HOST_URL or SONAR_TOKEN not set, static code scans are disabled"),
        }

        info!(kinds = ?registry.kinds(), "Scanner adapters ready");
        registry
    }
}
