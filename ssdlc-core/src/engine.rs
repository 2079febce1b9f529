//! Scan job orchestration.
//!
//! A job moves through validation, workspace acquisition, the scanner run,
//! optional completion polling and publishing. Whatever happens after the
//! workspace is acquired, it is released before the job returns.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::error::{Result, ScanError};
use crate::observability::metrics;
use crate::poller::{CompletionPoller, PollConfig};
use crate::publisher::{HttpSignatureStore, SignatureStore};
use crate::scanners::{
    AdapterRegistry, CommandRunner, CranePuller, ScannerAdapter, SonarClient, TokioCommandRunner,
};
use crate::types::{
    JobState, RawScanRequest, ScanJob, ScanOutcome, ScanRequest, ScanResponse, SignatureRecord,
};
use crate::workspace::{GitCli, WorkspaceLease, WorkspaceManager};

/// Timeout for SonarQube web API calls.
const BACKEND_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs scan jobs end to end.
pub struct ScanEngine {
    workspaces: Arc<WorkspaceManager>,
    adapters: AdapterRegistry,
    poller: Option<CompletionPoller>,
    store: Arc<dyn SignatureStore>,
    publish_on_poll_timeout: bool,
}

impl ScanEngine {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        adapters: AdapterRegistry,
        store: Arc<dyn SignatureStore>,
    ) -> Self {
        Self { workspaces, adapters, poller: None, store, publish_on_poll_timeout: true }
    }

    /// Poller for adapters that finish asynchronously.
    pub fn with_poller(mut self, poller: CompletionPoller) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Whether a timed-out poll still publishes its best-effort report URL.
    pub fn publish_on_poll_timeout(mut self, enabled: bool) -> Self {
        self.publish_on_poll_timeout = enabled;
        self
    }

    /// Build the production stack: git, crane, the scanner CLIs, SonarQube
    /// and the HTTP signature store.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let creds = &config.credentials;
        let scanners = &config.scanners;
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);

        let git = GitCli::new(&scanners.git_path, runner.clone(), scanners.timeout())
            .with_credentials(creds.bitbucket_user.clone(), creds.bitbucket_token.clone());
        let workspaces = Arc::new(WorkspaceManager::new(&config.workspace.root, Arc::new(git)));

        let puller = Arc::new(CranePuller::new(&scanners.crane_path, runner.clone(), scanners.timeout()));

        let sonar = match (&creds.sonar_host_url, &creds.sonar_token) {
            (Some(host), Some(token)) => {
                Some(Arc::new(SonarClient::new(host.clone(), token.clone(), BACKEND_HTTP_TIMEOUT)?))
            }
            _ => None,
        };

        let adapters = AdapterRegistry::from_config(config, runner, puller, sonar.clone());

        let endpoint = config.publish.endpoint.clone().unwrap_or_default();
        let store = Arc::new(HttpSignatureStore::new(endpoint, Duration::from_secs(config.publish.timeout_secs))?);

        let mut engine = Self::new(workspaces, adapters, store)
            .publish_on_poll_timeout(config.publish.publish_on_poll_timeout);
        if let Some(sonar) = sonar {
            engine = engine.with_poller(CompletionPoller::new(sonar, PollConfig::from(&config.poll)));
        }
        Ok(engine)
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Validate and run a raw request.
    pub async fn run(&self, raw: RawScanRequest, cancel: &CancelSignal) -> Result<ScanResponse> {
        let kind = raw.kind;
        let request = ScanRequest::from_raw(raw).map_err(|e| {
            let label = kind.map(|k| k.scan_type()).unwrap_or("unknown");
            warn!(scan_kind = label, error = %e, "Rejected scan request");
            metrics::record_scan(label, "rejected", 0.0);
            e
        })?;
        self.run_request(request, cancel).await
    }

    /// Run an already validated request.
    pub async fn run_request(&self, request: ScanRequest, cancel: &CancelSignal) -> Result<ScanResponse> {
        let mut job = ScanJob::new(request);
        let span = info_span!(
            "scan_job",
            job_id = %job.id,
            target = %job.request.target(),
            scan_kind = %job.request.kind(),
            workspace = %job.workspace,
        );

        async move {
            info!("Scan job started");
            let result = self.execute(&mut job, cancel).await;

            job.transition(match &result {
                Ok(_) => JobState::Succeeded,
                Err(ScanError::Cancelled { .. }) => JobState::Cancelled,
                Err(_) => JobState::Failed,
            });
            metrics::record_scan(job.request.kind().scan_type(), job.state.as_str(), job.elapsed_secs());

            match &result {
                Ok(url) => info!(report_url = ?url, elapsed_secs = job.elapsed_secs(), "Scan job succeeded"),
                Err(e) if e.is_input_error() => warn!(error = %e, "Scan job rejected"),
                Err(e) => error!(error = %e, kind = %e.kind(), state = %job.state, "Scan job failed"),
            }

            result.map(|report_url| ScanResponse { report_url })
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &mut ScanJob, cancel: &CancelSignal) -> Result<Option<String>> {
        let adapter = self.adapters.get(job.request.kind())?;
        adapter.validate(&job.request)?;
        self.check_cancelled(job, cancel)?;

        job.transition(JobState::AcquiringWorkspace);
        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled(job)),
            lease = self.workspaces.acquire(job.request.target()) => lease?,
        };

        let result = self.scan_and_publish(job, adapter.as_ref(), &lease, cancel).await;

        if let Err(e) = lease.release().await {
            warn!(error = %e, "Failed to clean up workspace");
        }
        result
    }

    async fn scan_and_publish(
        &self,
        job: &mut ScanJob,
        adapter: &dyn ScannerAdapter,
        lease: &WorkspaceLease,
        cancel: &CancelSignal,
    ) -> Result<Option<String>> {
        job.transition(JobState::Scanning);
        info!(adapter = adapter.name(), "Running scanner");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled(job)),
            outcome = adapter.run(lease, &job.request) => outcome?,
        };

        let report_url = match outcome {
            ScanOutcome::Completed(url) => url,
            ScanOutcome::Pending(handle) => {
                job.task = Some(handle.clone());
                job.transition(JobState::Polling);
                let poller = self.poller.as_ref().ok_or_else(|| {
                    ScanError::Internal(format!("{} returned a pending task but no poller is configured", adapter.name()))
                })?;

                let polled = poller.poll(&handle, cancel).await;
                match polled.into_result(&handle.task_id, &job.id.to_string()) {
                    Ok(url) => url,
                    Err(ScanError::PollTimedOut { task_id, attempts, report_url }) => {
                        if self.publish_on_poll_timeout && !cancel.is_cancelled() {
                            warn!(%task_id, attempts, "Publishing best-effort result for timed-out analysis");
                            job.transition(JobState::Publishing);
                            self.publish(job, report_url.clone()).await?;
                        }
                        return Err(ScanError::PollTimedOut { task_id, attempts, report_url });
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.check_cancelled(job, cancel)?;
        job.transition(JobState::Publishing);
        self.publish(job, report_url.clone()).await?;
        Ok(report_url)
    }

    async fn publish(&self, job: &ScanJob, report_url: Option<String>) -> Result<()> {
        let record = SignatureRecord::build(&job.request, report_url);
        self.store.publish(&record).await?;
        info!("Signature published");
        Ok(())
    }

    fn check_cancelled(&self, job: &ScanJob, cancel: &CancelSignal) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(self.cancelled(job));
        }
        Ok(())
    }

    fn cancelled(&self, job: &ScanJob) -> ScanError {
        info!(state = %job.state, "Scan job cancelled");
        ScanError::Cancelled { job_id: job.id.to_string() }
    }
}
