//! Container image scans.
//!
//! The image is pulled into the workspace as an archive, then handed to the
//! tool the caller selected.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use super::{CommandRunner, CommandSpec, NexusIqCli, ScannerAdapter, WizCli};
use crate::error::{Result, ScanError};
use crate::types::{ScanKind, ScanOutcome, ScanRequest, Target};
use crate::workspace::Workspace;

/// File name of the pulled image inside the workspace.
pub const IMAGE_ARCHIVE: &str = "image.tar";

/// Tools able to scan an image archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTool {
    Wiz,
    Nexus,
}

impl ImageTool {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wiz" => Some(ImageTool::Wiz),
            "nexus" => Some(ImageTool::Nexus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageTool::Wiz => "wiz",
            ImageTool::Nexus => "nexus",
        }
    }
}

impl fmt::Display for ImageTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fetches an image into a local archive.
#[async_trait]
pub trait ImagePuller: Send + Sync {
    /// Pull `reference` into `dest`, returning the archive path.
    async fn pull(&self, reference: &str, dest: &Path) -> Result<PathBuf>;
}

/// Pulls images with `crane`, which needs no container daemon.
pub struct CranePuller {
    crane: PathBuf,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl CranePuller {
    pub fn new(crane: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { crane: crane.into(), runner, timeout }
    }
}

#[async_trait]
impl ImagePuller for CranePuller {
    #[instrument(skip(self, dest))]
    async fn pull(&self, reference: &str, dest: &Path) -> Result<PathBuf> {
        let archive = dest.join(IMAGE_ARCHIVE);
        let spec = CommandSpec::new(&self.crane).args(["pull", reference]).arg(archive.to_string_lossy());

        let pull_failed = |reason: String| ScanError::ImagePullFailed { image: reference.to_string(), reason };
        let output = self.runner.run(&spec, self.timeout).await.map_err(|e| pull_failed(e.to_string()))?;
        if !output.success() {
            let reason = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("crane exited with {:?}", output.exit_code));
            return Err(pull_failed(reason));
        }

        info!(archive = %archive.display(), "Image pulled");
        Ok(archive)
    }
}

/// Image scan dispatching to the selected tool.
pub struct ContainerImageAdapter {
    puller: Arc<dyn ImagePuller>,
    wiz: Option<Arc<WizCli>>,
    nexus: Option<Arc<NexusIqCli>>,
    supported: Vec<String>,
}

impl ContainerImageAdapter {
    pub fn new(
        puller: Arc<dyn ImagePuller>,
        wiz: Option<Arc<WizCli>>,
        nexus: Option<Arc<NexusIqCli>>,
        supported: Vec<String>,
    ) -> Self {
        let supported = supported.into_iter().map(|t| t.to_lowercase()).collect();
        Self { puller, wiz, nexus, supported }
    }

    fn select_tool(&self, request: &ScanRequest) -> Result<ImageTool> {
        let tool = request.params().tool.as_deref().ok_or_else(|| ScanError::InvalidRequest {
            reason: format!("{} requires a tool ({})", ScanKind::ContainerImageScan, self.supported.join(", ")),
        })?;

        let unsupported =
            || ScanError::UnsupportedTool { tool: tool.to_string(), supported: self.supported.clone() };
        if !self.supported.iter().any(|t| t == tool) {
            return Err(unsupported());
        }
        let selected = ImageTool::parse(tool).ok_or_else(unsupported)?;

        let configured = match selected {
            ImageTool::Wiz => self.wiz.is_some(),
            ImageTool::Nexus => self.nexus.is_some(),
        };
        if !configured {
            return Err(ScanError::InvalidConfig {
                reason: format!("image tool '{}' is enabled but its scanner is not configured", selected),
            });
        }
        Ok(selected)
    }
}

#[async_trait]
impl ScannerAdapter for ContainerImageAdapter {
    fn kind(&self) -> ScanKind {
        ScanKind::ContainerImageScan
    }

    fn name(&self) -> &str {
        "container-image"
    }

    fn validate(&self, request: &ScanRequest) -> Result<()> {
        self.select_tool(request).map(|_| ())
    }

    #[instrument(skip_all, fields(workspace = %workspace.name()))]
    async fn run(&self, workspace: &Workspace, request: &ScanRequest) -> Result<ScanOutcome> {
        let tool = self.select_tool(request)?;
        let Target::Image { reference } = request.target() else {
            return Err(ScanError::InvalidRequest {
                reason: format!("{} requires a container image reference", self.kind()),
            });
        };

        let archive = self.puller.pull(reference, workspace.path()).await?;

        let url = match (tool, &self.wiz, &self.nexus) {
            (ImageTool::Wiz, Some(wiz), _) => wiz.scan_image(&archive, workspace.path()).await?,
            (ImageTool::Nexus, _, Some(nexus)) => nexus.scan(workspace.name(), &archive).await?,
            _ => return Err(ScanError::Internal(format!("image tool '{}' lost its scanner", tool))),
        };
        Ok(ScanOutcome::Completed(url))
    }
}
