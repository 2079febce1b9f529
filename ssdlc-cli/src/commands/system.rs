//! `ssdlc sweep` for workspace maintenance.

use anyhow::Result;
use ssdlc_core::scanners::TokioCommandRunner;
use ssdlc_core::workspace::{GitCli, WorkspaceManager};
use ssdlc_core::Config;
use std::sync::Arc;

/// Remove workspace directories no running job holds.
///
/// Only safe when no other process shares the workspace root.
pub async fn sweep(config: &Config) -> Result<()> {
    let git = GitCli::new(&config.scanners.git_path, Arc::new(TokioCommandRunner), config.scanners.timeout());
    let manager = WorkspaceManager::new(&config.workspace.root, Arc::new(git));

    let removed = manager.sweep_orphans().await?;
    println!("{}", serde_json::json!({ "removed": removed }));
    Ok(())
}
