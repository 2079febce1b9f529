//! `ssdlc <kind>-scan` commands.

use anyhow::Result;
use ssdlc_core::types::RawScanRequest;
use ssdlc_core::{CancelSignal, Config, ScanEngine};
use tracing::{info, warn};

/// Run one scan job and print `{"Reporturl": ...}` on success.
///
/// Ctrl-C cancels the job; its workspace is still cleaned up.
pub async fn scan(config: &Config, request: RawScanRequest) -> Result<()> {
    let engine = ScanEngine::from_config(config)?;

    if config.workspace.sweep_on_start {
        match engine.workspaces().sweep_orphans().await {
            Ok(removed) if !removed.is_empty() => info!(count = removed.len(), "Swept orphaned workspaces"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to sweep orphaned workspaces"),
        }
    }

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling scan");
            on_interrupt.cancel();
        }
    });

    let response = engine.run(request, &cancel).await?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
