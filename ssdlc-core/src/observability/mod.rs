//! Observability infrastructure: tracing and metrics.
//!
//! The library only emits events. Installing a subscriber and an exporter is
//! the job of the binary, which calls [`init`] once and keeps the returned
//! guard alive for the life of the process.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilitySettings;
use crate::error::{Result, ScanError};

pub mod metrics;

/// Keeps observability installed. Dropping it logs shutdown.
#[derive(Debug)]
pub struct ObservabilityGuard {
    metrics_port: Option<u16>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        tracing::debug!(metrics_port = ?self.metrics_port, "Observability shut down");
    }
}

/// Install the global subscriber and, if configured, the Prometheus exporter.
///
/// `RUST_LOG` overrides the configured level. Logs go to stderr so stdout
/// stays reserved for command output. Must run inside a tokio runtime when
/// a metrics port is set.
pub fn init(settings: &ObservabilitySettings) -> Result<ObservabilityGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.level()))
        .map_err(|e| ScanError::InvalidConfig { reason: format!("invalid log level: {}", e) })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if settings.json_logs {
        registry
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| ScanError::InvalidConfig {
        reason: format!("failed to install tracing subscriber: {}", e),
    })?;

    if let Some(port) = settings.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .map_err(|e| ScanError::InvalidConfig {
                reason: format!("failed to start metrics exporter on port {}: {}", port, e),
            })?;
    }

    metrics::register_core_metrics();

    tracing::info!(
        level = settings.level(),
        json = settings.json_logs,
        metrics_port = ?settings.metrics_port,
        "Observability initialized"
    );
    Ok(ObservabilityGuard { metrics_port: settings.metrics_port })
}
