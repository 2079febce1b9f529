//! Signature store client.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::error::{Result, ScanError};
use crate::observability::metrics;
use crate::types::SignatureRecord;

/// Destination for signature records.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Deliver one record. Any non-success response is an error.
    async fn publish(&self, record: &SignatureRecord) -> Result<()>;
}

/// Posts records as JSON to an HTTP endpoint.
pub struct HttpSignatureStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSignatureStore {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint).map_err(|e| ScanError::InvalidConfig {
            reason: format!("invalid signature store endpoint '{}': {}", endpoint, e),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::InvalidConfig { reason: format!("failed to build HTTP client: {}", e) })?;
        Ok(Self { client, endpoint })
    }

    fn failed(&self, status: Option<u16>, reason: String) -> ScanError {
        metrics::record_publish_failure();
        error!(endpoint = %self.endpoint, ?status, %reason, "Failed to publish signature");
        ScanError::PublishFailed { endpoint: self.endpoint.clone(), status, reason }
    }
}

#[async_trait]
impl SignatureStore for HttpSignatureStore {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, scan_type = %record.scan_type))]
    async fn publish(&self, record: &SignatureRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .map_err(|e| self.failed(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = if body.trim().is_empty() {
                status.to_string()
            } else {
                format!("{}: {}", status, body.trim())
            };
            return Err(self.failed(Some(status.as_u16()), reason));
        }

        debug!(status = status.as_u16(), "Signature published");
        Ok(())
    }
}
