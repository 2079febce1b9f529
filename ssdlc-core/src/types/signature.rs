//! Normalized payload sent to the signature store.

use serde::{Deserialize, Serialize};

use super::request::{Metadata, ScanRequest, Target};

/// Value of `ScanSource` for every record this service publishes.
pub const SCAN_SOURCE: &str = "ssdlc-scan-api";

/// Signature record, serialized with the store's field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignatureRecord {
    pub scan_source: String,
    pub scan_type: String,
    #[serde(rename = "Reporturl")]
    pub report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    pub metadata: Metadata,
}

impl SignatureRecord {
    /// Build the record for a finished job.
    pub fn build(request: &ScanRequest, report_url: Option<String>) -> Self {
        let mut record = Self {
            scan_source: SCAN_SOURCE.to_string(),
            scan_type: request.kind().scan_type().to_string(),
            report_url,
            repo_url: None,
            repo_name: None,
            branch_name: None,
            commit_id: None,
            container_image: None,
            metadata: request.metadata().clone(),
        };

        match request.target() {
            Target::Repository { url, branch } => {
                record.repo_url = Some(url.clone());
                record.repo_name = request.target().repo_name();
                record.branch_name = Some(branch.clone());
                record.commit_id = request.params().commit_id.clone();
            }
            Target::Image { reference } => {
                record.container_image = Some(reference.clone());
            }
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::{RawScanRequest, ScanKind};

    #[test]
    fn test_repository_record_fields() {
        let request = ScanRequest::from_raw(RawScanRequest {
            kind: Some(ScanKind::StaticCodeScan),
            url: Some("https://host/org/repo.git".into()),
            branch: Some("main".into()),
            commit_id: Some("4f2a9c1".into()),
            metadata: Some(r#"{"pipeline": "release", "build": 17}"#.into()),
            ..Default::default()
        })
        .unwrap();

        let record = SignatureRecord::build(&request, Some("https://sonar/dashboard?id=repo".into()));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["ScanSource"], "ssdlc-scan-api");
        assert_eq!(json["ScanType"], "staticCodeScan");
        assert_eq!(json["Reporturl"], "https://sonar/dashboard?id=repo");
        assert_eq!(json["RepoUrl"], "https://host/org/repo.git");
        assert_eq!(json["RepoName"], "repo");
        assert_eq!(json["BranchName"], "main");
        assert_eq!(json["CommitId"], "4f2a9c1");
        assert_eq!(json["Metadata"]["build"], 17);
        assert!(json.get("ContainerImage").is_none());
    }

    #[test]
    fn test_repo_name_is_not_sanitized() {
        let request = ScanRequest::from_raw(RawScanRequest {
            kind: Some(ScanKind::IacScan),
            url: Some("https://host/org/infra+modules.git".into()),
            ..Default::default()
        })
        .unwrap();

        let record = SignatureRecord::build(&request, None);
        assert_eq!(record.repo_name.as_deref(), Some("infra+modules"));
        assert_eq!(request.workspace_name(), "infra-modules");
    }

    #[test]
    fn test_image_record_fields() {
        let request = ScanRequest::from_raw(RawScanRequest {
            kind: Some(ScanKind::ContainerImageScan),
            image: Some("registry.example/team/app:1.0".into()),
            tool: Some("wiz".into()),
            ..Default::default()
        })
        .unwrap();

        let json = serde_json::to_value(SignatureRecord::build(&request, None)).unwrap();
        assert_eq!(json["ScanType"], "ContainerImageScan");
        assert_eq!(json["ContainerImage"], "registry.example/team/app:1.0");
        assert!(json["Reporturl"].is_null());
        assert!(json.get("RepoUrl").is_none());
        assert!(json.get("BranchName").is_none());
        assert_eq!(json["Metadata"], serde_json::json!({}));
    }
}
