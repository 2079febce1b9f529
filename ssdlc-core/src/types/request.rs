//! Scan request types and their validation.

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// Branch used when the caller does not name one.
pub const DEFAULT_BRANCH: &str = "develop";

/// Path scanned when the caller does not name one.
pub const DEFAULT_SCAN_PATH: &str = ".";

/// Opaque caller metadata, forwarded verbatim to the signature store.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The kind of scan to run. One adapter exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanKind {
    DockerFileScan,
    IacScan,
    ContainerImageScan,
    #[serde(rename = "SCAScan")]
    ScaScan,
    #[serde(rename = "staticCodeScan")]
    StaticCodeScan,
}

impl ScanKind {
    pub const ALL: [ScanKind; 5] = [
        ScanKind::DockerFileScan,
        ScanKind::IacScan,
        ScanKind::ContainerImageScan,
        ScanKind::ScaScan,
        ScanKind::StaticCodeScan,
    ];

    /// Tag written to `ScanType` in the signature record.
    pub fn scan_type(&self) -> &'static str {
        match self {
            ScanKind::DockerFileScan => "DockerFileScan",
            ScanKind::IacScan => "IacScan",
            ScanKind::ContainerImageScan => "ContainerImageScan",
            ScanKind::ScaScan => "SCAScan",
            ScanKind::StaticCodeScan => "staticCodeScan",
        }
    }

    /// Whether this kind scans a container image rather than a repository.
    pub fn targets_image(&self) -> bool {
        matches!(self, ScanKind::ContainerImageScan)
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scan_type())
    }
}

/// What a scan runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Repository { url: String, branch: String },
    Image { reference: String },
}

impl Target {
    /// Deterministic workspace name for this target.
    ///
    /// Repositories use the last URL path segment without `.git`; images use
    /// the last reference segment with tag/digest separators flattened.
    pub fn workspace_name(&self) -> String {
        let raw = match self {
            Target::Repository { .. } => self.repo_name().unwrap_or_default(),
            Target::Image { reference } => {
                let segment = reference.rsplit('/').next().unwrap_or("");
                segment.replace([':', '@'], "-")
            }
        };
        sanitize_name(&raw)
    }

    /// Repository name as it appears in the URL, minus any `.git` suffix.
    pub fn repo_name(&self) -> Option<String> {
        let Target::Repository { url, .. } = self else { return None };
        let parsed = url::Url::parse(url).ok()?;
        let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
        Some(segment.strip_suffix(".git").unwrap_or(segment).to_string())
    }

    /// Locator used in logs.
    pub fn locator(&self) -> &str {
        match self {
            Target::Repository { url, .. } => url,
            Target::Image { reference } => reference,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Repository { url, branch } => write!(f, "{}@{}", url, branch),
            Target::Image { reference } => write!(f, "{}", reference),
        }
    }
}

fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' })
        .collect()
}

/// Kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Path inside the workspace (file for Dockerfile scans, directory otherwise).
    pub path: String,
    pub commit_id: Option<String>,
    /// Tool selector for container image scans, lowercased.
    pub tool: Option<String>,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self { path: DEFAULT_SCAN_PATH.to_string(), commit_id: None, tool: None }
    }
}

/// Inbound request as received from a front end, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawScanRequest {
    pub kind: Option<ScanKind>,
    pub url: Option<String>,
    pub branch: Option<String>,
    pub image: Option<String>,
    pub path: Option<String>,
    pub commit_id: Option<String>,
    pub tool: Option<String>,
    /// Metadata as raw JSON text; must decode to an object.
    pub metadata: Option<String>,
}

/// A validated, immutable scan request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRequest {
    target: Target,
    kind: ScanKind,
    params: ScanParams,
    metadata: Metadata,
}

impl ScanRequest {
    /// Validate a raw request. Performs no I/O.
    pub fn from_raw(raw: RawScanRequest) -> Result<Self> {
        let metadata = parse_metadata(raw.metadata.as_deref())?;

        let kind = raw.kind.ok_or_else(|| ScanError::InvalidRequest {
            reason: "scan kind is required".into(),
        })?;

        let target = if kind.targets_image() {
            let reference = non_empty(raw.image).ok_or_else(|| ScanError::InvalidRequest {
                reason: format!("{} requires a container image reference", kind),
            })?;
            Target::Image { reference }
        } else {
            let url = non_empty(raw.url).ok_or_else(|| ScanError::InvalidRequest {
                reason: format!("{} requires a repository URL", kind),
            })?;
            validate_repo_url(&url)?;
            let branch = non_empty(raw.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string());
            Target::Repository { url, branch }
        };

        let name = target.workspace_name();
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(ScanError::InvalidRequest {
                reason: format!("cannot derive a workspace name from '{}'", target.locator()),
            });
        }

        let path = non_empty(raw.path).unwrap_or_else(|| DEFAULT_SCAN_PATH.to_string());
        validate_scan_path(&path)?;

        let params = ScanParams {
            path,
            commit_id: non_empty(raw.commit_id),
            tool: non_empty(raw.tool).map(|t| t.to_lowercase()),
        };

        Ok(Self { target, kind, params, metadata })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn kind(&self) -> ScanKind {
        self.kind
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn workspace_name(&self) -> String {
        self.target.workspace_name()
    }
}

/// Decode caller metadata. Absent or empty input is an empty object.
pub fn parse_metadata(raw: Option<&str>) -> Result<Metadata> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Metadata::new()),
        Some(raw) => raw,
    };

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(ScanError::InvalidMetadata {
            reason: format!("expected a JSON object, got {}", json_type(&other)),
        }),
        Err(e) => Err(ScanError::InvalidMetadata { reason: format!("not valid JSON: {}", e) }),
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_repo_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw).map_err(|e| ScanError::InvalidRequest {
        reason: format!("invalid repository URL '{}': {}", raw, e),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScanError::InvalidRequest {
            reason: format!("repository URL must be http(s), got '{}'", url.scheme()),
        });
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ScanError::InvalidRequest {
            reason: "repository URL must not embed credentials".into(),
        });
    }
    Ok(())
}

/// Reject paths that could resolve outside the workspace.
fn validate_scan_path(path: &str) -> Result<()> {
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::Prefix(_) => {
                return Err(ScanError::InvalidScanPath {
                    path: path.to_string(),
                    reason: "must be relative to the repository root".into(),
                });
            }
            Component::ParentDir => {
                return Err(ScanError::InvalidScanPath {
                    path: path.to_string(),
                    reason: "must not contain '..'".into(),
                });
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}
