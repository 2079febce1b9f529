//! Configuration management.
//!
//! Settings come from a JSON file (all fields optional) and are then overlaid
//! with the environment variables the scanner backends are provisioned with.

use crate::error::{Result, ScanError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A credential value that never appears in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceSettings,
    pub poll: PollSettings,
    pub scanners: ScannerSettings,
    pub publish: PublishSettings,
    pub observability: ObservabilitySettings,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Directory under which workspaces are created.
    pub root: PathBuf,
    /// Remove unheld workspace directories at startup.
    pub sweep_on_start: bool,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self { root: paths::workspaces_dir(), sweep_on_start: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub delay_secs: u64,
    /// Multiplier applied to the delay after each in-progress attempt (1.0 = fixed).
    pub backoff_factor: f64,
    pub max_delay_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self { max_attempts: 10, delay_secs: 5, backoff_factor: 1.0, max_delay_secs: 60 }
    }
}

/// How the static code scan learns about completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SonarCompletion {
    /// The scanner CLI waits for the analysis and prints the dashboard URL.
    #[default]
    ScannerOutput,
    /// The scanner CLI returns after upload; poll the compute-engine task.
    ServerTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub git_path: PathBuf,
    pub wizcli_path: PathBuf,
    pub java_path: PathBuf,
    pub nexus_iq_cli_jar: PathBuf,
    pub sonar_scanner_path: PathBuf,
    pub crane_path: PathBuf,
    /// Upper bound for any single scanner or git subprocess.
    pub timeout_secs: u64,
    pub supported_image_tools: Vec<String>,
    pub sonar_completion: SonarCompletion,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            git_path: PathBuf::from("git"),
            wizcli_path: PathBuf::from("wizcli"),
            java_path: PathBuf::from("java"),
            nexus_iq_cli_jar: PathBuf::from("/opt/nexus-iq-cli/nexus-iq-cli.jar"),
            sonar_scanner_path: PathBuf::from("pysonar-scanner"),
            crane_path: PathBuf::from("crane"),
            timeout_secs: 1800,
            supported_image_tools: vec!["wiz".to_string(), "nexus".to_string()],
            sonar_completion: SonarCompletion::ScannerOutput,
        }
    }
}

impl ScannerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Signature store endpoint (`SIGNATURE_STORE_ENDPOINT`).
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    /// Publish the best-effort record when polling times out.
    pub publish_on_poll_timeout: bool,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self { endpoint: None, timeout_secs: 30, publish_on_poll_timeout: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Explicit level; when unset it follows `CURRENT_ENVIRONMENT`.
    pub log_level: Option<String>,
    pub json_logs: bool,
    /// Serve Prometheus metrics on this port when set.
    pub metrics_port: Option<u16>,
    /// `prod` logs at info, anything else at debug.
    pub environment: Option<String>,
}

impl ObservabilitySettings {
    /// Effective log level.
    pub fn level(&self) -> &str {
        if let Some(level) = &self.log_level {
            return level;
        }
        match self.environment.as_deref() {
            Some("prod") => "info",
            _ => "debug",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub bitbucket_user: Option<String>,
    pub bitbucket_token: Option<Secret>,
    pub wiz_client_id: Option<String>,
    pub wiz_secret: Option<Secret>,
    pub nexus_iq_url: Option<String>,
    pub nexus_secret: Option<Secret>,
    pub sonar_host_url: Option<String>,
    pub sonar_token: Option<Secret>,
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        std::env::var("SSDLC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| paths::config_dir().join("config.json"))
    }

    /// Load configuration from disk and overlay the process environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a file; a missing file yields defaults.
    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ScanError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&content).map_err(|e| ScanError::InvalidConfig {
            reason: format!("Failed to parse config {}: {}", path.display(), e),
        })
    }

    /// Overlay values from an environment lookup. Set variables win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("SIGNATURE_STORE_ENDPOINT") {
            self.publish.endpoint = Some(v);
        }
        if let Some(v) = get("CURRENT_ENVIRONMENT") {
            self.observability.environment = Some(v);
        }

        let creds = &mut self.credentials;
        if let Some(v) = get("BITBUCKET_USER") {
            creds.bitbucket_user = Some(v);
        }
        if let Some(v) = get("BITBUCKET_TOKEN") {
            creds.bitbucket_token = Some(Secret::new(v));
        }
        if let Some(v) = get("WIZ_CLIENT_ID") {
            creds.wiz_client_id = Some(v);
        }
        if let Some(v) = get("WIZ_SECRET") {
            creds.wiz_secret = Some(Secret::new(v));
        }
        if let Some(v) = get("NEXUS_IQ_URL") {
            creds.nexus_iq_url = Some(v);
        }
        if let Some(v) = get("NEXUS_SECRET") {
            creds.nexus_secret = Some(Secret::new(v));
        }
        if let Some(v) = get("SONAR_HOST_URL") {
            creds.sonar_host_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Some(v) = get("SONAR_TOKEN") {
            creds.sonar_token = Some(Secret::new(v));
        }
    }

    /// Check settings every job depends on.
    pub fn validate(&self) -> Result<()> {
        if self.publish.endpoint.as_deref().map_or(true, str::is_empty) {
            return Err(ScanError::InvalidConfig {
                reason: "SIGNATURE_STORE_ENDPOINT must be set".into(),
            });
        }
        if self.poll.max_attempts == 0 {
            return Err(ScanError::InvalidConfig {
                reason: "poll.max_attempts must be at least 1".into(),
            });
        }
        if self.poll.backoff_factor < 1.0 {
            return Err(ScanError::InvalidConfig {
                reason: "poll.backoff_factor must be >= 1.0".into(),
            });
        }
        if self.scanners.timeout_secs == 0 {
            return Err(ScanError::InvalidConfig {
                reason: "scanners.timeout_secs must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_baseline() {
        let config = Config::default();
        assert_eq!(config.poll.max_attempts, 10);
        assert_eq!(config.poll.delay_secs, 5);
        assert_eq!(config.scanners.supported_image_tools, vec!["wiz", "nexus"]);
        assert_eq!(config.scanners.sonar_completion, SonarCompletion::ScannerOutput);
        assert!(config.publish.publish_on_poll_timeout);
        assert_eq!(config.observability.level(), "debug");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"poll": {"max_attempts": 3}, "scanners": {"sonar_completion": "server_task"}}"#)
                .unwrap();
        assert_eq!(config.poll.max_attempts, 3);
        assert_eq!(config.poll.delay_secs, 5);
        assert_eq!(config.scanners.sonar_completion, SonarCompletion::ServerTask);
        assert_eq!(config.scanners.timeout_secs, 1800);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.poll.max_attempts, 10);
    }

    #[test]
    fn test_malformed_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Config::load_file(&path).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig { .. }));
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SIGNATURE_STORE_ENDPOINT", "https://store.example/signatures"),
            ("SONAR_HOST_URL", "https://sonar.example/"),
            ("SONAR_TOKEN", "squ_secret"),
            ("CURRENT_ENVIRONMENT", "prod"),
            ("BITBUCKET_USER", ""),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.publish.endpoint.as_deref(), Some("https://store.example/signatures"));
        assert_eq!(config.credentials.sonar_host_url.as_deref(), Some("https://sonar.example"));
        assert_eq!(config.credentials.sonar_token.as_ref().unwrap().expose(), "squ_secret");
        assert!(config.credentials.bitbucket_user.is_none());
        assert_eq!(config.observability.level(), "info");
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let creds = Credentials { sonar_token: Some(Secret::new("squ_secret")), ..Default::default() };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("squ_secret"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ScanError::InvalidConfig { .. })));

        config.publish.endpoint = Some("http://store".into());
        assert!(config.validate().is_ok());

        config.poll.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
