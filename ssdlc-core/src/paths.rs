//! Where the service keeps its files.
//!
//! The CLI and any embedding service resolve the same locations through
//! these functions.

use std::path::PathBuf;

/// Environment override for [`data_dir`].
pub const DATA_DIR_ENV: &str = "SSDLC_DATA_DIR";

/// Location used by system installs.
const SYSTEM_DATA_DIR: &str = "/var/lib/ssdlc";

/// Root for configuration and workspaces.
///
/// A non-empty `SSDLC_DATA_DIR` wins. A provisioned `/var/lib/ssdlc` comes
/// next, then `~/.ssdlc`.
pub fn data_dir() -> PathBuf {
    resolve_data_dir(std::env::var_os(DATA_DIR_ENV).map(PathBuf::from), dirs::home_dir())
}

fn resolve_data_dir(override_dir: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    let system = PathBuf::from(SYSTEM_DATA_DIR);
    override_dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .or_else(|| system.is_dir().then(|| system.clone()))
        .or_else(|| home.map(|home| home.join(".ssdlc")))
        .unwrap_or(system)
}

pub fn config_dir() -> PathBuf {
    data_dir().join("config")
}

/// Default root for per-job workspaces.
pub fn workspaces_dir() -> PathBuf {
    data_dir().join("workspaces")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_dirs_live_under_data_dir() {
        let base = data_dir();
        assert!(config_dir().starts_with(&base));
        assert!(workspaces_dir().starts_with(&base));
    }

    #[test]
    fn test_override_wins_unless_empty() {
        let home = Some(PathBuf::from("/home/scanner"));
        assert_eq!(resolve_data_dir(Some("/srv/ssdlc".into()), home.clone()), PathBuf::from("/srv/ssdlc"));

        let fallback = resolve_data_dir(Some(PathBuf::new()), home);
        assert_ne!(fallback, PathBuf::new());
    }
}
