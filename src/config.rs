//! Configuration file parsing (`config.toml`)
//!
//! Looked up at `--config <FILE>` or `<config_dir>/idxsync/config.toml`.
//! A missing file yields the defaults. Credentials never live here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Config file name
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Archive host serving the directory-index pages
    pub host: String,
    /// URL scheme for the archive host
    pub scheme: String,
    /// Remote directory the shell starts in (and `cd` with no argument returns to)
    pub start_collection: String,
    /// Host of the login gateway the archive redirects to
    pub login_host: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per download, and credential attempts at startup
    pub retries: u32,
    /// Remote timestamps must exceed local ones by more than this to count as newer
    pub mtime_tolerance_secs: u64,
    /// Copy buffer size for downloads
    pub chunk_size: usize,
    /// Permission bits for created files and directories
    pub mode: u32,
    /// `strftime` formats tried on listing timestamps, in order
    pub time_formats: Vec<String>,
    pub verbose: bool,
    pub checksum: bool,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "n5eil01u.ecs.nsidc.org".to_string(),
            scheme: "https".to_string(),
            start_collection: "ICEBRIDGE".to_string(),
            login_host: "urs.earthdata.nasa.gov".to_string(),
            timeout_secs: 20,
            retries: 5,
            mtime_tolerance_secs: 60,
            chunk_size: 16 * 1024,
            mode: 0o775,
            time_formats: vec![
                "%Y-%m-%d %H:%M".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%d-%b-%Y %H:%M".to_string(),
            ],
            verbose: true,
            checksum: false,
            user_agent: format!("idxsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Default config file location (`<config_dir>/idxsync/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("idxsync").join(CONFIG_FILE))
    }

    /// Load config from an explicit path, or from the default location.
    ///
    /// An explicit path must exist; the default location is optional.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SyncError::Config("host must not be empty".to_string()));
        }
        if self.scheme != "https" && self.scheme != "http" {
            return Err(SyncError::Config(format!(
                "unsupported scheme: {}",
                self.scheme
            )));
        }
        if self.retries == 0 {
            return Err(SyncError::Config("retries must be at least 1".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::Config("chunk_size must be positive".to_string()));
        }
        if self.time_formats.is_empty() {
            return Err(SyncError::Config(
                "time_formats must list at least one format".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL of the archive host, always ending in `/`
    pub fn base_url(&self) -> String {
        format!("{}://{}/", self.scheme, self.host.trim_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn mtime_tolerance(&self) -> Duration {
        Duration::from_secs(self.mtime_tolerance_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url(), "https://n5eil01u.ecs.nsidc.org/");
        assert_eq!(config.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
host = "data.example.org"
start_collection = "PUB/DATA"
mode = 0o755
mtime_tolerance_secs = 120
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.host, "data.example.org");
        assert_eq!(config.start_collection, "PUB/DATA");
        assert_eq!(config.mode, 0o755);
        assert_eq!(config.mtime_tolerance(), Duration::from_secs(120));
        // Untouched fields keep their defaults
        assert_eq!(config.retries, 5);
        assert_eq!(config.login_host, "urs.earthdata.nasa.gov");
    }

    #[test]
    fn test_reject_zero_retries() {
        let err = Config::parse("retries = 0").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_reject_unknown_scheme() {
        assert!(Config::parse("scheme = \"ftp\"").is_err());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&tmp.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_load_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "host = \"mirror.local\"\nscheme = \"http\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.base_url(), "http://mirror.local/");
    }
}
