//! Application settings and paths.
//!
//! Settings live in `settings.json` under the XDG config directory; the
//! default SQLite store lives under the XDG data directory.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application directory paths following the XDG Base Directory layout.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Configuration directory (~/.config/egressor)
    pub config_dir: PathBuf,
    /// Data directory (~/.local/share/egressor)
    pub data_dir: PathBuf,
}

impl Paths {
    /// Resolve the per-user directories. Nothing is created on disk.
    pub fn resolve() -> ConfigResult<Self> {
        let project = ProjectDirs::from("com", "egressor", "egressor")
            .ok_or(ConfigError::DirectoryNotFound)?;

        Ok(Self {
            config_dir: project.config_dir().to_path_buf(),
            data_dir: project.data_dir().to_path_buf(),
        })
    }

    /// Path to the settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    /// Default location of the embedded result store.
    pub fn default_db_path(&self) -> PathBuf {
        self.data_dir.join("results.db")
    }
}

/// User defaults for `scan`. Command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default target host.
    pub host: String,
    /// Default request path.
    pub path: String,
    /// Default port specification.
    pub ports: String,
    /// Default number of workers.
    pub concurrency: usize,
    /// Default per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Default retries after the first attempt.
    pub max_retries: u32,
    /// Default pause between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Exact status to require; any 2xx when unset.
    pub expect_status: Option<u16>,
    /// Body marker to require.
    pub expect_body: Option<String>,
    /// Probe dispatches per second, 0 for unlimited.
    pub rate_limit: u32,
    /// Embedded store location; the XDG data dir when unset.
    pub sqlite_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "letmeoutofyour.net".to_string(),
            path: "/".to_string(),
            ports: "21-23,25,53,80,110,143,443,465,587,993,995,3306,3389,5432,8080,8443"
                .to_string(),
            concurrency: 5,
            timeout_ms: 3000,
            max_retries: 3,
            retry_delay_ms: 250,
            expect_status: None,
            expect_body: None,
            rate_limit: 0,
            sqlite_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the default location, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> ConfigResult<Self> {
        let file = Paths::resolve()?.settings_file();
        if !file.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&file)
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
    }

    /// Write settings to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// The embedded store to use when none is given on the command line.
    pub fn sqlite_path_or_default(&self) -> ConfigResult<PathBuf> {
        match &self.sqlite_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Paths::resolve()?.default_db_path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.concurrency, 5);
        assert_eq!(settings.timeout_ms, 3000);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_delay_ms, 250);
        assert_eq!(settings.rate_limit, 0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        fs::write(&file, r#"{"concurrency": 12, "expect_body": "w00tw00t"}"#).unwrap();

        let settings = Settings::load_from(&file).unwrap();
        assert_eq!(settings.concurrency, 12);
        assert_eq!(settings.expect_body.as_deref(), Some("w00tw00t"));
        assert_eq!(settings.timeout_ms, 3000);
        assert_eq!(settings.path, "/");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            host: "egress.example.test".to_string(),
            sqlite_path: Some(dir.path().join("probe.db")),
            ..Settings::default()
        };

        settings.save_to(&file).unwrap();
        assert_eq!(Settings::load_from(&file).unwrap(), settings);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        fs::write(&file, "{ not json").unwrap();
        assert!(matches!(
            Settings::load_from(&file),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Settings::load_from(&dir.path().join("absent.json")),
            Err(ConfigError::ReadFailed { .. })
        ));
    }

    #[test]
    fn test_explicit_sqlite_path_wins() {
        let settings = Settings {
            sqlite_path: Some(PathBuf::from("/tmp/egress.db")),
            ..Settings::default()
        };
        assert_eq!(
            settings.sqlite_path_or_default().unwrap(),
            PathBuf::from("/tmp/egress.db")
        );
    }
}
