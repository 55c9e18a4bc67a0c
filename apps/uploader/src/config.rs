//! Uploader configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/thothcraft/uploader.toml`
//! - Windows: `%APPDATA%/thothcraft/uploader.toml`
//!
//! `THOTHCRAFT_API_TOKEN` overrides the stored token.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thothcraft_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, DEFAULT_RETRY_ATTEMPTS};
use thothcraft_upload::{RetryPolicy, UploadClientConfig};

/// Environment variable that overrides `api_token`.
pub const TOKEN_ENV: &str = "THOTHCRAFT_API_TOKEN";

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Coordination service root, e.g. `https://api.thothcraft.io/api/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for the coordination service.
    #[serde(default)]
    pub api_token: String,

    /// Bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Chunk requests in flight per upload.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries per chunk after the first attempt.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Session journal location; the platform config dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://localhost:8000/api/v1".into()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: String::new(),
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            journal_path: None,
        }
    }
}

impl Config {
    /// Loads configuration from the default location, creating it on first
    /// run, then applies the environment override.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;
        let mut config = Self::load_from(&path)?;
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            config.apply_token_override(&token);
        }
        Ok(config)
    }

    /// Loads configuration from `path`, or writes a default there if absent.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file holds the API token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_token_override(&mut self, token: &str) {
        let token = token.trim();
        if !token.is_empty() {
            self.api_token = token.to_string();
        }
    }

    /// Client settings derived from this configuration.
    pub fn client_config(&self) -> UploadClientConfig {
        UploadClientConfig {
            chunk_size: self.chunk_size,
            concurrency: self.concurrency,
            retry: RetryPolicy {
                max_retries: self.retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn journal_path(&self) -> anyhow::Result<PathBuf> {
        match &self.journal_path {
            Some(path) => Ok(path.clone()),
            None => thothcraft_upload::journal::default_journal_path()
                .context("cannot determine the config directory for the journal"),
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    thothcraft_upload::journal::config_dir()
        .map(|d| d.join("thothcraft").join("uploader.toml"))
        .context("cannot determine the config directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.base_url, "http://localhost:8000/api/v1");
        assert!(config.api_token.is_empty());
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry_attempts, 3);
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            base_url = "https://api.example.com"
            api_token = "tok"
            concurrency = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.api_token, "tok");
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn first_load_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("thothcraft").join("uploader.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("uploader.toml");
        let config = Config {
            api_token: "secret".into(),
            chunk_size: 4 * 1024 * 1024,
            journal_path: Some(tmp.path().join("journal.json")),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("uploader.toml");
        std::fs::write(&path, "chunk_size = \"big\"").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[test]
    fn token_override_ignores_blank() {
        let mut config = Config {
            api_token: "file".into(),
            ..Config::default()
        };
        config.apply_token_override("  ");
        assert_eq!(config.api_token, "file");
        config.apply_token_override(" env ");
        assert_eq!(config.api_token, "env");
    }

    #[test]
    fn client_config_maps_retries() {
        let config = Config {
            retry_attempts: 7,
            concurrency: 2,
            ..Config::default()
        };
        let client = config.client_config();
        assert_eq!(client.retry.max_retries, 7);
        assert_eq!(client.concurrency, 2);
        assert_eq!(client.chunk_size, config.chunk_size);
    }

    #[test]
    fn explicit_journal_path_wins() {
        let config = Config {
            journal_path: Some(PathBuf::from("/var/lib/thoth/journal.json")),
            ..Config::default()
        };
        assert_eq!(
            config.journal_path().unwrap(),
            PathBuf::from("/var/lib/thoth/journal.json")
        );
    }
}
