//! Client configuration.
//!
//! Settings are read from a TOML file (default `./config/rag.toml`). Every
//! section is optional; a missing file yields [`Config::default`]. After
//! the file is parsed, the `RAG_API_URL` environment variable, when set,
//! overrides `api.base_url`.
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:8000"
//! timeout_secs = 30
//!
//! [session]
//! path = "/home/me/.local/share/rag-client/session.json"
//!
//! [cache]
//! stale_secs = 300
//! evict_secs = 600
//! query_retries = 1
//!
//! [health]
//! poll_interval_secs = 10
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "RAG_API_URL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// JSON file holding the persisted token and user profile.
    #[serde(default = "default_session_path")]
    pub path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
        }
    }
}

fn default_session_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-client")
        .join("session.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
    #[serde(default = "default_evict_secs")]
    pub evict_secs: u64,
    #[serde(default = "default_query_retries")]
    pub query_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_secs: default_stale_secs(),
            evict_secs: default_evict_secs(),
            query_retries: default_query_retries(),
        }
    }
}

fn default_stale_secs() -> u64 {
    5 * 60
}
fn default_evict_secs() -> u64 {
    10 * 60
}
fn default_query_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn evict_after(&self) -> Duration {
        Duration::from_secs(self.evict_secs)
    }
}

impl HealthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Load configuration from `path`, falling back to defaults if the file
/// does not exist, then apply the `RAG_API_URL` override and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            config.api.base_url = url;
        }
    }

    validate(&config)?;
    Ok(config)
}

/// Parse a TOML document into a [`Config`] without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Check cross-field constraints.
pub fn validate(config: &Config) -> Result<()> {
    let url = config.api.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!(
            "api.base_url must start with http:// or https:// (got '{}')",
            config.api.base_url
        );
    }

    if config.api.timeout_secs == 0 {
        anyhow::bail!("api.timeout_secs must be > 0");
    }

    if config.cache.stale_secs > config.cache.evict_secs {
        anyhow::bail!(
            "cache.stale_secs ({}) must not exceed cache.evict_secs ({})",
            config.cache.stale_secs,
            config.cache.evict_secs
        );
    }

    if config.health.poll_interval_secs == 0 {
        anyhow::bail!("health.poll_interval_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert_eq!(config.cache.stale_after(), Duration::from_secs(300));
        assert_eq!(config.cache.evict_after(), Duration::from_secs(600));
        assert_eq!(config.cache.query_retries, 1);
        assert_eq!(config.health.poll_interval(), Duration::from_secs(10));
        validate(&config).unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
[api]
base_url = "https://rag.internal.example.com"

[cache]
query_retries = 3
"#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://rag.internal.example.com");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.cache.query_retries, 3);
        assert_eq!(config.cache.stale_secs, 300);
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let config = parse_config("[api]\nbase_url = \"localhost:8000\"\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("api.base_url"));
    }

    #[test]
    fn test_rejects_stale_longer_than_evict() {
        let config = parse_config("[cache]\nstale_secs = 900\nevict_secs = 600\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = parse_config("[api]\ntimeout_secs = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.cache.stale_secs, 300);
    }
}
