//! Configuration file parser for ~/.config/newsdesk/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::news::{ClientOptions, DEFAULT_BASE_URL};

/// Environment variable that overrides `api_key` from the file.
pub const API_KEY_ENV: &str = "NEWS_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `api_key` so it never reaches logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// NewsAPI key. The `NEWS_API_KEY` env var takes precedence.
    pub api_key: Option<String>,

    /// API root, e.g. `https://newsapi.org/v2`.
    pub base_url: String,

    /// Two-letter country code for top headlines.
    pub country: String,

    /// Articles requested per call (1-100).
    pub page_size: u32,

    /// Local user whose preferences drive recommendations.
    pub user_id: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Database file; defaults to `news.db` next to the config file.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            country: "us".to_string(),
            page_size: 20,
            user_id: "user_1".to_string(),
            request_timeout_secs: 30,
            database_path: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("country", &self.country)
            .field("page_size", &self.page_size)
            .field("user_id", &self.user_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("database_path", &self.database_path)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "api_key",
        "base_url",
        "country",
        "page_size",
        "user_id",
        "request_timeout_secs",
        "database_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            country = %config.country,
            user_id = %config.user_id,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Resolve the API key, preferring `env_value` (the `NEWS_API_KEY`
    /// variable) over the file. Blank values count as unset.
    pub fn resolve_api_key(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
            .map(SecretString::from)
    }

    /// Client settings derived from this config.
    pub fn client_options(&self, api_key: SecretString) -> ClientOptions {
        let mut options = ClientOptions::new(api_key);
        options.base_url = self.base_url.clone();
        options.country = self.country.clone();
        options.page_size = self.page_size;
        options.timeout = Duration::from_secs(self.request_timeout_secs.max(1));
        options
    }
}

// ============================================================================
// Tests
// ============================================================================
