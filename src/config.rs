//! Configuration file parser for ~/.config/newsdeck/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted for the API key before the config file.
pub const API_KEY_ENV: &str = "NEWSDECK_API_KEY";

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
/// Custom Debug impl masks `api_key` to prevent secret leakage in logs,
/// error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// News API key (alternative to NEWSDECK_API_KEY env var).
    /// Env var takes precedence over config file.
    pub api_key: Option<String>,

    /// Two-letter country code passed to the news API.
    pub country: String,

    /// Two-letter language code passed to the news API.
    pub language: String,

    /// Base URL of the news API.
    pub base_url: String,

    /// How long a cached feed page stays fresh, in seconds.
    pub cache_ttl_secs: u64,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Backoff applied on a 429 without a `retry-after` header, in seconds.
    pub default_retry_after_secs: u64,

    /// Articles per page the API is expected to return. Used by callers to
    /// spot a short (final) page; never sent as a query parameter.
    pub page_size: usize,

    /// Serve cached articles past their TTL while rate limited.
    pub serve_stale_when_rate_limited: bool,

    /// Text-to-speech settings.
    pub speech: SpeechConfig,
}

/// Settings for the external text-to-speech command.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Program invoked to speak an utterance. The text is appended as the
    /// final argument.
    pub command: String,

    /// Extra arguments inserted before the text.
    pub args: Vec<String>,

    /// Long article text is split into utterances of at most this many
    /// characters.
    pub max_utterance_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            country: "in".to_string(),
            language: "en".to_string(),
            base_url: "https://newsdata.io".to_string(),
            cache_ttl_secs: 600,
            request_timeout_secs: 10,
            default_retry_after_secs: 60,
            page_size: 10,
            serve_stale_when_rate_limited: false,
            speech: SpeechConfig::default(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            command: "espeak-ng".to_string(),
            args: Vec::new(),
            max_utterance_chars: 3000,
        }
    }
}

/// Mask api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("country", &self.country)
            .field("language", &self.language)
            .field("base_url", &self.base_url)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("default_retry_after_secs", &self.default_retry_after_secs)
            .field("page_size", &self.page_size)
            .field(
                "serve_stale_when_rate_limited",
                &self.serve_stale_when_rate_limited,
            )
            .field("speech", &self.speech)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading; a corrupted or hostile config file
        // must not exhaust memory.
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
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "api_key",
                "country",
                "language",
                "base_url",
                "cache_ttl_secs",
                "request_timeout_secs",
                "default_retry_after_secs",
                "page_size",
                "serve_stale_when_rate_limited",
                "speech",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            country = %config.country,
            language = %config.language,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Resolve the API key: the NEWSDECK_API_KEY env var wins over the
    /// config file. An empty env var counts as unset.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_key.clone())
            .map(SecretString::from)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
