//! Configuration loading and API key resolution
//!
//! Two sources feed a run:
//! 1. **TOML bootstrap**: API key, output folder, logging, fetch tuning
//! 2. **Command line / environment**: overrides for the same values
//!
//! A missing TOML file is not an error. Missing values fall back to the
//! built-in defaults defined in this module.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable that overrides the config file location
pub const CONFIG_ENV_VAR: &str = "SCROB_CONFIG";

/// Environment variable holding the Last.fm API key
pub const API_KEY_ENV_VAR: &str = "SCROB_LASTFM_API_KEY";

/// Largest page size the Last.fm `user.getRecentTracks` endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 200;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Last.fm API key (optional, may come from CLI or environment)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Folder receiving export files (default: `result`)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retrieval tuning (optional)
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What to do with a scrobble whose timestamp is missing or unparseable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedTimestampPolicy {
    /// Drop the record and count it
    #[default]
    Skip,
    /// Keep the record with timestamp 0 (1970-01-01)
    CoerceToZero,
}

/// Retrieval pipeline tuning
///
/// All values are static for the duration of a run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Records per page (`limit` query parameter, 1..=200)
    pub page_size: u32,
    /// Retries after the first attempt of a page
    pub max_retries: u32,
    /// Fixed pause before every request, retries included
    pub rate_limit_delay_ms: u64,
    /// Exponential backoff base: retry `n` waits `unit * base^n`
    pub retry_backoff_base: u32,
    /// Backoff unit (1000 = seconds)
    pub retry_backoff_unit_ms: u64,
    /// Pages dispatched concurrently per batch
    pub batch_size: usize,
    /// Pause between the end of one batch and the start of the next
    pub batch_delay_ms: u64,
    /// Total timeout for one HTTP request
    pub request_timeout_secs: u64,
    /// Optional aggregate ceiling shared by every in-flight request
    pub requests_per_second: Option<u32>,
    /// Handling of scrobbles without a usable timestamp
    pub malformed_timestamps: MalformedTimestampPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_retries: 3,
            rate_limit_delay_ms: 250,
            retry_backoff_base: 2,
            retry_backoff_unit_ms: 1000,
            batch_size: 5,
            batch_delay_ms: 1000,
            request_timeout_secs: 30,
            requests_per_second: None,
            malformed_timestamps: MalformedTimestampPolicy::Skip,
        }
    }
}

impl FetchSettings {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "fetch.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("fetch.batch_size must be at least 1".to_string()));
        }
        if self.retry_backoff_base == 0 {
            return Err(Error::Config(
                "fetch.retry_backoff_base must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "fetch.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.requests_per_second == Some(0) {
            return Err(Error::Config(
                "fetch.requests_per_second must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_unit_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Default config file location: `<config_dir>/scrob/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scrob").join("config.toml"))
}

/// Config file resolution order:
/// 1. Command-line argument (highest priority)
/// 2. `SCROB_CONFIG` environment variable
/// 3. Platform default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// Load the TOML config, falling back to defaults when the file is absent
///
/// A file that exists but fails to parse or validate is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using built-in defaults"
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    config.fetch.validate()?;

    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Resolve the Last.fm API key
///
/// **Priority:** CLI → ENV → TOML
pub fn resolve_api_key(cli_key: Option<&str>, toml_config: &TomlConfig) -> Result<String> {
    let env_key = std::env::var(API_KEY_ENV_VAR).ok();
    let candidates = [
        ("command line", cli_key.map(str::to_string)),
        ("environment", env_key),
        ("TOML", toml_config.api_key.clone()),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, key)| key.filter(|k| is_valid_key(k)).map(|k| (source, k)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(s, _)| *s).collect();
        warn!(
            "Last.fm API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    match valid.into_iter().next() {
        Some((source, key)) => {
            info!("Last.fm API key loaded from {}", source);
            Ok(key.trim().to_string())
        }
        None => Err(Error::Config(format!(
            "Last.fm API key not configured. Please configure using one of:\n\
             1. Command line: --api-key your-key\n\
             2. Environment: {}=your-key\n\
             3. TOML config: api_key = \"your-key\"\n\
             \n\
             Obtain an API key at: https://www.last.fm/api/account/create",
            API_KEY_ENV_VAR
        ))),
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// User-Agent sent with every HTTP request
pub fn get_user_agent() -> String {
    format!("scrob/{}", env!("CARGO_PKG_VERSION"))
}
