//! Configuration loading for querybatch.
//!
//! Values come from, in increasing priority: built-in defaults, `config.toml`,
//! environment variables (optionally from a `.env` file), and command-line flags.
//! [`Config::validate`] checks every numeric range once, after all layers are
//! applied.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::google::DEFAULT_ENDPOINT;
use crate::orchestrator::{Backoff, RetryPolicy, RunOptions};
use crate::query::DEFAULT_ENCODING_CONFIDENCE;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "QUERYBATCH_CONFIG";

const RETRY_COUNT_RANGE: RangeInclusive<u32> = 0..=10;
const RETRY_DELAY_RANGE: RangeInclusive<f64> = 0.1..=60.0;
const TIMEOUT_RANGE: RangeInclusive<u64> = 1..=60;
const DELAY_RANGE: RangeInclusive<f64> = 0.0..=60.0;
const CONFIDENCE_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Upper bound for a single exponential backoff wait, in seconds.
const MAX_BACKOFF_SECS: f64 = 60.0;

const PLACEHOLDER_API_KEY: &str = "YOUR_GOOGLE_API_KEY_HERE";
const PLACEHOLDER_ENGINE_ID: &str = "YOUR_CUSTOM_SEARCH_ENGINE_ID_HERE";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },

    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        min: String,
        max: String,
        value: String,
    },

    #[error("Missing required setting: {0} (set it in config.toml or the environment)")]
    MissingCredential(&'static str),
}

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub search: SearchConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub input: InputConfig,
}

/// Search API credentials and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub key: String,
    pub engine_id: String,
    pub endpoint: String,
}

/// Pacing, retry and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Retries per term after the first attempt.
    pub retry_count: u32,
    /// Seconds between attempts for one term.
    pub retry_delay: f64,
    /// Per-call timeout in seconds.
    pub timeout: u64,
    /// Seconds between consecutive terms.
    pub delay: f64,
    pub backoff: BackoffKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Where result files go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub filename_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Optional log file receiving the same events as the console.
    pub file: Option<PathBuf>,
}

/// Terms file reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Detected encodings below this confidence are read as UTF-8.
    pub encoding_confidence: f32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            engine_id: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: 1.0,
            timeout: 10,
            delay: 1.0,
            backoff: BackoffKind::Fixed,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            filename_prefix: "search_results".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            encoding_confidence: DEFAULT_ENCODING_CONFIDENCE,
        }
    }
}

/// Values given on the command line, applied last.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub output_directory: Option<PathBuf>,
    pub filename_prefix: Option<String>,
    pub delay: Option<f64>,
    pub retry_count: Option<u32>,
    pub timeout: Option<u64>,
}

fn check_range<T>(field: &'static str, value: T, range: &RangeInclusive<T>) -> Result<(), ConfigError>
where
    T: PartialOrd + ToString,
{
    if range.contains(&value) {
        return Ok(());
    }
    Err(ConfigError::OutOfRange {
        field,
        min: range.start().to_string(),
        max: range.end().to_string(),
        value: value.to_string(),
    })
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

impl Config {
    /// Load config from `$QUERYBATCH_CONFIG`, or the platform config directory,
    /// or return defaults, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed, or if
    /// an environment override is malformed.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        Self::default_config_path()
    }

    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "querybatch").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` if a numeric variable doesn't parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GOOGLE_API_KEY") {
            self.api.key = v;
        }
        if let Some(v) = lookup("GOOGLE_CUSTOM_SEARCH_ENGINE_ID") {
            self.api.engine_id = v;
        }
        if let Some(v) = lookup("OUTPUT_DIRECTORY") {
            self.output.directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("OUTPUT_FILENAME_PREFIX") {
            self.output.filename_prefix = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = lookup("LOG_FILE_PATH") {
            self.logging.file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SEARCH_RETRY_COUNT") {
            self.search.retry_count = parse_env("SEARCH_RETRY_COUNT", &v)?;
        }
        if let Some(v) = lookup("SEARCH_RETRY_DELAY") {
            self.search.retry_delay = parse_env("SEARCH_RETRY_DELAY", &v)?;
        }
        if let Some(v) = lookup("SEARCH_TIMEOUT") {
            self.search.timeout = parse_env("SEARCH_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("SEARCH_DELAY") {
            self.search.delay = parse_env("SEARCH_DELAY", &v)?;
        }
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.output_directory {
            self.output.directory.clone_from(dir);
        }
        if let Some(prefix) = &overrides.filename_prefix {
            self.output.filename_prefix.clone_from(prefix);
        }
        if let Some(delay) = overrides.delay {
            self.search.delay = delay;
        }
        if let Some(retry) = overrides.retry_count {
            self.search.retry_count = retry;
        }
        if let Some(timeout) = overrides.timeout {
            self.search.timeout = timeout;
        }
    }

    /// Check every numeric setting against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` for the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("search.retry_count", self.search.retry_count, &RETRY_COUNT_RANGE)?;
        check_range("search.retry_delay", self.search.retry_delay, &RETRY_DELAY_RANGE)?;
        check_range("search.timeout", self.search.timeout, &TIMEOUT_RANGE)?;
        check_range("search.delay", self.search.delay, &DELAY_RANGE)?;
        check_range(
            "input.encoding_confidence",
            self.input.encoding_confidence,
            &CONFIDENCE_RANGE,
        )?;
        Ok(())
    }

    /// Pacing and retry settings for a run. Call after [`Config::validate`].
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        let delay = Duration::from_secs_f64(self.search.retry_delay);
        let backoff = match self.search.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max_delay: Duration::from_secs_f64(MAX_BACKOFF_SECS),
            },
        };

        RunOptions {
            pacing_interval: Duration::from_secs_f64(self.search.delay),
            retry: RetryPolicy {
                max_retries: self.search.retry_count,
                delay,
                backoff,
            },
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.search.timeout)
    }
}

impl ApiConfig {
    /// The API key and search engine ID, if both are set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredential` for an empty or placeholder value.
    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        let key = self.key.trim();
        if key.is_empty() || key == PLACEHOLDER_API_KEY {
            return Err(ConfigError::MissingCredential("api.key (GOOGLE_API_KEY)"));
        }

        let engine_id = self.engine_id.trim();
        if engine_id.is_empty() || engine_id == PLACEHOLDER_ENGINE_ID {
            return Err(ConfigError::MissingCredential(
                "api.engine_id (GOOGLE_CUSTOM_SEARCH_ENGINE_ID)",
            ));
        }

        Ok((key, engine_id))
    }
}

/// A commented sample config with placeholder credentials.
#[must_use]
pub fn sample_config() -> String {
    let defaults = Config::default();
    format!(
        r#"# querybatch configuration

[api]
key = "{PLACEHOLDER_API_KEY}"
engine_id = "{PLACEHOLDER_ENGINE_ID}"
endpoint = "{endpoint}"

[search]
# Retries per term after the first attempt (0-10).
retry_count = {retry_count}
# Seconds between attempts for one term (0.1-60).
retry_delay = {retry_delay:.1}
# Per-request timeout in seconds (1-60).
timeout = {timeout}
# Seconds between consecutive terms (0-60).
delay = {delay:.1}
# "fixed" or "exponential"
backoff = "fixed"

[output]
directory = "{directory}"
filename_prefix = "{prefix}"

[logging]
level = "{level}"
# file = "logs/search.log"

[input]
encoding_confidence = {confidence}
"#,
        endpoint = defaults.api.endpoint,
        retry_count = defaults.search.retry_count,
        retry_delay = defaults.search.retry_delay,
        timeout = defaults.search.timeout,
        delay = defaults.search.delay,
        directory = defaults.output.directory.display(),
        prefix = defaults.output.filename_prefix,
        level = defaults.logging.level,
        confidence = defaults.input.encoding_confidence,
    )
}
