//! Runtime configuration for the watcher.
//!
//! Settings are read from a TOML file. Every key is optional and falls back to
//! the defaults shown below, which reproduce the behaviour of running with no
//! configuration at all.
//!
//! # Configuration File Format
//!
//! ```toml
//! [scan]
//! interval_secs = 30
//! match_mode = "substring"          # substring | extension | glob
//! match_pattern = "jpg"
//! read_conflict = "route_negative"  # route_negative | retry
//!
//! [classifier]
//! endpoint = "http://127.0.0.1:8080/detect-labels"
//! api_key_env = "HOOMAN_API_KEY"
//! max_labels = 10
//! min_confidence = 90.0
//! person_labels = ["Human", "People", "Person"]
//! max_attempts = 100
//! backoff_base_ms = 200
//! backoff_max_ms = 20000
//! timeout_secs = 30
//!
//! [schedule]
//! active_hours = { start = "07:00", end = "22:00" }
//!
//! [logging]
//! directory = "/var/log/hooman"
//! ```

use crate::classifier::{DEFAULT_PERSON_LABELS, RetryPolicy};
use crate::scanner::{ImageMatcher, ReadConflictPolicy};
use chrono::NaiveTime;
use glob::Pattern;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    ConfigInvalid(String),
    /// A value parsed but is out of range or meaningless.
    InvalidValue {
        /// Dotted key of the offending setting.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// IO error while reading configuration.
    IoError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "Invalid value for '{}': {}", key, reason)
            }
            ConfigError::IoError(msg) => write!(f, "IO error reading configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How file names are matched against `match_pattern`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-sensitive substring of the file name.
    #[default]
    Substring,
    /// Case-insensitive file extension.
    Extension,
    /// Glob over the file name.
    Glob,
}

/// Scan loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub interval_secs: u64,
    pub match_mode: MatchMode,
    pub match_pattern: String,
    pub read_conflict: ReadConflictPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            match_mode: MatchMode::Substring,
            match_pattern: "jpg".to_string(),
            read_conflict: ReadConflictPolicy::RouteNegative,
        }
    }
}

/// Label-detection service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub endpoint: String,
    /// Name of the environment variable holding the bearer token, if any.
    pub api_key_env: Option<String>,
    pub max_labels: usize,
    pub min_confidence: f32,
    pub person_labels: Vec<String>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/detect-labels".to_string(),
            api_key_env: Some("HOOMAN_API_KEY".to_string()),
            max_labels: 10,
            min_confidence: 90.0,
            person_labels: DEFAULT_PERSON_LABELS.iter().map(|s| s.to_string()).collect(),
            max_attempts: 100,
            backoff_base_ms: 200,
            backoff_max_ms: 20_000,
            timeout_secs: 30,
        }
    }
}

impl ClassifierConfig {
    /// Backoff schedule for the detector.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Schedule policy settings. No settings means every file is processed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub active_hours: Option<ActiveHoursConfig>,
}

/// A daily processing window in local time, as `HH:MM` strings.
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveHoursConfig {
    pub start: String,
    pub end: String,
}

impl ActiveHoursConfig {
    /// Parses both bounds.
    pub fn bounds(&self) -> Result<(NaiveTime, NaiveTime), ConfigError> {
        Ok((
            parse_time("schedule.active_hours.start", &self.start)?,
            parse_time("schedule.active_hours.end", &self.end)?,
        ))
    }
}

/// Log file settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for `hooman.log`. Defaults to the user's home directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn parse_time(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| ConfigError::InvalidValue {
        key,
        reason: format!("'{}' is not HH:MM ({})", value, e),
    })
}

impl Config {
    /// Load configuration, falling back to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.hoomanrc.toml` in the current directory
    /// 3. Look for `~/.config/hooman/config.toml` in the home directory
    /// 4. Fall back to default configuration
    ///
    /// The result is validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is found but cannot be read, parsed or
    /// validated, or if `config_path` is given and does not exist.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match Self::locate(config_path) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn locate(config_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(path.to_path_buf());
        }

        let local_config = PathBuf::from(".hoomanrc.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::home_dir()
            .map(|home| home.join(".config").join("hooman").join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Load configuration from a specific file without validating it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text without validating it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, reason: &str| {
            Err(ConfigError::InvalidValue {
                key,
                reason: reason.to_string(),
            })
        };

        if self.scan.interval_secs == 0 {
            return invalid("scan.interval_secs", "must be at least 1");
        }
        if self.scan.match_pattern.is_empty() {
            return invalid("scan.match_pattern", "must not be empty");
        }
        if self.scan.match_mode == MatchMode::Glob
            && let Err(e) = Pattern::new(&self.scan.match_pattern)
        {
            return invalid("scan.match_pattern", &e.to_string());
        }

        let classifier = &self.classifier;
        if classifier.endpoint.trim().is_empty() {
            return invalid("classifier.endpoint", "must not be empty");
        }
        if classifier.max_labels == 0 {
            return invalid("classifier.max_labels", "must be at least 1");
        }
        if !(0.0..=100.0).contains(&classifier.min_confidence) {
            return invalid("classifier.min_confidence", "must be between 0 and 100");
        }
        if classifier.person_labels.iter().all(|l| l.trim().is_empty()) {
            return invalid("classifier.person_labels", "must name at least one label");
        }
        if classifier.max_attempts == 0 {
            return invalid("classifier.max_attempts", "must be at least 1");
        }
        if classifier.timeout_secs == 0 {
            return invalid("classifier.timeout_secs", "must be at least 1");
        }

        if let Some(hours) = &self.schedule.active_hours {
            hours.bounds()?;
        }

        Ok(())
    }

    /// Builds the file-name matcher described by `[scan]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the glob pattern is invalid.
    pub fn matcher(&self) -> Result<ImageMatcher, ConfigError> {
        let pattern = self.scan.match_pattern.clone();
        Ok(match self.scan.match_mode {
            MatchMode::Substring => ImageMatcher::Substring(pattern),
            MatchMode::Extension => ImageMatcher::Extension(pattern),
            MatchMode::Glob => {
                ImageMatcher::Glob(Pattern::new(&pattern).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: "scan.match_pattern",
                        reason: e.to_string(),
                    }
                })?)
            }
        })
    }

    /// Delay between scan cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.scan.interval_secs)
    }
}
