//! Pipeline configuration.
//!
//! # Responsibility
//! - Hold tunables for auto-save, rate limiting and the storage key.
//! - Load them from TOML with every field defaulted.
//!
//! # Invariants
//! - A validated config has a well-formed storage key, a non-zero debounce,
//!   a non-zero rate-limit window and a non-zero admission budget.

use crate::security::rate_limiter::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
use crate::storage::is_valid_storage_key;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

/// Fixed key under which the whole collection snapshot is stored.
pub const DEFAULT_STORAGE_KEY: &str = "taskgo_tasks";
/// Default debounce before an auto-save write.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Consecutive failed saves before the scheduler raises a degraded alert.
pub const DEFAULT_FAILURE_ALERT_THRESHOLD: u32 = 3;

/// Configuration load/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read config `{path}`: {source}"),
            Self::Parse(err) => write!(f, "invalid config syntax: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Storage key holding the encrypted collection snapshot.
    pub storage_key: String,
    /// User id stamped on audit events.
    pub user_id: Option<String>,
    pub autosave: AutoSaveConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            user_id: None,
            autosave: AutoSaveConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_storage_key(&self.storage_key) {
            return Err(ConfigError::Invalid(format!(
                "storage_key `{}` must be non-empty and use only [A-Za-z0-9_.-]",
                self.storage_key
            )));
        }
        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "autosave.debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Auto-save scheduler tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub debounce_ms: u64,
    /// Consecutive failures that trigger one degraded alert per streak.
    pub failure_alert_threshold: u32,
    /// Context string passed to storage writes as audit metadata.
    pub context: String,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            failure_alert_threshold: DEFAULT_FAILURE_ALERT_THRESHOLD,
            context: "auto_save".to_string(),
        }
    }
}

impl AutoSaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Sliding-window admission tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW.as_millis() as u64,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, PipelineConfig, DEFAULT_STORAGE_KEY};
    use std::time::Duration;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.autosave.debounce(), Duration::from_millis(500));
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
    }

    #[test]
    fn partial_toml_overrides_selected_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            user_id = "u-42"

            [autosave]
            debounce_ms = 250

            [rate_limit]
            max_requests = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.user_id.as_deref(), Some("u-42"));
        assert_eq!(config.autosave.debounce_ms, 250);
        assert_eq!(config.autosave.failure_alert_threshold, 3);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_ms, 60_000);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = PipelineConfig::from_toml_str("storage_key = \"../escape\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = PipelineConfig::from_toml_str("[rate_limit]\nwindow_ms = 0").unwrap_err();
        assert!(err.to_string().contains("window_ms"));

        let err = PipelineConfig::from_toml_str("storage_key = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("taskgo.toml");
        let err = PipelineConfig::load(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("taskgo.toml"));
    }
}
