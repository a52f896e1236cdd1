//! Layered configuration for the arbor graph database client.
//!
//! Values resolve from built-in defaults, then an optional TOML file
//! (`--config-path` or `ARBOR_CONFIG_PATH`), then `ARBOR_*` environment
//! variables, and finally command-line flags. Both the engine and the CLI read
//! the same [`Config`] so that startup behaviour agrees regardless of the
//! entrypoint.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_APP_NAME, DEFAULT_CMD_CHAR, DEFAULT_COUNT_LATENCY_THRESHOLD_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_HISTORY, DEFAULT_POLL_INTERVAL_SECS, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "ARBOR")]
pub struct Config {
    /// Tracing filter expression, e.g. `info` or `arbor_core=debug`.
    #[serde(default = "defaults::default_log_filter_string")]
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default)]
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Prefix that marks a client directive.
    #[serde(default = "defaults::default_cmd_char")]
    #[ortho_config(default = defaults::default_cmd_char())]
    pub cmd_char: char,
    /// Whether input may be split into several statements.
    #[serde(default = "defaults::default_multi_statement")]
    #[ortho_config(default = defaults::default_multi_statement())]
    pub multi_statement: bool,
    /// Maximum number of history entries retained.
    #[serde(default = "defaults::default_max_history")]
    #[ortho_config(default = defaults::default_max_history())]
    pub max_history: usize,
    /// Seconds between background metadata polls.
    #[serde(default = "defaults::default_poll_interval_secs")]
    #[ortho_config(default = defaults::default_poll_interval_secs())]
    pub poll_interval_secs: u64,
    /// Count fetches slower than this many milliseconds disable count refresh.
    #[serde(default = "defaults::default_count_latency_threshold_ms")]
    #[ortho_config(default = defaults::default_count_latency_threshold_ms())]
    pub count_latency_threshold_ms: u64,
    /// Application name sent as transaction metadata.
    #[serde(default = "defaults::default_app_name")]
    #[ortho_config(default = defaults::default_app_name())]
    pub app_name: String,
    /// Discovery endpoint queried at startup.
    #[serde(default)]
    pub discovery_endpoint: Option<Url>,
    /// HTTP base URL used for REST directives and the HTTP driver.
    #[serde(default)]
    pub http_endpoint: Option<Url>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            cmd_char: defaults::default_cmd_char(),
            multi_statement: defaults::default_multi_statement(),
            max_history: defaults::default_max_history(),
            poll_interval_secs: defaults::default_poll_interval_secs(),
            count_latency_threshold_ms: defaults::default_count_latency_threshold_ms(),
            app_name: defaults::default_app_name(),
            discovery_endpoint: None,
            http_endpoint: None,
        }
    }
}

impl Config {
    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Structured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Client directive prefix.
    #[must_use]
    pub const fn cmd_char(&self) -> char {
        self.cmd_char
    }

    /// Whether multi-statement scripts are split.
    #[must_use]
    pub const fn multi_statement(&self) -> bool {
        self.multi_statement
    }

    /// History capacity.
    #[must_use]
    pub const fn max_history(&self) -> usize {
        self.max_history
    }

    /// Interval between metadata polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Latency above which automatic count refresh is switched off.
    #[must_use]
    pub const fn count_latency_threshold(&self) -> Duration {
        Duration::from_millis(self.count_latency_threshold_ms)
    }

    /// Application name sent as transaction metadata.
    #[must_use]
    pub fn app_name(&self) -> &str {
        self.app_name.as_str()
    }

    /// Discovery endpoint, when configured.
    #[must_use]
    pub const fn discovery_endpoint(&self) -> Option<&Url> {
        self.discovery_endpoint.as_ref()
    }

    /// HTTP base URL, when configured.
    #[must_use]
    pub const fn http_endpoint(&self) -> Option<&Url> {
        self.http_endpoint.as_ref()
    }

    /// Rejects values the engine cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.cmd_char.is_whitespace() || self.cmd_char.is_alphanumeric() {
            return Err(ConfigValidationError::InvalidCmdChar(self.cmd_char));
        }
        if self.max_history == 0 {
            return Err(ConfigValidationError::ZeroHistory);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigValidationError::ZeroPollInterval);
        }
        if self.app_name.trim().is_empty() {
            return Err(ConfigValidationError::EmptyAppName);
        }
        Ok(())
    }
}

/// Errors produced by [`Config::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// The directive prefix must be a printable, non-alphanumeric character.
    #[error("'{0}' cannot be used as the command prefix")]
    InvalidCmdChar(char),
    /// History must hold at least one entry.
    #[error("max_history must be greater than zero")]
    ZeroHistory,
    /// Poll interval must be positive.
    #[error("poll_interval_secs must be greater than zero")]
    ZeroPollInterval,
    /// Transaction metadata requires an application name.
    #[error("app_name must not be empty")]
    EmptyAppName,
}
