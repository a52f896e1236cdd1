//! Engine-facing settings and the `:config` key space.

use std::time::Duration;

use arbor_config::Config;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Default row limit shown by `:config`.
pub const DEFAULT_MAX_ROWS: u64 = 1000;

/// Errors raised when `:config` receives an unusable change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// The key is not a recognised setting.
    #[error("unknown setting '{0}'")]
    UnknownKey(String),
    /// The value has the wrong shape for the key.
    #[error("setting '{key}' expects {expected}")]
    InvalidValue {
        /// Setting key.
        key: String,
        /// Description of the accepted values.
        expected: &'static str,
    },
}

impl SettingsError {
    fn invalid(key: &str, expected: &'static str) -> Self {
        Self::InvalidValue {
            key: key.to_owned(),
            expected,
        }
    }
}

/// Settings the engine consults while dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Prefix that marks client directives.
    pub cmd_char: char,
    /// Whether input is split into scripts.
    pub multi_statement: bool,
    /// History capacity.
    pub max_history: usize,
    /// Row limit, informational.
    pub max_rows: u64,
    /// Transaction metadata `app` value.
    pub app_name: String,
    /// Metadata poll interval.
    pub poll_interval: Duration,
    /// Count fetches slower than this disable automatic count refresh.
    pub count_latency_threshold: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ClientSettings {
    /// Projects the engine settings out of the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            cmd_char: config.cmd_char(),
            multi_statement: config.multi_statement(),
            max_history: config.max_history(),
            max_rows: DEFAULT_MAX_ROWS,
            app_name: config.app_name().to_owned(),
            poll_interval: config.poll_interval(),
            count_latency_threshold: config.count_latency_threshold(),
        }
    }

    /// Applies `changes` keyed by their `:config` names.
    ///
    /// Nothing is applied when any change is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] for unknown keys or mistyped values.
    pub fn apply(&mut self, changes: &Map<String, Value>) -> Result<(), SettingsError> {
        let mut next = self.clone();
        for (key, value) in changes {
            next.apply_one(key, value)?;
        }
        *self = next;
        Ok(())
    }

    fn apply_one(&mut self, key: &str, value: &Value) -> Result<(), SettingsError> {
        match key {
            "cmdchar" => {
                let mut chars = value.as_str().unwrap_or_default().chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if !c.is_alphanumeric() && !c.is_whitespace() => {
                        self.cmd_char = c;
                    }
                    _ => return Err(SettingsError::invalid(key, "a single punctuation character")),
                }
            }
            "maxHistory" => {
                self.max_history = value
                    .as_u64()
                    .filter(|limit| *limit > 0)
                    .and_then(|limit| usize::try_from(limit).ok())
                    .ok_or_else(|| SettingsError::invalid(key, "a positive integer"))?;
            }
            "maxRows" => {
                self.max_rows = value
                    .as_u64()
                    .filter(|limit| *limit > 0)
                    .ok_or_else(|| SettingsError::invalid(key, "a positive integer"))?;
            }
            "enableMultiStatementMode" => {
                self.multi_statement = value
                    .as_bool()
                    .ok_or_else(|| SettingsError::invalid(key, "true or false"))?;
            }
            other => return Err(SettingsError::UnknownKey(other.to_owned())),
        }
        Ok(())
    }

    /// Settings as shown by `:config`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "cmdchar": self.cmd_char.to_string(),
            "maxHistory": self.max_history,
            "maxRows": self.max_rows,
            "enableMultiStatementMode": self.multi_statement,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn changes(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[rstest]
    fn projects_config_defaults() {
        let settings = ClientSettings::default();
        assert_eq!(settings.cmd_char, ':');
        assert!(settings.multi_statement);
        assert_eq!(settings.max_history, 30);
        assert_eq!(settings.poll_interval, Duration::from_secs(20));
        assert_eq!(settings.app_name, "arbor");
    }

    #[rstest]
    fn applies_recognised_keys() {
        let mut settings = ClientSettings::default();
        settings
            .apply(&changes(json!({
                "cmdchar": "!",
                "maxHistory": 5,
                "enableMultiStatementMode": false,
            })))
            .expect("valid changes");
        assert_eq!(settings.cmd_char, '!');
        assert_eq!(settings.max_history, 5);
        assert!(!settings.multi_statement);
    }

    #[rstest]
    #[case(json!({"cmdchar": "ab"}))]
    #[case(json!({"cmdchar": "a"}))]
    #[case(json!({"maxHistory": 0}))]
    #[case(json!({"maxRows": "many"}))]
    #[case(json!({"enableMultiStatementMode": 1}))]
    #[case(json!({"maxHistory": 3, "colour": "red"}))]
    fn rejects_bad_changes_atomically(#[case] change: Value) {
        let mut settings = ClientSettings::default();
        let before = settings.clone();
        assert!(settings.apply(&changes(change)).is_err());
        assert_eq!(settings, before);
    }
}
