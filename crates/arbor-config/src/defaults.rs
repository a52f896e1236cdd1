//! Built-in defaults shared by the configuration loader and its callers.

use crate::logging::LogFormat;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Character that marks a client directive.
pub const DEFAULT_CMD_CHAR: char = ':';

/// Number of history entries retained before the oldest is evicted.
pub const DEFAULT_MAX_HISTORY: usize = 30;

/// Interval between background metadata polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;

/// Count fetches slower than this disable automatic count refresh.
pub const DEFAULT_COUNT_LATENCY_THRESHOLD_MS: u64 = 1000;

/// Application name reported in transaction metadata.
pub const DEFAULT_APP_NAME: &str = "arbor";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

pub(crate) fn default_cmd_char() -> char {
    DEFAULT_CMD_CHAR
}

pub(crate) fn default_multi_statement() -> bool {
    true
}

pub(crate) fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

pub(crate) fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

pub(crate) fn default_count_latency_threshold_ms() -> u64 {
    DEFAULT_COUNT_LATENCY_THRESHOLD_MS
}

pub(crate) fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_owned()
}
