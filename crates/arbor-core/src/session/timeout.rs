//! Credential timeout values read from the server's client configuration.

use std::time::Duration;

use serde_json::Value;

/// Client configuration key holding the credential timeout.
pub const CREDENTIAL_TIMEOUT_KEY: &str = "browser.credential_timeout";

/// Parses a credential timeout.
///
/// Accepts a number of seconds or a string holding plain seconds or
/// `<n>ms`, `<n>s`, `<n>m`, `<n>h`. Zero, `false`, empty, and unparseable
/// values disable the timeout and yield `None`.
#[must_use]
pub fn parse_credential_timeout(value: &Value) -> Option<Duration> {
    let duration = match value {
        Value::Number(number) => number.as_u64().map(Duration::from_secs),
        Value::String(text) => parse_text(text.trim()),
        _ => None,
    }?;
    (!duration.is_zero()).then_some(duration)
}

fn parse_text(text: &str) -> Option<Duration> {
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs),
        "h" => amount.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}
