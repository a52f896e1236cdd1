//! Outcome and error payload types shared by every handler.
//!
//! Expected failures travel as data: handlers resolve to an [`Outcome`] whose
//! error side carries an [`ErrorPayload`] for the display layer. Nothing in
//! the dispatch path converts these into panics or early returns.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Result of executing one statement.
pub type Outcome = Result<Value, ErrorPayload>;

/// Failure category surfaced to the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server could not be reached or rejected the credentials.
    Connection,
    /// The server rejected a statement.
    Statement,
    /// The input could not be mapped to a handler.
    Classification,
    /// A capability fallback failed as well.
    Capability,
    /// A directive received arguments it cannot use.
    InvalidArgument,
    /// A REST directive failed.
    Http,
    /// The request was canceled before it completed.
    Canceled,
}

impl ErrorKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Statement => "statement",
            Self::Classification => "classification",
            Self::Capability => "capability",
            Self::InvalidArgument => "invalid_argument",
            Self::Http => "http",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error detail attached to a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ErrorPayload {
    /// Failure category.
    pub kind: ErrorKind,
    /// Server status code, when the server supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Builds a payload without a server code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Attaches a server status code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Payload reported when a statement needs a connection and none exists.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::new(ErrorKind::Connection, "no connection to the database")
            .with_code("Arbor.ClientError.NotConnected")
    }

    /// Payload reported for an unrecognised directive.
    pub fn unknown_command(name: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Classification,
            format!("unknown command '{name}'"),
        )
    }

    /// Payload reported for invalid directive arguments.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }
}
