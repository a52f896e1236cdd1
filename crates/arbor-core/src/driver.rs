//! The wire-call surface the engine consumes.
//!
//! The low-level protocol driver lives outside the engine. Everything the
//! engine needs from it is captured by the [`Driver`] trait: open and close
//! the single transport, run a statement with parameters and transaction
//! metadata, optionally cancel one, and run a statement on a throwaway side
//! transport.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::dispatch::{EngineEvent, EventSender};
use crate::errors::{ErrorKind, ErrorPayload};
use crate::ids::RequestId;

/// Statement parameters keyed by name.
pub type Params = Map<String, Value>;

/// A single result row keyed by column name.
pub type Record = Map<String, Value>;

/// Who issued a statement, reported to the server as transaction metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Typed by the user.
    #[serde(rename = "user-direct")]
    UserDirect,
    /// Issued by the engine itself (metadata polls, schema listing, ...).
    #[serde(rename = "system")]
    System,
}

/// Transaction metadata attached to every statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetadata {
    /// Application name.
    pub app: String,
    /// Statement origin.
    #[serde(rename = "type")]
    pub kind: TxKind,
}

impl TxMetadata {
    /// Metadata for a user-issued statement.
    pub fn user_direct(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            kind: TxKind::UserDirect,
        }
    }

    /// Metadata for an engine-issued statement.
    pub fn system(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            kind: TxKind::System,
        }
    }
}

/// Per-statement execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Database to run against; `None` uses the server default.
    pub use_db: Option<String>,
    /// Run outside an explicit write transaction.
    pub auto_commit: bool,
    /// Transaction metadata.
    pub metadata: TxMetadata,
    /// Request the statement belongs to, used by cancel hooks.
    pub request_id: Option<RequestId>,
}

impl QueryOptions {
    /// Options for an engine-issued statement.
    pub fn system(app: impl Into<String>, use_db: Option<String>) -> Self {
        Self {
            use_db,
            auto_commit: false,
            metadata: TxMetadata::system(app),
            request_id: None,
        }
    }
}

/// Rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in order.
    pub keys: Vec<String>,
    /// Result rows.
    pub records: Vec<Record>,
}

impl QueryResult {
    /// Builds a result from its columns and rows.
    #[must_use]
    pub fn new(keys: Vec<String>, records: Vec<Record>) -> Self {
        Self { keys, records }
    }

    /// Value of `key` in the first row.
    #[must_use]
    pub fn first_value(&self, key: &str) -> Option<&Value> {
        self.records.first().and_then(|record| record.get(key))
    }

    /// JSON form handed to the display layer.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "keys": self.keys,
            "records": self.records,
        })
    }
}

/// How a session authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Username and password.
    #[default]
    Basic,
    /// Bearer token obtained through single sign-on.
    Bearer,
    /// No authentication.
    None,
}

/// Credentials used to open a transport.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Username; empty for bearer and anonymous authentication.
    pub username: String,
    /// Password or bearer token.
    pub password: String,
    /// Authentication scheme.
    pub method: AuthMethod,
}

impl Credentials {
    /// Username and password credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            method: AuthMethod::Basic,
        }
    }

    /// Anonymous access.
    #[must_use]
    pub fn none() -> Self {
        Self {
            method: AuthMethod::None,
            ..Self::default()
        }
    }

    /// Bearer token credentials.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            username: String::new(),
            password: token.into(),
            method: AuthMethod::Bearer,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("method", &self.method)
            .finish()
    }
}

/// Everything needed to open a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Server address including scheme, e.g. `neo4j://localhost:7687`.
    pub host: String,
    /// Authentication material.
    pub credentials: Credentials,
    /// Require an encrypted transport.
    pub encrypted: bool,
    /// Database the transport should target, when fixed.
    pub database: Option<String>,
}

/// Callback handed to [`Driver::connect`] so the driver can report a transport
/// that dropped after a successful connect.
#[derive(Debug, Clone)]
pub struct LostConnectionNotifier {
    bus: EventSender,
    attempt: u64,
}

impl LostConnectionNotifier {
    pub(crate) fn new(bus: EventSender, attempt: u64) -> Self {
        Self { bus, attempt }
    }

    /// Reports that the transport opened by this connect attempt was lost.
    pub fn notify(&self, reason: impl Into<String>) {
        self.bus.send(EngineEvent::ConnectionLost {
            attempt: self.attempt,
            reason: reason.into(),
        });
    }
}

/// Failures reported by a [`Driver`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The server could not be reached.
    #[error("server unreachable: {message}")]
    Unreachable {
        /// Transport detail.
        message: String,
    },
    /// The server rejected the credentials.
    #[error("authentication failed: {message}")]
    Unauthorized {
        /// Server detail.
        message: String,
    },
    /// The server rejected the statement.
    #[error("{code}: {message}")]
    Server {
        /// Server status code, e.g. `Neo.ClientError.Statement.SyntaxError`.
        code: String,
        /// Server message.
        message: String,
    },
    /// No transport is open.
    #[error("no open connection")]
    NotConnected,
    /// The statement was canceled.
    #[error("statement canceled")]
    Canceled,
}

impl DriverError {
    /// Creates an unreachable-server error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a server-side statement error.
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Server status code, when there is one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Whether the failure concerns the transport rather than the statement.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Unauthorized { .. } | Self::NotConnected
        )
    }

    /// Whether the server lacks multi-database support for the statement.
    ///
    /// Servers without a `system` database answer in-band administration
    /// statements with a missing-database or syntax error.
    #[must_use]
    pub fn is_multi_database_unsupported(&self) -> bool {
        match self {
            Self::Server { code, message } => {
                code == "Neo.ClientError.Database.DatabaseNotFound"
                    || code == "Neo.ClientError.Statement.SyntaxError"
                    || message.to_ascii_lowercase().contains("multi-database")
            }
            _ => false,
        }
    }

    /// Converts the failure into a display payload.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        let kind = match self {
            Self::Canceled => ErrorKind::Canceled,
            other if other.is_connection_error() => ErrorKind::Connection,
            _ => ErrorKind::Statement,
        };
        let payload = ErrorPayload::new(kind, self.to_string());
        match self.code() {
            Some(code) => payload.with_code(code),
            None => payload,
        }
    }
}

/// Asynchronous wire-call surface to one database server.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens the transport described by `target`.
    async fn connect(
        &self,
        target: &ConnectionTarget,
        on_lost: LostConnectionNotifier,
    ) -> Result<(), DriverError>;

    /// Runs a statement on the open transport.
    async fn query(
        &self,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<QueryResult, DriverError>;

    /// Closes the open transport. Failures are swallowed by the driver.
    async fn close(&self);

    /// Asks the server to cancel the statement running for `request`.
    ///
    /// Returns `false` when the driver has no cancel hook.
    async fn cancel(&self, _request: RequestId) -> bool {
        false
    }

    /// Runs one statement on a temporary transport that is closed afterwards.
    async fn run_isolated(
        &self,
        target: &ConnectionTarget,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<QueryResult, DriverError>;
}
