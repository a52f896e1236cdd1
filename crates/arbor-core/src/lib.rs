//! Command dispatch and session engine for a graph database client.
//!
//! User input is classified into client directives and server queries,
//! routed to handlers and tracked through its lifecycle. A single ordered
//! event bus drives everything else: the connection session state machine
//! (discovery, single sign-on, credential expiry, forced password changes)
//! and the throttled metadata poller. Network work runs on spawned tasks
//! that report back over the same bus, so engine state has exactly one
//! owner.
//!
//! The wire protocol sits behind the [`Driver`] trait. [`HttpDriver`] speaks
//! the transactional HTTP endpoint; tests substitute in-memory fakes.

pub mod classify;
mod dispatch;
mod driver;
mod errors;
mod health;
mod history;
mod http;
mod ids;
mod launch;
mod params;
mod poll;
pub mod router;
pub mod session;
mod settings;
mod telemetry;
mod tracker;

pub use classify::{Statement, StatementKind, classify};
pub use dispatch::{
    Command, Engine, EngineBuilder, EngineEvent, EngineHandle, EventSender, OutputEvent,
    OutputReceiver,
};
pub use driver::{
    AuthMethod, ConnectionTarget, Credentials, Driver, DriverError, LostConnectionNotifier,
    Params, QueryOptions, QueryResult, Record, TxKind, TxMetadata,
};
pub use errors::{ErrorKind, ErrorPayload, Outcome};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use history::History;
pub use http::{
    HttpDiscovery, HttpDriver, HttpError, HttpRestClient, http_base_for_host,
    parse_commit_response,
};
pub use ids::{ConnectionId, RequestId};
pub use launch::{LaunchError, LaunchParams, StartupCommand};
pub use params::{ParamAssignment, ParamError, parse_literal};
pub use poll::{
    Counts, CountsVerdict, DatabaseInfo, Metadata, MetadataPoller, MetadataSnapshot,
    RefreshDecision, fetch_counts, fetch_metadata,
};
pub use settings::{ClientSettings, DEFAULT_MAX_ROWS, SettingsError};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use tracker::{Request, RequestStatus, RequestTracker};

#[cfg(test)]
mod tests;
