//! Connection session state machine.
//!
//! The machine owns the single [`ConnectionSession`] and is its only writer.
//! Transitions are plain methods; the engine performs the network work and
//! reports back through them. Connect attempts are numbered so that a newer
//! attempt supersedes an older one instead of queueing behind it.

mod discovery;
mod password;
mod timeout;
mod timer;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

pub use self::discovery::{
    DiscoveryError, DiscoveryFetcher, DiscoveryInputs, DiscoveryRecord, DiscoverySource,
    SsoProvider, discover, merge_records,
};
pub use self::password::{PasswordChange, PasswordChangeMethod, change_password};
pub use self::timeout::{CREDENTIAL_TIMEOUT_KEY, parse_credential_timeout};
use self::timer::CredentialsTimer;
use crate::dispatch::EventSender;
use crate::driver::{AuthMethod, ConnectionTarget, Credentials, DriverError};
use crate::errors::{ErrorKind, ErrorPayload};
use crate::ids::ConnectionId;

/// Tracing target for session transitions.
pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Connection status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No transport is open.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Pending,
    /// The transport is open.
    Connected,
}

/// What started a connect attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOrigin {
    /// A user action.
    #[default]
    User,
    /// The one automatic attempt made after discovery.
    Startup,
    /// Reconnecting after a forced password change.
    PasswordChange,
}

/// The single active connection record.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSession {
    /// Identifier issued when the connection was established.
    pub id: Option<ConnectionId>,
    /// Server address with scheme.
    pub host: Option<String>,
    /// Account name.
    pub username: Option<String>,
    #[serde(skip)]
    secret: Option<String>,
    /// Authentication scheme.
    pub auth_method: AuthMethod,
    /// Require an encrypted transport.
    pub encrypted: bool,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Database statements run against.
    pub active_db: Option<String>,
    /// Database the user asked for.
    pub requested_db: Option<String>,
    /// Failure of the last attempt or of the lost transport.
    pub last_error: Option<ErrorPayload>,
    /// Identity providers offered by the server.
    pub sso_providers: Vec<SsoProvider>,
    /// Server version learnt through discovery or metadata.
    pub server_version: Option<String>,
    /// Server edition learnt through discovery or metadata.
    pub server_edition: Option<String>,
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("status", &self.status)
            .field("active_db", &self.active_db)
            .field("requested_db", &self.requested_db)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Whether the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Whether a password or token is held.
    #[must_use]
    pub const fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Credentials for the stored account.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        match (self.auth_method, &self.username) {
            (AuthMethod::Bearer, _) => Credentials::bearer(self.secret.clone().unwrap_or_default()),
            (AuthMethod::Basic, Some(username)) => {
                Credentials::basic(username, self.secret.clone().unwrap_or_default())
            }
            _ => Credentials::none(),
        }
    }

    /// Target for reconnecting with the stored details.
    #[must_use]
    pub fn target(&self) -> Option<ConnectionTarget> {
        self.host.as_ref().map(|host| ConnectionTarget {
            host: host.clone(),
            credentials: self.credentials(),
            encrypted: self.encrypted,
            database: self.requested_db.clone(),
        })
    }
}

/// Result of settling a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTransition {
    /// A newer attempt or a disconnect replaced this one.
    Superseded,
    /// The session is now connected.
    Connected {
        /// What started the attempt.
        origin: ConnectOrigin,
    },
    /// The attempt failed and the session is disconnected.
    Failed {
        /// What started the attempt.
        origin: ConnectOrigin,
        /// Failure shown to the user.
        error: ErrorPayload,
    },
}

/// Owner of the connection session and the credentials timer.
#[derive(Debug, Default)]
pub struct SessionMachine {
    session: ConnectionSession,
    attempt: u64,
    origin: ConnectOrigin,
    timer: CredentialsTimer,
}

impl SessionMachine {
    /// Creates an empty, disconnected machine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session.
    #[must_use]
    pub const fn session(&self) -> &ConnectionSession {
        &self.session
    }

    /// Number of the newest connect attempt.
    #[must_use]
    pub const fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Seeds the session from merged discovery data. Never connects.
    ///
    /// Seeding a connected or pending session only refreshes server facts.
    pub fn seed(
        &mut self,
        record: &DiscoveryRecord,
        credentials: Option<Credentials>,
        database: Option<String>,
    ) {
        let session = &mut self.session;
        for provider in &record.sso_providers {
            if !session.sso_providers.iter().any(|known| known.id == provider.id) {
                session.sso_providers.push(provider.clone());
            }
        }
        if session.server_version.is_none() {
            session.server_version.clone_from(&record.version);
        }
        if session.server_edition.is_none() {
            session.server_edition.clone_from(&record.edition);
        }
        if session.status != ConnectionStatus::Disconnected {
            return;
        }

        if record.host.is_some() {
            session.host.clone_from(&record.host);
        }
        match credentials {
            Some(credentials) => {
                session.auth_method = credentials.method;
                session.username = (credentials.method == AuthMethod::Basic)
                    .then_some(credentials.username);
                session.secret = Some(credentials.password);
            }
            None if record.username.is_some() => {
                session.auth_method = AuthMethod::Basic;
                session.username.clone_from(&record.username);
            }
            None => {}
        }
        if database.is_some() {
            session.requested_db = database;
        }
        debug!(target: SESSION_TARGET, host = ?session.host, "seeded session from discovery");
    }

    /// Starts a connect attempt, superseding any attempt in flight.
    ///
    /// Returns the attempt number to settle with.
    pub fn begin_connect(&mut self, target: &ConnectionTarget, origin: ConnectOrigin) -> u64 {
        self.timer.cancel();
        self.attempt += 1;
        self.origin = origin;

        let session = &mut self.session;
        session.id = None;
        session.status = ConnectionStatus::Pending;
        session.host = Some(target.host.clone());
        session.auth_method = target.credentials.method;
        session.username = (!target.credentials.username.is_empty())
            .then(|| target.credentials.username.clone());
        session.secret = Some(target.credentials.password.clone());
        session.encrypted = target.encrypted;
        if target.database.is_some() {
            session.requested_db.clone_from(&target.database);
        }
        session.active_db = None;
        session.last_error = None;
        info!(target: SESSION_TARGET, attempt = self.attempt, host = %target.host, "connect attempt started");
        self.attempt
    }

    /// Settles connect attempt `attempt`.
    pub fn finish_connect(
        &mut self,
        attempt: u64,
        result: Result<(), DriverError>,
    ) -> ConnectTransition {
        if attempt != self.attempt || self.session.status != ConnectionStatus::Pending {
            debug!(target: SESSION_TARGET, attempt, current = self.attempt, "ignoring superseded connect attempt");
            return ConnectTransition::Superseded;
        }
        let origin = self.origin;
        let session = &mut self.session;
        match result {
            Ok(()) => {
                session.id = Some(ConnectionId::new());
                session.status = ConnectionStatus::Connected;
                session.active_db.clone_from(&session.requested_db);
                ConnectTransition::Connected { origin }
            }
            Err(error) => {
                let error = error.to_payload();
                session.status = ConnectionStatus::Disconnected;
                session.secret = None;
                session.last_error = Some(error.clone());
                ConnectTransition::Failed { origin, error }
            }
        }
    }

    /// Disconnects locally. Returns whether a session was open or pending.
    pub fn disconnect(&mut self) -> bool {
        self.timer.cancel();
        self.attempt += 1;
        let session = &mut self.session;
        let was_active = session.status != ConnectionStatus::Disconnected;
        session.id = None;
        session.status = ConnectionStatus::Disconnected;
        session.requested_db = None;
        session.active_db = None;
        session.secret = None;
        was_active
    }

    /// Handles a transport lost after connect attempt `attempt` succeeded.
    ///
    /// Returns the error to show, or `None` when the report is stale.
    pub fn connection_lost(&mut self, attempt: u64, reason: &str) -> Option<ErrorPayload> {
        if attempt != self.attempt || !self.session.is_connected() {
            return None;
        }
        self.timer.cancel();
        let error = ErrorPayload::new(ErrorKind::Connection, format!("connection lost: {reason}"));
        let session = &mut self.session;
        session.id = None;
        session.status = ConnectionStatus::Disconnected;
        session.active_db = None;
        session.last_error = Some(error.clone());
        Some(error)
    }

    /// Switches the database statements run against.
    pub fn use_database(&mut self, name: &str) {
        self.session.requested_db = Some(name.to_owned());
        self.session.active_db = Some(name.to_owned());
    }

    /// Records server facts learnt from metadata.
    pub fn set_server_info(&mut self, version: Option<String>, edition: Option<String>) {
        if version.is_some() {
            self.session.server_version = version;
        }
        if edition.is_some() {
            self.session.server_edition = edition;
        }
    }

    /// Identity provider by id.
    #[must_use]
    pub fn sso_provider(&self, id: &str) -> Option<&SsoProvider> {
        self.session.sso_providers.iter().find(|provider| provider.id == id)
    }

    /// Re-arms the credentials timer after user activity.
    pub fn record_interaction(&mut self, bus: &EventSender) {
        if self.session.is_connected() {
            self.timer.arm(bus);
        }
    }

    /// Arms the credentials timer for a freshly connected session.
    pub fn start_credentials_timer(&mut self, bus: &EventSender) {
        if self.session.is_connected() {
            self.timer.arm(bus);
        }
    }

    /// Applies a timeout read from the server configuration.
    pub fn configure_credentials_timeout(&mut self, timeout: Option<Duration>, bus: &EventSender) {
        if !self.timer.set_timeout(timeout) {
            return;
        }
        debug!(target: SESSION_TARGET, ?timeout, "credentials timeout changed");
        if self.session.is_connected() {
            self.timer.arm(bus);
        } else {
            self.timer.cancel();
        }
    }

    /// Configured credentials timeout.
    #[must_use]
    pub const fn credentials_timeout(&self) -> Option<Duration> {
        self.timer.timeout()
    }

    /// Whether the credentials timer is counting down.
    #[must_use]
    pub const fn credentials_timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Handles a credentials timer expiry. Returns whether the session was
    /// force-disconnected.
    pub fn credentials_expired(&mut self, generation: u64) -> bool {
        if !self.timer.is_current(generation) || !self.session.is_connected() {
            return false;
        }
        info!(target: SESSION_TARGET, "credentials expired, disconnecting");
        self.disconnect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn target() -> ConnectionTarget {
        ConnectionTarget {
            host: "neo4j://db:7687".to_owned(),
            credentials: Credentials::basic("neo4j", "secret"),
            encrypted: false,
            database: Some("movies".to_owned()),
        }
    }

    #[rstest]
    fn successful_connect_activates_requested_database(target: ConnectionTarget) {
        let mut machine = SessionMachine::new();
        let attempt = machine.begin_connect(&target, ConnectOrigin::User);
        assert_eq!(machine.session().status, ConnectionStatus::Pending);

        let transition = machine.finish_connect(attempt, Ok(()));
        assert_eq!(transition, ConnectTransition::Connected { origin: ConnectOrigin::User });
        assert!(machine.session().is_connected());
        assert!(machine.session().id.is_some());
        assert_eq!(machine.session().active_db.as_deref(), Some("movies"));
    }

    #[rstest]
    fn failed_connect_keeps_host_and_username_but_drops_password(target: ConnectionTarget) {
        let mut machine = SessionMachine::new();
        let attempt = machine.begin_connect(&target, ConnectOrigin::User);
        let transition = machine.finish_connect(attempt, Err(DriverError::unauthorized("bad password")));

        assert!(matches!(transition, ConnectTransition::Failed { .. }));
        let session = machine.session();
        assert_eq!(session.status, ConnectionStatus::Disconnected);
        assert_eq!(session.host.as_deref(), Some("neo4j://db:7687"));
        assert_eq!(session.username.as_deref(), Some("neo4j"));
        assert!(!session.has_secret());
        assert_eq!(
            session.last_error.as_ref().map(|error| error.kind),
            Some(ErrorKind::Connection)
        );
    }

    #[rstest]
    fn newer_attempt_supersedes_older(target: ConnectionTarget) {
        let mut machine = SessionMachine::new();
        let first = machine.begin_connect(&target, ConnectOrigin::User);
        let second = machine.begin_connect(&target, ConnectOrigin::User);

        assert_eq!(machine.finish_connect(first, Ok(())), ConnectTransition::Superseded);
        assert_eq!(machine.session().status, ConnectionStatus::Pending);
        assert!(matches!(
            machine.finish_connect(second, Ok(())),
            ConnectTransition::Connected { .. }
        ));
    }

    #[rstest]
    fn disconnect_blanks_password_and_database(target: ConnectionTarget) {
        let mut machine = SessionMachine::new();
        let attempt = machine.begin_connect(&target, ConnectOrigin::User);
        machine.finish_connect(attempt, Ok(()));

        assert!(machine.disconnect());
        let session = machine.session();
        assert_eq!(session.status, ConnectionStatus::Disconnected);
        assert!(session.requested_db.is_none());
        assert!(session.active_db.is_none());
        assert!(!session.has_secret());
        assert!(!machine.disconnect());
    }

    #[rstest]
    fn disconnect_while_pending_supersedes_the_attempt(target: ConnectionTarget) {
        let mut machine = SessionMachine::new();
        let attempt = machine.begin_connect(&target, ConnectOrigin::User);
        machine.disconnect();
        assert_eq!(machine.finish_connect(attempt, Ok(())), ConnectTransition::Superseded);
        assert_eq!(machine.session().status, ConnectionStatus::Disconnected);
    }

    #[rstest]
    fn stale_connection_loss_is_ignored(target: ConnectionTarget) {
        let mut machine = SessionMachine::new();
        let first = machine.begin_connect(&target, ConnectOrigin::User);
        machine.finish_connect(first, Ok(()));
        let second = machine.begin_connect(&target, ConnectOrigin::User);
        machine.finish_connect(second, Ok(()));

        assert_eq!(machine.connection_lost(first, "reset"), None);
        assert!(machine.session().is_connected());
        assert!(machine.connection_lost(second, "reset").is_some());
        assert!(!machine.session().is_connected());
    }

    #[rstest]
    fn seeding_twice_does_not_duplicate_providers() {
        let mut record = DiscoveryRecord::new(DiscoverySource::Endpoint).with_host("neo4j://db:7687");
        record.sso_providers = vec![SsoProvider {
            id: "okta".to_owned(),
            name: "Okta".to_owned(),
            auth_flow: "pkce".to_owned(),
            auth_endpoint: None,
            params: serde_json::Map::new(),
        }];
        let mut machine = SessionMachine::new();
        machine.seed(&record, None, None);
        machine.seed(&record, None, None);
        assert_eq!(machine.session().sso_providers.len(), 1);
        assert_eq!(machine.session().host.as_deref(), Some("neo4j://db:7687"));
        assert_eq!(machine.session().status, ConnectionStatus::Disconnected);
    }
}
