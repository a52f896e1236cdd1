//! Typed events flowing into and out of the engine.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::driver::{ConnectionTarget, DriverError};
use crate::errors::{ErrorPayload, Outcome};
use crate::ids::RequestId;
use crate::launch::LaunchParams;
use crate::poll::{Counts, Metadata, MetadataSnapshot};
use crate::router::Completion;
use crate::session::{ConnectionSession, DiscoveryRecord, PasswordChange, PasswordChangeMethod};
use crate::tracker::RequestStatus;

/// Raw user input plus its execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Text as typed.
    pub text: String,
    /// Display element the command came from.
    pub source_id: Option<String>,
    /// Request tracking the command; the script request for multi-statement
    /// input.
    pub request_id: RequestId,
    /// Re-execution of an earlier command; not recorded in history.
    pub is_rerun: bool,
    /// Database override.
    pub target_db: Option<String>,
}

impl Command {
    /// Command with a fresh request id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: None,
            request_id: RequestId::new(),
            is_rerun: false,
            target_db: None,
        }
    }

    /// Marks the command as a rerun.
    #[must_use]
    pub const fn rerun(mut self) -> Self {
        self.is_rerun = true;
        self
    }

    /// Runs the command against `database`.
    #[must_use]
    pub fn on_database(mut self, database: impl Into<String>) -> Self {
        self.target_db = Some(database.into());
        self
    }

    /// Tags the command with the display element it came from.
    #[must_use]
    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// Events processed by the engine, one at a time, in arrival order.
///
/// Variants after [`EngineEvent::Shutdown`] are completions posted by tasks
/// the engine spawned.
#[derive(Debug)]
pub enum EngineEvent {
    /// User input to classify and execute.
    Submit(Command),
    /// Any user activity; re-arms the credentials timer.
    UserInteraction,
    /// Cancel a request or a whole script.
    CancelRequest(RequestId),
    /// Switch to a new connection.
    Connect(ConnectionTarget),
    /// Disconnect the active session.
    Disconnect,
    /// Run discovery, the startup connect and the startup commands.
    Startup(LaunchParams),
    /// Change an account password over a side transport, then reconnect.
    ForcePasswordChange(PasswordChange),
    /// Refresh metadata now, subject to the poll throttle.
    RefreshMetadata,
    /// Turn automatic count refresh back on.
    EnableCountRefresh,
    /// Start single sign-on with an identity provider.
    SsoLogin {
        /// Provider id.
        provider_id: String,
    },
    /// Stop processing events.
    Shutdown,
    /// Discovery finished.
    DiscoveryCompleted {
        /// Records from every source that answered.
        records: Vec<DiscoveryRecord>,
        /// Launch parameters that started discovery.
        launch: LaunchParams,
    },
    /// A deferred statement settled.
    StatementSettled {
        /// Statement request.
        id: RequestId,
        /// Its completion.
        completion: Completion,
    },
    /// A connect attempt settled.
    ConnectSettled {
        /// Attempt number.
        attempt: u64,
        /// Driver result.
        result: Result<(), DriverError>,
    },
    /// The driver lost the transport of a connect attempt.
    ConnectionLost {
        /// Attempt that opened the transport.
        attempt: u64,
        /// Driver detail.
        reason: String,
    },
    /// The credentials timer fired.
    CredentialsExpired {
        /// Timer generation.
        generation: u64,
    },
    /// The poll interval elapsed.
    PollTick {
        /// Poll loop generation.
        generation: u64,
    },
    /// A metadata fetch settled.
    PollSettled {
        /// Poll loop generation.
        generation: u64,
        /// Fetch result.
        result: Result<MetadataSnapshot, DriverError>,
    },
    /// A count fetch settled.
    CountsSettled {
        /// Poll loop generation.
        generation: u64,
        /// Fetch result.
        result: Result<Counts, DriverError>,
        /// How long the fetch took.
        elapsed: Duration,
    },
    /// The driver answered a cancel request.
    CancelSettled {
        /// Canceled request.
        id: RequestId,
        /// Whether the driver had a cancel hook.
        acknowledged: bool,
    },
    /// A forced password change settled.
    PasswordChangeSettled {
        /// The change that was attempted.
        request: PasswordChange,
        /// Which statement succeeded, or why both failed.
        result: Result<PasswordChangeMethod, ErrorPayload>,
    },
    /// The transport was closed after a disconnect.
    TransportClosed,
}

impl EngineEvent {
    /// Whether the event completes a task spawned by the engine.
    #[must_use]
    pub(crate) const fn settles_task(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryCompleted { .. }
                | Self::StatementSettled { .. }
                | Self::ConnectSettled { .. }
                | Self::PollSettled { .. }
                | Self::CountsSettled { .. }
                | Self::CancelSettled { .. }
                | Self::PasswordChangeSettled { .. }
                | Self::TransportClosed
        )
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Submit(_) => "submit",
            Self::UserInteraction => "user_interaction",
            Self::CancelRequest(_) => "cancel_request",
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
            Self::Startup(_) => "startup",
            Self::ForcePasswordChange(_) => "force_password_change",
            Self::RefreshMetadata => "refresh_metadata",
            Self::EnableCountRefresh => "enable_count_refresh",
            Self::SsoLogin { .. } => "sso_login",
            Self::Shutdown => "shutdown",
            Self::DiscoveryCompleted { .. } => "discovery_completed",
            Self::StatementSettled { .. } => "statement_settled",
            Self::ConnectSettled { .. } => "connect_settled",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::CredentialsExpired { .. } => "credentials_expired",
            Self::PollTick { .. } => "poll_tick",
            Self::PollSettled { .. } => "poll_settled",
            Self::CountsSettled { .. } => "counts_settled",
            Self::CancelSettled { .. } => "cancel_settled",
            Self::PasswordChangeSettled { .. } => "password_change_settled",
            Self::TransportClosed => "transport_closed",
        }
    }
}

/// Sending half of the engine bus.
#[derive(Debug, Clone)]
pub struct EventSender(UnboundedSender<EngineEvent>);

impl EventSender {
    pub(crate) const fn new(sender: UnboundedSender<EngineEvent>) -> Self {
        Self(sender)
    }

    /// Posts an event. Returns `false` once the engine has stopped.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.0.send(event).is_ok()
    }
}

/// Events emitted for the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutputEvent {
    /// A frame for a statement or script was created.
    FrameCreated {
        /// Request the frame shows.
        request_id: RequestId,
        /// Script the statement belongs to.
        parent_id: Option<RequestId>,
        /// Display element the command came from.
        source_id: Option<String>,
        /// Statement text.
        text: String,
    },
    /// A request changed status.
    RequestUpdated {
        /// Request id.
        request_id: RequestId,
        /// New status.
        status: RequestStatus,
        /// Success value.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
    /// The previous error banner should disappear.
    ErrorBannerCleared,
    /// An error to show outside any frame.
    ErrorBanner {
        /// Error detail.
        error: ErrorPayload,
    },
    /// The session changed.
    SessionChanged {
        /// New session state.
        session: ConnectionSession,
    },
    /// The automatic startup connect failed; no retry follows.
    StartupFailed {
        /// Host that was tried.
        host: String,
        /// Failure detail.
        error: ErrorPayload,
    },
    /// A launch command outside the safe set was ignored.
    UnsupportedStartupCommand {
        /// Command name.
        command: String,
        /// Its argument.
        argument: String,
    },
    /// Metadata changed.
    MetadataUpdated {
        /// Latest metadata.
        metadata: Metadata,
    },
    /// Counts were too slow and will no longer refresh automatically.
    CountRefreshDisabled {
        /// Duration of the slow fetch.
        elapsed_ms: u64,
    },
    /// The user should be sent to an identity provider.
    SsoRedirect {
        /// Provider id.
        provider_id: String,
        /// Authorisation URL.
        url: String,
    },
    /// Text to place in the editor.
    EditorContent {
        /// Editor text.
        text: String,
    },
    /// A forced password change succeeded.
    PasswordChanged {
        /// Account name.
        username: String,
    },
    /// A forced password change failed.
    PasswordChangeFailed {
        /// Failure detail.
        error: ErrorPayload,
    },
    /// Input held nothing to run.
    NoOp {
        /// Request of the empty command.
        request_id: RequestId,
    },
    /// All frames should be removed.
    FramesCleared,
    /// The session was disconnected by the credentials timer.
    CredentialsTimedOut,
}

impl OutputEvent {
    pub(crate) fn request_updated(
        request_id: RequestId,
        status: RequestStatus,
        outcome: Option<&Outcome>,
    ) -> Self {
        let (result, error) = match outcome {
            Some(Ok(value)) => (Some(value.clone()), None),
            Some(Err(error)) => (None, Some(error.clone())),
            None => (None, None),
        };
        Self::RequestUpdated {
            request_id,
            status,
            result,
            error,
        }
    }
}
