//! Maps classified statements to handlers and executes them.
//!
//! Routing is a pure lookup from directive name to [`Handler`]. Execution
//! reads a [`RouteContext`] snapshot and either completes immediately or
//! returns a future that resolves to a [`Completion`]. State changes are not
//! applied here: handlers describe them as [`Intent`]s, and the engine
//! applies them once the statement succeeds. The router never fails: every
//! path resolves to an [`Outcome`](crate::errors::Outcome).

mod directives;
mod query;
mod rest;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

pub use self::query::{TransactionMode, transaction_mode};
pub use self::rest::{RestClient, RestRequest, RestVerb};
use crate::classify::{ClassifyError, Statement, StatementKind};
use crate::driver::{Driver, Params};
use crate::errors::{ErrorPayload, Outcome};
use crate::history::History;
use crate::poll::Metadata;
use crate::session::ConnectionSession;
use crate::settings::ClientSettings;
use crate::tracker::RequestTracker;

/// Tracing target for routing.
pub(crate) const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

/// Directive names the router recognises.
pub const DIRECTIVES: &[&str] = &[
    "help", "play", "server", "param", "params", "queries", "history", "clear", "config", "style",
    "schema", "use", "auto", "get", "put", "post", "delete", "head",
];

/// Handler selected for a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    /// `:help [topic]`
    Help,
    /// `:play [guide]`
    Play,
    /// `:server status|connect|disconnect|change-password|user`
    Server,
    /// `:param name => value`
    Param,
    /// `:params`, `:params {..}`, `:params clear`
    Params,
    /// `:queries`
    Queries,
    /// `:history`, `:history clear`
    History,
    /// `:clear`
    Clear,
    /// `:config`, `:config key: value`, `:config {..}`, `:config reset`
    Config,
    /// `:style`, `:style reset`, `:style <source>`
    Style,
    /// `:schema`
    Schema,
    /// `:use <database>`
    Use,
    /// `:auto <query>`
    Auto,
    /// REST verb directives.
    Rest(RestVerb),
    /// A query for the server.
    Query,
    /// A directive nobody handles.
    Unknown(String),
    /// A directive dropped from a script.
    Ignored(String),
}

impl Handler {
    /// Looks up a directive by its lower-cased name.
    #[must_use]
    pub fn from_directive(name: &str) -> Self {
        match name {
            "help" => Self::Help,
            "play" => Self::Play,
            "server" => Self::Server,
            "param" => Self::Param,
            "params" => Self::Params,
            "queries" => Self::Queries,
            "history" => Self::History,
            "clear" => Self::Clear,
            "config" => Self::Config,
            "style" => Self::Style,
            "schema" => Self::Schema,
            "use" => Self::Use,
            "auto" => Self::Auto,
            other => RestVerb::parse(other).map_or_else(|| Self::Unknown(other.to_owned()), Self::Rest),
        }
    }

    /// Handler name as used in logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Help => "help",
            Self::Play => "play",
            Self::Server => "server",
            Self::Param => "param",
            Self::Params => "params",
            Self::Queries => "queries",
            Self::History => "history",
            Self::Clear => "clear",
            Self::Config => "config",
            Self::Style => "style",
            Self::Schema => "schema",
            Self::Use => "use",
            Self::Auto => "auto",
            Self::Rest(verb) => verb.as_str(),
            Self::Query => "query",
            Self::Unknown(name) | Self::Ignored(name) => name,
        }
    }
}

/// Resolves the handler for `statement`.
#[must_use]
pub fn route(statement: &Statement, prefix: char) -> Handler {
    match statement.kind {
        StatementKind::Query => Handler::Query,
        StatementKind::ClientDirective => {
            let name = statement.directive_name(prefix).unwrap_or_default();
            if statement.ignored {
                Handler::Ignored(name)
            } else {
                Handler::from_directive(&name)
            }
        }
    }
}

/// State change requested by a handler, applied by the engine when the
/// statement succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Merge into the parameter set.
    SetParams(Params),
    /// Replace the parameter set.
    ReplaceParams(Params),
    /// Empty the parameter set.
    ClearParams,
    /// Empty the history.
    ClearHistory,
    /// Replace the client settings.
    UpdateSettings(ClientSettings),
    /// Set or reset the style source.
    SetStyle(Option<String>),
    /// Switch the active database.
    UseDatabase(String),
    /// Disconnect the session.
    Disconnect,
    /// Remove every frame from the display.
    ClearFrames,
}

/// Settled result of one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Success value or error payload.
    pub outcome: Outcome,
    /// State changes to apply on success.
    pub intents: Vec<Intent>,
}

impl Completion {
    /// Successful completion without intents.
    #[must_use]
    pub const fn ok(value: Value) -> Self {
        Self {
            outcome: Ok(value),
            intents: Vec::new(),
        }
    }

    /// Failed completion.
    #[must_use]
    pub const fn err(error: ErrorPayload) -> Self {
        Self {
            outcome: Err(error),
            intents: Vec::new(),
        }
    }

    /// Adds an intent.
    #[must_use]
    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intents.push(intent);
        self
    }
}

impl From<Outcome> for Completion {
    fn from(outcome: Outcome) -> Self {
        Self {
            outcome,
            intents: Vec::new(),
        }
    }
}

/// Future resolving to a [`Completion`].
pub type Work = Pin<Box<dyn Future<Output = Completion> + Send + 'static>>;

/// How a statement runs.
pub enum Dispatched {
    /// Completed without suspending.
    Ready(Completion),
    /// Completes when the future resolves.
    Deferred(Work),
}

impl Dispatched {
    fn deferred(work: impl Future<Output = Completion> + Send + 'static) -> Self {
        Self::Deferred(Box::pin(work))
    }
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(completion) => formatter.debug_tuple("Ready").field(completion).finish(),
            Self::Deferred(_) => formatter.write_str("Deferred(..)"),
        }
    }
}

impl From<Completion> for Dispatched {
    fn from(completion: Completion) -> Self {
        Self::Ready(completion)
    }
}

/// Read-only view of engine state handed to handlers.
pub struct RouteContext<'a> {
    /// Current settings.
    pub settings: &'a ClientSettings,
    /// Settings restored by `:config reset`.
    pub default_settings: &'a ClientSettings,
    /// Current parameters.
    pub params: &'a Params,
    /// Command history.
    pub history: &'a History,
    /// Current style source.
    pub style: Option<&'a str>,
    /// Connection session.
    pub session: &'a ConnectionSession,
    /// Latest metadata.
    pub metadata: &'a Metadata,
    /// Request tracker, for `:queries`.
    pub tracker: &'a RequestTracker,
    /// Wire driver.
    pub driver: &'a Arc<dyn Driver>,
    /// REST client, when an HTTP endpoint is available.
    pub rest: Option<&'a Arc<dyn RestClient>>,
    /// Database override carried by the command.
    pub target_db: Option<&'a str>,
}

/// Executes `handler` for `statement`.
#[must_use]
pub fn execute(handler: &Handler, statement: &Statement, context: &RouteContext<'_>) -> Dispatched {
    let prefix = context.settings.cmd_char;
    let arguments = crate::classify::directive_arguments(&statement.text, prefix);
    match handler {
        Handler::Help => directives::help(arguments).into(),
        Handler::Play => directives::play(arguments).into(),
        Handler::Server => directives::server(arguments, context),
        Handler::Param => directives::param(arguments, context),
        Handler::Params => directives::params(arguments, context),
        Handler::Queries => directives::queries(context).into(),
        Handler::History => directives::history(arguments, context).into(),
        Handler::Clear => Completion::ok(Value::Null).with_intent(Intent::ClearFrames).into(),
        Handler::Config => directives::config(arguments, context).into(),
        Handler::Style => directives::style(arguments, context).into(),
        Handler::Schema => query::schema(context),
        Handler::Use => directives::use_database(arguments, context).into(),
        Handler::Auto | Handler::Query => query::run(statement, context),
        Handler::Rest(verb) => directives::rest(*verb, arguments, context),
        Handler::Unknown(name) => {
            Completion::err(ClassifyError::UnknownDirective { name: name.clone() }.to_payload()).into()
        }
        Handler::Ignored(name) => {
            Completion::err(ClassifyError::NotAllowedInScript { name: name.clone() }.to_payload()).into()
        }
    }
}
