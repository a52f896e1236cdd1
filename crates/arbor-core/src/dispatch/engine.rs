//! The dispatch loop.
//!
//! [`Engine`] owns every piece of mutable state and processes bus events one
//! at a time. Network work runs in spawned tasks that only post a completion
//! event back to the bus, so state is never touched concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};
use url::Url;

use super::DISPATCH_TARGET;
use super::events::{Command, EngineEvent, EventSender, OutputEvent};
use super::script::ScriptRun;
use crate::classify::{ClassifyError, Statement, classify};
use crate::driver::{
    ConnectionTarget, Credentials, Driver, DriverError, LostConnectionNotifier, Params,
};
use crate::errors::{ErrorKind, ErrorPayload};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::history::History;
use crate::ids::RequestId;
use crate::launch::{LaunchParams, StartupCommand};
use crate::poll::{
    Counts, CountsVerdict, Metadata, MetadataPoller, MetadataSnapshot, RefreshDecision,
    fetch_counts, fetch_metadata,
};
use crate::router::{Completion, Dispatched, Handler, Intent, RestClient, RouteContext, execute, route};
use crate::session::{
    CREDENTIAL_TIMEOUT_KEY, ConnectOrigin, ConnectTransition, ConnectionSession, ConnectionStatus,
    DiscoveryFetcher, DiscoveryInputs, DiscoveryRecord, PasswordChange, PasswordChangeMethod,
    SessionMachine, change_password, discover, merge_records, parse_credential_timeout,
};
use crate::settings::ClientSettings;
use crate::tracker::{RequestStatus, RequestTracker};

/// Receiving half of the display stream.
pub type OutputReceiver = UnboundedReceiver<OutputEvent>;

/// Assembles an [`Engine`] from its collaborators.
pub struct EngineBuilder {
    settings: ClientSettings,
    driver: Arc<dyn Driver>,
    discovery: Option<Arc<dyn DiscoveryFetcher>>,
    discovery_endpoint: Option<Url>,
    rest: Option<Arc<dyn RestClient>>,
    reporter: Arc<dyn HealthReporter>,
    stored: Option<DiscoveryRecord>,
}

impl EngineBuilder {
    /// Starts a builder around `driver` with default settings.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            settings: ClientSettings::default(),
            driver,
            discovery: None,
            discovery_endpoint: None,
            rest: None,
            reporter: Arc::new(StructuredHealthReporter::new()),
            stored: None,
        }
    }

    /// Uses `settings` as both the current and the `:config reset` settings.
    #[must_use]
    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Enables network discovery through `fetcher`, optionally against a
    /// configured endpoint.
    #[must_use]
    pub fn discovery(mut self, fetcher: Arc<dyn DiscoveryFetcher>, endpoint: Option<Url>) -> Self {
        self.discovery = Some(fetcher);
        self.discovery_endpoint = endpoint;
        self
    }

    /// Enables the REST verb directives.
    #[must_use]
    pub fn rest_client(mut self, client: Arc<dyn RestClient>) -> Self {
        self.rest = Some(client);
        self
    }

    /// Replaces the health reporter.
    #[must_use]
    pub fn health_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Remembers a connection from an earlier session.
    #[must_use]
    pub fn stored_connection(mut self, record: DiscoveryRecord) -> Self {
        self.stored = Some(record);
        self
    }

    /// Builds the engine and the stream of display events.
    #[must_use]
    pub fn build(self) -> (Engine, OutputReceiver) {
        let (bus, events) = mpsc::unbounded_channel();
        let (output, outputs) = mpsc::unbounded_channel();
        let engine = Engine {
            default_settings: self.settings.clone(),
            settings: self.settings,
            params: Params::new(),
            history: History::new(),
            style: None,
            tracker: RequestTracker::new(),
            session: SessionMachine::new(),
            poller: MetadataPoller::new(),
            metadata: Metadata::default(),
            scripts: HashMap::new(),
            startup_commands: Vec::new(),
            driver: self.driver,
            discovery: self.discovery,
            discovery_endpoint: self.discovery_endpoint,
            rest: self.rest,
            reporter: self.reporter,
            stored: self.stored,
            transport_lock: Arc::new(Mutex::new(())),
            bus: EventSender::new(bus),
            events,
            output,
            pending_tasks: 0,
            stopping: false,
        };
        (engine, outputs)
    }
}

/// Cloneable handle for posting events to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    bus: EventSender,
}

impl EngineHandle {
    /// Submits user input.
    pub fn submit(&self, command: Command) -> bool {
        self.bus.send(EngineEvent::Submit(command))
    }

    /// Posts any event.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.bus.send(event)
    }
}

/// Command dispatch and session orchestration engine.
pub struct Engine {
    settings: ClientSettings,
    default_settings: ClientSettings,
    params: Params,
    history: History,
    style: Option<String>,
    tracker: RequestTracker,
    session: SessionMachine,
    poller: MetadataPoller,
    metadata: Metadata,
    scripts: HashMap<RequestId, ScriptRun>,
    startup_commands: Vec<StartupCommand>,
    driver: Arc<dyn Driver>,
    discovery: Option<Arc<dyn DiscoveryFetcher>>,
    discovery_endpoint: Option<Url>,
    rest: Option<Arc<dyn RestClient>>,
    reporter: Arc<dyn HealthReporter>,
    stored: Option<DiscoveryRecord>,
    transport_lock: Arc<Mutex<()>>,
    bus: EventSender,
    events: UnboundedReceiver<EngineEvent>,
    output: UnboundedSender<OutputEvent>,
    pending_tasks: usize,
    stopping: bool,
}

impl Engine {
    /// Starts a builder around `driver`.
    #[must_use]
    pub fn builder(driver: Arc<dyn Driver>) -> EngineBuilder {
        EngineBuilder::new(driver)
    }

    /// Handle for posting events.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            bus: self.bus.clone(),
        }
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Current parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Command history.
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Current style source.
    #[must_use]
    pub fn style(&self) -> Option<&str> {
        self.style.as_deref()
    }

    /// Request tracker.
    #[must_use]
    pub const fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Connection session.
    #[must_use]
    pub const fn session(&self) -> &ConnectionSession {
        self.session.session()
    }

    /// Session state machine.
    #[must_use]
    pub const fn session_machine(&self) -> &SessionMachine {
        &self.session
    }

    /// Metadata poller.
    #[must_use]
    pub const fn poller(&self) -> &MetadataPoller {
        &self.poller
    }

    /// Latest metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Processes events until `Shutdown` has been received and every spawned
    /// task has reported back.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.dispatch(event);
            if self.stopping && self.pending_tasks == 0 {
                break;
            }
        }
        debug!(target: DISPATCH_TARGET, "dispatch loop stopped");
    }

    /// Processes events until the bus is empty and no spawned task is
    /// outstanding. Timers do not count as outstanding work.
    pub async fn run_until_idle(&mut self) {
        loop {
            self.drain_ready();
            if self.pending_tasks == 0 {
                return;
            }
            match self.events.recv().await {
                Some(event) => self.dispatch(event),
                None => return,
            }
        }
    }

    /// Processes the events already queued without waiting for spawned
    /// tasks. Returns how many were processed.
    pub fn drain_ready(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
            processed += 1;
        }
        processed
    }

    /// Number of spawned tasks that have not reported back yet.
    #[must_use]
    pub const fn pending_tasks(&self) -> usize {
        self.pending_tasks
    }

    /// Processes one event.
    pub fn dispatch(&mut self, event: EngineEvent) {
        trace!(target: DISPATCH_TARGET, event = event.name(), "dispatching");
        if event.settles_task() {
            self.pending_tasks = self.pending_tasks.saturating_sub(1);
        } else if self.stopping {
            debug!(target: DISPATCH_TARGET, event = event.name(), "engine stopping, event dropped");
            return;
        }

        match event {
            EngineEvent::Submit(command) => self.submit(command),
            EngineEvent::UserInteraction => self.session.record_interaction(&self.bus),
            EngineEvent::CancelRequest(id) => self.cancel(id),
            EngineEvent::Connect(target) => self.connect(target, ConnectOrigin::User),
            EngineEvent::Disconnect => self.disconnect("user request"),
            EngineEvent::Startup(launch) => self.startup(launch),
            EngineEvent::ForcePasswordChange(request) => self.force_password_change(request),
            EngineEvent::RefreshMetadata => self.refresh_metadata(),
            EngineEvent::EnableCountRefresh => self.poller.enable_counts(),
            EngineEvent::SsoLogin { provider_id } => self.sso_login(&provider_id),
            EngineEvent::Shutdown => self.shutdown(),
            EngineEvent::DiscoveryCompleted { records, launch } => {
                self.discovery_completed(records, launch);
            }
            EngineEvent::StatementSettled { id, completion } => {
                if let Some(status) = self.settle(id, completion) {
                    self.child_settled(id, status);
                }
            }
            EngineEvent::ConnectSettled { attempt, result } => self.connect_settled(attempt, result),
            EngineEvent::ConnectionLost { attempt, reason } => self.connection_lost(attempt, &reason),
            EngineEvent::CredentialsExpired { generation } => self.credentials_expired(generation),
            EngineEvent::PollTick { generation } => {
                if self.poller.tick(generation) {
                    self.spawn_poll(generation);
                }
            }
            EngineEvent::PollSettled { generation, result } => self.poll_settled(generation, result),
            EngineEvent::CountsSettled {
                generation,
                result,
                elapsed,
            } => self.counts_settled(generation, result, elapsed),
            EngineEvent::CancelSettled { id, acknowledged } => self.cancel_settled(id, acknowledged),
            EngineEvent::PasswordChangeSettled { request, result } => {
                self.password_change_settled(request, result);
            }
            EngineEvent::TransportClosed => {
                debug!(target: DISPATCH_TARGET, "transport closed");
            }
        }
    }

    fn emit(&self, event: OutputEvent) {
        if self.output.send(event).is_err() {
            trace!(target: DISPATCH_TARGET, "display stream closed, output dropped");
        }
    }

    fn emit_session(&self) {
        self.emit(OutputEvent::SessionChanged {
            session: self.session.session().clone(),
        });
    }

    fn emit_request(&self, id: RequestId) {
        if let Some(request) = self.tracker.get(id) {
            self.emit(OutputEvent::request_updated(
                id,
                request.status,
                request.result.as_ref(),
            ));
        }
    }

    fn spawn_task<F>(&mut self, task: F)
    where
        F: Future<Output = EngineEvent> + Send + 'static,
    {
        self.pending_tasks += 1;
        let bus = self.bus.clone();
        tokio::spawn(async move {
            bus.send(task.await);
        });
    }

    // Statements and scripts.

    fn submit(&mut self, command: Command) {
        self.session.record_interaction(&self.bus);
        let mut statements = classify(
            &command.text,
            self.settings.cmd_char,
            self.settings.multi_statement,
        );
        if statements.is_empty() {
            self.emit(OutputEvent::NoOp {
                request_id: command.request_id,
            });
            return;
        }
        if !command.is_rerun {
            self.history.record(&command.text, self.settings.max_history);
        }
        self.emit(OutputEvent::ErrorBannerCleared);

        let is_script = statements
            .first()
            .is_some_and(|statement| statement.parent_id.is_some());
        if !is_script {
            if let Some(mut statement) = statements.pop() {
                statement.id = command.request_id;
                self.open_frame(&statement, command.source_id.clone());
                self.start_statement(statement, command.target_db);
            }
            return;
        }

        let parent = command.request_id;
        self.emit(OutputEvent::FrameCreated {
            request_id: parent,
            parent_id: None,
            source_id: command.source_id.clone(),
            text: command.text.clone(),
        });
        self.tracker.send(parent, command.text.as_str());
        self.emit_request(parent);
        for statement in &mut statements {
            statement.parent_id = Some(parent);
        }
        for statement in &statements {
            self.open_frame(statement, command.source_id.clone());
        }
        debug!(target: DISPATCH_TARGET, script = %parent, statements = statements.len(), "starting script");
        self.scripts
            .insert(parent, ScriptRun::new(statements, command.target_db));
        self.advance_script(parent);
    }

    fn open_frame(&mut self, statement: &Statement, source_id: Option<String>) {
        self.emit(OutputEvent::FrameCreated {
            request_id: statement.id,
            parent_id: statement.parent_id,
            source_id,
            text: statement.text.clone(),
        });
        self.tracker.send(statement.id, statement.text.as_str());
        self.emit_request(statement.id);
    }

    /// Runs a statement. Returns its status when it settled without
    /// suspending.
    fn start_statement(
        &mut self,
        statement: Statement,
        target_db: Option<String>,
    ) -> Option<RequestStatus> {
        let handler = route(&statement, self.settings.cmd_char);
        if let Handler::Ignored(name) = &handler {
            let reason = json!({
                "ignored": true,
                "reason": ClassifyError::NotAllowedInScript { name: name.clone() }.to_string(),
            });
            self.tracker.skip(statement.id, reason);
            self.emit_request(statement.id);
            return Some(RequestStatus::Skipped);
        }

        debug!(
            target: DISPATCH_TARGET,
            request = %statement.id,
            handler = handler.as_str(),
            "executing statement"
        );
        let dispatched = {
            let context = self.route_context(target_db.as_deref());
            execute(&handler, &statement, &context)
        };
        match dispatched {
            Dispatched::Ready(completion) => self.settle(statement.id, completion),
            Dispatched::Deferred(work) => {
                let id = statement.id;
                self.spawn_task(async move {
                    EngineEvent::StatementSettled {
                        id,
                        completion: work.await,
                    }
                });
                None
            }
        }
    }

    fn route_context<'a>(&'a self, target_db: Option<&'a str>) -> RouteContext<'a> {
        RouteContext {
            settings: &self.settings,
            default_settings: &self.default_settings,
            params: &self.params,
            history: &self.history,
            style: self.style.as_deref(),
            session: self.session.session(),
            metadata: &self.metadata,
            tracker: &self.tracker,
            driver: &self.driver,
            rest: self.rest.as_ref(),
            target_db,
        }
    }

    /// Records a completion. Intents apply only when the request succeeds.
    fn settle(&mut self, id: RequestId, completion: Completion) -> Option<RequestStatus> {
        let status = self.tracker.update(id, completion.outcome)?;
        self.emit_request(id);
        if status == RequestStatus::Success {
            for intent in completion.intents {
                self.apply_intent(intent);
            }
        }
        Some(status)
    }

    fn child_settled(&mut self, id: RequestId, status: RequestStatus) {
        let Some(parent) = self
            .scripts
            .iter()
            .find_map(|(parent, script)| script.is_current(id).then_some(*parent))
        else {
            return;
        };
        let error = self.request_error(id);
        if let Some(script) = self.scripts.get_mut(&parent) {
            script.settle_current(status, error);
        }
        self.advance_script(parent);
    }

    fn advance_script(&mut self, parent: RequestId) {
        loop {
            let Some(script) = self.scripts.get_mut(&parent) else {
                return;
            };
            for skipped in script.drain_skipped() {
                self.tracker.skip(
                    skipped.id,
                    json!({"reason": "an earlier statement in the script did not succeed"}),
                );
                self.emit_request(skipped.id);
            }

            let Some(script) = self.scripts.get_mut(&parent) else {
                return;
            };
            if script.is_finished() {
                self.finish_script(parent);
                return;
            }
            let Some(statement) = script.next() else {
                return;
            };
            let id = statement.id;
            let target_db = script.target_db();
            // Only a waiting child may run; one canceled before its turn
            // settles without reaching the driver.
            let status = match self.tracker.status(id) {
                Some(RequestStatus::Waiting) => self.start_statement(statement, target_db),
                Some(RequestStatus::Canceling) => {
                    self.tracker.complete_cancel(id);
                    self.emit_request(id);
                    Some(RequestStatus::Canceled)
                }
                Some(status) => Some(status),
                None => {
                    debug!(target: DISPATCH_TARGET, request = %id, "untracked script child dropped");
                    Some(RequestStatus::Skipped)
                }
            };
            let Some(status) = status else {
                return;
            };
            let error = self.request_error(id);
            if let Some(script) = self.scripts.get_mut(&parent) {
                script.settle_current(status, error);
            }
        }
    }

    fn request_error(&self, id: RequestId) -> Option<ErrorPayload> {
        self.tracker
            .get(id)
            .and_then(|request| request.result.clone())
            .and_then(Result::err)
    }

    fn finish_script(&mut self, parent: RequestId) {
        let Some(script) = self.scripts.remove(&parent) else {
            return;
        };
        self.tracker.update(parent, script.outcome());
        self.emit_request(parent);
        debug!(target: DISPATCH_TARGET, script = %parent, "script finished");
    }

    fn apply_intent(&mut self, intent: Intent) {
        match intent {
            Intent::SetParams(params) => self.params.extend(params),
            Intent::ReplaceParams(params) => self.params = params,
            Intent::ClearParams => self.params.clear(),
            Intent::ClearHistory => self.history.clear(),
            Intent::UpdateSettings(settings) => self.settings = settings,
            Intent::SetStyle(style) => self.style = style,
            Intent::UseDatabase(database) => {
                self.session.use_database(&database);
                self.emit_session();
                self.refresh_metadata();
            }
            Intent::Disconnect => self.disconnect("user request"),
            Intent::ClearFrames => self.emit(OutputEvent::FramesCleared),
        }
    }

    // Cancellation.

    fn cancel(&mut self, id: RequestId) {
        if let Some(script) = self.scripts.get_mut(&id) {
            script.halt(ErrorPayload::new(ErrorKind::Canceled, "script canceled"));
            let running = script.current();
            if self.tracker.cancel(id) {
                self.emit_request(id);
            }
            match running {
                Some(child) => self.cancel(child),
                None => self.advance_script(id),
            }
            return;
        }

        if !self.tracker.cancel(id) {
            debug!(target: DISPATCH_TARGET, request = %id, "request is not cancelable");
            return;
        }
        self.emit_request(id);
        let driver = Arc::clone(&self.driver);
        self.spawn_task(async move {
            let acknowledged = driver.cancel(id).await;
            EngineEvent::CancelSettled { id, acknowledged }
        });
    }

    fn cancel_settled(&mut self, id: RequestId, acknowledged: bool) {
        if !acknowledged {
            debug!(target: DISPATCH_TARGET, request = %id, "driver has no cancel hook, canceling locally");
        }
        if self.tracker.complete_cancel(id) {
            self.emit_request(id);
            self.child_settled(id, RequestStatus::Canceled);
        }
    }

    // Session transitions.

    fn connect(&mut self, target: ConnectionTarget, origin: ConnectOrigin) {
        self.poller.stop();
        let attempt = self.session.begin_connect(&target, origin);
        self.reporter.connect_starting(&target.host, origin);
        self.emit_session();

        let driver = Arc::clone(&self.driver);
        let lock = Arc::clone(&self.transport_lock);
        let on_lost = LostConnectionNotifier::new(self.bus.clone(), attempt);
        self.spawn_task(async move {
            let _transport = lock.lock().await;
            driver.close().await;
            let result = driver.connect(&target, on_lost).await;
            EngineEvent::ConnectSettled { attempt, result }
        });
    }

    fn connect_settled(&mut self, attempt: u64, result: Result<(), DriverError>) {
        let host = self.session().host.clone().unwrap_or_default();
        match self.session.finish_connect(attempt, result) {
            ConnectTransition::Superseded => {}
            ConnectTransition::Connected { origin } => {
                self.reporter.connect_succeeded(&host, origin);
                self.emit_session();
                self.session.start_credentials_timer(&self.bus);
                let generation = self.poller.start(self.settings.poll_interval, &self.bus);
                self.spawn_poll(generation);
                if origin == ConnectOrigin::Startup {
                    self.run_startup_commands();
                }
            }
            ConnectTransition::Failed { origin, error } => {
                self.reporter.connect_failed(&host, origin, &error);
                self.emit_session();
                self.emit(OutputEvent::ErrorBanner {
                    error: error.clone(),
                });
                if origin == ConnectOrigin::Startup {
                    self.reporter.startup_failed(&host, &error);
                    self.emit(OutputEvent::StartupFailed { host, error });
                    self.run_startup_commands();
                }
            }
        }
    }

    fn disconnect(&mut self, reason: &str) {
        self.poller.stop();
        let was_active = self.session.disconnect();
        self.reporter.disconnected(reason);
        self.emit_session();
        if was_active {
            self.close_transport();
        }
    }

    fn close_transport(&mut self) {
        let driver = Arc::clone(&self.driver);
        let lock = Arc::clone(&self.transport_lock);
        self.spawn_task(async move {
            let _transport = lock.lock().await;
            driver.close().await;
            EngineEvent::TransportClosed
        });
    }

    fn connection_lost(&mut self, attempt: u64, reason: &str) {
        let Some(error) = self.session.connection_lost(attempt, reason) else {
            debug!(target: DISPATCH_TARGET, attempt, "ignoring loss of a superseded transport");
            return;
        };
        self.poller.stop();
        self.reporter.disconnected(reason);
        self.emit_session();
        self.emit(OutputEvent::ErrorBanner { error });
    }

    fn credentials_expired(&mut self, generation: u64) {
        if !self.session.credentials_expired(generation) {
            return;
        }
        self.poller.stop();
        self.reporter.credentials_expired();
        self.emit(OutputEvent::CredentialsTimedOut);
        self.emit_session();
        self.close_transport();
    }

    fn startup(&mut self, launch: LaunchParams) {
        let inputs = DiscoveryInputs {
            stored: self.stored.clone(),
            forced_host: launch.connect_host.clone(),
            forced_username: launch.username.clone(),
            discovery_url: launch.discovery_url.clone(),
            endpoint: self.discovery_endpoint.clone(),
        };
        let fetcher = self.discovery.clone();
        self.spawn_task(async move {
            let records = discover(fetcher.as_deref(), inputs).await;
            EngineEvent::DiscoveryCompleted { records, launch }
        });
    }

    fn discovery_completed(&mut self, records: Vec<DiscoveryRecord>, launch: LaunchParams) {
        for command in launch.commands.iter().cloned() {
            match command {
                StartupCommand::Unsupported { command, argument } => {
                    warn!(target: DISPATCH_TARGET, %command, "unsupported startup command");
                    self.emit(OutputEvent::UnsupportedStartupCommand { command, argument });
                }
                supported => self.startup_commands.push(supported),
            }
        }

        if let Some(record) = merge_records(records) {
            self.session
                .seed(&record, launch.credentials(), launch.database.clone());
            self.emit_session();
        }
        let target = (self.session().status == ConnectionStatus::Disconnected)
            .then(|| self.session().target())
            .flatten();
        match target {
            Some(target) => self.connect(target, ConnectOrigin::Startup),
            None => self.run_startup_commands(),
        }
    }

    fn run_startup_commands(&mut self) {
        let prefix = self.settings.cmd_char;
        for command in std::mem::take(&mut self.startup_commands) {
            match command.directive(prefix) {
                Some(text) => self.submit(Command::new(text)),
                None => {
                    if let StartupCommand::Edit(text) = command {
                        self.emit(OutputEvent::EditorContent { text });
                    }
                }
            }
        }
    }

    fn sso_login(&mut self, provider_id: &str) {
        let Some(provider) = self.session.sso_provider(provider_id) else {
            self.emit(OutputEvent::ErrorBanner {
                error: ErrorPayload::invalid_argument(format!(
                    "unknown identity provider '{provider_id}'"
                )),
            });
            return;
        };
        let state = RequestId::new().to_string();
        let event = match provider.authorisation_url(&state) {
            Some(url) => OutputEvent::SsoRedirect {
                provider_id: provider_id.to_owned(),
                url: url.to_string(),
            },
            None => OutputEvent::ErrorBanner {
                error: ErrorPayload::invalid_argument(format!(
                    "identity provider '{provider_id}' has no usable authorisation endpoint"
                )),
            },
        };
        self.emit(event);
    }

    fn force_password_change(&mut self, request: PasswordChange) {
        let driver = Arc::clone(&self.driver);
        let app = self.settings.app_name.clone();
        self.spawn_task(async move {
            let result = change_password(driver.as_ref(), &request, &app).await;
            EngineEvent::PasswordChangeSettled { request, result }
        });
    }

    fn password_change_settled(
        &mut self,
        request: PasswordChange,
        result: Result<PasswordChangeMethod, ErrorPayload>,
    ) {
        match result {
            Ok(method) => {
                debug!(target: DISPATCH_TARGET, ?method, "password changed, reconnecting");
                self.emit(OutputEvent::PasswordChanged {
                    username: request.username.clone(),
                });
                let target = ConnectionTarget {
                    host: request.host,
                    credentials: Credentials::basic(request.username, request.new_password),
                    encrypted: request.encrypted,
                    database: None,
                };
                self.connect(target, ConnectOrigin::PasswordChange);
            }
            Err(error) => self.emit(OutputEvent::PasswordChangeFailed { error }),
        }
    }

    // Metadata.

    fn refresh_metadata(&mut self) {
        match self.poller.request_refresh() {
            RefreshDecision::Start => {
                let generation = self.poller.generation();
                self.spawn_poll(generation);
            }
            RefreshDecision::Coalesced => {
                trace!(target: DISPATCH_TARGET, "refresh coalesced with the outstanding poll");
            }
            RefreshDecision::Inactive => {
                trace!(target: DISPATCH_TARGET, "refresh ignored while disconnected");
            }
        }
    }

    fn spawn_poll(&mut self, generation: u64) {
        let driver = Arc::clone(&self.driver);
        let app = self.settings.app_name.clone();
        let database = self.session().active_db.clone();
        self.spawn_task(async move {
            let result = fetch_metadata(driver.as_ref(), &app, database.as_deref()).await;
            EngineEvent::PollSettled { generation, result }
        });
    }

    fn poll_settled(&mut self, generation: u64, result: Result<MetadataSnapshot, DriverError>) {
        let Some(forced) = self.poller.finish(generation) else {
            trace!(target: DISPATCH_TARGET, generation, "ignoring stale poll");
            return;
        };
        match result {
            Ok(snapshot) => {
                let timeout = snapshot
                    .client_config
                    .get(CREDENTIAL_TIMEOUT_KEY)
                    .and_then(parse_credential_timeout);
                self.session.configure_credentials_timeout(timeout, &self.bus);
                self.session.set_server_info(
                    snapshot.server_version.clone(),
                    snapshot.server_edition.clone(),
                );
                self.metadata.snapshot = snapshot;
                self.emit(OutputEvent::MetadataUpdated {
                    metadata: self.metadata.clone(),
                });
                if self.poller.begin_counts(generation, forced) {
                    self.spawn_counts(generation);
                }
            }
            Err(error) => warn!(target: DISPATCH_TARGET, %error, "metadata poll failed"),
        }
        if self.poller.take_follow_up() {
            self.spawn_poll(generation);
        }
    }

    fn spawn_counts(&mut self, generation: u64) {
        let driver = Arc::clone(&self.driver);
        let app = self.settings.app_name.clone();
        let database = self.session().active_db.clone();
        self.spawn_task(async move {
            let started = tokio::time::Instant::now();
            let result = fetch_counts(driver.as_ref(), &app, database.as_deref()).await;
            EngineEvent::CountsSettled {
                generation,
                result,
                elapsed: started.elapsed(),
            }
        });
    }

    fn counts_settled(
        &mut self,
        generation: u64,
        result: Result<Counts, DriverError>,
        elapsed: std::time::Duration,
    ) {
        match self.poller.finish_counts(
            generation,
            elapsed,
            self.settings.count_latency_threshold,
        ) {
            CountsVerdict::Stale => return,
            CountsVerdict::Disabled => self.emit(OutputEvent::CountRefreshDisabled {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            }),
            CountsVerdict::Kept => {}
        }
        match result {
            Ok(counts) => {
                self.metadata.counts = Some(counts);
                self.emit(OutputEvent::MetadataUpdated {
                    metadata: self.metadata.clone(),
                });
            }
            Err(error) => warn!(target: DISPATCH_TARGET, %error, "count fetch failed"),
        }
    }

    fn shutdown(&mut self) {
        debug!(target: DISPATCH_TARGET, pending = self.pending_tasks, "shutting down");
        self.stopping = true;
        self.poller.stop();
    }
}
