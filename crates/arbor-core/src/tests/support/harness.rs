//! Drives an [`Engine`] over fakes and collects what it emits.

use std::sync::Arc;

use crate::dispatch::{Command, Engine, EngineBuilder, EngineEvent, OutputEvent, OutputReceiver};
use crate::driver::{ConnectionTarget, Credentials};
use crate::errors::Outcome;
use crate::ids::RequestId;
use crate::settings::ClientSettings;
use crate::tracker::RequestStatus;

use super::driver::FakeDriver;
use super::reporter::RecordingHealthReporter;

pub const HOST: &str = "neo4j://localhost:7687";

/// Basic-auth target for [`HOST`].
pub fn target() -> ConnectionTarget {
    ConnectionTarget {
        host: HOST.to_owned(),
        credentials: Credentials::basic("neo4j", "secret"),
        encrypted: false,
        database: None,
    }
}

pub struct Harness {
    pub engine: Engine,
    pub driver: Arc<FakeDriver>,
    pub reporter: Arc<RecordingHealthReporter>,
    output: OutputReceiver,
    seen: Vec<OutputEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ClientSettings::default(), |builder| builder)
    }

    pub fn with_settings(settings: ClientSettings) -> Self {
        Self::build(settings, |builder| builder)
    }

    /// Builds a harness, letting `customise` add collaborators.
    pub fn build(
        settings: ClientSettings,
        customise: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        let driver = Arc::new(FakeDriver::new());
        let reporter = Arc::new(RecordingHealthReporter::default());
        let builder = Engine::builder(driver.clone())
            .settings(settings)
            .health_reporter(reporter.clone());
        let (engine, output) = customise(builder).build();
        Self {
            engine,
            driver,
            reporter,
            output,
            seen: Vec::new(),
        }
    }

    /// Dispatches `event` and waits for everything it spawned.
    pub async fn send(&mut self, event: EngineEvent) {
        self.engine.dispatch(event);
        self.engine.run_until_idle().await;
        self.collect();
    }

    /// Dispatches `event` and lets ready tasks run without waiting for held
    /// ones.
    pub async fn nudge(&mut self, event: EngineEvent) {
        self.engine.dispatch(event);
        self.step().await;
    }

    /// Lets spawned tasks run and processes what they posted.
    pub async fn step(&mut self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
            self.engine.drain_ready();
        }
        self.collect();
    }

    pub async fn settle(&mut self) {
        self.engine.run_until_idle().await;
        self.collect();
    }

    /// Submits `text` and runs it to completion.
    pub async fn submit(&mut self, text: &str) -> RequestId {
        let command = Command::new(text);
        let id = command.request_id;
        self.send(EngineEvent::Submit(command)).await;
        id
    }

    pub async fn connect(&mut self) {
        self.send(EngineEvent::Connect(target())).await;
    }

    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.engine.tracker().status(id)
    }

    pub fn outcome(&self, id: RequestId) -> Option<Outcome> {
        self.engine
            .tracker()
            .get(id)
            .and_then(|request| request.result.clone())
    }

    /// Every event emitted so far.
    pub fn events(&mut self) -> &[OutputEvent] {
        self.collect();
        &self.seen
    }

    /// Forgets the events emitted so far.
    pub fn clear_events(&mut self) {
        self.collect();
        self.seen.clear();
    }

    pub fn emitted(&mut self, predicate: impl Fn(&OutputEvent) -> bool) -> bool {
        self.events().iter().any(predicate)
    }

    /// Requests of the frames created under `parent`, in order.
    pub fn children(&mut self, parent: RequestId) -> Vec<RequestId> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                OutputEvent::FrameCreated {
                    request_id,
                    parent_id: Some(owner),
                    ..
                } if *owner == parent => Some(*request_id),
                _ => None,
            })
            .collect()
    }

    fn collect(&mut self) {
        while let Ok(event) = self.output.try_recv() {
            self.seen.push(event);
        }
    }
}
