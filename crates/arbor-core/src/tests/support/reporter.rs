//! Test double for [`HealthReporter`] that records lifecycle events.

use std::sync::Mutex;

use crate::errors::ErrorPayload;
use crate::health::HealthReporter;
use crate::session::ConnectOrigin;

/// Lifecycle events captured during a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    ConnectStarting(String, ConnectOrigin),
    ConnectSucceeded(String, ConnectOrigin),
    ConnectFailed(String, ConnectOrigin),
    Disconnected(String),
    StartupFailed(String),
    CredentialsExpired,
}

#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn connect_starting(&self, host: &str, origin: ConnectOrigin) {
        self.record(HealthEvent::ConnectStarting(host.to_owned(), origin));
    }

    fn connect_succeeded(&self, host: &str, origin: ConnectOrigin) {
        self.record(HealthEvent::ConnectSucceeded(host.to_owned(), origin));
    }

    fn connect_failed(&self, host: &str, origin: ConnectOrigin, _error: &ErrorPayload) {
        self.record(HealthEvent::ConnectFailed(host.to_owned(), origin));
    }

    fn disconnected(&self, reason: &str) {
        self.record(HealthEvent::Disconnected(reason.to_owned()));
    }

    fn startup_failed(&self, host: &str, _error: &ErrorPayload) {
        self.record(HealthEvent::StartupFailed(host.to_owned()));
    }

    fn credentials_expired(&self) {
        self.record(HealthEvent::CredentialsExpired);
    }
}
