//! Structured reporting of session lifecycle events.

use std::sync::Arc;

use crate::errors::ErrorPayload;
use crate::session::ConnectOrigin;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer for session lifecycle events.
pub trait HealthReporter: Send + Sync {
    /// A connect attempt started.
    fn connect_starting(&self, host: &str, origin: ConnectOrigin);

    /// A connect attempt succeeded.
    fn connect_succeeded(&self, host: &str, origin: ConnectOrigin);

    /// A connect attempt failed.
    fn connect_failed(&self, host: &str, origin: ConnectOrigin, error: &ErrorPayload);

    /// The session was disconnected.
    fn disconnected(&self, reason: &str);

    /// The one automatic startup connect failed.
    fn startup_failed(&self, host: &str, error: &ErrorPayload);

    /// The credentials timer fired.
    fn credentials_expired(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn connect_starting(&self, host: &str, origin: ConnectOrigin) {
        (**self).connect_starting(host, origin);
    }

    fn connect_succeeded(&self, host: &str, origin: ConnectOrigin) {
        (**self).connect_succeeded(host, origin);
    }

    fn connect_failed(&self, host: &str, origin: ConnectOrigin, error: &ErrorPayload) {
        (**self).connect_failed(host, origin, error);
    }

    fn disconnected(&self, reason: &str) {
        (**self).disconnected(reason);
    }

    fn startup_failed(&self, host: &str, error: &ErrorPayload) {
        (**self).startup_failed(host, error);
    }

    fn credentials_expired(&self) {
        (**self).credentials_expired();
    }
}

/// Reporter that records lifecycle events as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn connect_starting(&self, host: &str, origin: ConnectOrigin) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connect_starting",
            host,
            ?origin,
            "connecting"
        );
    }

    fn connect_succeeded(&self, host: &str, origin: ConnectOrigin) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connect_succeeded",
            host,
            ?origin,
            "connected"
        );
    }

    fn connect_failed(&self, host: &str, origin: ConnectOrigin, error: &ErrorPayload) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "connect_failed",
            host,
            ?origin,
            error = %error,
            "connect attempt failed"
        );
    }

    fn disconnected(&self, reason: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "disconnected",
            reason,
            "session disconnected"
        );
    }

    fn startup_failed(&self, host: &str, error: &ErrorPayload) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "startup_failed",
            host,
            error = %error,
            "startup connect failed"
        );
    }

    fn credentials_expired(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "credentials_expired",
            "credentials timed out"
        );
    }
}
