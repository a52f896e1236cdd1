//! The re-armable credentials timer.

use std::time::Duration;

use tokio::task::AbortHandle;

use crate::dispatch::{EngineEvent, EventSender};

/// Single process-wide timer that force-disconnects an idle session.
///
/// Every arm invalidates the previous one: expiries carry the generation they
/// were armed with and are ignored unless it is still current.
#[derive(Debug, Default)]
pub(crate) struct CredentialsTimer {
    timeout: Option<Duration>,
    generation: u64,
    handle: Option<AbortHandle>,
}

impl CredentialsTimer {
    pub(crate) const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Stores a new timeout. Returns whether it changed.
    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) -> bool {
        let changed = self.timeout != timeout;
        self.timeout = timeout;
        changed
    }

    /// Restarts the countdown. A disabled timeout only cancels.
    pub(crate) fn arm(&mut self, bus: &EventSender) {
        self.cancel();
        let Some(timeout) = self.timeout else {
            return;
        };
        let generation = self.generation;
        let bus = bus.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            bus.send(EngineEvent::CredentialsExpired { generation });
        });
        self.handle = Some(task.abort_handle());
    }

    pub(crate) fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub(crate) const fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

impl Drop for CredentialsTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
