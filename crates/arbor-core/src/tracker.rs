//! Correlates outstanding operations with their lifecycle.
//!
//! Every dispatched statement gets exactly one [`Request`]. Requests move from
//! `waiting` to a single terminal status, optionally passing through
//! `canceling`. Updates that would leave a terminal status are ignored, which
//! is what keeps late completions from resurrecting a canceled request.
//! Only the most recently settled requests stay queryable.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{ErrorKind, ErrorPayload, Outcome};
use crate::ids::RequestId;

const TRACKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tracker");

/// Settled requests kept before the oldest are forgotten.
pub(crate) const SETTLED_RETENTION: usize = 256;

fn canceled() -> ErrorPayload {
    ErrorPayload::new(ErrorKind::Canceled, "request canceled")
}

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Dispatched and not yet settled.
    Waiting,
    /// Cancellation requested; waiting for the operation to acknowledge.
    Canceling,
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Error,
    /// Never executed because an earlier sibling failed or it was ignored.
    Skipped,
    /// Canceled before completion.
    Canceled,
}

impl RequestStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::Skipped | Self::Canceled
        )
    }
}

/// One tracked operation.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request identifier.
    pub id: RequestId,
    /// Short description, e.g. the statement text.
    pub label: String,
    /// Current status.
    pub status: RequestStatus,
    /// Settled outcome, once terminal.
    pub result: Option<Outcome>,
    /// When the request was sent.
    pub started_at: Instant,
    /// When the request last changed status.
    pub updated_at: Instant,
    transitions: Vec<RequestStatus>,
}

impl Request {
    /// Every status the request has held, in order.
    #[must_use]
    pub fn transitions(&self) -> &[RequestStatus] {
        &self.transitions
    }

    /// Time since the request was sent.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn transition(&mut self, status: RequestStatus) {
        self.status = status;
        self.updated_at = Instant::now();
        self.transitions.push(status);
    }
}

/// Registry of requests keyed by id.
#[derive(Debug, Default)]
pub struct RequestTracker {
    requests: HashMap<RequestId, Request>,
    settled: VecDeque<RequestId>,
}

impl RequestTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request in `waiting`.
    ///
    /// Returns `false` if the id is already known; ids are never reused.
    pub fn send(&mut self, id: RequestId, label: impl Into<String>) -> bool {
        if self.requests.contains_key(&id) {
            return false;
        }
        let now = Instant::now();
        self.requests.insert(
            id,
            Request {
                id,
                label: label.into(),
                status: RequestStatus::Waiting,
                result: None,
                started_at: now,
                updated_at: now,
                transitions: vec![RequestStatus::Waiting],
            },
        );
        debug!(target: TRACKER_TARGET, request = %id, "request sent");
        true
    }

    /// Settles a request with `outcome`.
    ///
    /// A `waiting` request moves to `Success` or `Error`. A request that is
    /// `canceling` treats the completion as the acknowledgement and becomes
    /// `Canceled`, discarding the outcome. Terminal requests are left alone.
    /// Returns the status reached, or `None` when the update was ignored.
    pub fn update(&mut self, id: RequestId, outcome: Outcome) -> Option<RequestStatus> {
        let request = self.requests.get_mut(&id)?;
        let status = match request.status {
            RequestStatus::Waiting => {
                let status = if outcome.is_ok() {
                    RequestStatus::Success
                } else {
                    RequestStatus::Error
                };
                request.result = Some(outcome);
                request.transition(status);
                status
            }
            RequestStatus::Canceling => {
                request.result = Some(Err(canceled()));
                request.transition(RequestStatus::Canceled);
                RequestStatus::Canceled
            }
            _ => {
                debug!(
                    target: TRACKER_TARGET,
                    request = %id,
                    status = ?request.status,
                    "ignoring late completion"
                );
                return None;
            }
        };
        self.retire(id);
        Some(status)
    }

    /// Marks a waiting request as skipped, recording why.
    pub fn skip(&mut self, id: RequestId, reason: Value) -> bool {
        let Some(request) = self
            .requests
            .get_mut(&id)
            .filter(|request| request.status == RequestStatus::Waiting)
        else {
            return false;
        };
        request.result = Some(Ok(reason));
        request.transition(RequestStatus::Skipped);
        self.retire(id);
        true
    }

    /// Starts cancelling a waiting request.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        match self.requests.get_mut(&id) {
            Some(request) if request.status == RequestStatus::Waiting => {
                request.transition(RequestStatus::Canceling);
                true
            }
            _ => false,
        }
    }

    /// Finishes a cancellation, whether or not the remote side acknowledged.
    pub fn complete_cancel(&mut self, id: RequestId) -> bool {
        let Some(request) = self.requests.get_mut(&id).filter(|request| {
            matches!(
                request.status,
                RequestStatus::Waiting | RequestStatus::Canceling
            )
        }) else {
            return false;
        };
        request.result = Some(Err(canceled()));
        request.transition(RequestStatus::Canceled);
        self.retire(id);
        true
    }

    fn retire(&mut self, id: RequestId) {
        self.settled.push_back(id);
        while self.settled.len() > SETTLED_RETENTION {
            if let Some(oldest) = self.settled.pop_front() {
                self.requests.remove(&oldest);
            }
        }
    }

    /// Looks up a request.
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    /// Current status of a request.
    #[must_use]
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.requests.get(&id).map(|request| request.status)
    }

    /// Requests that have not reached a terminal status, oldest first.
    #[must_use]
    pub fn in_flight(&self) -> Vec<&Request> {
        let mut pending: Vec<&Request> = self
            .requests
            .values()
            .filter(|request| !request.status.is_terminal())
            .collect();
        pending.sort_by_key(|request| request.started_at);
        pending
    }

    /// Number of tracked requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
