//! Serial execution state of a multi-statement script.

use std::collections::VecDeque;

use serde_json::json;

use crate::classify::Statement;
use crate::errors::{ErrorKind, ErrorPayload, Outcome};
use crate::ids::RequestId;
use crate::tracker::RequestStatus;

/// Children of one script, run one at a time in submission order.
///
/// Once a child fails or is canceled the script halts: the remaining
/// children are skipped without running.
#[derive(Debug)]
pub(crate) struct ScriptRun {
    pending: VecDeque<Statement>,
    current: Option<RequestId>,
    failure: Option<ErrorPayload>,
    target_db: Option<String>,
    total: usize,
    succeeded: usize,
}

impl ScriptRun {
    pub(crate) fn new(children: Vec<Statement>, target_db: Option<String>) -> Self {
        Self {
            total: children.len(),
            pending: children.into(),
            current: None,
            failure: None,
            target_db,
            succeeded: 0,
        }
    }

    pub(crate) fn target_db(&self) -> Option<String> {
        self.target_db.clone()
    }

    pub(crate) const fn current(&self) -> Option<RequestId> {
        self.current
    }

    pub(crate) fn is_current(&self, id: RequestId) -> bool {
        self.current == Some(id)
    }

    pub(crate) const fn is_halted(&self) -> bool {
        self.failure.is_some()
    }

    /// Next child to run, unless one is running or the script halted.
    pub(crate) fn next(&mut self) -> Option<Statement> {
        if self.current.is_some() || self.is_halted() {
            return None;
        }
        let statement = self.pending.pop_front()?;
        self.current = Some(statement.id);
        Some(statement)
    }

    /// Children that will never run because the script halted.
    pub(crate) fn drain_skipped(&mut self) -> Vec<Statement> {
        if self.is_halted() && self.current.is_none() {
            self.pending.drain(..).collect()
        } else {
            Vec::new()
        }
    }

    /// Records how the running child settled.
    pub(crate) fn settle_current(&mut self, status: RequestStatus, error: Option<ErrorPayload>) {
        self.current = None;
        match status {
            RequestStatus::Success | RequestStatus::Skipped => self.succeeded += 1,
            _ if self.failure.is_none() => {
                self.failure = Some(error.unwrap_or_else(|| {
                    ErrorPayload::new(ErrorKind::Statement, "statement did not succeed")
                }));
            }
            _ => {}
        }
    }

    /// Halts the script after a cancel request.
    pub(crate) fn halt(&mut self, error: ErrorPayload) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// Whether every child settled.
    pub(crate) fn is_finished(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    /// Outcome of the script request.
    pub(crate) fn outcome(&self) -> Outcome {
        match &self.failure {
            Some(error) => Err(ErrorPayload {
                message: format!(
                    "script stopped after {} of {} statements: {}",
                    self.succeeded, self.total, error.message
                ),
                ..error.clone()
            }),
            None => Ok(json!({"statements": self.total, "succeeded": self.succeeded})),
        }
    }
}
