//! In-memory [`Driver`] with scripted responses and a call log.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::driver::{
    ConnectionTarget, Driver, DriverError, LostConnectionNotifier, Params, QueryOptions,
    QueryResult, TxKind,
};
use crate::ids::RequestId;

/// Observable driver interactions.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Connect {
        host: String,
    },
    Query {
        text: String,
        params: Params,
        database: Option<String>,
        kind: TxKind,
        request: Option<RequestId>,
    },
    Isolated {
        text: String,
        database: Option<String>,
    },
    Close,
    Cancel(RequestId),
}

/// Builds a single-column result.
pub fn rows(column: &str, values: Vec<Value>) -> QueryResult {
    let records = values
        .into_iter()
        .map(|value| {
            let mut record = Map::new();
            record.insert(column.to_owned(), value);
            record
        })
        .collect();
    QueryResult::new(vec![column.to_owned()], records)
}

/// Scriptable driver. Unscripted statements succeed with an empty result.
#[derive(Default)]
pub struct FakeDriver {
    calls: Mutex<Vec<DriverCall>>,
    connects: Mutex<VecDeque<Result<(), DriverError>>>,
    responses: Mutex<Vec<(String, Result<QueryResult, DriverError>)>>,
    isolated: Mutex<VecDeque<Result<QueryResult, DriverError>>>,
    held: Mutex<Option<String>>,
    release: Notify,
    no_cancel_hook: AtomicBool,
    late_cancel_ack: AtomicBool,
    cancel_ack: Notify,
    notifier: Mutex<Option<LostConnectionNotifier>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next connect.
    pub fn connect_result(&self, result: Result<(), DriverError>) {
        self.connects.lock().expect("connects lock").push_back(result);
    }

    /// Answers every statement containing `fragment` with `result`.
    pub fn respond(&self, fragment: &str, result: Result<QueryResult, DriverError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(0, (fragment.to_owned(), result));
    }

    /// Queues the result of the next isolated statement.
    pub fn isolated_result(&self, result: Result<QueryResult, DriverError>) {
        self.isolated.lock().expect("isolated lock").push_back(result);
    }

    /// Holds the next statement containing `fragment` until released or
    /// canceled.
    pub fn hold_next(&self, fragment: &str) {
        *self.held.lock().expect("held lock") = Some(fragment.to_owned());
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn without_cancel_hook(&self) {
        self.no_cancel_hook.store(true, Ordering::SeqCst);
    }

    /// Makes `cancel` wait for [`Self::acknowledge_cancel`] before returning.
    pub fn acknowledge_cancels_late(&self) {
        self.late_cancel_ack.store(true, Ordering::SeqCst);
    }

    pub fn acknowledge_cancel(&self) {
        self.cancel_ack.notify_one();
    }

    /// Simulates the server dropping the most recent transport.
    pub fn drop_transport(&self, reason: &str) {
        if let Some(notifier) = self.notifier.lock().expect("notifier lock").as_ref() {
            notifier.notify(reason);
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Texts of every regular statement run so far.
    pub fn queries(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Query { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// How many statements containing `fragment` ran.
    pub fn count(&self, fragment: &str) -> usize {
        self.queries()
            .iter()
            .filter(|text| text.contains(fragment))
            .count()
    }

    pub fn connects(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Connect { host } => Some(host),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn canceled(&self, request: Option<RequestId>) -> bool {
        request.is_some_and(|id| self.calls().contains(&DriverCall::Cancel(id)))
    }

    fn scripted(&self, text: &str) -> Result<QueryResult, DriverError> {
        self.responses
            .lock()
            .expect("responses lock")
            .iter()
            .find(|(fragment, _)| text.contains(fragment.as_str()))
            .map_or_else(|| Ok(QueryResult::default()), |(_, result)| result.clone())
    }

    fn take_hold(&self, text: &str) -> bool {
        let mut held = self.held.lock().expect("held lock");
        if held.as_deref().is_some_and(|fragment| text.contains(fragment)) {
            *held = None;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        on_lost: LostConnectionNotifier,
    ) -> Result<(), DriverError> {
        self.record(DriverCall::Connect {
            host: target.host.clone(),
        });
        let result = self
            .connects
            .lock()
            .expect("connects lock")
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            *self.notifier.lock().expect("notifier lock") = Some(on_lost);
        }
        result
    }

    async fn query(
        &self,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<QueryResult, DriverError> {
        self.record(DriverCall::Query {
            text: text.to_owned(),
            params: params.clone(),
            database: options.use_db.clone(),
            kind: options.metadata.kind,
            request: options.request_id,
        });
        if self.take_hold(text) {
            self.release.notified().await;
            if self.canceled(options.request_id) {
                return Err(DriverError::Canceled);
            }
        }
        self.scripted(text)
    }

    async fn close(&self) {
        self.record(DriverCall::Close);
    }

    async fn cancel(&self, request: RequestId) -> bool {
        self.record(DriverCall::Cancel(request));
        if self.late_cancel_ack.load(Ordering::SeqCst) {
            self.cancel_ack.notified().await;
        }
        self.release.notify_one();
        !self.no_cancel_hook.load(Ordering::SeqCst)
    }

    async fn run_isolated(
        &self,
        _target: &ConnectionTarget,
        text: &str,
        _params: &Params,
        options: &QueryOptions,
    ) -> Result<QueryResult, DriverError> {
        self.record(DriverCall::Isolated {
            text: text.to_owned(),
            database: options.use_db.clone(),
        });
        self.isolated
            .lock()
            .expect("isolated lock")
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::default()))
    }
}
