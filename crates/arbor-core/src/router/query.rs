//! Query execution and the statements issued on the user's behalf.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::{Completion, Dispatched, ROUTER_TARGET, RouteContext};
use crate::classify::{Statement, directive_arguments, directive_name, strip_leading_comments};
use crate::driver::{DriverError, Params, QueryOptions, TxMetadata};
use crate::errors::ErrorPayload;

const SHOW_INDEXES: &str = "SHOW INDEXES";
const SHOW_CONSTRAINTS: &str = "SHOW CONSTRAINTS";

/// How a query's transaction is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// A managed write transaction.
    Managed,
    /// An implicit auto-commit transaction.
    AutoCommit,
}

/// Reads the transaction mode from a leading `auto` directive, which may be
/// preceded by any number of comments. Returns the mode and the query body.
#[must_use]
pub fn transaction_mode(text: &str, prefix: char) -> (TransactionMode, &str) {
    let head = strip_leading_comments(text);
    if directive_name(head, prefix).as_deref() == Some("auto") {
        (TransactionMode::AutoCommit, directive_arguments(head, prefix))
    } else {
        (TransactionMode::Managed, text.trim())
    }
}

/// Runs a user query.
pub(super) fn run(statement: &Statement, context: &RouteContext<'_>) -> Dispatched {
    if !context.session.is_connected() {
        return Completion::err(ErrorPayload::not_connected()).into();
    }
    let (mode, body) = transaction_mode(&statement.text, context.settings.cmd_char);
    if body.is_empty() {
        return Completion::err(ErrorPayload::invalid_argument("nothing to run after auto")).into();
    }

    let options = QueryOptions {
        use_db: active_database(context),
        auto_commit: mode == TransactionMode::AutoCommit,
        metadata: TxMetadata::user_direct(&context.settings.app_name),
        request_id: Some(statement.id),
    };
    debug!(
        target: ROUTER_TARGET,
        request = %statement.id,
        auto_commit = options.auto_commit,
        database = ?options.use_db,
        "running query"
    );
    let driver = Arc::clone(context.driver);
    let text = body.to_owned();
    let params = context.params.clone();
    Dispatched::deferred(async move {
        Completion::from(
            driver
                .query(&text, &params, &options)
                .await
                .map(|result| result.to_value())
                .map_err(|error| error.to_payload()),
        )
    })
}

/// Lists indexes and constraints.
pub(super) fn schema(context: &RouteContext<'_>) -> Dispatched {
    if !context.session.is_connected() {
        return Completion::err(ErrorPayload::not_connected()).into();
    }
    let driver = Arc::clone(context.driver);
    let options = QueryOptions::system(&context.settings.app_name, active_database(context));
    Dispatched::deferred(async move {
        let params = Params::new();
        let fetch = async {
            let indexes = driver.query(SHOW_INDEXES, &params, &options).await?;
            let constraints = driver.query(SHOW_CONSTRAINTS, &params, &options).await?;
            Ok::<_, DriverError>(json!({
                "frame": "schema",
                "indexes": indexes.to_value(),
                "constraints": constraints.to_value(),
            }))
        };
        Completion::from(fetch.await.map_err(|error| error.to_payload()))
    })
}

/// Runs one statement issued on the user's behalf with system metadata.
pub(super) fn system_statement(
    context: &RouteContext<'_>,
    text: &'static str,
    frame: &'static str,
) -> Dispatched {
    if !context.session.is_connected() {
        return Completion::err(ErrorPayload::not_connected()).into();
    }
    let driver = Arc::clone(context.driver);
    let options = QueryOptions::system(&context.settings.app_name, active_database(context));
    Dispatched::deferred(async move {
        Completion::from(
            driver
                .query(text, &Params::new(), &options)
                .await
                .map(|result| json!({"frame": frame, "result": result.to_value()}))
                .map_err(|error| error.to_payload()),
        )
    })
}

pub(super) fn active_database(context: &RouteContext<'_>) -> Option<String> {
    context
        .target_db
        .map(str::to_owned)
        .or_else(|| context.session.active_db.clone())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("MATCH (n) RETURN n", TransactionMode::Managed, "MATCH (n) RETURN n")]
    #[case(":auto USING PERIODIC COMMIT LOAD CSV FROM 'x' AS r RETURN r", TransactionMode::AutoCommit, "USING PERIODIC COMMIT LOAD CSV FROM 'x' AS r RETURN r")]
    #[case("// load\n/* big\nfile */ :AUTO CALL { RETURN 1 } IN TRANSACTIONS", TransactionMode::AutoCommit, "CALL { RETURN 1 } IN TRANSACTIONS")]
    #[case(":automatic RETURN 1", TransactionMode::Managed, ":automatic RETURN 1")]
    fn detects_auto_commit_behind_comments(
        #[case] text: &str,
        #[case] mode: TransactionMode,
        #[case] body: &str,
    ) {
        assert_eq!(transaction_mode(text, ':'), (mode, body));
    }
}
