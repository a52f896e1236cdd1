//! Unit tests for the engine and its session transitions.

use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::always;
use rstest::rstest;
use serde_json::{Value, json};

use crate::dispatch::{Command, EngineEvent, OutputEvent};
use crate::driver::{
    ConnectionTarget, Driver, DriverError, LostConnectionNotifier, Params, QueryOptions,
    QueryResult, TxKind,
};
use crate::errors::ErrorKind;
use crate::ids::RequestId;
use crate::launch::LaunchParams;
use crate::poll::Counts;
use crate::session::{
    ConnectOrigin, ConnectionStatus, DiscoveryRecord, DiscoverySource, PasswordChange,
    PasswordChangeMethod, SsoProvider, change_password,
};
use crate::settings::ClientSettings;
use crate::tracker::{RequestStatus, SETTLED_RETENTION};

use super::support::{DriverCall, Harness, HealthEvent, rows, target};

mock! {
    Wire {}

    #[async_trait]
    impl Driver for Wire {
        async fn connect(
            &self,
            target: &ConnectionTarget,
            on_lost: LostConnectionNotifier,
        ) -> Result<(), DriverError>;

        async fn query(
            &self,
            text: &str,
            params: &Params,
            options: &QueryOptions,
        ) -> Result<QueryResult, DriverError>;

        async fn close(&self);

        async fn cancel(&self, request: RequestId) -> bool;

        async fn run_isolated(
            &self,
            target: &ConnectionTarget,
            text: &str,
            params: &Params,
            options: &QueryOptions,
        ) -> Result<QueryResult, DriverError>;
    }
}

fn password_change() -> PasswordChange {
    PasswordChange {
        host: "neo4j://localhost:7687".to_owned(),
        username: "neo4j".to_owned(),
        current_password: "old".to_owned(),
        new_password: "new".to_owned(),
        encrypted: false,
    }
}

fn syntax_error() -> DriverError {
    DriverError::server("Neo.ClientError.Statement.SyntaxError", "Invalid input 'ALTER'")
}

#[rstest]
#[tokio::test]
async fn password_change_uses_in_band_statement_first() {
    let mut wire = MockWire::new();
    wire.expect_run_isolated()
        .withf(|target, text, params, options| {
            text.starts_with("ALTER CURRENT USER SET PASSWORD")
                && target.database.as_deref() == Some("system")
                && params.get("newPw") == Some(&json!("new"))
                && options.metadata.kind == TxKind::System
        })
        .times(1)
        .returning(|_, _, _, _| Ok(QueryResult::default()));

    let method = change_password(&wire, &password_change(), "arbor")
        .await
        .expect("in-band change succeeds");
    assert_eq!(method, PasswordChangeMethod::InBand);
}

#[rstest]
#[tokio::test]
async fn password_change_falls_back_once_without_multi_database_support() {
    let mut wire = MockWire::new();
    let mut sequence = mockall::Sequence::new();
    wire.expect_run_isolated()
        .withf(|_, text, _, _| text.starts_with("ALTER CURRENT USER"))
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_, _, _, _| Err(syntax_error()));
    wire.expect_run_isolated()
        .withf(|_, text, params, _| {
            text.contains("dbms.security.changePassword")
                && params.get("password") == Some(&json!("new"))
        })
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_, _, _, _| Ok(QueryResult::default()));

    let method = change_password(&wire, &password_change(), "arbor")
        .await
        .expect("legacy change succeeds");
    assert_eq!(method, PasswordChangeMethod::Legacy);
}

#[rstest]
#[tokio::test]
async fn failed_fallback_reports_capability_error() {
    let mut wire = MockWire::new();
    wire.expect_run_isolated()
        .times(2)
        .returning(|_, _, _, _| Err(syntax_error()));

    let error = change_password(&wire, &password_change(), "arbor")
        .await
        .expect_err("both statements fail");
    assert_eq!(error.kind, ErrorKind::Capability);
}

#[rstest]
#[tokio::test]
async fn other_in_band_failures_do_not_fall_back() {
    let mut wire = MockWire::new();
    wire.expect_run_isolated()
        .with(always(), always(), always(), always())
        .times(1)
        .returning(|_, _, _, _| Err(DriverError::unauthorized("wrong password")));

    let error = change_password(&wire, &password_change(), "arbor")
        .await
        .expect_err("credentials rejected");
    assert_eq!(error.kind, ErrorKind::Connection);
}

#[rstest]
#[tokio::test]
async fn query_without_connection_fails_fast() {
    let mut harness = Harness::new();
    let id = harness.submit("RETURN 1").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Error));
    let error = harness
        .outcome(id)
        .and_then(Result::err)
        .expect("error payload");
    assert_eq!(error.kind, ErrorKind::Connection);
    assert!(harness.driver.queries().is_empty());
}

#[rstest]
#[tokio::test]
async fn connected_query_carries_request_and_user_metadata() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness.driver.respond("RETURN 1", Ok(rows("1", vec![json!(1)])));

    let id = harness.submit("RETURN 1").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Success));
    let sent = harness.driver.calls().into_iter().any(|call| {
        matches!(
            call,
            DriverCall::Query { text, kind: TxKind::UserDirect, request: Some(request), .. }
                if text == "RETURN 1" && request == id
        )
    });
    assert!(sent, "query not sent: {:?}", harness.driver.calls());
    assert!(harness.emitted(|event| *event == OutputEvent::ErrorBannerCleared));
}

#[rstest]
#[tokio::test]
async fn blank_input_is_a_no_op() {
    let mut harness = Harness::new();
    let command = Command::new("  // nothing here\n");
    let id = command.request_id;
    harness.send(EngineEvent::Submit(command)).await;

    assert!(harness.emitted(|event| *event == OutputEvent::NoOp { request_id: id }));
    assert!(harness.engine.tracker().is_empty());
    assert!(harness.engine.history().is_empty());
}

#[rstest]
#[tokio::test]
async fn long_sessions_keep_the_tracker_bounded() {
    let mut harness = Harness::new();
    let mut last = None;
    for _ in 0..SETTLED_RETENTION + 40 {
        last = Some(harness.submit(":help").await);
    }

    assert_eq!(harness.engine.tracker().len(), SETTLED_RETENTION);
    let last = last.expect("at least one submission");
    assert_eq!(harness.status(last), Some(RequestStatus::Success));
}

#[rstest]
#[tokio::test]
async fn local_parameter_needs_no_server() {
    let mut harness = Harness::new();
    let id = harness.submit(":param limit => 10").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Success));
    assert_eq!(harness.engine.params().get("limit"), Some(&json!(10)));
    assert!(harness.driver.queries().is_empty());
}

#[rstest]
#[tokio::test]
async fn parameter_request_carries_the_assignment() {
    let mut harness = Harness::new();
    let id = harness.submit(":param x => 2").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Success));
    assert_eq!(harness.outcome(id), Some(Ok(json!({"x": 2}))));
    assert!(harness.emitted(|event| matches!(
        event,
        OutputEvent::RequestUpdated {
            request_id,
            status: RequestStatus::Success,
            result: Some(result),
            ..
        } if *request_id == id && *result == json!({"x": 2})
    )));
}

#[rstest]
#[tokio::test]
async fn trailing_comments_stay_out_of_server_evaluated_parameters() {
    let mut harness = Harness::new();
    harness.connect().await;

    let id = harness.submit(":param total => 1 + 1 // running sum").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Success));
    let queries = harness.driver.queries();
    assert!(queries.iter().any(|text| text == "RETURN 1 + 1 AS total"), "{queries:?}");
    assert!(queries.iter().all(|text| !text.contains("running sum")));
}

#[rstest]
#[tokio::test]
async fn computed_parameter_is_evaluated_by_the_server() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness
        .driver
        .respond("RETURN 1 + 1 AS total", Ok(rows("total", vec![json!(2)])));

    let id = harness.submit(":param total => 1 + 1").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Success));
    assert_eq!(harness.engine.params().get("total"), Some(&json!(2)));
}

#[rstest]
#[tokio::test]
async fn failed_statement_applies_no_intents() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness.driver.respond(
        "RETURN nope AS total",
        Err(DriverError::server("Neo.ClientError.Statement.SyntaxError", "nope")),
    );

    let id = harness.submit(":param total => nope").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Error));
    assert!(harness.engine.params().get("total").is_none());
}

#[rstest]
#[tokio::test]
async fn script_children_see_parameters_set_earlier() {
    let mut harness = Harness::new();
    harness.connect().await;

    let command = Command::new(":param x => 5; RETURN $x");
    let parent = command.request_id;
    harness.send(EngineEvent::Submit(command)).await;

    assert_eq!(harness.status(parent), Some(RequestStatus::Success));
    let children = harness.children(parent);
    assert_eq!(children.len(), 2);
    let params = harness.driver.calls().into_iter().find_map(|call| match call {
        DriverCall::Query { text, params, .. } if text == "RETURN $x" => Some(params),
        _ => None,
    });
    assert_eq!(params.and_then(|params| params.get("x").cloned()), Some(json!(5)));
}

#[rstest]
#[tokio::test]
async fn script_halts_after_a_failure() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness.driver.respond(
        "RETURN x",
        Err(DriverError::server("Neo.ClientError.Statement.SyntaxError", "x not defined")),
    );

    let command = Command::new("RETURN 1; RETURN x; RETURN 3; RETURN 4");
    let parent = command.request_id;
    harness.send(EngineEvent::Submit(command)).await;

    let statuses: Vec<_> = harness
        .children(parent)
        .into_iter()
        .map(|child| harness.status(child))
        .collect();
    assert_eq!(
        statuses,
        vec![
            Some(RequestStatus::Success),
            Some(RequestStatus::Error),
            Some(RequestStatus::Skipped),
            Some(RequestStatus::Skipped),
        ]
    );
    assert_eq!(harness.status(parent), Some(RequestStatus::Error));
    assert_eq!(harness.driver.count("RETURN 3"), 0);
}

#[rstest]
#[tokio::test]
async fn disallowed_directive_in_script_is_skipped() {
    let mut harness = Harness::new();
    harness.connect().await;

    let command = Command::new(":play movies; RETURN 1");
    let parent = command.request_id;
    harness.send(EngineEvent::Submit(command)).await;

    let children = harness.children(parent);
    assert_eq!(harness.status(children[0]), Some(RequestStatus::Skipped));
    assert_eq!(harness.status(children[1]), Some(RequestStatus::Success));
    assert_eq!(harness.status(parent), Some(RequestStatus::Success));
}

#[rstest]
#[tokio::test]
async fn history_skips_reruns_and_repeats() {
    let mut harness = Harness::new();
    harness.submit(":help").await;
    harness.submit(":help").await;
    harness
        .send(EngineEvent::Submit(Command::new(":play").rerun()))
        .await;
    harness.submit(":params").await;

    let entries: Vec<&str> = harness.engine.history().entries().collect();
    assert_eq!(entries, vec![":params", ":help"]);
}

#[rstest]
#[tokio::test]
async fn config_directive_updates_settings() {
    let mut harness = Harness::new();
    let id = harness.submit(":config maxRows: 5").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Success));
    assert_eq!(harness.engine.settings().max_rows, 5);

    let rejected = harness.submit(":config maxRows: -1").await;
    assert_eq!(harness.status(rejected), Some(RequestStatus::Error));
    assert_eq!(harness.engine.settings().max_rows, 5);
}

#[rstest]
#[tokio::test]
async fn cancel_settles_a_running_query() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness.driver.hold_next("MATCH (n)");

    let command = Command::new("MATCH (n) RETURN n");
    let id = command.request_id;
    harness.nudge(EngineEvent::Submit(command)).await;
    assert_eq!(harness.status(id), Some(RequestStatus::Waiting));

    harness.send(EngineEvent::CancelRequest(id)).await;

    assert_eq!(harness.status(id), Some(RequestStatus::Canceled));
    assert!(harness.driver.calls().contains(&DriverCall::Cancel(id)));
}

#[rstest]
#[tokio::test]
async fn cancel_without_driver_hook_still_settles() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness.driver.without_cancel_hook();
    harness.driver.hold_next("MATCH (n)");

    let command = Command::new("MATCH (n) RETURN n");
    let id = command.request_id;
    harness.nudge(EngineEvent::Submit(command)).await;
    harness.send(EngineEvent::CancelRequest(id)).await;

    assert_eq!(harness.status(id), Some(RequestStatus::Canceled));
}

#[rstest]
#[tokio::test]
async fn canceling_a_script_skips_the_rest() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness.driver.hold_next("RETURN 2");

    let command = Command::new("RETURN 1; RETURN 2; RETURN 3");
    let parent = command.request_id;
    harness.nudge(EngineEvent::Submit(command)).await;
    harness.send(EngineEvent::CancelRequest(parent)).await;

    let statuses: Vec<_> = harness
        .children(parent)
        .into_iter()
        .map(|child| harness.status(child))
        .collect();
    assert_eq!(
        statuses,
        vec![
            Some(RequestStatus::Success),
            Some(RequestStatus::Canceled),
            Some(RequestStatus::Skipped),
        ]
    );
    assert_eq!(harness.status(parent), Some(RequestStatus::Canceled));
    assert_eq!(harness.driver.count("RETURN 3"), 0);
}

#[rstest]
#[tokio::test]
async fn child_canceled_before_its_turn_never_reaches_the_driver() {
    let mut harness = Harness::new();
    harness.connect().await;
    harness.driver.acknowledge_cancels_late();
    harness.driver.hold_next("RETURN 1");

    let command = Command::new("RETURN 1; RETURN 2");
    let parent = command.request_id;
    harness.nudge(EngineEvent::Submit(command)).await;
    let second = harness
        .children(parent)
        .get(1)
        .copied()
        .expect("second child frame");
    harness.nudge(EngineEvent::CancelRequest(second)).await;
    assert_eq!(harness.status(second), Some(RequestStatus::Canceling));

    harness.driver.release();
    harness.step().await;

    assert_eq!(harness.status(second), Some(RequestStatus::Canceled));
    assert_eq!(harness.driver.count("RETURN 2"), 0);

    harness.driver.acknowledge_cancel();
    harness.settle().await;

    assert_eq!(harness.status(second), Some(RequestStatus::Canceled));
    assert_eq!(harness.status(parent), Some(RequestStatus::Error));
    assert_eq!(harness.driver.count("RETURN 2"), 0);
}

#[rstest]
#[tokio::test]
async fn connect_failure_is_reported() {
    let mut harness = Harness::new();
    harness
        .driver
        .connect_result(Err(DriverError::unauthorized("bad credentials")));
    harness.connect().await;

    assert!(!harness.engine.session().is_connected());
    assert!(harness.emitted(|event| matches!(event, OutputEvent::ErrorBanner { .. })));
    assert!(harness.reporter.events().contains(&HealthEvent::ConnectFailed(
        target().host,
        ConnectOrigin::User
    )));
}

#[rstest]
#[tokio::test]
async fn newer_connect_supersedes_older_attempt() {
    let mut harness = Harness::new();
    let mut second = target();
    second.host = "neo4j://other:7687".to_owned();

    harness.engine.dispatch(EngineEvent::Connect(target()));
    harness.engine.dispatch(EngineEvent::Connect(second.clone()));
    harness.settle().await;

    let succeeded: Vec<_> = harness
        .reporter
        .events()
        .into_iter()
        .filter(|event| matches!(event, HealthEvent::ConnectSucceeded(..)))
        .collect();
    assert_eq!(
        succeeded,
        vec![HealthEvent::ConnectSucceeded(second.host.clone(), ConnectOrigin::User)]
    );
    assert_eq!(harness.engine.session().host.as_deref(), Some(second.host.as_str()));
}

#[rstest]
#[tokio::test]
async fn lost_transport_disconnects_and_stops_polling() {
    let mut harness = Harness::new();
    harness.connect().await;
    assert!(harness.engine.poller().is_active());

    harness.driver.drop_transport("socket closed");
    harness.settle().await;

    assert_eq!(harness.engine.session().status, ConnectionStatus::Disconnected);
    assert!(!harness.engine.poller().is_active());
    assert!(harness.emitted(|event| matches!(event, OutputEvent::ErrorBanner { .. })));
}

#[rstest]
#[tokio::test]
async fn loss_of_a_replaced_transport_is_ignored() {
    let mut harness = Harness::new();
    harness.connect().await;
    let stale_attempt = harness.engine.session_machine().attempt();
    harness.connect().await;

    harness
        .send(EngineEvent::ConnectionLost {
            attempt: stale_attempt,
            reason: "old socket".to_owned(),
        })
        .await;

    assert!(harness.engine.session().is_connected());
}

#[rstest]
#[tokio::test]
async fn server_disconnect_directive_closes_transport() {
    let mut harness = Harness::new();
    harness.connect().await;
    let id = harness.submit(":server disconnect").await;

    assert_eq!(harness.status(id), Some(RequestStatus::Success));
    assert_eq!(harness.engine.session().status, ConnectionStatus::Disconnected);
    assert_eq!(
        harness.driver.calls().last(),
        Some(&DriverCall::Close),
        "transport not closed"
    );
}

#[rstest]
#[tokio::test]
async fn use_switches_to_known_databases_only() {
    let mut harness = Harness::new();
    harness.driver.respond(
        "SHOW DATABASES",
        Ok(QueryResult::new(
            vec!["name".to_owned()],
            vec![
                json!({"name": "neo4j", "currentStatus": "online", "default": true}),
                json!({"name": "movies", "currentStatus": "online", "default": false}),
            ]
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        )),
    );
    harness.connect().await;

    let missing = harness.submit(":use nowhere").await;
    assert_eq!(harness.status(missing), Some(RequestStatus::Error));

    let polls = harness.driver.count("db.labels");
    let found = harness.submit(":use movies").await;
    assert_eq!(harness.status(found), Some(RequestStatus::Success));
    assert_eq!(harness.engine.session().active_db.as_deref(), Some("movies"));
    assert_eq!(harness.driver.count("db.labels"), polls + 1);
}

#[rstest]
#[tokio::test]
async fn connect_runs_an_initial_metadata_poll() {
    let mut harness = Harness::new();
    harness
        .driver
        .respond("db.labels", Ok(rows("labels", vec![json!(["Person", "Movie"])])));
    harness.driver.respond("AS nodes", Ok(rows("nodes", vec![json!(42)])));
    harness.connect().await;

    let metadata = harness.engine.metadata();
    assert_eq!(metadata.snapshot.labels, vec!["Person", "Movie"]);
    assert_eq!(metadata.counts.map(|counts| counts.nodes), Some(42));
    assert_eq!(harness.driver.count("db.labels"), 1);
    let system_only = harness.driver.calls().into_iter().all(|call| match call {
        DriverCall::Query { kind, .. } => kind == TxKind::System,
        _ => true,
    });
    assert!(system_only);
}

#[rstest]
#[tokio::test]
async fn slow_counts_disable_automatic_refresh() {
    let mut harness = Harness::new();
    harness.connect().await;
    let generation = harness.engine.poller().generation();

    harness
        .send(EngineEvent::CountsSettled {
            generation,
            result: Ok(Counts {
                nodes: 1,
                relationships: 0,
            }),
            elapsed: Duration::from_secs(5),
        })
        .await;

    assert!(!harness.engine.poller().counts_auto());
    assert!(harness.emitted(|event| matches!(event, OutputEvent::CountRefreshDisabled { .. })));

    harness.send(EngineEvent::EnableCountRefresh).await;
    assert!(harness.engine.poller().counts_auto());
}

#[rstest]
#[tokio::test]
async fn startup_reports_unsupported_commands_and_runs_the_rest_after_connecting() {
    let mut harness = Harness::new();
    let launch = LaunchParams::parse(
        "connectURL=neo4j%3A%2F%2Fann%40db.example%3A7687&cmd=play&arg=movies&cmd=drop&arg=all",
    )
    .expect("launch parameters parse");

    harness.send(EngineEvent::Startup(launch)).await;

    assert_eq!(harness.driver.connects(), vec!["neo4j://db.example:7687"]);
    assert!(harness.emitted(|event| matches!(
        event,
        OutputEvent::UnsupportedStartupCommand { command, .. } if command == "drop"
    )));
    assert_eq!(harness.engine.history().entries().next(), Some(":play movies"));
    assert_eq!(harness.engine.session().username.as_deref(), Some("ann"));
}

#[rstest]
#[tokio::test]
async fn failed_startup_connect_is_not_retried() {
    let mut harness = Harness::new();
    harness
        .driver
        .connect_result(Err(DriverError::unreachable("connection refused")));
    let launch = LaunchParams::parse("dbms=db.example:7687&cmd=edit&arg=RETURN%201")
        .expect("launch parameters parse");

    harness.send(EngineEvent::Startup(launch)).await;

    assert_eq!(harness.driver.connects().len(), 1);
    assert!(harness.emitted(|event| matches!(event, OutputEvent::StartupFailed { .. })));
    assert!(harness.emitted(|event| matches!(
        event,
        OutputEvent::EditorContent { text } if text == "RETURN 1"
    )));
    assert!(harness
        .reporter
        .events()
        .contains(&HealthEvent::StartupFailed("neo4j://db.example:7687".to_owned())));
}

#[rstest]
#[tokio::test]
async fn sso_login_redirects_to_known_providers() {
    let record = DiscoveryRecord {
        sso_providers: vec![SsoProvider {
            id: "okta".to_owned(),
            name: "Okta".to_owned(),
            auth_flow: "pkce".to_owned(),
            auth_endpoint: Some("https://idp.example/authorize".to_owned()),
            params: serde_json::Map::new(),
        }],
        ..DiscoveryRecord::new(DiscoverySource::Stored).with_host("neo4j://db.example:7687")
    };
    let mut harness = Harness::build(ClientSettings::default(), |builder| {
        builder.stored_connection(record)
    });
    harness
        .driver
        .connect_result(Err(DriverError::unauthorized("sign in first")));
    harness.send(EngineEvent::Startup(LaunchParams::default())).await;

    harness
        .send(EngineEvent::SsoLogin {
            provider_id: "okta".to_owned(),
        })
        .await;
    harness
        .send(EngineEvent::SsoLogin {
            provider_id: "missing".to_owned(),
        })
        .await;

    assert!(harness.emitted(|event| matches!(
        event,
        OutputEvent::SsoRedirect { url, .. } if url.starts_with("https://idp.example/authorize?state=")
    )));
    let banners = harness
        .events()
        .iter()
        .filter(|event| matches!(event, OutputEvent::ErrorBanner { .. }))
        .count();
    assert_eq!(banners, 2, "connect failure and unknown provider");
}

#[rstest]
#[tokio::test]
async fn forced_password_change_reconnects_with_new_password() {
    let mut harness = Harness::new();
    harness.send(EngineEvent::ForcePasswordChange(password_change())).await;

    assert!(harness.emitted(|event| matches!(
        event,
        OutputEvent::PasswordChanged { username } if username == "neo4j"
    )));
    assert!(harness.engine.session().is_connected());
    assert!(harness.reporter.events().contains(&HealthEvent::ConnectSucceeded(
        "neo4j://localhost:7687".to_owned(),
        ConnectOrigin::PasswordChange
    )));
}

#[rstest]
#[tokio::test]
async fn rejected_password_change_keeps_session_untouched() {
    let mut harness = Harness::new();
    harness
        .driver
        .isolated_result(Err(DriverError::unauthorized("wrong password")));
    harness.send(EngineEvent::ForcePasswordChange(password_change())).await;

    assert!(harness.emitted(|event| matches!(event, OutputEvent::PasswordChangeFailed { .. })));
    assert!(harness.driver.connects().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn idle_session_expires_after_credentials_timeout() {
    let mut harness = Harness::new();
    let mut record = serde_json::Map::new();
    record.insert("name".to_owned(), json!("browser.credential_timeout"));
    record.insert("value".to_owned(), json!("30s"));
    harness.driver.respond(
        "dbms.clientConfig",
        Ok(QueryResult::new(
            vec!["name".to_owned(), "value".to_owned()],
            vec![record],
        )),
    );
    harness.connect().await;
    assert!(harness.engine.session_machine().credentials_timer_armed());

    tokio::time::sleep(Duration::from_secs(20)).await;
    harness.submit(":help").await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    harness.settle().await;
    assert!(harness.engine.session().is_connected(), "interaction re-arms the timer");

    tokio::time::sleep(Duration::from_secs(15)).await;
    harness.settle().await;

    assert_eq!(harness.engine.session().status, ConnectionStatus::Disconnected);
    assert!(harness.emitted(|event| *event == OutputEvent::CredentialsTimedOut));
    assert!(harness.reporter.events().contains(&HealthEvent::CredentialsExpired));
}
