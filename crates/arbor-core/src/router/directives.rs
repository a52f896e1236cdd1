//! Handlers for client directives that do not run user queries.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use super::query::{active_database, system_statement};
use super::rest::{RestRequest, RestVerb};
use super::{Completion, DIRECTIVES, Dispatched, Intent, RouteContext};
use crate::classify::strip_comments;
use crate::driver::{Params, QueryOptions};
use crate::errors::{ErrorKind, ErrorPayload};
use crate::params::{ParamAssignment, parse_literal};

const SHOW_CURRENT_USER: &str = "CALL dbms.showCurrentUser()";
const DEFAULT_GUIDE: &str = "start";

pub(super) fn help(topic: &str) -> Completion {
    let topic = (!topic.is_empty()).then(|| topic.to_ascii_lowercase());
    Completion::ok(json!({
        "frame": "help",
        "topic": topic,
        "directives": DIRECTIVES,
    }))
}

pub(super) fn play(guide: &str) -> Completion {
    let guide = if guide.is_empty() { DEFAULT_GUIDE } else { guide };
    Completion::ok(json!({"frame": "play", "guide": guide}))
}

pub(super) fn server(arguments: &str, context: &RouteContext<'_>) -> Dispatched {
    let session = context.session;
    let action = arguments.split_whitespace().next().unwrap_or("status");
    match action.to_ascii_lowercase().as_str() {
        "status" => Completion::ok(json!({"frame": "server-status", "session": session})).into(),
        "connect" if session.is_connected() => {
            Completion::ok(json!({"frame": "server-connect", "session": session})).into()
        }
        "connect" => Completion::ok(json!({
            "frame": "connect-form",
            "host": session.host,
            "username": session.username,
        }))
        .into(),
        "disconnect" => Completion::ok(json!({"frame": "disconnected"}))
            .with_intent(Intent::Disconnect)
            .into(),
        "change-password" => Completion::ok(json!({
            "frame": "change-password",
            "host": session.host,
            "username": session.username,
        }))
        .into(),
        "user" => system_statement(context, SHOW_CURRENT_USER, "server-user"),
        other => Completion::err(ErrorPayload::invalid_argument(format!(
            "unknown server action '{other}', expected status, connect, disconnect, change-password or user"
        )))
        .into(),
    }
}

pub(super) fn param(arguments: &str, context: &RouteContext<'_>) -> Dispatched {
    match ParamAssignment::parse(arguments) {
        Ok(assignment) => assign(assignment, false, context),
        Err(error) => Completion::err(ErrorPayload::invalid_argument(error.to_string())).into(),
    }
}

pub(super) fn params(arguments: &str, context: &RouteContext<'_>) -> Dispatched {
    let arguments = strip_comments(arguments);
    match arguments.as_str() {
        "" => Completion::ok(Value::Object(context.params.clone())).into(),
        "clear" => Completion::ok(Value::Object(Map::new()))
            .with_intent(Intent::ClearParams)
            .into(),
        map if map.starts_with('{') => assign(
            ParamAssignment::Map {
                expression: map.to_owned(),
            },
            true,
            context,
        ),
        other => param(other, context),
    }
}

fn params_intent(params: Params, replace: bool) -> Intent {
    if replace {
        Intent::ReplaceParams(params)
    } else {
        Intent::SetParams(params)
    }
}

fn assign(assignment: ParamAssignment, replace: bool, context: &RouteContext<'_>) -> Dispatched {
    match assignment.evaluate_locally() {
        Ok(Some(params)) => Completion::ok(Value::Object(params.clone()))
            .with_intent(params_intent(params, replace))
            .into(),
        Err(error) => Completion::err(ErrorPayload::invalid_argument(error.to_string())).into(),
        Ok(None) if !context.session.is_connected() => {
            Completion::err(ErrorPayload::not_connected()).into()
        }
        Ok(None) => evaluate_on_server(&assignment, replace, context),
    }
}

fn evaluate_on_server(
    assignment: &ParamAssignment,
    replace: bool,
    context: &RouteContext<'_>,
) -> Dispatched {
    let (statement, column) = assignment.server_statement();
    let is_map = matches!(assignment, ParamAssignment::Map { .. });
    let driver = Arc::clone(context.driver);
    let params = context.params.clone();
    let options = QueryOptions::system(&context.settings.app_name, active_database(context));
    Dispatched::deferred(async move {
        let value = match driver.query(&statement, &params, &options).await {
            Ok(result) => result.first_value(&column).cloned().unwrap_or(Value::Null),
            Err(error) => return Completion::err(error.to_payload()),
        };
        let evaluated = match (is_map, value) {
            (true, Value::Object(map)) => map,
            (true, other) => {
                return Completion::err(ErrorPayload::invalid_argument(format!(
                    "expected a map of parameters, got {other}"
                )));
            }
            (false, value) => {
                let mut single = Params::new();
                single.insert(column, value);
                single
            }
        };
        Completion::ok(Value::Object(evaluated.clone())).with_intent(params_intent(evaluated, replace))
    })
}

pub(super) fn queries(context: &RouteContext<'_>) -> Completion {
    let requests: Vec<Value> = context
        .tracker
        .in_flight()
        .into_iter()
        .map(|request| {
            json!({
                "id": request.id,
                "label": request.label,
                "status": request.status,
                "elapsed_ms": u64::try_from(request.elapsed().as_millis()).unwrap_or(u64::MAX),
            })
        })
        .collect();
    Completion::ok(json!({"frame": "queries", "requests": requests}))
}

pub(super) fn history(arguments: &str, context: &RouteContext<'_>) -> Completion {
    match arguments {
        "" => Completion::ok(json!({
            "frame": "history",
            "entries": context.history.entries().collect::<Vec<_>>(),
        })),
        "clear" => Completion::ok(json!({"frame": "history", "entries": []}))
            .with_intent(Intent::ClearHistory),
        other => Completion::err(ErrorPayload::invalid_argument(format!(
            "unknown history action '{other}'"
        ))),
    }
}

pub(super) fn config(arguments: &str, context: &RouteContext<'_>) -> Completion {
    if arguments.is_empty() {
        return Completion::ok(context.settings.to_value());
    }
    if arguments == "reset" {
        let defaults = context.default_settings.clone();
        return Completion::ok(defaults.to_value()).with_intent(Intent::UpdateSettings(defaults));
    }

    let changes = match config_changes(arguments) {
        Ok(changes) => changes,
        Err(message) => return Completion::err(ErrorPayload::invalid_argument(message)),
    };
    let mut updated = context.settings.clone();
    match updated.apply(&changes) {
        Ok(()) => Completion::ok(updated.to_value()).with_intent(Intent::UpdateSettings(updated)),
        Err(error) => Completion::err(ErrorPayload::invalid_argument(error.to_string())),
    }
}

fn config_changes(arguments: &str) -> Result<Map<String, Value>, String> {
    if arguments.starts_with('{') {
        return match parse_literal(arguments) {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(format!("expected a map of settings, got '{arguments}'")),
        };
    }
    let (key, value) = arguments
        .split_once(':')
        .ok_or_else(|| format!("expected `key: value`, got '{arguments}'"))?;
    let key = key.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
    let value = value.trim();
    let value = parse_literal(value).unwrap_or_else(|| Value::String(value.to_owned()));
    let mut changes = Map::new();
    changes.insert(key.to_owned(), value);
    Ok(changes)
}

pub(super) fn style(arguments: &str, context: &RouteContext<'_>) -> Completion {
    match arguments {
        "" => Completion::ok(json!({"frame": "style", "style": context.style})),
        "reset" => Completion::ok(json!({"frame": "style", "style": null}))
            .with_intent(Intent::SetStyle(None)),
        source => Completion::ok(json!({"frame": "style", "style": source}))
            .with_intent(Intent::SetStyle(Some(source.to_owned()))),
    }
}

pub(super) fn use_database(arguments: &str, context: &RouteContext<'_>) -> Completion {
    let name = arguments
        .strip_prefix('`')
        .and_then(|inner| inner.strip_suffix('`'))
        .map_or_else(|| arguments.to_owned(), |inner| inner.replace("``", "`"));
    if name.is_empty() {
        return Completion::err(ErrorPayload::invalid_argument("a database name is required"));
    }

    let mut known = context.metadata.database_names().peekable();
    if known.peek().is_some() && !known.any(|database| database.eq_ignore_ascii_case(&name)) {
        return Completion::err(ErrorPayload::invalid_argument(format!(
            "database '{name}' not found"
        )));
    }
    Completion::ok(json!({"frame": "use", "database": name})).with_intent(Intent::UseDatabase(name))
}

pub(super) fn rest(verb: RestVerb, arguments: &str, context: &RouteContext<'_>) -> Dispatched {
    let (path, body) = match RestRequest::parse(verb, arguments) {
        Ok(parsed) => parsed,
        Err(message) => return Completion::err(ErrorPayload::invalid_argument(message)).into(),
    };
    let Some(client) = context.rest.map(Arc::clone) else {
        return Completion::err(ErrorPayload::new(
            ErrorKind::Http,
            "no HTTP endpoint is available for REST requests",
        ))
        .into();
    };
    let request = RestRequest {
        verb,
        path,
        body,
        host: context.session.host.clone(),
        credentials: context.session.credentials(),
    };
    Dispatched::deferred(async move {
        Completion::from(client.send(request).await.map_err(|error| error.to_payload()))
    })
}
