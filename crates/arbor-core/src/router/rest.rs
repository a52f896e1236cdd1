//! Raw REST verb directives: `:get`, `:put`, `:post`, `:delete`, `:head`.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::driver::Credentials;
use crate::http::HttpError;

/// HTTP verb of a REST directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RestVerb {
    /// `GET`
    Get,
    /// `PUT`
    Put,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
}

impl RestVerb {
    /// Parses a directive name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "get" => Some(Self::Get),
            "put" => Some(Self::Put),
            "post" => Some(Self::Post),
            "delete" => Some(Self::Delete),
            "head" => Some(Self::Head),
            _ => None,
        }
    }

    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }

    /// Whether the verb carries a request body.
    #[must_use]
    pub const fn takes_body(self) -> bool {
        matches!(self, Self::Put | Self::Post)
    }
}

impl fmt::Display for RestVerb {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A REST call built from a directive.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    /// HTTP verb.
    pub verb: RestVerb,
    /// Absolute URL or path relative to the server's HTTP endpoint.
    pub path: String,
    /// JSON body for `PUT` and `POST`.
    pub body: Option<Value>,
    /// Session host, used when no HTTP endpoint is configured.
    pub host: Option<String>,
    /// Session credentials.
    pub credentials: Credentials,
}

impl RestRequest {
    /// Splits directive arguments into a path and an optional JSON body.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the path is missing or the
    /// body is not JSON.
    pub fn parse(verb: RestVerb, arguments: &str) -> Result<(String, Option<Value>), String> {
        let arguments = arguments.trim();
        let (path, body) = arguments
            .split_once(char::is_whitespace)
            .unwrap_or((arguments, ""));
        if path.is_empty() {
            return Err(format!("{verb} requires a path"));
        }
        let body = body.trim();
        if body.is_empty() {
            return Ok((path.to_owned(), None));
        }
        if !verb.takes_body() {
            return Err(format!("{verb} does not take a body"));
        }
        serde_json::from_str(body)
            .map(|value| (path.to_owned(), Some(value)))
            .map_err(|error| format!("request body is not valid JSON: {error}"))
    }
}

/// Performs REST directive calls.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Sends `request` and returns the decoded response body.
    async fn send(&self, request: RestRequest) -> Result<Value, HttpError>;
}
