//! `reqwest`-backed collaborators: the HTTP driver, discovery fetcher and
//! REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::driver::{
    AuthMethod, ConnectionTarget, Credentials, Driver, DriverError, LostConnectionNotifier,
    Params, QueryOptions, QueryResult, Record,
};
use crate::errors::{ErrorKind, ErrorPayload};
use crate::router::{RestClient, RestRequest, RestVerb};
use crate::session::{DiscoveryError, DiscoveryFetcher};

const HTTP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::http");
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DATABASE: &str = "neo4j";
const BOLT_PORT: u16 = 7687;
const HTTP_PORT: u16 = 7474;
const HTTPS_PORT: u16 = 7473;

/// Errors raised by the HTTP collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    /// A URL could not be built.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl {
        /// Offending input.
        url: String,
        /// Parser detail.
        message: String,
    },
    /// The request could not be sent.
    #[error("request failed: {message}")]
    Request {
        /// Transport detail.
        message: String,
    },
    /// The server answered with a non-success status.
    #[error("server answered {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The response body could not be decoded.
    #[error("unreadable response: {message}")]
    Decode {
        /// Decoder detail.
        message: String,
    },
}

impl HttpError {
    fn invalid_url(url: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.to_string(),
        }
    }

    fn request(error: &reqwest::Error) -> Self {
        Self::Request {
            message: error.to_string(),
        }
    }

    /// Converts the failure into a display payload.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        let payload = ErrorPayload::new(ErrorKind::Http, self.to_string());
        match self {
            Self::Status { status, .. } => payload.with_code(status.to_string()),
            _ => payload,
        }
    }
}

fn build_client() -> Result<Client, HttpError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|error| HttpError::request(&error))
}

fn authorise(request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    match credentials.method {
        AuthMethod::Basic => request.basic_auth(&credentials.username, Some(&credentials.password)),
        AuthMethod::Bearer => request.bearer_auth(&credentials.password),
        AuthMethod::None => request,
    }
}

/// HTTP base URL of the server behind `host`.
///
/// Bolt addresses map to the HTTP connector: the default Bolt port becomes
/// 7474, or 7473 when the transport is encrypted. HTTP addresses are kept.
///
/// # Errors
///
/// Returns [`HttpError::InvalidUrl`] when `host` has no usable host name.
pub fn http_base_for_host(host: &str, encrypted: bool) -> Result<Url, HttpError> {
    let with_scheme = if host.contains("://") {
        host.to_owned()
    } else {
        format!("bolt://{host}")
    };
    let parsed = Url::parse(&with_scheme).map_err(|error| HttpError::invalid_url(host, error))?;
    if matches!(parsed.scheme(), "http" | "https") {
        return Ok(parsed);
    }
    let name = parsed
        .host_str()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| HttpError::invalid_url(host, "missing host"))?;
    let secure = encrypted || parsed.scheme().ends_with("+s") || parsed.scheme().ends_with("+ssc");
    let port = match parsed.port() {
        Some(BOLT_PORT) | None if secure => HTTPS_PORT,
        Some(BOLT_PORT) | None => HTTP_PORT,
        Some(port) => port,
    };
    let scheme = if secure { "https" } else { "http" };
    let base = format!("{scheme}://{name}:{port}/");
    Url::parse(&base).map_err(|error| HttpError::invalid_url(base.clone(), error))
}

/// Reads a transactional endpoint response into rows.
///
/// # Errors
///
/// Returns the first server error listed in the response.
pub fn parse_commit_response(body: &Value) -> Result<QueryResult, DriverError> {
    if let Some(error) = body
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
    {
        let text = |key: &str| {
            error
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        return Err(DriverError::server(text("code"), text("message")));
    }

    let Some(result) = body.pointer("/results/0") else {
        return Ok(QueryResult::default());
    };
    let keys: Vec<String> = result
        .get("columns")
        .and_then(Value::as_array)
        .map(|columns| {
            columns
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let records = result
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("row").and_then(Value::as_array))
                .map(|values| keys.iter().cloned().zip(values.iter().cloned()).collect::<Record>())
                .collect()
        })
        .unwrap_or_default();
    Ok(QueryResult::new(keys, records))
}

#[derive(Debug, Clone)]
struct Transport {
    base: Url,
    credentials: Credentials,
    database: Option<String>,
    on_lost: LostConnectionNotifier,
}

/// [`Driver`] over the server's HTTP transactional endpoint.
///
/// Every statement commits in its own request, so there is nothing to
/// cancel server-side and the default no-op cancel hook applies.
#[derive(Debug)]
pub struct HttpDriver {
    client: Client,
    endpoint: Option<Url>,
    transport: Mutex<Option<Transport>>,
}

impl HttpDriver {
    /// Creates a driver. `endpoint` overrides the base URL derived from the
    /// connection host.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] when the HTTP client cannot be built.
    pub fn new(endpoint: Option<Url>) -> Result<Self, HttpError> {
        Ok(Self {
            client: build_client()?,
            endpoint,
            transport: Mutex::new(None),
        })
    }

    fn base_for(&self, target: &ConnectionTarget) -> Result<Url, DriverError> {
        match &self.endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => http_base_for_host(&target.host, target.encrypted)
                .map_err(|error| DriverError::unreachable(error.to_string())),
        }
    }

    async fn commit(
        &self,
        base: &Url,
        credentials: &Credentials,
        database: &str,
        text: &str,
        params: &Params,
    ) -> Result<QueryResult, DriverError> {
        let url = base
            .join(&format!("db/{database}/tx/commit"))
            .map_err(|error| DriverError::unreachable(error.to_string()))?;
        let body = json!({"statements": [{"statement": text, "parameters": params}]});
        trace!(target: HTTP_TARGET, %url, "posting statement");
        let response = authorise(self.client.post(url).json(&body), credentials)
            .send()
            .await
            .map_err(|error| DriverError::unreachable(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let detail = response.text().await.unwrap_or_default();
            return Err(DriverError::unauthorized(if detail.is_empty() {
                status.to_string()
            } else {
                detail
            }));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|error| DriverError::unreachable(format!("unreadable response: {error}")))?;
        parse_commit_response(&payload)
    }
}

#[async_trait]
impl Driver for HttpDriver {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        on_lost: LostConnectionNotifier,
    ) -> Result<(), DriverError> {
        let base = self.base_for(target)?;
        let database = target.database.as_deref().unwrap_or(DEFAULT_DATABASE);
        self.commit(&base, &target.credentials, database, "RETURN 1", &Params::new())
            .await?;
        debug!(target: HTTP_TARGET, %base, "HTTP transport verified");
        *self.transport.lock().await = Some(Transport {
            base,
            credentials: target.credentials.clone(),
            database: target.database.clone(),
            on_lost,
        });
        Ok(())
    }

    async fn query(
        &self,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<QueryResult, DriverError> {
        let Some(transport) = self.transport.lock().await.clone() else {
            return Err(DriverError::NotConnected);
        };
        let database = options
            .use_db
            .as_deref()
            .or(transport.database.as_deref())
            .unwrap_or(DEFAULT_DATABASE);
        trace!(
            target: HTTP_TARGET,
            app = %options.metadata.app,
            kind = ?options.metadata.kind,
            auto_commit = options.auto_commit,
            "transaction metadata is not sent over HTTP"
        );
        let result = self
            .commit(&transport.base, &transport.credentials, database, text, params)
            .await;
        if let Err(DriverError::Unreachable { message }) = &result {
            transport.on_lost.notify(message.clone());
        }
        result
    }

    async fn close(&self) {
        self.transport.lock().await.take();
    }

    async fn run_isolated(
        &self,
        target: &ConnectionTarget,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<QueryResult, DriverError> {
        let base = self.base_for(target)?;
        let database = options
            .use_db
            .as_deref()
            .or(target.database.as_deref())
            .unwrap_or(DEFAULT_DATABASE);
        self.commit(&base, &target.credentials, database, text, params).await
    }
}

/// [`DiscoveryFetcher`] performing a plain JSON GET.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: Client,
}

impl HttpDiscovery {
    /// Creates a fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] when the HTTP client cannot be built.
    pub fn new() -> Result<Self, HttpError> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl DiscoveryFetcher for HttpDiscovery {
    async fn fetch(&self, url: &Url) -> Result<Value, DiscoveryError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| DiscoveryError::Request {
                url: url.to_string(),
                message: error.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|error| DiscoveryError::Decode {
            url: url.to_string(),
            message: error.to_string(),
        })
    }
}

/// [`RestClient`] for the REST verb directives.
#[derive(Debug, Clone)]
pub struct HttpRestClient {
    client: Client,
    endpoint: Option<Url>,
}

impl HttpRestClient {
    /// Creates a client. Relative paths resolve against `endpoint`, or
    /// against the session host's HTTP connector when it is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] when the HTTP client cannot be built.
    pub fn new(endpoint: Option<Url>) -> Result<Self, HttpError> {
        Ok(Self {
            client: build_client()?,
            endpoint,
        })
    }

    fn resolve(&self, request: &RestRequest) -> Result<Url, HttpError> {
        if let Ok(absolute) = Url::parse(&request.path) {
            return Ok(absolute);
        }
        let base = match (&self.endpoint, &request.host) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(host)) => http_base_for_host(host, false)?,
            (None, None) => {
                return Err(HttpError::invalid_url(
                    request.path.clone(),
                    "no endpoint configured and no session host",
                ));
            }
        };
        base.join(request.path.trim_start_matches('/'))
            .map_err(|error| HttpError::invalid_url(request.path.clone(), error))
    }
}

const fn method(verb: RestVerb) -> Method {
    match verb {
        RestVerb::Get => Method::GET,
        RestVerb::Put => Method::PUT,
        RestVerb::Post => Method::POST,
        RestVerb::Delete => Method::DELETE,
        RestVerb::Head => Method::HEAD,
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn send(&self, request: RestRequest) -> Result<Value, HttpError> {
        let url = self.resolve(&request)?;
        debug!(target: HTTP_TARGET, verb = %request.verb, %url, "sending REST request");
        let mut builder = authorise(
            self.client.request(method(request.verb), url),
            &request.credentials,
        );
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|error| HttpError::request(&error))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| HttpError::request(&error))?;
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }
        if request.verb == RestVerb::Head || text.trim().is_empty() {
            return Ok(json!({"status": status.as_u16()}));
        }
        serde_json::from_str(&text).or_else(|_| Ok(Value::String(text)))
    }
}
