//! Startup discovery: harvesting host and single sign-on data from up to
//! four sources and merging it into one record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::SESSION_TARGET;

/// Where a discovery record came from, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// Connection remembered from an earlier session.
    Stored,
    /// Connection URL forced through launch parameters.
    ForcedUrl,
    /// Discovery URL supplied through launch parameters.
    DiscoveryUrl,
    /// The configured discovery endpoint.
    Endpoint,
}

/// Single sign-on identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoProvider {
    /// Provider identifier, unique per server.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// OAuth flow, e.g. `pkce` or `implicit`.
    #[serde(default)]
    pub auth_flow: String,
    /// Authorisation endpoint users are redirected to.
    #[serde(default)]
    pub auth_endpoint: Option<String>,
    /// Extra query parameters for the redirect.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl SsoProvider {
    /// Redirect URL for starting a login with this provider.
    ///
    /// String parameters are appended as-is, other values in their JSON
    /// form. Returns `None` when the endpoint is missing or malformed.
    #[must_use]
    pub fn authorisation_url(&self, state: &str) -> Option<Url> {
        let mut url = Url::parse(self.auth_endpoint.as_deref()?).ok()?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.params {
                match value {
                    Value::String(text) => query.append_pair(key, text),
                    Value::Null => continue,
                    other => query.append_pair(key, &other.to_string()),
                };
            }
            query.append_pair("state", state);
        }
        Some(url)
    }
}

/// Unmerged data from one discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryRecord {
    /// Source of the record.
    pub source: DiscoverySource,
    /// Server address with its scheme, when the source named one.
    pub host: Option<String>,
    /// Known username, for stored and forced connections.
    pub username: Option<String>,
    /// Identity providers offered by the server.
    pub sso_providers: Vec<SsoProvider>,
    /// Server version.
    pub version: Option<String>,
    /// Server edition.
    pub edition: Option<String>,
}

impl DiscoveryRecord {
    /// Creates an empty record for `source`.
    #[must_use]
    pub const fn new(source: DiscoverySource) -> Self {
        Self {
            source,
            host: None,
            username: None,
            sso_providers: Vec::new(),
            version: None,
            edition: None,
        }
    }

    /// Sets the host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Reads a discovery endpoint response.
    ///
    /// The host is taken from `bolt_routing`, then `bolt_direct`, then
    /// `bolt`. Providers that do not parse are dropped.
    #[must_use]
    pub fn from_endpoint(source: DiscoverySource, body: &Value) -> Self {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_owned);
        let host = text("bolt_routing")
            .or_else(|| text("bolt_direct"))
            .or_else(|| text("bolt"));
        let sso_providers = body
            .pointer("/auth_config/oidc_providers")
            .and_then(Value::as_array)
            .map(|providers| {
                providers
                    .iter()
                    .filter_map(|provider| SsoProvider::deserialize(provider).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            source,
            host,
            username: None,
            sso_providers,
            version: text("neo4j_version"),
            edition: text("neo4j_edition"),
        }
    }

    /// Folds `other` into this record without overwriting fields already set.
    ///
    /// Providers are deduplicated by id, so absorbing the same record twice
    /// leaves the provider list unchanged.
    pub fn absorb(&mut self, other: &Self) {
        if self.host.is_none() {
            self.host.clone_from(&other.host);
        }
        if self.username.is_none() {
            self.username.clone_from(&other.username);
        }
        if self.version.is_none() {
            self.version.clone_from(&other.version);
        }
        if self.edition.is_none() {
            self.edition.clone_from(&other.edition);
        }
        for provider in &other.sso_providers {
            if !self.sso_providers.iter().any(|known| known.id == provider.id) {
                self.sso_providers.push(provider.clone());
            }
        }
    }
}

/// Merges records by host.
///
/// The highest-priority record that names a host decides the host. Records
/// naming the same host, or none, are absorbed; records naming a different
/// host are dropped. Returns `None` when there are no records.
#[must_use]
pub fn merge_records(mut records: Vec<DiscoveryRecord>) -> Option<DiscoveryRecord> {
    records.sort_by_key(|record| record.source);
    let base_index = records
        .iter()
        .position(|record| record.host.is_some())
        .unwrap_or(0);
    if base_index >= records.len() {
        return None;
    }
    let mut merged = records.remove(base_index);
    for record in &records {
        match (&merged.host, &record.host) {
            (Some(host), Some(other)) if !same_host(host, other) => {
                debug!(
                    target: SESSION_TARGET,
                    source = ?record.source,
                    host = %other,
                    kept = %host,
                    "dropping discovery record for a different host"
                );
            }
            _ => merged.absorb(record),
        }
    }
    Some(merged)
}

fn same_host(left: &str, right: &str) -> bool {
    left.trim_end_matches('/').eq_ignore_ascii_case(right.trim_end_matches('/'))
}

/// Errors raised while fetching a discovery document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The request could not be sent.
    #[error("discovery request to {url} failed: {message}")]
    Request {
        /// Discovery URL.
        url: String,
        /// Transport detail.
        message: String,
    },
    /// The endpoint answered with a non-success status.
    #[error("discovery endpoint {url} answered with status {status}")]
    Status {
        /// Discovery URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The body was not JSON.
    #[error("discovery endpoint {url} returned an unreadable body: {message}")]
    Decode {
        /// Discovery URL.
        url: String,
        /// Decoder detail.
        message: String,
    },
}

/// Fetches discovery documents.
#[async_trait]
pub trait DiscoveryFetcher: Send + Sync {
    /// Performs the discovery GET against `url`.
    async fn fetch(&self, url: &Url) -> Result<Value, DiscoveryError>;
}

/// Inputs to startup discovery.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryInputs {
    /// Remembered connection.
    pub stored: Option<DiscoveryRecord>,
    /// Host forced through launch parameters.
    pub forced_host: Option<String>,
    /// Username embedded in the forced connection URL.
    pub forced_username: Option<String>,
    /// Discovery URL supplied through launch parameters.
    pub discovery_url: Option<Url>,
    /// Configured discovery endpoint.
    pub endpoint: Option<Url>,
}

/// Gathers records from every available source. The two network sources are
/// fetched concurrently; a failed fetch contributes nothing.
pub async fn discover(
    fetcher: Option<&dyn DiscoveryFetcher>,
    inputs: DiscoveryInputs,
) -> Vec<DiscoveryRecord> {
    let mut records = Vec::new();
    if let Some(stored) = inputs.stored {
        records.push(stored);
    }
    if let Some(host) = inputs.forced_host {
        let mut forced = DiscoveryRecord::new(DiscoverySource::ForcedUrl).with_host(host);
        forced.username = inputs.forced_username;
        records.push(forced);
    }

    let Some(fetcher) = fetcher else {
        return records;
    };
    let (from_url, from_endpoint) = tokio::join!(
        fetch_record(fetcher, inputs.discovery_url.as_ref(), DiscoverySource::DiscoveryUrl),
        fetch_record(fetcher, inputs.endpoint.as_ref(), DiscoverySource::Endpoint),
    );
    records.extend(from_url);
    records.extend(from_endpoint);
    records
}

async fn fetch_record(
    fetcher: &dyn DiscoveryFetcher,
    url: Option<&Url>,
    source: DiscoverySource,
) -> Option<DiscoveryRecord> {
    let url = url?;
    match fetcher.fetch(url).await {
        Ok(body) => Some(DiscoveryRecord::from_endpoint(source, &body)),
        Err(error) => {
            warn!(target: SESSION_TARGET, ?source, %error, "discovery source yielded no data");
            None
        }
    }
}
