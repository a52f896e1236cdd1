//! Throttled background refresh of server metadata.
//!
//! The poller runs only while a session is connected. Interval ticks that
//! arrive while a fetch is outstanding are dropped. Forced refreshes are
//! coalesced into at most one follow-up fetch. Node and relationship counts
//! have their own throttle and switch themselves off after a slow fetch.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{EngineEvent, EventSender};
use crate::driver::{Driver, DriverError, Params, QueryOptions, QueryResult};

pub(crate) const POLL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::poll");

const LABELS_QUERY: &str = "CALL db.labels() YIELD label RETURN collect(label) AS labels";
const RELATIONSHIP_TYPES_QUERY: &str = "CALL db.relationshipTypes() YIELD relationshipType \
     RETURN collect(relationshipType) AS relationshipTypes";
const PROPERTY_KEYS_QUERY: &str =
    "CALL db.propertyKeys() YIELD propertyKey RETURN collect(propertyKey) AS propertyKeys";
const COMPONENTS_QUERY: &str =
    "CALL dbms.components() YIELD versions, edition RETURN versions[0] AS version, edition";
const DATABASES_QUERY: &str = "SHOW DATABASES YIELD name, currentStatus, default";
const CLIENT_CONFIG_QUERY: &str = "CALL dbms.clientConfig() YIELD name, value";
const NODE_COUNT_QUERY: &str = "MATCH () RETURN count(*) AS nodes";
const RELATIONSHIP_COUNT_QUERY: &str = "MATCH ()-[]->() RETURN count(*) AS relationships";

/// One database known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Status reported by the server, e.g. `online`.
    pub status: String,
    /// Whether this is the server's default database.
    pub default: bool,
}

/// Node and relationship totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Number of nodes.
    pub nodes: u64,
    /// Number of relationships.
    pub relationships: u64,
}

/// Everything one metadata poll returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataSnapshot {
    /// Node labels.
    pub labels: Vec<String>,
    /// Relationship types.
    pub relationship_types: Vec<String>,
    /// Property keys.
    pub property_keys: Vec<String>,
    /// Databases; empty on servers without multi-database support.
    pub databases: Vec<DatabaseInfo>,
    /// Server version.
    pub server_version: Option<String>,
    /// Server edition.
    pub server_edition: Option<String>,
    /// Client configuration published by the server.
    pub client_config: Map<String, Value>,
}

/// Metadata as last seen by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    /// Latest poll result.
    #[serde(flatten)]
    pub snapshot: MetadataSnapshot,
    /// Latest counts, when fetched.
    pub counts: Option<Counts>,
}

impl Metadata {
    /// Names of the known databases.
    pub fn database_names(&self) -> impl Iterator<Item = &str> {
        self.snapshot.databases.iter().map(|database| database.name.as_str())
    }
}

/// What a refresh request led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// A fetch may start now.
    Start,
    /// A fetch is outstanding; one follow-up fetch is scheduled.
    Coalesced,
    /// The poller is not running.
    Inactive,
}

/// What a slow or fast count fetch did to the count policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountsVerdict {
    /// The fetch belonged to a stopped poll loop.
    Stale,
    /// Automatic count refresh stays as it was.
    Kept,
    /// The fetch was too slow; automatic count refresh is now off.
    Disabled,
}

/// Poll loop state. Each start bumps the generation, so events from an
/// earlier loop are recognised and ignored.
#[derive(Debug)]
pub struct MetadataPoller {
    generation: u64,
    active: bool,
    busy: bool,
    forced: bool,
    follow_up: bool,
    counts_busy: bool,
    counts_auto: bool,
    ticker: Option<AbortHandle>,
}

impl Default for MetadataPoller {
    fn default() -> Self {
        Self {
            generation: 0,
            active: false,
            busy: false,
            forced: false,
            follow_up: false,
            counts_busy: false,
            counts_auto: true,
            ticker: None,
        }
    }
}

impl MetadataPoller {
    /// Creates a stopped poller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current loop generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the loop is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a fetch is outstanding.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Whether counts refresh automatically.
    #[must_use]
    pub const fn counts_auto(&self) -> bool {
        self.counts_auto
    }

    /// Starts a fresh loop and marks its initial fetch as started.
    ///
    /// Returns the generation to tag the initial fetch with.
    pub fn start(&mut self, interval: Duration, bus: &EventSender) -> u64 {
        self.stop();
        self.active = true;
        self.busy = true;
        let generation = self.generation;
        let bus = bus.clone();
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if !bus.send(EngineEvent::PollTick { generation }) {
                    break;
                }
            }
        });
        self.ticker = Some(task.abort_handle());
        info!(target: POLL_TARGET, generation, ?interval, "metadata polling started");
        generation
    }

    /// Tears the loop down.
    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if self.active {
            debug!(target: POLL_TARGET, generation = self.generation, "metadata polling stopped");
        }
        self.generation = self.generation.wrapping_add(1);
        self.active = false;
        self.busy = false;
        self.forced = false;
        self.follow_up = false;
        self.counts_busy = false;
    }

    /// Handles an interval tick. Returns whether a fetch may start.
    pub fn tick(&mut self, generation: u64) -> bool {
        if !self.active || generation != self.generation {
            return false;
        }
        if self.busy {
            debug!(target: POLL_TARGET, generation, "dropping tick while a poll is outstanding");
            return false;
        }
        self.busy = true;
        self.forced = false;
        true
    }

    /// Handles a forced refresh.
    pub fn request_refresh(&mut self) -> RefreshDecision {
        if !self.active {
            return RefreshDecision::Inactive;
        }
        if self.busy {
            self.follow_up = true;
            return RefreshDecision::Coalesced;
        }
        self.busy = true;
        self.forced = true;
        RefreshDecision::Start
    }

    /// Marks the outstanding fetch of `generation` as settled.
    ///
    /// Returns `None` for stale generations, otherwise whether the settled
    /// fetch was forced.
    pub fn finish(&mut self, generation: u64) -> Option<bool> {
        if !self.active || generation != self.generation {
            return None;
        }
        self.busy = false;
        Some(std::mem::take(&mut self.forced))
    }

    /// Starts the coalesced follow-up fetch, if one is waiting.
    pub fn take_follow_up(&mut self) -> bool {
        if !self.active || self.busy || !std::mem::take(&mut self.follow_up) {
            return false;
        }
        self.busy = true;
        self.forced = true;
        true
    }

    /// Whether a count fetch may start. Forced refreshes fetch counts even
    /// when automatic count refresh is off.
    pub fn begin_counts(&mut self, generation: u64, forced: bool) -> bool {
        if !self.active
            || generation != self.generation
            || self.counts_busy
            || !(self.counts_auto || forced)
        {
            return false;
        }
        self.counts_busy = true;
        true
    }

    /// Settles a count fetch that took `elapsed`.
    pub fn finish_counts(
        &mut self,
        generation: u64,
        elapsed: Duration,
        threshold: Duration,
    ) -> CountsVerdict {
        if !self.active || generation != self.generation {
            return CountsVerdict::Stale;
        }
        self.counts_busy = false;
        if self.counts_auto && elapsed > threshold {
            self.counts_auto = false;
            warn!(
                target: POLL_TARGET,
                elapsed_ms = elapsed.as_millis(),
                threshold_ms = threshold.as_millis(),
                "count fetch too slow, disabling automatic count refresh"
            );
            return CountsVerdict::Disabled;
        }
        CountsVerdict::Kept
    }

    /// Turns automatic count refresh back on.
    pub fn enable_counts(&mut self) {
        self.counts_auto = true;
    }
}

impl Drop for MetadataPoller {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

fn strings(result: &QueryResult, key: &str) -> Vec<String> {
    result
        .first_value(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn text(result: &QueryResult, key: &str) -> Option<String> {
    result.first_value(key).and_then(Value::as_str).map(str::to_owned)
}

/// Fetches labels, types, keys, databases, server facts and client
/// configuration.
///
/// Database and client configuration listings are optional: servers that
/// reject them yield empty values rather than a failed poll.
///
/// # Errors
///
/// Returns the first failure among the mandatory statements.
pub async fn fetch_metadata(
    driver: &dyn Driver,
    app: &str,
    database: Option<&str>,
) -> Result<MetadataSnapshot, DriverError> {
    let params = Params::new();
    let options = QueryOptions::system(app, database.map(str::to_owned));
    let labels = driver.query(LABELS_QUERY, &params, &options).await?;
    let types = driver.query(RELATIONSHIP_TYPES_QUERY, &params, &options).await?;
    let keys = driver.query(PROPERTY_KEYS_QUERY, &params, &options).await?;
    let components = driver.query(COMPONENTS_QUERY, &params, &options).await?;

    let system = QueryOptions::system(app, Some("system".to_owned()));
    let databases = match driver.query(DATABASES_QUERY, &params, &system).await {
        Ok(result) => result
            .records
            .iter()
            .filter_map(|record| {
                Some(DatabaseInfo {
                    name: record.get("name")?.as_str()?.to_owned(),
                    status: record
                        .get("currentStatus")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    default: record.get("default").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect(),
        Err(error) if error.is_connection_error() => return Err(error),
        Err(error) => {
            debug!(target: POLL_TARGET, %error, "database listing unavailable");
            Vec::new()
        }
    };
    let client_config = match driver.query(CLIENT_CONFIG_QUERY, &params, &options).await {
        Ok(result) => result
            .records
            .iter()
            .filter_map(|record| {
                let name = record.get("name")?.as_str()?.to_owned();
                Some((name, record.get("value").cloned().unwrap_or(Value::Null)))
            })
            .collect(),
        Err(error) if error.is_connection_error() => return Err(error),
        Err(error) => {
            debug!(target: POLL_TARGET, %error, "client configuration unavailable");
            Map::new()
        }
    };

    Ok(MetadataSnapshot {
        labels: strings(&labels, "labels"),
        relationship_types: strings(&types, "relationshipTypes"),
        property_keys: strings(&keys, "propertyKeys"),
        databases,
        server_version: text(&components, "version"),
        server_edition: text(&components, "edition"),
        client_config,
    })
}

/// Fetches node and relationship totals.
///
/// # Errors
///
/// Returns the driver failure of either count statement.
pub async fn fetch_counts(
    driver: &dyn Driver,
    app: &str,
    database: Option<&str>,
) -> Result<Counts, DriverError> {
    let params = Params::new();
    let options = QueryOptions::system(app, database.map(str::to_owned));
    let nodes = driver.query(NODE_COUNT_QUERY, &params, &options).await?;
    let relationships = driver.query(RELATIONSHIP_COUNT_QUERY, &params, &options).await?;
    Ok(Counts {
        nodes: nodes.first_value("nodes").and_then(Value::as_u64).unwrap_or(0),
        relationships: relationships
            .first_value("relationships")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}
