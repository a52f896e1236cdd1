//! Discovery fetcher serving canned documents.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::session::{DiscoveryError, DiscoveryFetcher};

/// Serves one document per URL; other URLs fail with a status error.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    documents: HashMap<String, Value>,
    requested: Mutex<Vec<String>>,
}

impl StaticDiscovery {
    pub fn with(mut self, url: &str, document: Value) -> Self {
        self.documents.insert(url.to_owned(), document);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().expect("requested lock").clone()
    }
}

#[async_trait]
impl DiscoveryFetcher for StaticDiscovery {
    async fn fetch(&self, url: &Url) -> Result<Value, DiscoveryError> {
        self.requested
            .lock()
            .expect("requested lock")
            .push(url.to_string());
        self.documents
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| DiscoveryError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}
