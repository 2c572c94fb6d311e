//! Provider fetch clients
//!
//! Each marketplace gets a thin HTTP client that turns (subject, variant) into
//! raw responses. Clients never interpret prices; that is the normalizers' job.

pub mod types;
pub mod alias;
pub mod stockx;

use crate::config::ProvidersConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
pub use types::*;

/// Fetch client that every provider implementation must implement
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this client talks to
    fn kind(&self) -> ProviderKind;

    /// Requests one `fetch` spends against the hourly budget
    fn calls_per_fetch(&self) -> i64 {
        1
    }

    /// Fetch raw market data for one subject/variant
    async fn fetch(&self, ctx: &ProviderContext, request: &FetchRequest) -> FetchOutcome;
}

/// Map an HTTP response onto the four outcomes the worker understands
pub fn classify_response(response: RawResponse) -> FetchOutcome {
    match response.http_status {
        200..=299 => FetchOutcome::Success(vec![response]),
        404 => FetchOutcome::NotFound,
        429 => FetchOutcome::RateLimited,
        status => {
            let snippet: String = response.body.chars().take(200).collect();
            FetchOutcome::Transient(format!("HTTP {}: {}", status, snippet))
        }
    }
}

/// Convert a reqwest send/read failure into a transient outcome
pub fn transient_from_error(err: reqwest::Error) -> FetchOutcome {
    if err.is_timeout() {
        FetchOutcome::Transient(format!("timeout: {}", err))
    } else {
        FetchOutcome::Transient(err.to_string())
    }
}

pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()?;
    Ok(client)
}

/// Registry of configured provider clients
pub struct ProviderRegistry {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Create a registry with an HTTP client for every enabled provider
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let mut registry = Self::empty();

        for kind in config.enabled() {
            let settings = config.get(kind);
            let client: Arc<dyn ProviderClient> = match kind {
                ProviderKind::StockX => Arc::new(stockx::StockXClient::new(settings)?),
                ProviderKind::Alias => Arc::new(alias::AliasClient::new(settings)?),
            };
            registry.register(client);
        }

        Ok(registry)
    }

    /// Register (or replace) the client for its provider
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.kind(), client);
    }

    /// Get client by provider
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(&kind).cloned()
    }

    /// List registered providers in a stable order
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.clients.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
