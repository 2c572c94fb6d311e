//! Shared fixtures for unit tests: in-memory state and a scripted provider

use crate::config::AppConfig;
use crate::db::SqliteDb;
use crate::providers::stockx::MARKET_DATA_ENDPOINT;
use crate::providers::{
    FetchOutcome, FetchRequest, ProviderClient, ProviderContext, ProviderKind, ProviderRegistry,
    RawResponse,
};
use crate::state::AppState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;

/// Provider client that replays queued outcomes per subject.
///
/// Subjects with nothing queued get a successful StockX-shaped payload with a
/// standard and a flex tier.
pub struct ScriptedClient {
    kind: ProviderKind,
    script: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    calls: Mutex<Vec<FetchRequest>>,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedClient {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
        })
    }

    /// Queue the next outcome for a subject
    pub fn respond(&self, subject: &str, outcome: FetchOutcome) {
        self.script
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Subjects fetched so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|r| r.subject.clone()).collect()
    }

    /// Tokio clock reading at each fetch, in call order
    pub fn call_instants(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(&self, _ctx: &ProviderContext, request: &FetchRequest) -> FetchOutcome {
        self.calls.lock().push(request.clone());
        self.call_times.lock().push(Instant::now());
        let queued = self
            .script
            .lock()
            .get_mut(&request.subject)
            .and_then(|q| q.pop_front());
        queued.unwrap_or_else(|| stockx_success(request.variant.as_deref().unwrap_or("10")))
    }
}

/// Market-data payload with standard and flex tiers for one size
pub fn stockx_success(size: &str) -> FetchOutcome {
    let body = format!(
        r#"[{{"variantId": "v-{size}", "variantValue": "{size}", "currencyCode": "USD",
              "salesLast72Hours": 3,
              "standardMarketData": {{"lowestAsk": "145.00", "highestBidAmount": "120.00"}},
              "flexMarketData": {{"lowestAsk": "160.00"}}}}]"#
    );
    FetchOutcome::Success(vec![RawResponse {
        endpoint: MARKET_DATA_ENDPOINT.to_string(),
        request_params: serde_json::json!({ "variant": size }),
        http_status: 200,
        body,
    }])
}

/// Config tuned for tests: no pacing delay
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scheduler.call_delay_ms = 0;
    config
}

/// State over an in-memory database with the given clients
pub fn state_with(clients: Vec<Arc<dyn ProviderClient>>, config: AppConfig) -> AppState {
    let db = SqliteDb::open_in_memory().expect("in-memory database");
    let mut registry = ProviderRegistry::empty();
    for client in clients {
        registry.register(client);
    }
    AppState::from_parts(db, registry, config)
}

/// State with scripted clients for every provider
pub fn test_state() -> AppState {
    let clients: Vec<Arc<dyn ProviderClient>> = ProviderKind::ALL
        .iter()
        .map(|kind| ScriptedClient::new(*kind) as Arc<dyn ProviderClient>)
        .collect();
    state_with(clients, test_config())
}
