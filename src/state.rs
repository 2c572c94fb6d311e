//! Application state management

use crate::config::AppConfig;
use crate::db::SqliteDb;
use crate::error::Result;
use crate::providers::{ProviderContext, ProviderCredential, ProviderKind, ProviderRegistry};
use std::sync::Arc;

/// State shared by services, background loops and HTTP handlers.
///
/// Holds no coordination state of its own: everything that must be agreed
/// between processes lives in the database.
#[derive(Clone)]
pub struct AppState {
    /// SQLite database connection
    pub db: Arc<SqliteDb>,

    /// Provider fetch clients
    pub providers: Arc<ProviderRegistry>,

    /// Loaded configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Open the database and build provider clients from configuration
    pub fn new(config: AppConfig) -> Result<Self> {
        let db = SqliteDb::new(&config.database.path, config.database.busy_timeout())?;
        let providers = ProviderRegistry::from_config(&config.providers)?;

        tracing::info!(
            "State initialized: database {:?}, providers {:?}",
            config.database.path,
            providers.kinds()
        );

        Ok(Self::from_parts(db, providers, config))
    }

    /// Assemble state from already-built parts
    pub fn from_parts(db: SqliteDb, providers: ProviderRegistry, config: AppConfig) -> Self {
        Self {
            db: Arc::new(db),
            providers: Arc::new(providers),
            config: Arc::new(config),
        }
    }

    /// Explicit credential/region context for calls to one provider
    pub fn provider_context(&self, kind: ProviderKind) -> ProviderContext {
        let settings = self.config.providers.get(kind);
        ProviderContext {
            provider: kind,
            credential: ProviderCredential {
                api_key: settings.api_key.clone(),
                access_token: settings.access_token.clone(),
            },
            currency: settings.currency.clone(),
            region: settings.region.clone(),
        }
    }

    /// Hourly request quota for a provider
    pub fn rate_limit(&self, kind: ProviderKind) -> i64 {
        i64::from(self.config.providers.rate_limit(kind))
    }
}
