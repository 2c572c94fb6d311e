//! Application configuration
//!
//! Layered the usual way: struct defaults, then an optional TOML file, then
//! `MARKET_PIPELINE__SECTION__KEY` environment variables.

use crate::error::{AppError, Result};
use crate::providers::ProviderKind;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("market-pipeline.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Built-in tick cadence; 0 leaves ticking to an external invoker
    pub run_interval_secs: u64,
    pub max_batch_size: u32,
    /// Pause between individual provider calls inside one batch
    pub call_delay_ms: u64,
    pub orphan_timeout_secs: u64,
    /// Transient failures allowed before a job stays failed
    pub max_attempts: u32,
    pub view_refresh_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: 900,
            max_batch_size: 25,
            call_delay_ms: 350,
            orphan_timeout_secs: 600,
            max_attempts: 3,
            view_refresh_interval_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }

    pub fn orphan_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.orphan_timeout_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub rate_limit_per_hour: u32,
    pub currency: String,
    pub region: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: None,
            access_token: None,
            rate_limit_per_hour: 0,
            currency: "USD".to_string(),
            region: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub stockx: ProviderSettings,
    pub alias: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            stockx: ProviderSettings {
                enabled: true,
                base_url: "https://api.stockx.com".to_string(),
                rate_limit_per_hour: 1000,
                ..ProviderSettings::default()
            },
            alias: ProviderSettings {
                enabled: true,
                base_url: "https://api.alias.org".to_string(),
                rate_limit_per_hour: 500,
                region: Some("1".to_string()),
                ..ProviderSettings::default()
            },
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::StockX => &self.stockx,
            ProviderKind::Alias => &self.alias,
        }
    }

    /// Providers switched on in configuration
    pub fn enabled(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).enabled)
            .collect()
    }

    /// Hourly quota for a provider; disabled providers get none
    pub fn rate_limit(&self, kind: ProviderKind) -> u32 {
        let settings = self.get(kind);
        if settings.enabled {
            settings.rate_limit_per_hour
        } else {
            0
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("MARKET_PIPELINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_batch_size == 0 {
            return Err(AppError::Config(
                "scheduler.max_batch_size must be greater than zero".to_string(),
            ));
        }

        for kind in self.providers.enabled() {
            let settings = self.providers.get(kind);
            if settings.rate_limit_per_hour == 0 {
                return Err(AppError::Config(format!(
                    "providers.{}.rate_limit_per_hour must be greater than zero",
                    kind
                )));
            }
            if settings.base_url.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "providers.{}.base_url must be set",
                    kind
                )));
            }
        }

        Ok(())
    }
}
