//! Services Layer
//!
//! Business logic shared between the REST API handlers and the background
//! loops. Services take `&AppState` and talk to the database and providers.
//!
//! # Services
//!
//! - `EnqueueService` - Enqueue, batch enqueue, manual reset
//! - `BudgetLedger` - Per-provider hourly token bucket
//! - `MarketDataService` - Latest-price view refresh, latest and history reads

pub mod enqueue_service;
pub mod budget_ledger;
pub mod market_data_service;

pub use enqueue_service::{EnqueueService, EnqueueManyResult};
pub use budget_ledger::{BudgetLedger, BudgetStatus};
pub use market_data_service::{MarketDataService, RefreshResult, LatestResult, HistoryResult};
