//! REST API module
//!
//! Provides:
//! - Enqueue surface for the CRUD application (/api/v1/jobs*)
//! - Parameterless triggers for external cron invokers (/api/v1/scheduler/*)
//! - Latest-price, history and statistics queries

pub mod handlers;
mod server;
mod types;

pub use server::{router, ApiServer};
pub use types::{
    ApiResponse, EnqueueBatchRequest, EnqueueRequest, HistoryQuery, JobsQuery, MarketKeyQuery,
    PriorityInput, StatsQuery,
};
