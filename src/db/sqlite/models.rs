//! SQLite database models

use crate::providers::ProviderKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Explicit user refresh
pub const PRIORITY_USER_REFRESH: i64 = 200;
/// Subject just touched by a user action
pub const PRIORITY_HOT: i64 = 150;
/// Background maintenance refresh
pub const PRIORITY_BACKGROUND: i64 = 100;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Why a job ended up failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Subject absent at the provider; retrying cannot help
    NotFound,
    /// Timeout / 5xx; retried up to the attempt ceiling
    Transient,
    /// Payload stored but could not be parsed; needs a code fix
    Normalization,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::Transient => "transient",
            FailureKind::Normalization => "normalization",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(FailureKind::NotFound),
            "transient" => Ok(FailureKind::Transient),
            "normalization" => Ok(FailureKind::Normalization),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

/// A unit of fetch work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub provider: ProviderKind,
    pub subject: String,
    pub variant: Option<String>,
    pub priority: i64,
    pub status: JobStatus,
    pub dedupe_key: String,
    pub retry_count: i64,
    pub failure_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Enqueue request for one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueItem {
    pub subject: String,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Result of an enqueue call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub job_id: i64,
    /// false when an in-flight job for the same dedupe key already existed
    pub created: bool,
    /// true when an existing job's priority was raised
    pub promoted: bool,
    pub priority: i64,
}

/// Per-provider hourly rate ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub provider: ProviderKind,
    pub window_start: DateTime<Utc>,
    pub rate_limit: i64,
    pub used: i64,
}

impl Budget {
    pub fn remaining(&self) -> i64 {
        (self.rate_limit - self.used).max(0)
    }
}

/// Immutable capture of one external response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub id: i64,
    pub provider: ProviderKind,
    pub endpoint: String,
    pub request_params: serde_json::Value,
    pub payload: String,
    pub http_status: u16,
    pub requested_at: DateTime<Utc>,
    pub job_id: Option<i64>,
}

/// Provider-specific pricing programs; flags may combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierFlags {
    pub is_expedited: bool,
    pub is_consigned: bool,
    pub is_direct: bool,
}

impl TierFlags {
    pub const STANDARD: TierFlags = TierFlags {
        is_expedited: false,
        is_consigned: false,
        is_direct: false,
    };

    pub fn expedited() -> Self {
        Self {
            is_expedited: true,
            ..Self::STANDARD
        }
    }

    pub fn consigned() -> Self {
        Self {
            is_consigned: true,
            ..Self::STANDARD
        }
    }

    pub fn direct() -> Self {
        Self {
            is_direct: true,
            ..Self::STANDARD
        }
    }
}

/// One normalized price observation (major currency units)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub provider: ProviderKind,
    pub subject: String,
    pub size_key: Option<String>,
    pub currency: String,
    pub region: Option<String>,
    pub tiers: TierFlags,
    pub lowest_ask: Option<Decimal>,
    pub highest_bid: Option<Decimal>,
    pub last_sale: Option<Decimal>,
    pub sales_72h: Option<i64>,
    pub sales_30d: Option<i64>,
    pub observed_at: DateTime<Utc>,
    pub source_snapshot_id: i64,
}

/// A market record as persisted (time series row or latest-view row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMarketRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: MarketRecord,
}

/// Key filter for latest-price and history queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketKey {
    pub provider: Option<ProviderKind>,
    pub subject: String,
    pub variant: Option<String>,
    pub currency: Option<String>,
    pub region: Option<String>,
    pub tiers: Option<TierFlags>,
}

/// Per-batch worker metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub batch_id: String,
    pub run_id: Option<String>,
    pub provider: ProviderKind,
    pub attempted: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub deferred: i64,
    pub records_written: i64,
    pub duration_ms: i64,
}

/// Per-provider slice of a scheduler run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRunSummary {
    pub provider: ProviderKind,
    pub remaining_budget: i64,
    pub selected: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub deferred: i64,
}

/// One scheduler tick summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerRun {
    pub run_id: String,
    pub reclaimed: i64,
    pub selected: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub deferred: i64,
    pub batches: i64,
    pub providers: Vec<ProviderRunSummary>,
    pub duration_ms: i64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Aggregates over recent runs for operators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub runs: i64,
    pub selected: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub deferred: i64,
    pub reclaimed: i64,
    pub avg_run_ms: f64,
    pub pending_jobs: i64,
    pub running_jobs: i64,
    pub failed_jobs: i64,
}
