//! REST API endpoint handlers
//!
//! Thin wrappers over the services: extract, call, wrap the result in the
//! `ApiResponse` envelope with a status derived from the error kind.

use crate::api::types::*;
use crate::db::sqlite::models::{EnqueueOutcome, Job, RunStats, SchedulerRun};
use crate::error::{AppError, Result};
use crate::scheduler::{Scheduler, Sweeper};
use crate::services::{
    BudgetLedger, BudgetStatus, EnqueueManyResult, EnqueueService, HistoryResult, LatestResult,
    MarketDataService, RefreshResult,
};
use crate::state::AppState;
use axum::{
    extract::{Json, Path, Query, State as AxumState},
    http::StatusCode,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

const DEFAULT_JOB_LIST_LIMIT: i64 = 100;
const MAX_JOB_LIST_LIMIT: i64 = 1_000;
const DEFAULT_STATS_HOURS: i64 = 24;
const RECENT_RUNS_SHOWN: i64 = 10;

pub type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

/// Wrap a service result in the envelope
fn respond<T: Serialize>(result: Result<T>) -> ApiResult<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success_with_data(data))),
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                error!("API request failed: {}", e);
            } else {
                warn!("API request rejected: {}", e);
            }
            (status, Json(ApiResponse::error(&e.to_string())))
        }
    }
}

/// Orphan sweep result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepData {
    pub reclaimed: Vec<i64>,
}

/// Operator statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsData {
    pub since: DateTime<Utc>,
    pub totals: RunStats,
    pub budgets: Vec<BudgetStatus>,
    pub recent_runs: Vec<SchedulerRun>,
}

// ============================================================================
// Health Check
// ============================================================================

/// GET /health
pub async fn health_check() -> Json<ApiResponse<Empty>> {
    Json(ApiResponse::success_with_message("Market pipeline is running"))
}

// ============================================================================
// Jobs
// ============================================================================

/// POST /api/v1/jobs
pub async fn enqueue_job(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<EnqueueOutcome> {
    respond(EnqueueService::enqueue(
        &state,
        req.provider,
        &req.subject,
        req.variant.as_deref(),
        req.priority.value(),
    ))
}

/// POST /api/v1/jobs/batch
pub async fn enqueue_batch(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<EnqueueBatchRequest>,
) -> ApiResult<EnqueueManyResult> {
    respond(EnqueueService::enqueue_many(
        &state,
        req.provider,
        &req.items,
        req.priority.value(),
    ))
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Vec<Job>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_JOB_LIST_LIMIT)
        .clamp(1, MAX_JOB_LIST_LIMIT);
    respond(state.db.list_jobs(query.provider, query.status, limit))
}

/// GET /api/v1/jobs/:id
pub async fn get_job(
    AxumState(state): AxumState<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Job> {
    respond(EnqueueService::get_job(&state, job_id))
}

/// POST /api/v1/jobs/:id/reset
pub async fn reset_job(
    AxumState(state): AxumState<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Job> {
    respond(EnqueueService::reset_failed(&state, job_id))
}

// ============================================================================
// Scheduler triggers
// ============================================================================

/// POST /api/v1/scheduler/tick
pub async fn run_tick(AxumState(state): AxumState<AppState>) -> ApiResult<SchedulerRun> {
    respond(Scheduler::tick(&state).await)
}

/// POST /api/v1/scheduler/sweep
pub async fn run_sweep(AxumState(state): AxumState<AppState>) -> ApiResult<SweepData> {
    respond(Sweeper::reclaim_orphans(&state, &Utc::now()).map(|reclaimed| SweepData { reclaimed }))
}

// ============================================================================
// Market data
// ============================================================================

/// POST /api/v1/latest/refresh
pub async fn refresh_latest(AxumState(state): AxumState<AppState>) -> ApiResult<RefreshResult> {
    respond(MarketDataService::refresh_latest(&state))
}

/// GET /api/v1/latest
pub async fn get_latest(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<MarketKeyQuery>,
) -> ApiResult<LatestResult> {
    respond(MarketDataService::latest(&state, &query.to_key()))
}

/// GET /api/v1/history
pub async fn get_history(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryResult> {
    respond(MarketDataService::history(
        &state,
        &query.to_key(),
        query.from,
        query.to,
        query.limit,
    ))
}

// ============================================================================
// Statistics
// ============================================================================

/// GET /api/v1/stats
pub async fn get_stats(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<StatsData> {
    respond(collect_stats(&state, query.hours.unwrap_or(DEFAULT_STATS_HOURS)))
}

fn collect_stats(state: &AppState, hours: i64) -> Result<StatsData> {
    if hours <= 0 {
        return Err(AppError::Validation("hours must be positive".to_string()));
    }

    let now = Utc::now();
    let since = now - Duration::hours(hours);
    Ok(StatsData {
        since,
        totals: state.db.run_stats(&since)?,
        budgets: BudgetLedger::current(state, &now)?,
        recent_runs: state.db.recent_runs(RECENT_RUNS_SHOWN)?,
    })
}
