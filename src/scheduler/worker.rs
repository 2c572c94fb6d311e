//! Batch worker
//!
//! Executes one provider batch claimed by a scheduler tick. For each job:
//! fetch, store every raw response, normalize, persist records, settle the
//! job. Provider calls are paced by a fixed delay. Database work happens in
//! short calls between the awaits, never across them.

use crate::db::sqlite::models::{BatchMetrics, FailureKind, Job};
use crate::error::{AppError, Result};
use crate::normalizers::{normalizer_for, CapturedResponse, NormalizeContext};
use crate::providers::{FetchOutcome, FetchRequest, ProviderClient, ProviderContext, ProviderKind, RawResponse};
use crate::services::BudgetLedger;
use crate::state::AppState;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How one job in a batch ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { job_id: i64, records_written: usize },
    Failed { job_id: i64, kind: FailureKind, requeued: bool },
    /// Returned to pending untouched (provider throttling or exhausted ledger)
    Deferred { job_id: i64 },
    /// Claim lost to the orphan sweep, or a storage error left the job running
    Abandoned { job_id: i64 },
}

/// Per-job outcomes plus the metrics row written for the batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub metrics: BatchMetrics,
    pub outcomes: Vec<JobOutcome>,
}

/// What the batch loop does after one job
enum Step {
    Settled(JobOutcome),
    /// Job settled, but the ledger refused its charge; defer the rest
    SettledThenStop(JobOutcome),
    /// Provider throttled us; defer this job and the rest
    DeferFromHere,
}

/// Batch executor
pub struct Worker;

impl Worker {
    /// Execute a batch of claimed jobs for one provider.
    ///
    /// Errors only when the batch cannot start at all; the claimed jobs then
    /// stay running until the orphan sweep returns them to pending.
    pub async fn execute_batch(
        state: &AppState,
        provider: ProviderKind,
        jobs: Vec<Job>,
        run_id: Option<&str>,
    ) -> Result<BatchReport> {
        let client = state
            .providers
            .get(provider)
            .ok_or_else(|| AppError::Provider(format!("No client registered for {}", provider)))?;

        let started = Instant::now();
        let batch_id = uuid::Uuid::new_v4().to_string();
        let ctx = state.provider_context(provider);
        let delay = state.config.scheduler.call_delay();

        info!(provider = %provider, batch_id = %batch_id, jobs = jobs.len(), "Executing batch");

        let mut metrics = BatchMetrics {
            batch_id: batch_id.clone(),
            run_id: run_id.map(str::to_string),
            provider,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            deferred: 0,
            records_written: 0,
            duration_ms: 0,
        };
        let mut outcomes = Vec::with_capacity(jobs.len());

        for (index, job) in jobs.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            metrics.attempted += 1;
            let result = Self::process_job(state, client.as_ref(), &ctx, job).await;

            let (outcome, defer_from) = match result {
                Ok(Step::Settled(outcome)) => (Some(outcome), None),
                Ok(Step::SettledThenStop(outcome)) => (Some(outcome), Some(index + 1)),
                Ok(Step::DeferFromHere) => (None, Some(index)),
                Err(e) => {
                    error!(provider = %provider, job_id = job.id, "Job processing failed: {}", e);
                    (Some(JobOutcome::Abandoned { job_id: job.id }), None)
                }
            };

            if let Some(outcome) = outcome {
                match &outcome {
                    JobOutcome::Completed { records_written, .. } => {
                        metrics.succeeded += 1;
                        metrics.records_written += *records_written as i64;
                    }
                    JobOutcome::Failed { .. } | JobOutcome::Abandoned { .. } => metrics.failed += 1,
                    JobOutcome::Deferred { .. } => metrics.deferred += 1,
                }
                outcomes.push(outcome);
            }

            if let Some(from) = defer_from {
                let remaining = &jobs[from..];
                if !remaining.is_empty() {
                    let deferred = state.db.defer_jobs(remaining)?;
                    warn!(
                        provider = %provider,
                        batch_id = %batch_id,
                        deferred,
                        "Deferring rest of batch to a later tick"
                    );
                    metrics.deferred += remaining.len() as i64;
                    outcomes.extend(remaining.iter().map(|j| JobOutcome::Deferred { job_id: j.id }));
                }
                break;
            }
        }

        metrics.duration_ms = started.elapsed().as_millis() as i64;
        state.db.insert_batch_metrics(&metrics, &Utc::now())?;

        info!(
            provider = %provider,
            batch_id = %batch_id,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            deferred = metrics.deferred,
            records = metrics.records_written,
            "Batch finished in {}ms",
            metrics.duration_ms
        );

        Ok(BatchReport { metrics, outcomes })
    }

    async fn process_job(
        state: &AppState,
        client: &dyn ProviderClient,
        ctx: &ProviderContext,
        job: &Job,
    ) -> Result<Step> {
        let request = FetchRequest {
            subject: job.subject.clone(),
            variant: job.variant.clone(),
        };

        let requested_at = Utc::now();
        let outcome = client.fetch(ctx, &request).await;

        match outcome {
            FetchOutcome::Success(responses) => {
                let charged = Self::charge(state, job, client.calls_per_fetch())?;
                let settled = Self::settle_success(state, ctx, job, &responses, &requested_at)?;
                if charged {
                    Ok(Step::Settled(settled))
                } else {
                    Ok(Step::SettledThenStop(settled))
                }
            }
            FetchOutcome::NotFound => {
                let charged = Self::charge(state, job, client.calls_per_fetch())?;
                let message = format!("{} has no data for {}", ctx.provider, job.subject);
                let settled = Self::settle_failure(state, job, FailureKind::NotFound, &message)?;
                if charged {
                    Ok(Step::Settled(settled))
                } else {
                    Ok(Step::SettledThenStop(settled))
                }
            }
            FetchOutcome::RateLimited => {
                warn!(provider = %ctx.provider, job_id = job.id, "Provider returned rate limit");
                Ok(Step::DeferFromHere)
            }
            FetchOutcome::Transient(message) => Ok(Step::Settled(Self::settle_failure(
                state,
                job,
                FailureKind::Transient,
                &message,
            )?)),
            FetchOutcome::Partial {
                completed,
                rate_limited,
                message,
            } => {
                // Completed calls count against the quota even though the job did not finish
                let snapshot_ids = Self::store_snapshots(state, job, &completed, &requested_at)?;
                let charged = Self::charge(state, job, completed.len() as i64)?;
                debug!(job_id = job.id, snapshots = ?snapshot_ids, "Kept responses from partial fetch");

                if rate_limited {
                    warn!(provider = %ctx.provider, job_id = job.id, "Provider returned rate limit: {}", message);
                    return Ok(Step::DeferFromHere);
                }

                let settled = Self::settle_failure(state, job, FailureKind::Transient, &message)?;
                if charged {
                    Ok(Step::Settled(settled))
                } else {
                    Ok(Step::SettledThenStop(settled))
                }
            }
        }
    }

    /// Charge calls against the hourly ledger; false when any were refused
    fn charge(state: &AppState, job: &Job, calls: i64) -> Result<bool> {
        if calls <= 0 {
            return Ok(true);
        }
        let granted = BudgetLedger::try_reserve(state, job.provider, calls, &Utc::now())?;
        Ok(granted == calls)
    }

    /// Store every response verbatim, linked to the job
    fn store_snapshots(
        state: &AppState,
        job: &Job,
        responses: &[RawResponse],
        requested_at: &chrono::DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        responses
            .iter()
            .map(|response| state.db.insert_snapshot(job.provider, Some(job.id), response, requested_at))
            .collect()
    }

    /// Persist snapshots, normalize, persist records, complete the job
    fn settle_success(
        state: &AppState,
        ctx: &ProviderContext,
        job: &Job,
        responses: &[RawResponse],
        requested_at: &chrono::DateTime<Utc>,
    ) -> Result<JobOutcome> {
        let snapshot_ids = Self::store_snapshots(state, job, responses, requested_at)?;

        let captured: Vec<CapturedResponse<'_>> = responses
            .iter()
            .zip(&snapshot_ids)
            .map(|(response, id)| CapturedResponse {
                snapshot_id: *id,
                endpoint: &response.endpoint,
                body: &response.body,
            })
            .collect();

        let normalize_ctx = NormalizeContext {
            provider: job.provider,
            subject: job.subject.clone(),
            variant: job.variant.clone(),
            currency: ctx.currency.clone(),
            region: ctx.region.clone(),
            observed_at: Utc::now(),
        };

        let records = match normalizer_for(job.provider).normalize(&captured, &normalize_ctx) {
            Ok(records) => records,
            Err(e) => {
                // Snapshots are already stored for re-normalization after a fix
                warn!(job_id = job.id, snapshots = ?snapshot_ids, "Normalization failed: {}", e);
                return Self::settle_failure(state, job, FailureKind::Normalization, &e.to_string());
            }
        };

        let written = state.db.insert_market_records(&records)?;
        debug!(job_id = job.id, records = records.len(), written, "Normalized");

        if state.db.complete_job(job, &Utc::now())? {
            Ok(JobOutcome::Completed {
                job_id: job.id,
                records_written: written,
            })
        } else {
            warn!(job_id = job.id, "Job claim lost before completion");
            Ok(JobOutcome::Abandoned { job_id: job.id })
        }
    }

    /// Mark failed; retryable failures under the attempt ceiling go back to pending
    fn settle_failure(
        state: &AppState,
        job: &Job,
        kind: FailureKind,
        message: &str,
    ) -> Result<JobOutcome> {
        let Some(failed) = state.db.fail_job(job, kind, message, &Utc::now())? else {
            warn!(job_id = job.id, "Job claim lost before failure was recorded");
            return Ok(JobOutcome::Abandoned { job_id: job.id });
        };

        let max_attempts = i64::from(state.config.scheduler.max_attempts);
        let requeued = kind.is_retryable()
            && failed.retry_count < max_attempts
            && state.db.requeue_failed(job.id, false)?;

        if requeued {
            info!(
                job_id = job.id,
                attempt = failed.retry_count,
                max_attempts,
                "Transient failure, requeued: {}",
                message
            );
        } else {
            warn!(job_id = job.id, kind = kind.as_str(), "Job failed: {}", message);
        }

        Ok(JobOutcome::Failed {
            job_id: job.id,
            kind,
            requeued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::columns::hour_window;
    use crate::db::sqlite::models::{EnqueueItem, JobStatus, PRIORITY_BACKGROUND};
    use crate::providers::alias::AVAILABILITIES_ENDPOINT;
    use crate::test_support::{state_with, test_config, ScriptedClient};
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use std::time::Duration;

    fn stockx_state(rate_limit: u32, call_delay_ms: u64) -> (AppState, Arc<ScriptedClient>) {
        let client = ScriptedClient::new(ProviderKind::StockX);
        let mut config = test_config();
        config.providers.stockx.rate_limit_per_hour = rate_limit;
        config.scheduler.call_delay_ms = call_delay_ms;
        let state = state_with(vec![client.clone() as Arc<dyn ProviderClient>], config);
        (state, client)
    }

    /// Enqueue subjects oldest first and claim them as one batch
    fn claim(state: &AppState, subjects: &[&str], calls_per_job: i64) -> Vec<Job> {
        let base = Utc::now() - ChronoDuration::seconds(60);
        for (i, subject) in subjects.iter().enumerate() {
            let item = EnqueueItem {
                subject: subject.to_string(),
                variant: Some("10".to_string()),
            };
            let created = base + ChronoDuration::seconds(i as i64);
            state
                .db
                .enqueue_job(ProviderKind::StockX, &item, PRIORITY_BACKGROUND, &created)
                .unwrap();
        }

        let rate_limit = state.rate_limit(ProviderKind::StockX);
        let claim = state
            .db
            .claim_admissible(ProviderKind::StockX, rate_limit, calls_per_job, 25, &Utc::now())
            .unwrap();
        assert_eq!(claim.jobs.len(), subjects.len());
        claim.jobs
    }

    fn used(state: &AppState) -> i64 {
        state
            .db
            .get_budget(ProviderKind::StockX, &hour_window(&Utc::now()))
            .unwrap()
            .map(|b| b.used)
            .unwrap_or(0)
    }

    fn availability_only() -> Vec<RawResponse> {
        vec![RawResponse {
            endpoint: AVAILABILITIES_ENDPOINT.to_string(),
            request_params: serde_json::json!({ "catalog_id": "SKU-1" }),
            http_status: 200,
            body: r#"{"variants": []}"#.to_string(),
        }]
    }

    #[tokio::test]
    async fn test_ledger_refusal_stops_batch_after_settling() {
        let (state, client) = stockx_state(3, 0);
        let jobs = claim(&state, &["SKU-1", "SKU-2", "SKU-3"], 1);

        // Another process spends two tokens after the claim was admitted
        assert_eq!(
            BudgetLedger::try_reserve(&state, ProviderKind::StockX, 2, &Utc::now()).unwrap(),
            2
        );

        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        let report = Worker::execute_batch(&state, ProviderKind::StockX, jobs, None)
            .await
            .unwrap();

        assert!(matches!(report.outcomes[0], JobOutcome::Completed { job_id, .. } if job_id == ids[0]));
        assert!(matches!(report.outcomes[1], JobOutcome::Completed { job_id, .. } if job_id == ids[1]));
        assert_eq!(report.outcomes[2], JobOutcome::Deferred { job_id: ids[2] });
        assert_eq!(report.metrics.succeeded, 2);
        assert_eq!(report.metrics.deferred, 1);

        // The third job was never fetched and is back in the queue
        assert_eq!(client.calls(), vec!["SKU-1".to_string(), "SKU-2".to_string()]);
        let third = state.db.get_job(ids[2]).unwrap().unwrap();
        assert_eq!(third.status, JobStatus::Pending);
        assert!(third.started_at.is_none());

        // Never charged past the hourly limit
        assert_eq!(used(&state), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_paced_by_delay() {
        let delay = Duration::from_millis(500);
        let (state, client) = stockx_state(100, delay.as_millis() as u64);
        let jobs = claim(&state, &["SKU-1", "SKU-2", "SKU-3"], 1);

        let started = tokio::time::Instant::now();
        let report = Worker::execute_batch(&state, ProviderKind::StockX, jobs, None)
            .await
            .unwrap();
        assert_eq!(report.metrics.succeeded, 3);

        let instants = client.call_instants();
        assert_eq!(instants.len(), 3);
        assert!(instants[0] - started < delay, "no pause before the first call");
        assert!(instants[1] - instants[0] >= delay);
        assert!(instants[2] - instants[0] >= delay * 2);
    }

    #[tokio::test]
    async fn test_throttled_second_call_keeps_first_response() {
        let (state, client) = stockx_state(10, 0);
        let jobs = claim(&state, &["SKU-1", "SKU-2"], 1);
        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        client.respond(
            "SKU-1",
            FetchOutcome::Partial {
                completed: availability_only(),
                rate_limited: true,
                message: "recent sales rate limited".to_string(),
            },
        );

        let report = Worker::execute_batch(&state, ProviderKind::StockX, jobs, None)
            .await
            .unwrap();

        assert_eq!(
            report.outcomes,
            vec![
                JobOutcome::Deferred { job_id: ids[0] },
                JobOutcome::Deferred { job_id: ids[1] },
            ]
        );

        let snapshots = state.db.snapshots_for_job(ids[0]).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].endpoint, AVAILABILITIES_ENDPOINT);
        assert_eq!(used(&state), 1);

        let first = state.db.get_job(ids[0]).unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        assert_eq!(first.retry_count, 0);
    }

    #[tokio::test]
    async fn test_failed_second_call_keeps_first_response_and_requeues() {
        let (state, client) = stockx_state(10, 0);
        let jobs = claim(&state, &["SKU-1"], 1);
        let id = jobs[0].id;
        client.respond(
            "SKU-1",
            FetchOutcome::Partial {
                completed: availability_only(),
                rate_limited: false,
                message: "HTTP 503: upstream".to_string(),
            },
        );

        let report = Worker::execute_batch(&state, ProviderKind::StockX, jobs, None)
            .await
            .unwrap();

        assert_eq!(
            report.outcomes,
            vec![JobOutcome::Failed {
                job_id: id,
                kind: FailureKind::Transient,
                requeued: true,
            }]
        );
        assert_eq!(state.db.snapshots_for_job(id).unwrap().len(), 1);
        assert_eq!(used(&state), 1);

        let job = state.db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }
}
