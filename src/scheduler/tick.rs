//! Scheduler tick
//!
//! Stateless between ticks. Each tick reclaims orphans, makes sure the hour's
//! budget rows exist, claims the admissible jobs per provider and runs one
//! batch per provider concurrently. Ticks on different processes coordinate
//! only through the database.

use super::sweeper::Sweeper;
use super::worker::Worker;
use crate::db::sqlite::models::{ProviderRunSummary, SchedulerRun};
use crate::error::Result;
use crate::services::BudgetLedger;
use crate::state::AppState;
use chrono::Utc;
use futures_util::future::join_all;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Periodic orchestrator
pub struct Scheduler;

impl Scheduler {
    /// Run one tick and record its summary
    pub async fn tick(state: &AppState) -> Result<SchedulerRun> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();

        let reclaimed = Sweeper::reclaim_orphans(state, &started_at)?;
        BudgetLedger::ensure_current(state, &started_at)?;

        let max_batch = i64::from(state.config.scheduler.max_batch_size);
        let mut summaries = Vec::new();
        let mut batches = Vec::new();

        for provider in state.providers.kinds() {
            let Some(client) = state.providers.get(provider) else {
                continue;
            };

            let claim = state.db.claim_admissible(
                provider,
                state.rate_limit(provider),
                client.calls_per_fetch(),
                max_batch,
                &Utc::now(),
            )?;

            info!(
                run_id = %run_id,
                provider = %provider,
                remaining_budget = claim.remaining_budget,
                selected = claim.jobs.len(),
                "Claimed jobs"
            );

            summaries.push(ProviderRunSummary {
                provider,
                remaining_budget: claim.remaining_budget,
                selected: claim.jobs.len() as i64,
                succeeded: 0,
                failed: 0,
                deferred: 0,
            });
            if !claim.jobs.is_empty() {
                batches.push((provider, claim.jobs));
            }
        }

        let batch_count = batches.len() as i64;
        let run_ref = run_id.as_str();
        let results = join_all(batches.into_iter().map(|(provider, jobs)| async move {
            let claimed = jobs.len() as i64;
            let report = Worker::execute_batch(state, provider, jobs, Some(run_ref)).await;
            (provider, claimed, report)
        }))
        .await;

        for (provider, claimed, report) in results {
            let Some(summary) = summaries.iter_mut().find(|s| s.provider == provider) else {
                continue;
            };
            match report {
                Ok(report) => {
                    summary.succeeded += report.metrics.succeeded;
                    summary.failed += report.metrics.failed;
                    summary.deferred += report.metrics.deferred;
                }
                Err(e) => {
                    // Claimed jobs stay running; the orphan sweep returns them
                    error!(run_id = %run_id, provider = %provider, "Batch dispatch failed: {}", e);
                    summary.failed += claimed;
                }
            }
        }

        let run = SchedulerRun {
            run_id: run_id.clone(),
            reclaimed: reclaimed.len() as i64,
            selected: summaries.iter().map(|s| s.selected).sum(),
            succeeded: summaries.iter().map(|s| s.succeeded).sum(),
            failed: summaries.iter().map(|s| s.failed).sum(),
            deferred: summaries.iter().map(|s| s.deferred).sum(),
            batches: batch_count,
            providers: summaries,
            duration_ms: started.elapsed().as_millis() as i64,
            started_at: Some(started_at),
        };
        state.db.insert_scheduler_run(&run, &started_at)?;

        info!(
            run_id = %run.run_id,
            selected = run.selected,
            succeeded = run.succeeded,
            failed = run.failed,
            deferred = run.deferred,
            reclaimed = run.reclaimed,
            "Scheduler tick finished in {}ms",
            run.duration_ms
        );

        Ok(run)
    }
}
