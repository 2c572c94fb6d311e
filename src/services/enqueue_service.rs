//! Enqueue Service
//!
//! The surface the CRUD application calls when a user adds an item, a page
//! detects stale pricing, or a user explicitly asks for a refresh.

use crate::db::sqlite::models::{EnqueueItem, EnqueueOutcome, Job, JobStatus};
use crate::error::{AppError, Result};
use crate::providers::ProviderKind;
use crate::state::AppState;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Result of a batch enqueue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueManyResult {
    pub created: usize,
    pub existing: usize,
    pub promoted: usize,
    pub jobs: Vec<EnqueueOutcome>,
}

/// Enqueue service for business logic
pub struct EnqueueService;

impl EnqueueService {
    /// Enqueue one fetch; a no-op (possibly with promotion) when one is in flight
    pub fn enqueue(
        state: &AppState,
        provider: ProviderKind,
        subject: &str,
        variant: Option<&str>,
        priority: i64,
    ) -> Result<EnqueueOutcome> {
        Self::ensure_provider(state, provider)?;

        let item = EnqueueItem {
            subject: subject.to_string(),
            variant: variant.map(str::to_string),
        };
        let outcome = state.db.enqueue_job(provider, &item, priority, &Utc::now())?;

        if outcome.created {
            info!("Enqueued {} job {} for {} (priority {})", provider, outcome.job_id, subject, priority);
        } else if outcome.promoted {
            info!("Promoted {} job {} to priority {}", provider, outcome.job_id, outcome.priority);
        }

        Ok(outcome)
    }

    /// Enqueue many subjects for one provider with the same dedupe rule per item
    pub fn enqueue_many(
        state: &AppState,
        provider: ProviderKind,
        items: &[EnqueueItem],
        priority: i64,
    ) -> Result<EnqueueManyResult> {
        Self::ensure_provider(state, provider)?;

        let jobs = state.db.enqueue_jobs(provider, items, priority, &Utc::now())?;
        let created = jobs.iter().filter(|o| o.created).count();
        let promoted = jobs.iter().filter(|o| o.promoted).count();

        info!(
            "EnqueueService::enqueue_many - {} {} items: {} new, {} promoted",
            items.len(),
            provider,
            created,
            promoted
        );

        Ok(EnqueueManyResult {
            created,
            existing: jobs.len() - created,
            promoted,
            jobs,
        })
    }

    /// Manually move a failed job back to pending with a fresh attempt count
    pub fn reset_failed(state: &AppState, job_id: i64) -> Result<Job> {
        let job = state
            .db
            .get_job(job_id)?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

        if job.status != JobStatus::Failed {
            return Err(AppError::Validation(format!(
                "Job {} is {}, only failed jobs can be reset",
                job_id, job.status
            )));
        }

        if !state.db.requeue_failed(job_id, true)? {
            return Err(AppError::Validation(format!(
                "Job {} was not reset: another pending or running job covers the same subject",
                job_id
            )));
        }

        info!("Reset failed job {} to pending", job_id);
        state
            .db
            .get_job(job_id)?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    /// Get a job by id
    pub fn get_job(state: &AppState, job_id: i64) -> Result<Job> {
        state
            .db
            .get_job(job_id)?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    fn ensure_provider(state: &AppState, provider: ProviderKind) -> Result<()> {
        if state.providers.get(provider).is_none() {
            return Err(AppError::Validation(format!(
                "Provider '{}' is not enabled",
                provider
            )));
        }
        Ok(())
    }
}
