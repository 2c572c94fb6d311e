//! Job queue persistence
//!
//! Every state transition is a single conditional UPDATE (or runs inside an
//! IMMEDIATE transaction) so concurrent schedulers, workers and enqueue calls
//! coordinate only through the database.

use super::budgets;
use super::columns::{
    from_millis, from_optional_millis, hour_window, is_constraint_violation, key_text,
    optional_key, parse_text, to_millis,
};
use super::models::{EnqueueItem, EnqueueOutcome, FailureKind, Job, JobStatus};
use crate::error::{AppError, Result};
use crate::providers::ProviderKind;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use sha2::{Digest, Sha256};

const JOB_COLUMNS: &str = "id, provider, subject, variant, priority, status, dedupe_key, \
     retry_count, failure_kind, error_message, created_at, started_at, completed_at";

/// Deterministic hash of provider + subject + variant
pub fn dedupe_key(provider: ProviderKind, subject: &str, variant: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(subject.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(variant.map(str::trim).unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let provider: String = row.get(1)?;
    let status: String = row.get(5)?;
    let failure_kind: Option<String> = row.get(8)?;

    Ok(Job {
        id: row.get(0)?,
        provider: parse_text(1, &provider)?,
        subject: row.get(2)?,
        variant: optional_key(row.get(3)?),
        priority: row.get(4)?,
        status: parse_text(5, &status)?,
        dedupe_key: row.get(6)?,
        retry_count: row.get(7)?,
        failure_kind: failure_kind.map(|k| parse_text(8, &k)).transpose()?,
        error_message: row.get(9)?,
        created_at: from_millis(10, row.get(10)?)?,
        started_at: from_optional_millis(11, row.get(11)?)?,
        completed_at: from_optional_millis(12, row.get(12)?)?,
    })
}

fn enqueue_in(
    conn: &Connection,
    provider: ProviderKind,
    item: &EnqueueItem,
    priority: i64,
    now: &DateTime<Utc>,
) -> Result<EnqueueOutcome> {
    let subject = item.subject.trim();
    if subject.is_empty() {
        return Err(AppError::Validation("Subject identifier is required".to_string()));
    }
    let variant = item.variant.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let key = dedupe_key(provider, subject, variant);

    let existing: Option<(i64, i64)> = conn
        .query_row(
            "SELECT id, priority FROM jobs
             WHERE dedupe_key = ?1 AND status IN ('pending', 'running')",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((job_id, current)) if current < priority => {
            conn.execute(
                "UPDATE jobs SET priority = ?1 WHERE id = ?2",
                params![priority, job_id],
            )?;
            tracing::debug!("Raised job {} priority {} -> {}", job_id, current, priority);
            Ok(EnqueueOutcome {
                job_id,
                created: false,
                promoted: true,
                priority,
            })
        }
        Some((job_id, current)) => Ok(EnqueueOutcome {
            job_id,
            created: false,
            promoted: false,
            priority: current,
        }),
        None => {
            conn.execute(
                "INSERT INTO jobs (provider, subject, variant, priority, status, dedupe_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
                params![
                    provider.as_str(),
                    subject,
                    key_text(variant),
                    priority,
                    key,
                    to_millis(now)
                ],
            )?;
            Ok(EnqueueOutcome {
                job_id: conn.last_insert_rowid(),
                created: true,
                promoted: false,
                priority,
            })
        }
    }
}

/// Enqueue one fetch, deduplicated against in-flight work
pub fn enqueue(
    conn: &mut Connection,
    provider: ProviderKind,
    item: &EnqueueItem,
    priority: i64,
    now: &DateTime<Utc>,
) -> Result<EnqueueOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = enqueue_in(&tx, provider, item, priority, now)?;
    tx.commit()?;
    Ok(outcome)
}

/// Enqueue many subjects for one provider in a single transaction
pub fn enqueue_many(
    conn: &mut Connection,
    provider: ProviderKind,
    items: &[EnqueueItem],
    priority: i64,
    now: &DateTime<Utc>,
) -> Result<Vec<EnqueueOutcome>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
        outcomes.push(enqueue_in(&tx, provider, item, priority, now)?);
    }
    tx.commit()?;
    Ok(outcomes)
}

/// Get a job by id
pub fn get_job(conn: &Connection, id: i64) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
    let job = conn.query_row(&sql, params![id], map_job).optional()?;
    Ok(job)
}

/// List jobs, newest first
pub fn list_jobs(
    conn: &Connection,
    provider: Option<ProviderKind>,
    status: Option<JobStatus>,
    limit: i64,
) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT {} FROM jobs
         WHERE (?1 IS NULL OR provider = ?1) AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC, id DESC
         LIMIT ?3",
        JOB_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map(
            params![provider.map(|p| p.as_str()), status.map(|s| s.as_str()), limit],
            map_job,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(jobs)
}

/// Count jobs in one status
pub fn count_jobs(conn: &Connection, status: JobStatus) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Jobs claimed for one provider in one tick
#[derive(Debug, Clone)]
pub struct Claim {
    pub jobs: Vec<Job>,
    /// Budget left for the hour after accounting for in-flight work
    pub remaining_budget: i64,
}

/// Claim the highest-priority pending jobs the hourly budget admits.
///
/// Budget row creation, the headroom computation and the pending -> running
/// transition share one IMMEDIATE transaction, so two concurrent ticks can
/// neither select the same job nor jointly over-admit. Jobs already running
/// count against the headroom because their calls have not been charged yet.
/// `calls_per_job` is the number of provider requests one fetch spends.
pub fn claim_admissible(
    conn: &mut Connection,
    provider: ProviderKind,
    rate_limit: i64,
    calls_per_job: i64,
    max_batch: i64,
    now: &DateTime<Utc>,
) -> Result<Claim> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let window = hour_window(now);

    budgets::ensure_budget(&tx, provider, &window, rate_limit, now)?;
    let budget = budgets::get_budget(&tx, provider, &window)?
        .ok_or_else(|| AppError::Internal(format!("budget row missing for {}", provider)))?;

    let in_flight: i64 = tx.query_row(
        "SELECT COUNT(*) FROM jobs WHERE provider = ?1 AND status = 'running'",
        params![provider.as_str()],
        |row| row.get(0),
    )?;

    let calls_per_job = calls_per_job.max(1);
    let remaining_budget = (budget.remaining() - in_flight * calls_per_job).max(0);
    let limit = (remaining_budget / calls_per_job).min(max_batch);

    let mut jobs = if limit > 0 {
        let sql = format!(
            "UPDATE jobs SET status = 'running', started_at = ?1
             WHERE id IN (
                 SELECT id FROM jobs
                 WHERE provider = ?2 AND status = 'pending'
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT ?3
             )
             RETURNING {}",
            JOB_COLUMNS
        );
        let mut stmt = tx.prepare(&sql)?;
        let claimed = stmt
            .query_map(params![to_millis(now), provider.as_str(), limit], map_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        claimed
    } else {
        Vec::new()
    };

    tx.commit()?;

    // RETURNING order is unspecified
    jobs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    Ok(Claim {
        jobs,
        remaining_budget,
    })
}

/// Mark a claimed job completed
pub fn complete_job(conn: &Connection, job: &Job, now: &DateTime<Utc>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE jobs
         SET status = 'completed', completed_at = ?1, failure_kind = NULL, error_message = NULL
         WHERE id = ?2 AND status = 'running' AND started_at IS ?3",
        params![
            to_millis(now),
            job.id,
            job.started_at.as_ref().map(to_millis)
        ],
    )?;
    Ok(updated == 1)
}

/// Mark a claimed job failed; transient failures count an attempt.
///
/// Returns the updated job, or None when the claim was lost (e.g. reclaimed
/// by the orphan sweep while the call was in progress).
pub fn fail_job(
    conn: &Connection,
    job: &Job,
    kind: FailureKind,
    message: &str,
    now: &DateTime<Utc>,
) -> Result<Option<Job>> {
    let sql = format!(
        "UPDATE jobs
         SET status = 'failed', completed_at = ?1, failure_kind = ?2, error_message = ?3,
             retry_count = retry_count + ?4
         WHERE id = ?5 AND status = 'running' AND started_at IS ?6
         RETURNING {}",
        JOB_COLUMNS
    );
    let attempt = if kind == FailureKind::Transient { 1 } else { 0 };
    let failed = conn
        .query_row(
            &sql,
            params![
                to_millis(now),
                kind.as_str(),
                message,
                attempt,
                job.id,
                job.started_at.as_ref().map(to_millis)
            ],
            map_job,
        )
        .optional()?;
    Ok(failed)
}

/// Return claimed jobs to pending untouched (provider throttling / lost budget)
pub fn defer_jobs(conn: &mut Connection, jobs: &[Job]) -> Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut deferred = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE jobs SET status = 'pending', started_at = NULL
             WHERE id = ?1 AND status = 'running' AND started_at IS ?2",
        )?;
        for job in jobs {
            deferred += stmt.execute(params![job.id, job.started_at.as_ref().map(to_millis)])?;
        }
    }
    tx.commit()?;
    Ok(deferred)
}

/// Put a failed job back into the pending pool.
///
/// Returns false when the job is not failed, or when a newer in-flight job for
/// the same dedupe key already exists.
pub fn requeue_failed(conn: &Connection, id: i64, reset_retries: bool) -> Result<bool> {
    let result = conn.execute(
        "UPDATE jobs
         SET status = 'pending', started_at = NULL, completed_at = NULL,
             retry_count = CASE WHEN ?2 THEN 0 ELSE retry_count END
         WHERE id = ?1 AND status = 'failed'",
        params![id, reset_retries],
    );

    match result {
        Ok(updated) => Ok(updated == 1),
        Err(e) if is_constraint_violation(&e) => {
            tracing::debug!("Job {} not requeued: another in-flight job owns its key", id);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Sweep jobs stuck in running since before `cutoff` back to pending.
///
/// Identity, priority and retry_count are preserved.
pub fn reclaim_orphans(conn: &Connection, cutoff: &DateTime<Utc>) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "UPDATE jobs SET status = 'pending', started_at = NULL
         WHERE status = 'running' AND started_at < ?1
         RETURNING id",
    )?;
    let ids = stmt
        .query_map(params![to_millis(cutoff)], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}
