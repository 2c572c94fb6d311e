//! SQLite database module

pub mod models;
pub mod columns;
mod migrations;
mod jobs;
mod budgets;
mod snapshots;
mod market;
mod latest;
mod run_logs;

pub use jobs::{dedupe_key, Claim};

use crate::error::Result;
use crate::providers::{ProviderKind, RawResponse};
use chrono::{DateTime, Utc};
use models::*;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// SQLite database wrapper
///
/// Several processes may open the same file; every multi-statement operation
/// runs in an IMMEDIATE transaction so they coordinate through SQLite's
/// write lock.
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Open (or create) the database file and apply migrations
    pub fn new(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };

        // Run migrations
        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)
    }

    // ========== Job Queue Methods ==========

    /// Enqueue one fetch (deduplicated, priority-promoting)
    pub fn enqueue_job(
        &self,
        provider: ProviderKind,
        item: &EnqueueItem,
        priority: i64,
        now: &DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let mut conn = self.conn.lock();
        jobs::enqueue(&mut conn, provider, item, priority, now)
    }

    /// Enqueue a batch of subjects for one provider
    pub fn enqueue_jobs(
        &self,
        provider: ProviderKind,
        items: &[EnqueueItem],
        priority: i64,
        now: &DateTime<Utc>,
    ) -> Result<Vec<EnqueueOutcome>> {
        let mut conn = self.conn.lock();
        jobs::enqueue_many(&mut conn, provider, items, priority, now)
    }

    /// Get a job by id
    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        jobs::get_job(&conn, id)
    }

    /// List jobs, newest first
    pub fn list_jobs(
        &self,
        provider: Option<ProviderKind>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        jobs::list_jobs(&conn, provider, status, limit)
    }

    /// Count jobs in one status
    pub fn count_jobs(&self, status: JobStatus) -> Result<i64> {
        let conn = self.conn.lock();
        jobs::count_jobs(&conn, status)
    }

    /// Atomically claim the pending jobs the hourly budget admits
    pub fn claim_admissible(
        &self,
        provider: ProviderKind,
        rate_limit: i64,
        calls_per_job: i64,
        max_batch: i64,
        now: &DateTime<Utc>,
    ) -> Result<Claim> {
        let mut conn = self.conn.lock();
        jobs::claim_admissible(&mut conn, provider, rate_limit, calls_per_job, max_batch, now)
    }

    /// Mark a claimed job completed
    pub fn complete_job(&self, job: &Job, now: &DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        jobs::complete_job(&conn, job, now)
    }

    /// Mark a claimed job failed
    pub fn fail_job(
        &self,
        job: &Job,
        kind: FailureKind,
        message: &str,
        now: &DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        jobs::fail_job(&conn, job, kind, message, now)
    }

    /// Return claimed jobs to pending without counting an attempt
    pub fn defer_jobs(&self, claimed: &[Job]) -> Result<usize> {
        let mut conn = self.conn.lock();
        jobs::defer_jobs(&mut conn, claimed)
    }

    /// Move a failed job back to pending
    pub fn requeue_failed(&self, id: i64, reset_retries: bool) -> Result<bool> {
        let conn = self.conn.lock();
        jobs::requeue_failed(&conn, id, reset_retries)
    }

    /// Sweep stale running jobs back to pending
    pub fn reclaim_orphans(&self, cutoff: &DateTime<Utc>) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        jobs::reclaim_orphans(&conn, cutoff)
    }

    // ========== Budget Methods ==========

    /// Create the hour's budget row if missing
    pub fn ensure_budget(
        &self,
        provider: ProviderKind,
        window_start: &DateTime<Utc>,
        rate_limit: i64,
        now: &DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        budgets::ensure_budget(&conn, provider, window_start, rate_limit, now)
    }

    /// Get one budget row
    pub fn get_budget(
        &self,
        provider: ProviderKind,
        window_start: &DateTime<Utc>,
    ) -> Result<Option<Budget>> {
        let conn = self.conn.lock();
        budgets::get_budget(&conn, provider, window_start)
    }

    /// Budget rows since a window start
    pub fn list_budgets(&self, since: &DateTime<Utc>) -> Result<Vec<Budget>> {
        let conn = self.conn.lock();
        budgets::list_budgets(&conn, since)
    }

    /// Increment-with-ceiling; returns tokens granted
    pub fn try_reserve(
        &self,
        provider: ProviderKind,
        window_start: &DateTime<Utc>,
        rate_limit: i64,
        count: i64,
        now: &DateTime<Utc>,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        budgets::try_reserve(&mut conn, provider, window_start, rate_limit, count, now)
    }

    // ========== Snapshot Methods ==========

    /// Append a raw response
    pub fn insert_snapshot(
        &self,
        provider: ProviderKind,
        job_id: Option<i64>,
        response: &RawResponse,
        requested_at: &DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        snapshots::insert_snapshot(&conn, provider, job_id, response, requested_at)
    }

    /// Get a raw snapshot by id
    pub fn get_snapshot(&self, id: i64) -> Result<Option<RawSnapshot>> {
        let conn = self.conn.lock();
        snapshots::get_snapshot(&conn, id)
    }

    /// Snapshots captured for a job
    pub fn snapshots_for_job(&self, job_id: i64) -> Result<Vec<RawSnapshot>> {
        let conn = self.conn.lock();
        snapshots::list_for_job(&conn, job_id)
    }

    // ========== Market Data Methods ==========

    /// Insert normalized records; duplicates within a minute are skipped
    pub fn insert_market_records(&self, records: &[MarketRecord]) -> Result<usize> {
        let mut conn = self.conn.lock();
        market::insert_records(&mut conn, records)
    }

    /// Time-series read
    pub fn query_history(
        &self,
        key: &MarketKey,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<StoredMarketRecord>> {
        let conn = self.conn.lock();
        market::query_history(&conn, key, from, to, limit)
    }

    /// Total market records stored
    pub fn count_market_records(&self) -> Result<i64> {
        let conn = self.conn.lock();
        market::count_records(&conn)
    }

    /// Rebuild the latest-price view
    pub fn refresh_latest_prices(&self, now: &DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.lock();
        latest::refresh_latest_prices(&mut conn, now)
    }

    /// Read the latest-price view
    pub fn query_latest(&self, key: &MarketKey) -> Result<Vec<StoredMarketRecord>> {
        let conn = self.conn.lock();
        latest::query_latest(&conn, key)
    }

    /// Last view rebuild time (unix ms)
    pub fn latest_refreshed_at(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        latest::last_refreshed_at(&conn)
    }

    // ========== Run Log Methods ==========

    /// Record one worker batch
    pub fn insert_batch_metrics(&self, metrics: &BatchMetrics, now: &DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        run_logs::insert_batch_metrics(&conn, metrics, now)
    }

    /// Batches recorded for a run
    pub fn batches_for_run(&self, run_id: &str) -> Result<Vec<BatchMetrics>> {
        let conn = self.conn.lock();
        run_logs::batches_for_run(&conn, run_id)
    }

    /// Record one scheduler tick
    pub fn insert_scheduler_run(&self, run: &SchedulerRun, started_at: &DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        run_logs::insert_scheduler_run(&conn, run, started_at)
    }

    /// Most recent scheduler runs
    pub fn recent_runs(&self, limit: i64) -> Result<Vec<SchedulerRun>> {
        let conn = self.conn.lock();
        run_logs::recent_runs(&conn, limit)
    }

    /// Aggregated run statistics since a point in time
    pub fn run_stats(&self, since: &DateTime<Utc>) -> Result<RunStats> {
        let conn = self.conn.lock();
        run_logs::run_stats(&conn, since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_enqueue_keeps_one_in_flight_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        SqliteDb::new(&path, Duration::from_secs(10)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    // One connection per thread, as separate processes would have
                    let db = Arc::new(SqliteDb::new(&path, Duration::from_secs(10)).unwrap());
                    let item = EnqueueItem {
                        subject: "SKU-1".to_string(),
                        variant: Some("10".to_string()),
                    };
                    let priority = if i % 2 == 0 { PRIORITY_BACKGROUND } else { PRIORITY_HOT };
                    db.enqueue_job(ProviderKind::StockX, &item, priority, &Utc::now())
                        .unwrap()
                        .job_id
                })
            })
            .collect();

        let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let db = SqliteDb::new(&path, Duration::from_secs(10)).unwrap();
        assert_eq!(db.count_jobs(JobStatus::Pending).unwrap(), 1);
        let job = db.get_job(ids[0]).unwrap().unwrap();
        assert_eq!(job.priority, PRIORITY_HOT);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.db");
        let db = SqliteDb::new(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(db.count_market_records().unwrap(), 0);
        assert!(path.exists());
    }
}
