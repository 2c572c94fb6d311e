//! Batch metrics and scheduler run summaries

use super::columns::{from_millis, parse_text, to_millis};
use super::jobs::count_jobs;
use super::models::{BatchMetrics, JobStatus, ProviderRunSummary, RunStats, SchedulerRun};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// Record one worker batch
pub fn insert_batch_metrics(
    conn: &Connection,
    metrics: &BatchMetrics,
    created_at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO batch_metrics
             (batch_id, run_id, provider, attempted, succeeded, failed, deferred,
              records_written, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            metrics.batch_id,
            metrics.run_id,
            metrics.provider.as_str(),
            metrics.attempted,
            metrics.succeeded,
            metrics.failed,
            metrics.deferred,
            metrics.records_written,
            metrics.duration_ms,
            to_millis(created_at)
        ],
    )?;
    Ok(())
}

/// Batches recorded for a scheduler run
pub fn batches_for_run(conn: &Connection, run_id: &str) -> Result<Vec<BatchMetrics>> {
    let mut stmt = conn.prepare(
        "SELECT batch_id, run_id, provider, attempted, succeeded, failed, deferred,
                records_written, duration_ms
         FROM batch_metrics WHERE run_id = ?1 ORDER BY id ASC",
    )?;
    let batches = stmt
        .query_map(params![run_id], |row| {
            let provider: String = row.get(2)?;
            Ok(BatchMetrics {
                batch_id: row.get(0)?,
                run_id: row.get(1)?,
                provider: parse_text(2, &provider)?,
                attempted: row.get(3)?,
                succeeded: row.get(4)?,
                failed: row.get(5)?,
                deferred: row.get(6)?,
                records_written: row.get(7)?,
                duration_ms: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(batches)
}

/// Record one scheduler tick
pub fn insert_scheduler_run(
    conn: &Connection,
    run: &SchedulerRun,
    started_at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO scheduler_runs
             (run_id, reclaimed, selected, succeeded, failed, deferred, batches,
              provider_breakdown, duration_ms, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run.run_id,
            run.reclaimed,
            run.selected,
            run.succeeded,
            run.failed,
            run.deferred,
            run.batches,
            serde_json::to_string(&run.providers)?,
            run.duration_ms,
            to_millis(started_at)
        ],
    )?;
    Ok(())
}

/// Most recent scheduler runs, newest first
pub fn recent_runs(conn: &Connection, limit: i64) -> Result<Vec<SchedulerRun>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, reclaimed, selected, succeeded, failed, deferred, batches,
                provider_breakdown, duration_ms, started_at
         FROM scheduler_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
    )?;
    let runs = stmt
        .query_map(params![limit], |row| {
            let breakdown: String = row.get(7)?;
            let providers: Vec<ProviderRunSummary> =
                serde_json::from_str(&breakdown).unwrap_or_default();
            Ok(SchedulerRun {
                run_id: row.get(0)?,
                reclaimed: row.get(1)?,
                selected: row.get(2)?,
                succeeded: row.get(3)?,
                failed: row.get(4)?,
                deferred: row.get(5)?,
                batches: row.get(6)?,
                providers,
                duration_ms: row.get(8)?,
                started_at: Some(from_millis(9, row.get(9)?)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(runs)
}

/// Aggregate runs started at or after `since`, plus current queue depth
pub fn run_stats(conn: &Connection, since: &DateTime<Utc>) -> Result<RunStats> {
    let mut stats = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(selected), 0), COALESCE(SUM(succeeded), 0),
                COALESCE(SUM(failed), 0), COALESCE(SUM(deferred), 0),
                COALESCE(SUM(reclaimed), 0), COALESCE(AVG(duration_ms), 0.0)
         FROM scheduler_runs WHERE started_at >= ?1",
        params![to_millis(since)],
        |row| {
            Ok(RunStats {
                runs: row.get(0)?,
                selected: row.get(1)?,
                succeeded: row.get(2)?,
                failed: row.get(3)?,
                deferred: row.get(4)?,
                reclaimed: row.get(5)?,
                avg_run_ms: row.get(6)?,
                ..Default::default()
            })
        },
    )?;

    stats.pending_jobs = count_jobs(conn, JobStatus::Pending)?;
    stats.running_jobs = count_jobs(conn, JobStatus::Running)?;
    stats.failed_jobs = count_jobs(conn, JobStatus::Failed)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::migrations::run_migrations;
    use crate::providers::ProviderKind;
    use chrono::Duration;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_run_stats_aggregate() {
        let conn = create_test_db();
        let now = Utc::now();

        for (i, selected) in [4_i64, 6].iter().enumerate() {
            let run = SchedulerRun {
                run_id: format!("run-{}", i),
                selected: *selected,
                succeeded: selected - 1,
                failed: 1,
                batches: 1,
                providers: vec![ProviderRunSummary {
                    provider: ProviderKind::StockX,
                    remaining_budget: 10,
                    selected: *selected,
                    succeeded: selected - 1,
                    failed: 1,
                    deferred: 0,
                }],
                duration_ms: 100 * (i as i64 + 1),
                ..Default::default()
            };
            insert_scheduler_run(&conn, &run, &now).unwrap();
        }

        let stats = run_stats(&conn, &(now - Duration::hours(1))).unwrap();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.selected, 10);
        assert_eq!(stats.succeeded, 8);
        assert_eq!(stats.failed, 2);
        assert!((stats.avg_run_ms - 150.0).abs() < f64::EPSILON);

        let recent = recent_runs(&conn, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].providers[0].provider, ProviderKind::StockX);
    }

    #[test]
    fn test_batch_metrics_by_run() {
        let conn = create_test_db();
        let metrics = BatchMetrics {
            batch_id: "batch-1".to_string(),
            run_id: Some("run-1".to_string()),
            provider: ProviderKind::Alias,
            attempted: 5,
            succeeded: 2,
            failed: 0,
            deferred: 3,
            records_written: 4,
            duration_ms: 1200,
        };
        insert_batch_metrics(&conn, &metrics, &Utc::now()).unwrap();

        let batches = batches_for_run(&conn, "run-1").unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].deferred, 3);
        assert!(batches_for_run(&conn, "run-2").unwrap().is_empty());
    }
}
