//! SQLite database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    // Run each migration
    run_migration(conn, "001_jobs", CREATE_JOBS_TABLE)?;
    run_migration(conn, "002_budgets", CREATE_BUDGETS_TABLE)?;
    run_migration(conn, "003_raw_snapshots", CREATE_RAW_SNAPSHOTS_TABLE)?;
    run_migration(conn, "004_market_records", CREATE_MARKET_RECORDS_TABLE)?;
    run_migration(conn, "005_latest_prices", CREATE_LATEST_PRICES_TABLE)?;
    run_migration(conn, "006_batch_metrics", CREATE_BATCH_METRICS_TABLE)?;
    run_migration(conn, "007_scheduler_runs", CREATE_SCHEDULER_RUNS_TABLE)?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    // Check if migration already applied
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO migrations (name) VALUES (?)",
            [name],
        )?;
    }

    Ok(())
}

// At most one pending/running job per dedupe key; finished jobs don't block.
const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    subject TEXT NOT NULL,
    variant TEXT NOT NULL DEFAULT '',
    priority INTEGER NOT NULL DEFAULT 100,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'completed', 'failed')),
    dedupe_key TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    failure_kind TEXT,
    error_message TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_dedupe_in_flight
    ON jobs(dedupe_key) WHERE status IN ('pending', 'running');
CREATE INDEX IF NOT EXISTS idx_jobs_claim
    ON jobs(provider, status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_jobs_started ON jobs(status, started_at);
"#;

const CREATE_BUDGETS_TABLE: &str = r#"
CREATE TABLE budgets (
    provider TEXT NOT NULL,
    window_start INTEGER NOT NULL,
    rate_limit INTEGER NOT NULL,
    used INTEGER NOT NULL DEFAULT 0 CHECK (used >= 0),
    created_at INTEGER NOT NULL,
    PRIMARY KEY (provider, window_start)
);
"#;

const CREATE_RAW_SNAPSHOTS_TABLE: &str = r#"
CREATE TABLE raw_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    request_params TEXT NOT NULL,
    payload TEXT NOT NULL,
    http_status INTEGER NOT NULL,
    requested_at INTEGER NOT NULL,
    job_id INTEGER
);
CREATE INDEX IF NOT EXISTS idx_raw_snapshots_job ON raw_snapshots(job_id);
CREATE INDEX IF NOT EXISTS idx_raw_snapshots_provider ON raw_snapshots(provider, requested_at);

CREATE TRIGGER raw_snapshots_no_update BEFORE UPDATE ON raw_snapshots
BEGIN
    SELECT RAISE(ABORT, 'raw_snapshots is append-only');
END;
CREATE TRIGGER raw_snapshots_no_delete BEFORE DELETE ON raw_snapshots
BEGIN
    SELECT RAISE(ABORT, 'raw_snapshots is append-only');
END;
"#;

const CREATE_MARKET_RECORDS_TABLE: &str = r#"
CREATE TABLE market_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    subject TEXT NOT NULL,
    size_key TEXT NOT NULL DEFAULT '',
    currency TEXT NOT NULL,
    region TEXT NOT NULL DEFAULT '',
    is_expedited INTEGER NOT NULL DEFAULT 0,
    is_consigned INTEGER NOT NULL DEFAULT 0,
    is_direct INTEGER NOT NULL DEFAULT 0,
    lowest_ask TEXT,
    highest_bid TEXT,
    last_sale TEXT,
    sales_72h INTEGER,
    sales_30d INTEGER,
    observed_at INTEGER NOT NULL,
    observed_minute INTEGER NOT NULL,
    source_snapshot_id INTEGER NOT NULL REFERENCES raw_snapshots(id),
    UNIQUE (provider, subject, size_key, currency, region,
            is_expedited, is_consigned, is_direct, observed_minute)
);
CREATE INDEX IF NOT EXISTS idx_market_records_series
    ON market_records(provider, subject, size_key, observed_at);

CREATE TRIGGER market_records_no_update BEFORE UPDATE ON market_records
BEGIN
    SELECT RAISE(ABORT, 'market_records is append-only');
END;
"#;

const CREATE_LATEST_PRICES_TABLE: &str = r#"
CREATE TABLE latest_prices (
    provider TEXT NOT NULL,
    subject TEXT NOT NULL,
    size_key TEXT NOT NULL DEFAULT '',
    currency TEXT NOT NULL,
    region TEXT NOT NULL DEFAULT '',
    is_expedited INTEGER NOT NULL DEFAULT 0,
    is_consigned INTEGER NOT NULL DEFAULT 0,
    is_direct INTEGER NOT NULL DEFAULT 0,
    record_id INTEGER NOT NULL,
    lowest_ask TEXT,
    highest_bid TEXT,
    last_sale TEXT,
    sales_72h INTEGER,
    sales_30d INTEGER,
    observed_at INTEGER NOT NULL,
    source_snapshot_id INTEGER NOT NULL,
    refreshed_at INTEGER NOT NULL,
    PRIMARY KEY (provider, subject, size_key, currency, region,
                 is_expedited, is_consigned, is_direct)
);
CREATE INDEX IF NOT EXISTS idx_latest_prices_subject ON latest_prices(subject, size_key);
"#;

const CREATE_BATCH_METRICS_TABLE: &str = r#"
CREATE TABLE batch_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL UNIQUE,
    run_id TEXT,
    provider TEXT NOT NULL,
    attempted INTEGER NOT NULL DEFAULT 0,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    deferred INTEGER NOT NULL DEFAULT 0,
    records_written INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batch_metrics_run ON batch_metrics(run_id);
"#;

const CREATE_SCHEDULER_RUNS_TABLE: &str = r#"
CREATE TABLE scheduler_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    reclaimed INTEGER NOT NULL DEFAULT 0,
    selected INTEGER NOT NULL DEFAULT 0,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    deferred INTEGER NOT NULL DEFAULT 0,
    batches INTEGER NOT NULL DEFAULT 0,
    provider_breakdown TEXT NOT NULL DEFAULT '[]',
    duration_ms INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduler_runs_started ON scheduler_runs(started_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 7);
    }

    #[test]
    fn test_raw_snapshots_reject_updates() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO raw_snapshots (provider, endpoint, request_params, payload, http_status, requested_at)
             VALUES ('stockx', 'market-data', '{}', '[]', 200, 0)",
            [],
        )
        .unwrap();

        assert!(conn.execute("UPDATE raw_snapshots SET payload = 'x'", []).is_err());
        assert!(conn.execute("DELETE FROM raw_snapshots", []).is_err());
    }
}
