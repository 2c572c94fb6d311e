//! Per-provider hourly budget ledger

use super::columns::{from_millis, parse_text, to_millis};
use super::models::Budget;
use crate::error::Result;
use crate::providers::ProviderKind;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

fn map_budget(row: &Row<'_>) -> rusqlite::Result<Budget> {
    let provider: String = row.get(0)?;
    Ok(Budget {
        provider: parse_text(0, &provider)?,
        window_start: from_millis(1, row.get(1)?)?,
        rate_limit: row.get(2)?,
        used: row.get(3)?,
    })
}

/// Create the budget row for a window if it does not exist yet.
///
/// An existing row keeps the limit it was created with.
pub fn ensure_budget(
    conn: &Connection,
    provider: ProviderKind,
    window_start: &DateTime<Utc>,
    rate_limit: i64,
    now: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO budgets (provider, window_start, rate_limit, used, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)
         ON CONFLICT(provider, window_start) DO NOTHING",
        params![provider.as_str(), to_millis(window_start), rate_limit, to_millis(now)],
    )?;
    Ok(())
}

/// Get the budget row for a window
pub fn get_budget(
    conn: &Connection,
    provider: ProviderKind,
    window_start: &DateTime<Utc>,
) -> Result<Option<Budget>> {
    let budget = conn
        .query_row(
            "SELECT provider, window_start, rate_limit, used FROM budgets
             WHERE provider = ?1 AND window_start = ?2",
            params![provider.as_str(), to_millis(window_start)],
            map_budget,
        )
        .optional()?;
    Ok(budget)
}

/// Budget rows for windows starting at or after `since`
pub fn list_budgets(conn: &Connection, since: &DateTime<Utc>) -> Result<Vec<Budget>> {
    let mut stmt = conn.prepare(
        "SELECT provider, window_start, rate_limit, used FROM budgets
         WHERE window_start >= ?1
         ORDER BY window_start DESC, provider ASC",
    )?;
    let budgets = stmt
        .query_map(params![to_millis(since)], map_budget)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(budgets)
}

/// Increment `used` by up to `count` without passing the limit.
///
/// Returns the number of tokens actually granted (0..=count). The read and
/// the increment share an IMMEDIATE transaction, so concurrent callers across
/// processes are serialized on the SQLite write lock.
pub fn try_reserve(
    conn: &mut Connection,
    provider: ProviderKind,
    window_start: &DateTime<Utc>,
    rate_limit: i64,
    count: i64,
    now: &DateTime<Utc>,
) -> Result<i64> {
    if count <= 0 {
        return Ok(0);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_budget(&tx, provider, window_start, rate_limit, now)?;

    let (limit, used): (i64, i64) = tx.query_row(
        "SELECT rate_limit, used FROM budgets WHERE provider = ?1 AND window_start = ?2",
        params![provider.as_str(), to_millis(window_start)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let granted = count.min(limit - used).max(0);
    if granted > 0 {
        tx.execute(
            "UPDATE budgets SET used = used + ?1 WHERE provider = ?2 AND window_start = ?3",
            params![granted, provider.as_str(), to_millis(window_start)],
        )?;
    }
    tx.commit()?;

    Ok(granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::columns::hour_window;
    use crate::db::sqlite::migrations::run_migrations;
    use chrono::TimeZone;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn window() -> DateTime<Utc> {
        hour_window(&Utc.with_ymd_and_hms(2026, 5, 1, 12, 40, 0).unwrap())
    }

    #[test]
    fn test_budget_clamps_partial_grant() {
        let mut conn = create_test_db();
        let now = window();
        assert_eq!(try_reserve(&mut conn, ProviderKind::StockX, &window(), 10, 8, &now).unwrap(), 8);
        assert_eq!(try_reserve(&mut conn, ProviderKind::StockX, &window(), 10, 5, &now).unwrap(), 2);
        assert_eq!(try_reserve(&mut conn, ProviderKind::StockX, &window(), 10, 5, &now).unwrap(), 0);

        let budget = get_budget(&conn, ProviderKind::StockX, &window()).unwrap().unwrap();
        assert_eq!(budget.used, 10);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_ensure_budget_keeps_existing_row() {
        let mut conn = create_test_db();
        let now = window();
        ensure_budget(&conn, ProviderKind::Alias, &window(), 5, &now).unwrap();
        try_reserve(&mut conn, ProviderKind::Alias, &window(), 5, 3, &now).unwrap();
        ensure_budget(&conn, ProviderKind::Alias, &window(), 50, &now).unwrap();

        let budget = get_budget(&conn, ProviderKind::Alias, &window()).unwrap().unwrap();
        assert_eq!(budget.rate_limit, 5);
        assert_eq!(budget.used, 3);
    }

    #[test]
    fn test_windows_are_independent() {
        let mut conn = create_test_db();
        let now = window();
        let next = window() + chrono::Duration::hours(1);
        try_reserve(&mut conn, ProviderKind::StockX, &window(), 2, 2, &now).unwrap();
        assert_eq!(try_reserve(&mut conn, ProviderKind::StockX, &next, 2, 1, &next).unwrap(), 1);
        assert_eq!(list_budgets(&conn, &window()).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_reservations_never_overspend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "journal_mode", "WAL").unwrap();
            run_migrations(&conn).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut conn = Connection::open(&path).unwrap();
                    conn.busy_timeout(std::time::Duration::from_secs(10)).unwrap();
                    let now = window();
                    let mut granted = 0;
                    for _ in 0..5 {
                        granted += try_reserve(&mut conn, ProviderKind::StockX, &window(), 25, 1, &now).unwrap();
                    }
                    granted
                })
            })
            .collect();

        let total: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 25);

        let conn = Connection::open(&path).unwrap();
        let budget = get_budget(&conn, ProviderKind::StockX, &window()).unwrap().unwrap();
        assert_eq!(budget.used, 25);
    }
}
