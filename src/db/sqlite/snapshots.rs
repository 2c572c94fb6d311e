//! Raw snapshot store (append-only; triggers reject UPDATE/DELETE)

use super::columns::{from_millis, parse_text, to_millis};
use super::models::RawSnapshot;
use crate::error::Result;
use crate::providers::{ProviderKind, RawResponse};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SNAPSHOT_COLUMNS: &str =
    "id, provider, endpoint, request_params, payload, http_status, requested_at, job_id";

fn map_snapshot(row: &Row<'_>) -> rusqlite::Result<RawSnapshot> {
    let provider: String = row.get(1)?;
    let request_params: String = row.get(3)?;
    Ok(RawSnapshot {
        id: row.get(0)?,
        provider: parse_text(1, &provider)?,
        endpoint: row.get(2)?,
        request_params: serde_json::from_str(&request_params).unwrap_or(serde_json::Value::Null),
        payload: row.get(4)?,
        http_status: row.get(5)?,
        requested_at: from_millis(6, row.get(6)?)?,
        job_id: row.get(7)?,
    })
}

/// Persist one response verbatim and return its id
pub fn insert_snapshot(
    conn: &Connection,
    provider: ProviderKind,
    job_id: Option<i64>,
    response: &RawResponse,
    requested_at: &DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO raw_snapshots
             (provider, endpoint, request_params, payload, http_status, requested_at, job_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            provider.as_str(),
            response.endpoint,
            serde_json::to_string(&response.request_params)?,
            response.body,
            response.http_status,
            to_millis(requested_at),
            job_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get a snapshot by id
pub fn get_snapshot(conn: &Connection, id: i64) -> Result<Option<RawSnapshot>> {
    let sql = format!("SELECT {} FROM raw_snapshots WHERE id = ?1", SNAPSHOT_COLUMNS);
    let snapshot = conn.query_row(&sql, params![id], map_snapshot).optional()?;
    Ok(snapshot)
}

/// All snapshots captured while executing a job, oldest first
pub fn list_for_job(conn: &Connection, job_id: i64) -> Result<Vec<RawSnapshot>> {
    let sql = format!(
        "SELECT {} FROM raw_snapshots WHERE job_id = ?1 ORDER BY id ASC",
        SNAPSHOT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let snapshots = stmt
        .query_map(params![job_id], map_snapshot)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::migrations::run_migrations;
    use serde_json::json;

    #[test]
    fn test_snapshot_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let response = RawResponse {
            endpoint: "market-data".to_string(),
            request_params: json!({"product_id": "SKU-1", "currency_code": "USD"}),
            http_status: 200,
            body: "[]".to_string(),
        };
        let now = Utc::now();
        let id = insert_snapshot(&conn, ProviderKind::StockX, Some(7), &response, &now).unwrap();

        let stored = get_snapshot(&conn, id).unwrap().unwrap();
        assert_eq!(stored.provider, ProviderKind::StockX);
        assert_eq!(stored.request_params["product_id"], "SKU-1");
        assert_eq!(stored.payload, "[]");
        assert_eq!(stored.requested_at.timestamp_millis(), now.timestamp_millis());

        assert_eq!(list_for_job(&conn, 7).unwrap().len(), 1);
        assert!(list_for_job(&conn, 8).unwrap().is_empty());
    }
}
