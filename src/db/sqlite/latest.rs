//! Latest-price view
//!
//! A materialized projection holding the newest market record per key tuple.
//! Readers see the state as of the last refresh.

use super::market::{key_params, map_stored_record, KEY_FILTER, RECORD_COLUMNS};
use super::models::{MarketKey, StoredMarketRecord};
use super::columns::to_millis;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};

/// Rebuild the view from the master table; returns the number of keys.
///
/// The rebuild replaces the view contents in one transaction, so concurrent
/// readers see either the previous or the new projection.
pub fn refresh_latest_prices(conn: &mut Connection, now: &DateTime<Utc>) -> Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute("DELETE FROM latest_prices", [])?;
    let keys = tx.execute(
        "INSERT INTO latest_prices (
             provider, subject, size_key, currency, region,
             is_expedited, is_consigned, is_direct, record_id,
             lowest_ask, highest_bid, last_sale, sales_72h, sales_30d,
             observed_at, source_snapshot_id, refreshed_at
         )
         SELECT provider, subject, size_key, currency, region,
                is_expedited, is_consigned, is_direct, id,
                lowest_ask, highest_bid, last_sale, sales_72h, sales_30d,
                observed_at, source_snapshot_id, ?1
         FROM (
             SELECT *, ROW_NUMBER() OVER (
                 PARTITION BY provider, subject, size_key, currency, region,
                              is_expedited, is_consigned, is_direct
                 ORDER BY observed_at DESC, id DESC
             ) AS rn
             FROM market_records
         )
         WHERE rn = 1",
        params![to_millis(now)],
    )?;
    tx.commit()?;
    Ok(keys)
}

/// Latest rows matching a key filter
pub fn query_latest(conn: &Connection, key: &MarketKey) -> Result<Vec<StoredMarketRecord>> {
    let sql = format!(
        "SELECT record_id, {} FROM latest_prices
         WHERE {}
         ORDER BY provider, size_key, currency, region, is_expedited, is_consigned, is_direct",
        RECORD_COLUMNS, KEY_FILTER
    );
    let (subject, provider, size_key, currency, region, expedited, consigned, direct) =
        key_params(key);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![subject, provider, size_key, currency, region, expedited, consigned, direct],
            map_stored_record,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// When the view was last rebuilt, if it holds any rows
pub fn last_refreshed_at(conn: &Connection) -> Result<Option<i64>> {
    let refreshed = conn.query_row("SELECT MAX(refreshed_at) FROM latest_prices", [], |row| {
        row.get(0)
    })?;
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::market::insert_records;
    use crate::db::sqlite::market::tests::{create_test_db, record};
    use crate::db::sqlite::models::TierFlags;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn key() -> MarketKey {
        MarketKey {
            subject: "SKU-1".to_string(),
            variant: Some("10".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_refresh_keeps_newest_per_key() {
        let mut conn = create_test_db();
        insert_records(
            &mut conn,
            &[
                record(TierFlags::STANDARD, "140", t0()),
                record(TierFlags::STANDARD, "150", t0() + Duration::hours(1)),
                record(TierFlags::expedited(), "170", t0()),
            ],
        )
        .unwrap();

        assert_eq!(refresh_latest_prices(&mut conn, &t0()).unwrap(), 2);

        let latest = query_latest(&conn, &key()).unwrap();
        assert_eq!(latest.len(), 2);
        let standard = latest.iter().find(|r| r.record.tiers == TierFlags::STANDARD).unwrap();
        assert_eq!(standard.record.lowest_ask, Some(dec!(150)));
    }

    #[test]
    fn test_view_is_stale_until_refresh() {
        let mut conn = create_test_db();
        insert_records(&mut conn, &[record(TierFlags::STANDARD, "140", t0())]).unwrap();
        refresh_latest_prices(&mut conn, &t0()).unwrap();

        insert_records(&mut conn, &[record(TierFlags::STANDARD, "155", t0() + Duration::hours(1))]).unwrap();
        let stale = query_latest(&conn, &key()).unwrap();
        assert_eq!(stale[0].record.lowest_ask, Some(dec!(140)));

        // Refresh is idempotent
        refresh_latest_prices(&mut conn, &t0()).unwrap();
        refresh_latest_prices(&mut conn, &t0()).unwrap();
        let fresh = query_latest(&conn, &key()).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].record.lowest_ask, Some(dec!(155)));
    }

    #[test]
    fn test_unknown_key_returns_empty() {
        let mut conn = create_test_db();
        refresh_latest_prices(&mut conn, &t0()).unwrap();
        let missing = MarketKey {
            subject: "NOPE".to_string(),
            ..Default::default()
        };
        assert!(query_latest(&conn, &missing).unwrap().is_empty());
        assert_eq!(last_refreshed_at(&conn).unwrap(), None);
    }
}
