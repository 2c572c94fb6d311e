//! Master market table
//!
//! Append-only time series of normalized observations. Rows are unique per
//! key tuple and observation minute; re-inserting the same observation is a
//! silent no-op.

use super::columns::{
    decimal_text, from_millis, key_text, observation_minute, optional_key, parse_decimal,
    parse_text, to_millis,
};
use super::models::{MarketKey, MarketRecord, StoredMarketRecord, TierFlags};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};

/// Column list shared by `market_records` and `latest_prices` reads
pub(super) const RECORD_COLUMNS: &str = "provider, subject, size_key, currency, region, \
     is_expedited, is_consigned, is_direct, lowest_ask, highest_bid, last_sale, \
     sales_72h, sales_30d, observed_at, source_snapshot_id";

/// Key filter over the tuple columns; binds ?1..?8 in `key_params` order
pub(super) const KEY_FILTER: &str = "subject = ?1
     AND (?2 IS NULL OR provider = ?2)
     AND (?3 IS NULL OR size_key = ?3)
     AND (?4 IS NULL OR currency = ?4)
     AND (?5 IS NULL OR region = ?5)
     AND (?6 IS NULL OR (is_expedited = ?6 AND is_consigned = ?7 AND is_direct = ?8))";

pub(super) type KeyParams<'a> = (
    &'a str,
    Option<&'static str>,
    Option<&'a str>,
    Option<&'a str>,
    Option<&'a str>,
    Option<bool>,
    Option<bool>,
    Option<bool>,
);

pub(super) fn key_params(key: &MarketKey) -> KeyParams<'_> {
    (
        key.subject.as_str(),
        key.provider.map(|p| p.as_str()),
        key.variant.as_deref(),
        key.currency.as_deref(),
        key.region.as_deref(),
        key.tiers.map(|t| t.is_expedited),
        key.tiers.map(|t| t.is_consigned),
        key.tiers.map(|t| t.is_direct),
    )
}

/// Map a row selected as `id, RECORD_COLUMNS`
pub(super) fn map_stored_record(row: &Row<'_>) -> rusqlite::Result<StoredMarketRecord> {
    let provider: String = row.get(1)?;
    Ok(StoredMarketRecord {
        id: row.get(0)?,
        record: MarketRecord {
            provider: parse_text(1, &provider)?,
            subject: row.get(2)?,
            size_key: optional_key(row.get(3)?),
            currency: row.get(4)?,
            region: optional_key(row.get(5)?),
            tiers: TierFlags {
                is_expedited: row.get(6)?,
                is_consigned: row.get(7)?,
                is_direct: row.get(8)?,
            },
            lowest_ask: parse_decimal(9, row.get(9)?)?,
            highest_bid: parse_decimal(10, row.get(10)?)?,
            last_sale: parse_decimal(11, row.get(11)?)?,
            sales_72h: row.get(12)?,
            sales_30d: row.get(13)?,
            observed_at: from_millis(14, row.get(14)?)?,
            source_snapshot_id: row.get(15)?,
        },
    })
}

/// Insert normalized records; returns how many were new
pub fn insert_records(conn: &mut Connection, records: &[MarketRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO market_records (
                 provider, subject, size_key, currency, region,
                 is_expedited, is_consigned, is_direct,
                 lowest_ask, highest_bid, last_sale, sales_72h, sales_30d,
                 observed_at, observed_minute, source_snapshot_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT DO NOTHING",
        )?;

        for record in records {
            inserted += stmt.execute(params![
                record.provider.as_str(),
                record.subject,
                key_text(record.size_key.as_deref()),
                record.currency,
                key_text(record.region.as_deref()),
                record.tiers.is_expedited,
                record.tiers.is_consigned,
                record.tiers.is_direct,
                decimal_text(record.lowest_ask),
                decimal_text(record.highest_bid),
                decimal_text(record.last_sale),
                record.sales_72h,
                record.sales_30d,
                to_millis(&record.observed_at),
                observation_minute(&record.observed_at),
                record.source_snapshot_id
            ])?;
        }
    }
    tx.commit()?;

    if inserted < records.len() {
        tracing::debug!(
            "Skipped {} duplicate market records within the same minute",
            records.len() - inserted
        );
    }
    Ok(inserted)
}

/// Time series for a key over `[from, to]`, oldest first
pub fn query_history(
    conn: &Connection,
    key: &MarketKey,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
    limit: i64,
) -> Result<Vec<StoredMarketRecord>> {
    let sql = format!(
        "SELECT id, {} FROM market_records
         WHERE {} AND observed_at >= ?9 AND observed_at <= ?10
         ORDER BY observed_at ASC, id ASC
         LIMIT ?11",
        RECORD_COLUMNS, KEY_FILTER
    );
    let (subject, provider, size_key, currency, region, expedited, consigned, direct) =
        key_params(key);

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(
            params![
                subject,
                provider,
                size_key,
                currency,
                region,
                expedited,
                consigned,
                direct,
                to_millis(from),
                to_millis(to),
                limit
            ],
            map_stored_record,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Total stored observations
pub fn count_records(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM market_records", [], |row| row.get(0))?;
    Ok(count)
}
