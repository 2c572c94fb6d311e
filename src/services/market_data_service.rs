//! Market Data Service
//!
//! Read path for the CRUD application plus the latest-price view refresh.
//! Reads never trigger a provider fetch: a key with no data returns an empty
//! result and the caller decides whether to enqueue.
//!
//! The latest view is eventually consistent. Records written since the last
//! refresh become visible on the next one.

use crate::db::sqlite::columns::from_millis;
use crate::db::sqlite::models::{MarketKey, StoredMarketRecord};
use crate::error::{AppError, Result};
use crate::state::AppState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Upper bound on rows returned by one history query
pub const MAX_HISTORY_ROWS: i64 = 5_000;

/// Result of a view refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResult {
    pub keys: usize,
    pub refreshed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Result of a latest-price read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestResult {
    pub records: Vec<StoredMarketRecord>,
    /// When the view was last rebuilt; None if it never was
    pub as_of: Option<DateTime<Utc>>,
}

/// Result of a time-series read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResult {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub records: Vec<StoredMarketRecord>,
}

/// Market data service for business logic
pub struct MarketDataService;

impl MarketDataService {
    /// Rebuild the latest-price view
    pub fn refresh_latest(state: &AppState) -> Result<RefreshResult> {
        let started = Instant::now();
        let refreshed_at = Utc::now();
        let keys = state.db.refresh_latest_prices(&refreshed_at)?;
        let duration_ms = started.elapsed().as_millis() as i64;

        info!("Latest-price view refreshed: {} keys in {}ms", keys, duration_ms);

        Ok(RefreshResult {
            keys,
            refreshed_at,
            duration_ms,
        })
    }

    /// Newest observation per key tuple matching the filter
    pub fn latest(state: &AppState, key: &MarketKey) -> Result<LatestResult> {
        Self::validate_key(key)?;

        let records = state.db.query_latest(key)?;
        let as_of = state
            .db
            .latest_refreshed_at()?
            .map(|ms| from_millis(0, ms))
            .transpose()?;

        Ok(LatestResult { records, as_of })
    }

    /// Observations for a key over a date range (defaults to the last 30 days)
    pub fn history(
        state: &AppState,
        key: &MarketKey,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<HistoryResult> {
        Self::validate_key(key)?;

        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::days(30));
        if from > to {
            return Err(AppError::Validation("'from' must not be after 'to'".to_string()));
        }

        let limit = limit.unwrap_or(MAX_HISTORY_ROWS).clamp(1, MAX_HISTORY_ROWS);
        let records = state.db.query_history(key, &from, &to, limit)?;

        Ok(HistoryResult { from, to, records })
    }

    fn validate_key(key: &MarketKey) -> Result<()> {
        if key.subject.trim().is_empty() {
            return Err(AppError::Validation("Subject identifier is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::models::{MarketRecord, TierFlags};
    use crate::providers::{ProviderKind, RawResponse};
    use crate::test_support::test_state;
    use rust_decimal_macros::dec;

    fn seed(state: &AppState, ask: rust_decimal::Decimal, observed_at: DateTime<Utc>) {
        let response = RawResponse {
            endpoint: "market-data".to_string(),
            request_params: serde_json::json!({}),
            http_status: 200,
            body: "[]".to_string(),
        };
        let snapshot_id = state
            .db
            .insert_snapshot(ProviderKind::StockX, None, &response, &observed_at)
            .unwrap();
        let record = MarketRecord {
            provider: ProviderKind::StockX,
            subject: "SKU-1".to_string(),
            size_key: Some("10".to_string()),
            currency: "USD".to_string(),
            region: None,
            tiers: TierFlags::STANDARD,
            lowest_ask: Some(ask),
            highest_bid: None,
            last_sale: None,
            sales_72h: None,
            sales_30d: None,
            observed_at,
            source_snapshot_id: snapshot_id,
        };
        state.db.insert_market_records(&[record]).unwrap();
    }

    fn key() -> MarketKey {
        MarketKey {
            provider: Some(ProviderKind::StockX),
            subject: "SKU-1".to_string(),
            variant: Some("10".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_key_is_empty_not_error() {
        let state = test_state();
        let result = MarketDataService::latest(&state, &key()).unwrap();
        assert!(result.records.is_empty());
        assert!(result.as_of.is_none());
    }

    #[test]
    fn test_latest_after_refresh() {
        let state = test_state();
        let now = Utc::now();
        seed(&state, dec!(140), now - Duration::hours(2));
        seed(&state, dec!(150), now - Duration::hours(1));

        assert!(MarketDataService::latest(&state, &key()).unwrap().records.is_empty());

        let refresh = MarketDataService::refresh_latest(&state).unwrap();
        assert_eq!(refresh.keys, 1);

        let latest = MarketDataService::latest(&state, &key()).unwrap();
        assert_eq!(latest.records.len(), 1);
        assert_eq!(latest.records[0].record.lowest_ask, Some(dec!(150)));
        assert!(latest.as_of.is_some());
    }

    #[test]
    fn test_history_range() {
        let state = test_state();
        let now = Utc::now();
        seed(&state, dec!(140), now - Duration::days(40));
        seed(&state, dec!(145), now - Duration::days(3));
        seed(&state, dec!(150), now - Duration::hours(1));

        let default_range = MarketDataService::history(&state, &key(), None, None, None).unwrap();
        assert_eq!(default_range.records.len(), 2);

        let everything =
            MarketDataService::history(&state, &key(), Some(now - Duration::days(60)), Some(now), Some(10)).unwrap();
        assert_eq!(everything.records.len(), 3);

        let inverted = MarketDataService::history(&state, &key(), Some(now), Some(now - Duration::days(1)), None);
        assert!(matches!(inverted, Err(AppError::Validation(_))));
    }
}
