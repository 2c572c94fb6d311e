//! Alias pricing-insights normalizer
//!
//! Alias prices are minor-unit (cent) strings in USD and are region scoped,
//! so the region comes from the call context. Listings are split by
//! consignment, which maps to `is_consigned`. Sales volume arrives as
//! individual transactions and is bucketed here per (size, consigned).

use super::units::{minor_amount, size_key, WireAmount};
use super::{CapturedResponse, NormalizeContext, Normalizer};
use crate::db::sqlite::models::{MarketRecord, TierFlags};
use crate::error::{AppError, Result};
use crate::providers::alias::{AVAILABILITIES_ENDPOINT, RECENT_SALES_ENDPOINT};
use crate::providers::ProviderKind;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

pub const ALIAS_CURRENCY: &str = "USD";
const CENTS_EXPONENT: u32 = 2;

const PRODUCT_CONDITION_NEW: &str = "PRODUCT_CONDITION_NEW";
const PACKAGING_CONDITION_GOOD: &str = "PACKAGING_CONDITION_GOOD_CONDITION";

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    variants: Vec<AvailabilityVariant>,
}

#[derive(Debug, Deserialize)]
struct AvailabilityVariant {
    size: Option<WireAmount>,
    #[serde(default)]
    consigned: bool,
    product_condition: Option<String>,
    packaging_condition: Option<String>,
    #[serde(default)]
    availability: Availability,
}

impl AvailabilityVariant {
    /// Used or damaged-box listings are a different product; not priced here
    fn is_new_in_good_box(&self) -> bool {
        let product_ok = self
            .product_condition
            .as_deref()
            .map_or(true, |c| c == PRODUCT_CONDITION_NEW);
        let packaging_ok = self
            .packaging_condition
            .as_deref()
            .map_or(true, |c| c == PACKAGING_CONDITION_GOOD);
        product_ok && packaging_ok
    }
}

#[derive(Debug, Default, Deserialize)]
struct Availability {
    lowest_listing_price_cents: Option<WireAmount>,
    highest_offer_price_cents: Option<WireAmount>,
    last_sold_listing_price_cents: Option<WireAmount>,
}

#[derive(Debug, Deserialize)]
struct RecentSalesResponse {
    recent_sales: Vec<RecentSale>,
}

#[derive(Debug, Deserialize)]
struct RecentSale {
    purchased_at: DateTime<Utc>,
    price_cents: Option<WireAmount>,
    size: Option<WireAmount>,
    #[serde(default)]
    consigned: bool,
}

type VolumeKey = (Option<String>, bool);

#[derive(Debug, Default)]
struct Volume {
    sales_72h: i64,
    sales_30d: i64,
    latest: Option<(DateTime<Utc>, Option<Decimal>)>,
}

fn parse_body<T: serde::de::DeserializeOwned>(response: &CapturedResponse<'_>) -> Result<T> {
    serde_json::from_str(response.body).map_err(|e| {
        AppError::Normalization(format!(
            "unexpected Alias {} shape (snapshot {}): {}",
            response.endpoint, response.snapshot_id, e
        ))
    })
}

fn size_of(raw: Option<&WireAmount>) -> Option<String> {
    raw.and_then(|s| size_key(&s.as_text()))
}

/// Bucket sales into trailing 72h / 30d counters relative to `now`
fn bucket_sales(sales: &[RecentSale], ctx: &NormalizeContext) -> Result<HashMap<VolumeKey, Volume>> {
    let mut volumes: HashMap<VolumeKey, Volume> = HashMap::new();
    let window_72h = Duration::hours(72);
    let window_30d = Duration::days(30);

    for sale in sales {
        let size = size_of(sale.size.as_ref());
        if !ctx.wants_size(size.as_deref()) {
            continue;
        }

        let age = ctx.observed_at - sale.purchased_at;
        if age > window_30d {
            continue;
        }

        let price = minor_amount(sale.price_cents.as_ref(), CENTS_EXPONENT)?;
        let volume = volumes.entry((size, sale.consigned)).or_default();
        volume.sales_30d += 1;
        if age <= window_72h {
            volume.sales_72h += 1;
        }
        if volume.latest.map_or(true, |(at, _)| sale.purchased_at > at) {
            volume.latest = Some((sale.purchased_at, price));
        }
    }

    Ok(volumes)
}

/// Alias normalizer
pub struct AliasNormalizer;

impl AliasNormalizer {
    fn record(&self, ctx: &NormalizeContext, size: Option<String>, consigned: bool, snapshot_id: i64) -> MarketRecord {
        MarketRecord {
            provider: ProviderKind::Alias,
            subject: ctx.subject.clone(),
            size_key: size,
            currency: ALIAS_CURRENCY.to_string(),
            region: ctx.region.clone(),
            tiers: if consigned {
                TierFlags::consigned()
            } else {
                TierFlags::STANDARD
            },
            lowest_ask: None,
            highest_bid: None,
            last_sale: None,
            sales_72h: None,
            sales_30d: None,
            observed_at: ctx.observed_at,
            source_snapshot_id: snapshot_id,
        }
    }
}

impl Normalizer for AliasNormalizer {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Alias
    }

    fn normalize(
        &self,
        responses: &[CapturedResponse<'_>],
        ctx: &NormalizeContext,
    ) -> Result<Vec<MarketRecord>> {
        let availability = responses
            .iter()
            .find(|r| r.endpoint == AVAILABILITIES_ENDPOINT)
            .ok_or_else(|| {
                AppError::Normalization("Alias job captured no availability response".to_string())
            })?;

        let payload: AvailabilityResponse = parse_body(availability)?;

        let mut records: Vec<MarketRecord> = Vec::new();
        let mut index: HashMap<VolumeKey, usize> = HashMap::new();

        for variant in &payload.variants {
            if !variant.is_new_in_good_box() {
                continue;
            }
            let size = size_of(variant.size.as_ref());
            if !ctx.wants_size(size.as_deref()) {
                continue;
            }

            let key = (size.clone(), variant.consigned);
            if index.contains_key(&key) {
                tracing::debug!("Duplicate Alias availability for {} size {:?}", ctx.subject, size);
                continue;
            }

            let mut record = self.record(ctx, size, variant.consigned, availability.snapshot_id);
            record.lowest_ask = minor_amount(
                variant.availability.lowest_listing_price_cents.as_ref(),
                CENTS_EXPONENT,
            )?;
            record.highest_bid = minor_amount(
                variant.availability.highest_offer_price_cents.as_ref(),
                CENTS_EXPONENT,
            )?;
            record.last_sale = minor_amount(
                variant.availability.last_sold_listing_price_cents.as_ref(),
                CENTS_EXPONENT,
            )?;

            index.insert(key, records.len());
            records.push(record);
        }

        let Some(sales_response) = responses.iter().find(|r| r.endpoint == RECENT_SALES_ENDPOINT)
        else {
            return Ok(records);
        };

        let sales: RecentSalesResponse = parse_body(sales_response)?;
        let mut volumes = bucket_sales(&sales.recent_sales, ctx)?;

        // Priced keys with no recent sales had zero volume, not unknown volume
        for (key, position) in &index {
            let volume = volumes.remove(key).unwrap_or_default();
            let record = &mut records[*position];
            record.sales_72h = Some(volume.sales_72h);
            record.sales_30d = Some(volume.sales_30d);
        }

        // Sizes that sold recently but have no current listing
        let mut unlisted: Vec<_> = volumes.into_iter().collect();
        unlisted.sort_by(|a, b| a.0.cmp(&b.0));
        for ((size, consigned), volume) in unlisted {
            let mut record = self.record(ctx, size, consigned, sales_response.snapshot_id);
            record.last_sale = volume.latest.and_then(|(_, price)| price);
            record.sales_72h = Some(volume.sales_72h);
            record.sales_30d = Some(volume.sales_30d);
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap()
    }

    fn ctx(variant: Option<&str>) -> NormalizeContext {
        NormalizeContext {
            provider: ProviderKind::Alias,
            subject: "catalog-1".to_string(),
            variant: variant.map(str::to_string),
            currency: "EUR".to_string(),
            region: Some("1".to_string()),
            observed_at: now(),
        }
    }

    const AVAILABILITY: &str = r#"{"variants": [
        {"size": 10, "consigned": false,
         "product_condition": "PRODUCT_CONDITION_NEW",
         "packaging_condition": "PACKAGING_CONDITION_GOOD_CONDITION",
         "availability": {"lowest_listing_price_cents": "14500",
                          "highest_offer_price_cents": "12000",
                          "last_sold_listing_price_cents": "13900"}},
        {"size": 10, "consigned": true,
         "product_condition": "PRODUCT_CONDITION_NEW",
         "packaging_condition": "PACKAGING_CONDITION_GOOD_CONDITION",
         "availability": {"lowest_listing_price_cents": "15500"}},
        {"size": 10, "consigned": false,
         "product_condition": "PRODUCT_CONDITION_USED",
         "packaging_condition": "PACKAGING_CONDITION_GOOD_CONDITION",
         "availability": {"lowest_listing_price_cents": "9000"}},
        {"size": 10.5, "consigned": false,
         "product_condition": "PRODUCT_CONDITION_NEW",
         "packaging_condition": "PACKAGING_CONDITION_GOOD_CONDITION",
         "availability": {"lowest_listing_price_cents": "0"}}
    ]}"#;

    fn availability_only(body: &str, variant: Option<&str>) -> Result<Vec<MarketRecord>> {
        let responses = [CapturedResponse {
            snapshot_id: 1,
            endpoint: AVAILABILITIES_ENDPOINT,
            body,
        }];
        AliasNormalizer.normalize(&responses, &ctx(variant))
    }

    #[test]
    fn test_cents_convert_to_major_units() {
        let records = availability_only(AVAILABILITY, Some("10")).unwrap();
        let standard = records.iter().find(|r| r.tiers == TierFlags::STANDARD).unwrap();

        assert_eq!(standard.lowest_ask, Some(dec!(145.00)));
        assert_eq!(standard.highest_bid, Some(dec!(120.00)));
        assert_eq!(standard.last_sale, Some(dec!(139.00)));
        assert_eq!(standard.currency, "USD");
        assert_eq!(standard.region.as_deref(), Some("1"));
        assert_eq!(standard.sales_72h, None);
    }

    #[test]
    fn test_consigned_tier_fan_out_and_condition_filter() {
        let records = availability_only(AVAILABILITY, Some("10")).unwrap();

        // New/good standard + consigned; the used listing is skipped
        assert_eq!(records.len(), 2);
        let consigned = records.iter().find(|r| r.tiers == TierFlags::consigned()).unwrap();
        assert_eq!(consigned.lowest_ask, Some(dec!(155.00)));
        assert_eq!(consigned.size_key.as_deref(), Some("10"));
    }

    #[test]
    fn test_zero_cents_means_no_price() {
        let records = availability_only(AVAILABILITY, Some("10.5")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lowest_ask, None);
        assert_eq!(records[0].size_key.as_deref(), Some("10.5"));
    }

    #[test]
    fn test_recent_sales_bucketed_per_size_and_consignment() {
        let sales = r#"{"recent_sales": [
            {"purchased_at": "2026-05-10T06:00:00Z", "price_cents": "14000", "size": 10, "consigned": false},
            {"purchased_at": "2026-05-08T12:00:00Z", "price_cents": "14100", "size": 10, "consigned": false},
            {"purchased_at": "2026-04-20T12:00:00Z", "price_cents": "13000", "size": 10, "consigned": false},
            {"purchased_at": "2026-03-01T12:00:00Z", "price_cents": "12000", "size": 10, "consigned": false},
            {"purchased_at": "2026-05-09T12:00:00Z", "price_cents": "16000", "size": 10, "consigned": true},
            {"purchased_at": "2026-05-09T12:00:00Z", "price_cents": "17000", "size": 11, "consigned": false}
        ]}"#;
        let responses = [
            CapturedResponse {
                snapshot_id: 1,
                endpoint: AVAILABILITIES_ENDPOINT,
                body: AVAILABILITY,
            },
            CapturedResponse {
                snapshot_id: 2,
                endpoint: RECENT_SALES_ENDPOINT,
                body: sales,
            },
        ];
        let records = AliasNormalizer.normalize(&responses, &ctx(None)).unwrap();

        let find = |size: &str, tiers: TierFlags| {
            records
                .iter()
                .find(|r| r.size_key.as_deref() == Some(size) && r.tiers == tiers)
                .unwrap()
        };

        let standard_10 = find("10", TierFlags::STANDARD);
        assert_eq!(standard_10.sales_72h, Some(2));
        assert_eq!(standard_10.sales_30d, Some(3));

        let consigned_10 = find("10", TierFlags::consigned());
        assert_eq!(consigned_10.sales_72h, Some(1));
        assert_eq!(consigned_10.sales_30d, Some(1));

        // Listed but unsold
        let size_10_5 = find("10.5", TierFlags::STANDARD);
        assert_eq!(size_10_5.sales_30d, Some(0));

        // Sold but unlisted
        let size_11 = find("11", TierFlags::STANDARD);
        assert_eq!(size_11.lowest_ask, None);
        assert_eq!(size_11.last_sale, Some(dec!(170.00)));
        assert_eq!(size_11.sales_72h, Some(1));
        assert_eq!(size_11.source_snapshot_id, 2);

        assert_eq!(records.len(), 4);
    }

    #[test]
    fn test_malformed_payloads_are_errors() {
        assert!(matches!(availability_only("not json", None), Err(AppError::Normalization(_))));

        let bad_cents = r#"{"variants": [{"size": 10, "availability": {"lowest_listing_price_cents": "145.00"}}]}"#;
        assert!(matches!(availability_only(bad_cents, None), Err(AppError::Normalization(_))));

        let result = AliasNormalizer.normalize(&[], &ctx(None));
        assert!(matches!(result, Err(AppError::Normalization(_))));
    }

    #[test]
    fn test_error_envelope_with_ok_status_is_rejected() {
        let envelope = r#"{"errors": [{"message": "Unauthorized"}]}"#;
        assert!(matches!(availability_only(envelope, None), Err(AppError::Normalization(_))));

        let responses = [
            CapturedResponse {
                snapshot_id: 1,
                endpoint: AVAILABILITIES_ENDPOINT,
                body: AVAILABILITY,
            },
            CapturedResponse {
                snapshot_id: 2,
                endpoint: RECENT_SALES_ENDPOINT,
                body: envelope,
            },
        ];
        let result = AliasNormalizer.normalize(&responses, &ctx(None));
        assert!(matches!(result, Err(AppError::Normalization(_))));
    }
}
