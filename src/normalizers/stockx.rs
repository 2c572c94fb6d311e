//! StockX market-data normalizer
//!
//! Prices arrive as major-unit strings. Each variant carries up to three
//! pricing programs, each becoming its own record:
//!
//! | wire object         | flags          |
//! |---------------------|----------------|
//! | `standardMarketData`| none           |
//! | `flexMarketData`    | `is_expedited` |
//! | `directMarketData`  | `is_direct`    |
//!
//! A program object that is present but empty still yields a record with no
//! prices; only an absent or null object means the program is not offered.

use super::units::{major_amount, size_key, WireAmount};
use super::{CapturedResponse, NormalizeContext, Normalizer};
use crate::db::sqlite::models::{MarketRecord, TierFlags};
use crate::error::{AppError, Result};
use crate::providers::stockx::MARKET_DATA_ENDPOINT;
use crate::providers::ProviderKind;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarketDataPayload {
    Variants(Vec<VariantMarketData>),
    Single(VariantMarketData),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantMarketData {
    variant_id: Option<String>,
    variant_value: Option<WireAmount>,
    currency_code: Option<String>,
    sales_last72_hours: Option<i64>,
    sales_last30_days: Option<i64>,
    standard_market_data: Option<TierMarketData>,
    flex_market_data: Option<TierMarketData>,
    direct_market_data: Option<TierMarketData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TierMarketData {
    #[serde(alias = "lowestAskAmount")]
    lowest_ask: Option<WireAmount>,
    #[serde(alias = "highestBid")]
    highest_bid_amount: Option<WireAmount>,
    #[serde(alias = "lastSale")]
    last_sale_amount: Option<WireAmount>,
}

/// StockX normalizer
pub struct StockXNormalizer;

impl StockXNormalizer {
    fn variant_records(
        &self,
        variant: VariantMarketData,
        snapshot_id: i64,
        ctx: &NormalizeContext,
        out: &mut Vec<MarketRecord>,
    ) -> Result<()> {
        let size = variant
            .variant_value
            .as_ref()
            .and_then(|v| size_key(&v.as_text()))
            .or_else(|| variant.variant_id.clone());

        if !ctx.wants_size(size.as_deref()) {
            return Ok(());
        }

        let currency = variant
            .currency_code
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| ctx.currency.clone());

        let tiers = [
            (variant.standard_market_data, TierFlags::STANDARD),
            (variant.flex_market_data, TierFlags::expedited()),
            (variant.direct_market_data, TierFlags::direct()),
        ];

        for (data, flags) in tiers {
            let Some(data) = data else { continue };

            // Volume describes the whole variant; it rides on the standard row
            let (sales_72h, sales_30d) = if flags == TierFlags::STANDARD {
                (variant.sales_last72_hours, variant.sales_last30_days)
            } else {
                (None, None)
            };

            out.push(MarketRecord {
                provider: ProviderKind::StockX,
                subject: ctx.subject.clone(),
                size_key: size.clone(),
                currency: currency.clone(),
                region: ctx.region.clone(),
                tiers: flags,
                lowest_ask: major_amount(data.lowest_ask.as_ref())?,
                highest_bid: major_amount(data.highest_bid_amount.as_ref())?,
                last_sale: major_amount(data.last_sale_amount.as_ref())?,
                sales_72h,
                sales_30d,
                observed_at: ctx.observed_at,
                source_snapshot_id: snapshot_id,
            });
        }

        Ok(())
    }
}

impl Normalizer for StockXNormalizer {
    fn provider(&self) -> ProviderKind {
        ProviderKind::StockX
    }

    fn normalize(
        &self,
        responses: &[CapturedResponse<'_>],
        ctx: &NormalizeContext,
    ) -> Result<Vec<MarketRecord>> {
        let market_data: Vec<_> = responses
            .iter()
            .filter(|r| r.endpoint == MARKET_DATA_ENDPOINT)
            .collect();
        if market_data.is_empty() {
            return Err(AppError::Normalization(
                "StockX job captured no market-data response".to_string(),
            ));
        }

        let mut records = Vec::new();
        for response in market_data {
            let payload: MarketDataPayload = serde_json::from_str(response.body).map_err(|e| {
                AppError::Normalization(format!(
                    "unexpected StockX market-data shape (snapshot {}): {}",
                    response.snapshot_id, e
                ))
            })?;

            let variants = match payload {
                MarketDataPayload::Variants(variants) => variants,
                MarketDataPayload::Single(variant) => vec![variant],
            };

            for variant in variants {
                // Anything without a variant identity is not market data
                if variant.variant_id.is_none() && variant.variant_value.is_none() {
                    return Err(AppError::Normalization(format!(
                        "StockX market-data entry without variantId or variantValue (snapshot {})",
                        response.snapshot_id
                    )));
                }
                self.variant_records(variant, response.snapshot_id, ctx, &mut records)?;
            }
        }

        Ok(records)
    }
}
