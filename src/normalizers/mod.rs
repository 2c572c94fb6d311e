//! Provider normalizers
//!
//! Pure transformations from captured provider responses to canonical
//! market records. A normalizer never performs I/O; the worker persists its
//! output.

pub mod alias;
pub mod stockx;
pub mod units;

use crate::db::sqlite::models::{MarketRecord, RawSnapshot};
use crate::error::Result;
use crate::providers::ProviderKind;
use chrono::{DateTime, Utc};

pub use alias::AliasNormalizer;
pub use stockx::StockXNormalizer;

/// One stored response handed to a normalizer
#[derive(Debug, Clone, Copy)]
pub struct CapturedResponse<'a> {
    pub snapshot_id: i64,
    pub endpoint: &'a str,
    pub body: &'a str,
}

impl<'a> From<&'a RawSnapshot> for CapturedResponse<'a> {
    fn from(snapshot: &'a RawSnapshot) -> Self {
        Self {
            snapshot_id: snapshot.id,
            endpoint: &snapshot.endpoint,
            body: &snapshot.payload,
        }
    }
}

/// What the job asked for, plus the clock the output is stamped with
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub provider: ProviderKind,
    pub subject: String,
    /// Restrict output to one size; None keeps every size in the payload
    pub variant: Option<String>,
    pub currency: String,
    pub region: Option<String>,
    /// Observation timestamp and the reference point for volume windows
    pub observed_at: DateTime<Utc>,
}

impl NormalizeContext {
    /// True when `size` passes the context's variant filter
    pub fn wants_size(&self, size: Option<&str>) -> bool {
        match (&self.variant, size) {
            (None, _) => true,
            (Some(wanted), Some(size)) => units::size_key(wanted).as_deref() == Some(size),
            (Some(_), None) => false,
        }
    }
}

/// Raw payload -> canonical records for one provider
pub trait Normalizer: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn normalize(
        &self,
        responses: &[CapturedResponse<'_>],
        ctx: &NormalizeContext,
    ) -> Result<Vec<MarketRecord>>;
}

/// Normalizer for a provider
pub fn normalizer_for(provider: ProviderKind) -> &'static dyn Normalizer {
    match provider {
        ProviderKind::StockX => &StockXNormalizer,
        ProviderKind::Alias => &AliasNormalizer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_filter_uses_canonical_sizes() {
        let ctx = NormalizeContext {
            provider: ProviderKind::Alias,
            subject: "SKU-1".to_string(),
            variant: Some("10.0".to_string()),
            currency: "USD".to_string(),
            region: None,
            observed_at: Utc::now(),
        };
        assert!(ctx.wants_size(Some("10")));
        assert!(!ctx.wants_size(Some("10.5")));
        assert!(!ctx.wants_size(None));
    }

    #[test]
    fn test_registry_matches_provider() {
        for kind in ProviderKind::ALL {
            assert_eq!(normalizer_for(kind).provider(), kind);
        }
    }
}
