//! REST API request and response types
//!
//! Callers of the enqueue surface are often scripts that send every value as
//! a string, so priorities accept a level name, a number or a numeric string.

use crate::db::sqlite::models::{
    EnqueueItem, JobStatus, MarketKey, TierFlags, PRIORITY_BACKGROUND, PRIORITY_HOT,
    PRIORITY_USER_REFRESH,
};
use crate::providers::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Flexible priority
// ============================================================================

/// Job priority as sent by a caller: a named level or a raw integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityInput(pub i64);

impl Default for PriorityInput {
    fn default() -> Self {
        PriorityInput(PRIORITY_BACKGROUND)
    }
}

impl PriorityInput {
    pub fn value(&self) -> i64 {
        self.0
    }

    fn from_name(name: &str) -> Option<i64> {
        match name.trim().to_ascii_lowercase().as_str() {
            "user_refresh" | "user" => Some(PRIORITY_USER_REFRESH),
            "hot" => Some(PRIORITY_HOT),
            "background" => Some(PRIORITY_BACKGROUND),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for PriorityInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum FlexiblePriority {
            Int(i64),
            Str(String),
        }

        let value = match FlexiblePriority::deserialize(deserializer)? {
            FlexiblePriority::Int(i) => i,
            FlexiblePriority::Str(s) => match PriorityInput::from_name(&s) {
                Some(level) => level,
                None => s.trim().parse().map_err(|_| {
                    serde::de::Error::custom(format!(
                        "priority must be user_refresh, hot, background or an integer, got '{}'",
                        s
                    ))
                })?,
            },
        };

        if value < 0 {
            return Err(serde::de::Error::custom("priority must not be negative"));
        }
        Ok(PriorityInput(value))
    }
}

// ============================================================================
// Response envelope
// ============================================================================

/// Standard API response envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success_with_message(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.to_string()),
            data: None,
        }
    }

    pub fn success_with_data(data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: None,
            data: Some(data),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.to_string()),
            data: None,
        }
    }
}

/// Placeholder payload for responses without data
#[derive(Debug, Clone, Serialize)]
pub struct Empty {}

// ============================================================================
// Enqueue
// ============================================================================

/// POST /api/v1/jobs
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub provider: ProviderKind,
    pub subject: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub priority: PriorityInput,
}

/// POST /api/v1/jobs/batch
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueBatchRequest {
    pub provider: ProviderKind,
    pub items: Vec<EnqueueItem>,
    #[serde(default)]
    pub priority: PriorityInput,
}

/// GET /api/v1/jobs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobsQuery {
    pub provider: Option<ProviderKind>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

// ============================================================================
// Market data queries
// ============================================================================

/// GET /api/v1/latest
///
/// Tier flags are matched as a combination: sending any of them pins all
/// three, with the missing ones read as false.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketKeyQuery {
    pub subject: String,
    pub provider: Option<ProviderKind>,
    pub variant: Option<String>,
    pub currency: Option<String>,
    pub region: Option<String>,
    pub expedited: Option<bool>,
    pub consigned: Option<bool>,
    pub direct: Option<bool>,
}

impl MarketKeyQuery {
    pub fn to_key(&self) -> MarketKey {
        let tiers = if self.expedited.is_some() || self.consigned.is_some() || self.direct.is_some() {
            Some(TierFlags {
                is_expedited: self.expedited.unwrap_or(false),
                is_consigned: self.consigned.unwrap_or(false),
                is_direct: self.direct.unwrap_or(false),
            })
        } else {
            None
        };

        MarketKey {
            provider: self.provider,
            subject: self.subject.clone(),
            variant: self.variant.clone(),
            currency: self.currency.clone(),
            region: self.region.clone(),
            tiers,
        }
    }
}

/// GET /api/v1/history
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub subject: String,
    pub provider: Option<ProviderKind>,
    pub variant: Option<String>,
    pub currency: Option<String>,
    pub region: Option<String>,
    pub expedited: Option<bool>,
    pub consigned: Option<bool>,
    pub direct: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl HistoryQuery {
    pub fn to_key(&self) -> MarketKey {
        MarketKeyQuery {
            subject: self.subject.clone(),
            provider: self.provider,
            variant: self.variant.clone(),
            currency: self.currency.clone(),
            region: self.region.clone(),
            expedited: self.expedited,
            consigned: self.consigned,
            direct: self.direct,
        }
        .to_key()
    }
}

/// GET /api/v1/stats
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    /// Look-back window in hours (default 24)
    pub hours: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_accepts_names_numbers_and_strings() {
        let parse = |json: &str| serde_json::from_str::<PriorityInput>(json).map(|p| p.value());

        assert_eq!(parse(r#""user_refresh""#).unwrap(), 200);
        assert_eq!(parse(r#""HOT""#).unwrap(), 150);
        assert_eq!(parse(r#""background""#).unwrap(), 100);
        assert_eq!(parse("175").unwrap(), 175);
        assert_eq!(parse(r#""120""#).unwrap(), 120);
        assert!(parse(r#""urgent""#).is_err());
        assert!(parse("-1").is_err());
    }

    #[test]
    fn test_enqueue_request_defaults_to_background() {
        let req: EnqueueRequest =
            serde_json::from_str(r#"{"provider": "stockx", "subject": "SKU-1"}"#).unwrap();
        assert_eq!(req.provider, ProviderKind::StockX);
        assert_eq!(req.priority.value(), PRIORITY_BACKGROUND);
        assert!(req.variant.is_none());
    }

    #[test]
    fn test_tier_flags_pin_together() {
        let query = MarketKeyQuery {
            subject: "SKU-1".to_string(),
            consigned: Some(true),
            ..Default::default()
        };
        assert_eq!(query.to_key().tiers, Some(TierFlags::consigned()));

        let open = MarketKeyQuery {
            subject: "SKU-1".to_string(),
            ..Default::default()
        };
        assert_eq!(open.to_key().tiers, None);
    }
}
