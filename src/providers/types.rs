//! Common provider types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External marketplace a price observation comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    StockX,
    Alias,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::StockX, ProviderKind::Alias];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::StockX => "stockx",
            ProviderKind::Alias => "alias",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stockx" => Ok(ProviderKind::StockX),
            "alias" => Ok(ProviderKind::Alias),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Credentials for one provider account
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCredential {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
}

/// Explicit per-call context threaded through every fetch.
///
/// There is no ambient "default account": the worker builds one of these per
/// provider from configuration and hands it to the client on each call.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub provider: ProviderKind,
    pub credential: ProviderCredential,
    pub currency: String,
    pub region: Option<String>,
}

/// What to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub subject: String,
    pub variant: Option<String>,
}

/// One verbatim response from a provider endpoint
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub endpoint: String,
    pub request_params: serde_json::Value,
    pub http_status: u16,
    pub body: String,
}

/// Result of a provider fetch, as seen by the worker
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// One or more endpoint responses for the subject
    Success(Vec<RawResponse>),
    /// The subject does not exist at the provider
    NotFound,
    /// The provider itself throttled us (HTTP 429)
    RateLimited,
    /// Timeout, 5xx or other retryable failure
    Transient(String),
    /// A multi-endpoint fetch failed after earlier calls had already succeeded.
    /// The completed responses are real traffic and must be stored and charged.
    Partial {
        completed: Vec<RawResponse>,
        rate_limited: bool,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert_eq!(" StockX ".parse::<ProviderKind>().unwrap(), ProviderKind::StockX);
        assert!("goat".parse::<ProviderKind>().is_err());
    }
}
