//! Alias pricing-insights client
//!
//! One job fetches two endpoints: current availability per size (the prices)
//! and recent sales (the volume). Availability decides the outcome; a missing
//! sales history only means no volume counters. When the sales call fails
//! after availability succeeded, the availability response is still handed
//! back so it gets stored and charged.

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::providers::{
    build_http_client, classify_response, transient_from_error, FetchOutcome, FetchRequest,
    ProviderClient, ProviderContext, ProviderKind, RawResponse,
};
use async_trait::async_trait;
use reqwest::Client;

pub const AVAILABILITIES_ENDPOINT: &str = "availabilities";
pub const RECENT_SALES_ENDPOINT: &str = "recent_sales";

/// Alias catalog client
pub struct AliasClient {
    client: Client,
    base_url: String,
}

impl AliasClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            client: build_http_client(settings.timeout_secs)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(
        &self,
        ctx: &ProviderContext,
        endpoint: &str,
        url: String,
        params: Vec<(&'static str, String)>,
    ) -> FetchOutcome {
        let mut builder = self.client.get(url).query(&params);
        if let Some(token) = ctx.credential.access_token.as_deref() {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return transient_from_error(e),
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return transient_from_error(e),
        };

        let request_params: serde_json::Map<String, serde_json::Value> = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();

        classify_response(RawResponse {
            endpoint: endpoint.to_string(),
            request_params: serde_json::Value::Object(request_params),
            http_status: status,
            body,
        })
    }
}

#[async_trait]
impl ProviderClient for AliasClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Alias
    }

    /// Availability plus recent sales
    fn calls_per_fetch(&self) -> i64 {
        2
    }

    async fn fetch(&self, ctx: &ProviderContext, request: &FetchRequest) -> FetchOutcome {
        let mut params = vec![("catalog_id", request.subject.clone())];
        if let Some(region) = &ctx.region {
            params.push(("region_id", region.clone()));
        }

        let url = format!(
            "{}/api/v1/pricing_insights/availabilities/{}",
            self.base_url,
            urlencoding::encode(&request.subject)
        );

        let mut responses = match self.get(ctx, AVAILABILITIES_ENDPOINT, url, params).await {
            FetchOutcome::Success(responses) => responses,
            other => return other,
        };

        let mut sales_params = vec![("catalog_id", request.subject.clone())];
        if let Some(variant) = &request.variant {
            sales_params.push(("size", variant.clone()));
        }
        if let Some(region) = &ctx.region {
            sales_params.push(("region_id", region.clone()));
        }

        let url = format!("{}/api/v1/pricing_insights/recent_sales", self.base_url);
        match self.get(ctx, RECENT_SALES_ENDPOINT, url, sales_params).await {
            FetchOutcome::Success(sales) => responses.extend(sales),
            FetchOutcome::NotFound => {
                tracing::debug!("Alias has no recent sales for {}", request.subject);
            }
            FetchOutcome::RateLimited => {
                return FetchOutcome::Partial {
                    completed: responses,
                    rate_limited: true,
                    message: "recent sales rate limited".to_string(),
                };
            }
            FetchOutcome::Transient(message) => {
                return FetchOutcome::Partial {
                    completed: responses,
                    rate_limited: false,
                    message,
                };
            }
            FetchOutcome::Partial {
                mut completed,
                rate_limited,
                message,
            } => {
                responses.append(&mut completed);
                return FetchOutcome::Partial {
                    completed: responses,
                    rate_limited,
                    message,
                };
            }
        }

        FetchOutcome::Success(responses)
    }
}
