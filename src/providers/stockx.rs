//! StockX market-data client

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::providers::{
    build_http_client, classify_response, transient_from_error, FetchOutcome, FetchRequest,
    ProviderClient, ProviderContext, ProviderKind, RawResponse,
};
use async_trait::async_trait;
use reqwest::Client;

pub const MARKET_DATA_ENDPOINT: &str = "market-data";

/// StockX catalog client
pub struct StockXClient {
    client: Client,
    base_url: String,
}

impl StockXClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            client: build_http_client(settings.timeout_secs)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn market_data_url(&self, subject: &str) -> String {
        format!(
            "{}/v2/catalog/products/{}/market-data",
            self.base_url,
            urlencoding::encode(subject)
        )
    }
}

#[async_trait]
impl ProviderClient for StockXClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::StockX
    }

    async fn fetch(&self, ctx: &ProviderContext, request: &FetchRequest) -> FetchOutcome {
        let mut builder = self
            .client
            .get(self.market_data_url(&request.subject))
            .query(&[("currencyCode", ctx.currency.as_str())]);

        if let Some(api_key) = ctx.credential.api_key.as_deref() {
            builder = builder.header("x-api-key", api_key);
        }
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

        tracing::debug!(
            "StockX market-data {} -> HTTP {} ({} bytes)",
            request.subject,
            status,
            body.len()
        );

        classify_response(RawResponse {
            endpoint: MARKET_DATA_ENDPOINT.to_string(),
            request_params: serde_json::json!({
                "product_id": request.subject,
                "variant": request.variant,
                "currency_code": ctx.currency,
            }),
            http_status: status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_data_url_encodes_subject() {
        let settings = ProviderSettings {
            base_url: "https://api.stockx.com/".to_string(),
            ..ProviderSettings::default()
        };
        let client = StockXClient::new(&settings).unwrap();
        assert_eq!(
            client.market_data_url("air jordan/1"),
            "https://api.stockx.com/v2/catalog/products/air%20jordan%2F1/market-data"
        );
    }
}
