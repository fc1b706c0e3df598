// =============================================================================
// US Screener Adapter — equity screener queries
// =============================================================================
//
// No authentication required. Translates typed screener parameters into the
// upstream screener's query DSL and returns normalised rows.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::errors::{CoreError, CoreResult};
use crate::rate_limiter::registry::LimiterRegistry;

#[derive(Debug, Clone, Default)]
pub struct ScreenerQuery {
    pub min_market_cap: Option<f64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsQuoteRow {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub change_percent: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

pub struct UsScreenerClient {
    client: reqwest::Client,
    base_url: String,
    limiters: Arc<LimiterRegistry>,
}

impl UsScreenerClient {
    pub fn new(limiters: Arc<LimiterRegistry>) -> Self {
        Self::with_base_url("https://screener.example.com/v1".to_string(), limiters)
    }

    pub fn with_base_url(base_url: String, limiters: Arc<LimiterRegistry>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build reqwest client"),
            base_url,
            limiters,
        }
    }

    #[instrument(skip(self, query), name = "us_screener::query")]
    pub async fn screen(&self, query: &ScreenerQuery) -> CoreResult<Vec<UsQuoteRow>> {
        let limiter = self.limiters.get_limiter("us_screener", "POST /screen", None, None);
        limiter.acquire_silent().await;

        let body = serde_json::json!({
            "min_market_cap": query.min_market_cap,
            "sort_by": query.sort_by,
            "sort_order": query.sort_order,
            "limit": query.limit,
        });

        let resp = self
            .client
            .post(format!("{}/screen", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "us_screener".to_string(),
                detail: e.to_string(),
            })?;

        resp.json::<Vec<UsQuoteRow>>().await.map_err(|e| CoreError::SchemaMismatch {
            resource: "screen".to_string(),
            detail: e.to_string(),
        })
    }

    /// Daily closing-price series for `symbol`, oldest first, used as RSI
    /// input during US screening enrichment.
    #[instrument(skip(self), name = "us_screener::closes")]
    pub async fn fetch_daily_closes(&self, symbol: &str) -> CoreResult<Vec<f64>> {
        let limiter = self.limiters.get_limiter("us_screener", "GET /history", None, None);
        limiter.acquire_silent().await;

        #[derive(Deserialize)]
        struct HistoryRow {
            close: f64,
        }

        let resp = self
            .client
            .get(format!("{}/history", self.base_url))
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "us_screener".to_string(),
                detail: e.to_string(),
            })?;

        let rows: Vec<HistoryRow> = resp.json().await.map_err(|e| CoreError::SchemaMismatch {
            resource: "history".to_string(),
            detail: e.to_string(),
        })?;

        Ok(rows.into_iter().map(|r| r.close).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn screen_returns_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/screen"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"symbol": "AAPL", "price": 190.0, "market_cap": 3.0e12},
            ])))
            .mount(&server)
            .await;

        let client = UsScreenerClient::with_base_url(server.uri(), Arc::new(LimiterRegistry::new()));
        let rows = client
            .screen(&ScreenerQuery {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn rows_missing_price_are_kept_as_null_for_caller_filtering() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/screen"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"symbol": "ZZZZ"},
            ])))
            .mount(&server)
            .await;

        let client = UsScreenerClient::with_base_url(server.uri(), Arc::new(LimiterRegistry::new()));
        let rows = client.screen(&ScreenerQuery::default()).await.unwrap();
        assert_eq!(rows[0].price, None);
    }
}
