// =============================================================================
// Broker REST Adapter — volume/market-cap/fluctuation/foreign-buying rankings
// =============================================================================
//
// Bearer-token gated. Every call acquires a rate-limit slot keyed by
// (provider="kis", endpoint-identifier) before hitting the wire, and on a
// broker-reported token-expired code invalidates the cached token and
// retries exactly once.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{instrument, warn};

use crate::errors::{CoreError, CoreResult};
use crate::providers::trading_date::MaxWorkingDateSource;
use crate::rate_limiter::registry::LimiterRegistry;
use crate::token::{TokenFetcher, TokenManager};

/// The broker's own error code for "access token expired / invalid".
const TOKEN_EXPIRED_CODE: &str = "EGW00123";

pub struct BrokerClient {
    client: reqwest::Client,
    base_url: String,
    app_key: String,
    app_secret: String,
    limiters: Arc<LimiterRegistry>,
    tokens: TokenManager,
}

impl BrokerClient {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        limiters: Arc<LimiterRegistry>,
        tokens: TokenManager,
    ) -> Self {
        Self::with_base_url(
            "https://openapi.koreainvestment.com:9443".to_string(),
            app_key,
            app_secret,
            limiters,
            tokens,
        )
    }

    pub fn with_base_url(
        base_url: String,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        limiters: Arc<LimiterRegistry>,
        tokens: TokenManager,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            base_url,
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            limiters,
            tokens,
        }
    }

    /// Perform the OAuth client-credentials exchange for `app_key`/`app_secret`.
    #[instrument(skip(self), name = "broker::issue_token")]
    async fn issue_token(&self) -> CoreResult<(String, u64)> {
        let resp = self
            .client
            .post(format!("{}/oauth2/tokenP", self.base_url))
            .json(&serde_json::json!({
                "grant_type": "client_credentials",
                "appkey": self.app_key,
                "appsecret": self.app_secret,
            }))
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "kis".to_string(),
                detail: e.to_string(),
            })?;

        let body: Value = resp.json().await.map_err(|e| CoreError::SchemaMismatch {
            resource: "oauth2/tokenP".to_string(),
            detail: e.to_string(),
        })?;

        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::UpstreamAuth {
                provider: "kis".to_string(),
                detail: "token response missing access_token".to_string(),
            })?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(86400);

        Ok((token, expires_in))
    }

    async fn bearer_token(&self) -> CoreResult<String> {
        if let Some(token) = self.tokens.current().await {
            return Ok(token);
        }
        self.tokens.refresh(&BrokerTokenFetcher { client: self }).await
    }

    /// Call a ranking endpoint identified by `tr_id` (the broker's
    /// transaction-id) and `path`, rate-limited per `(tr_id, path)` and
    /// retried once on a token-expired response.
    #[instrument(skip(self, params), name = "broker::ranking")]
    pub async fn fetch_ranking(
        &self,
        tr_id: &str,
        path: &str,
        params: &[(&str, &str)],
    ) -> CoreResult<Value> {
        let registry_key = format!("{tr_id}|{path}");
        let limiter = self.limiters.get_limiter("kis", &registry_key, None, None);

        for attempt in 0..2 {
            limiter.acquire_silent().await;
            let token = self.bearer_token().await?;

            let resp = self
                .client
                .get(format!("{}{}", self.base_url, path))
                .header("authorization", format!("Bearer {token}"))
                .header("appkey", &self.app_key)
                .header("appsecret", &self.app_secret)
                .header("tr_id", tr_id)
                .query(params)
                .send()
                .await
                .map_err(|e| CoreError::UpstreamUnavailable {
                    provider: "kis".to_string(),
                    detail: e.to_string(),
                })?;

            let body: Value = resp.json().await.map_err(|e| CoreError::SchemaMismatch {
                resource: path.to_string(),
                detail: e.to_string(),
            })?;

            let rt_cd = body.get("msg_cd").and_then(|v| v.as_str());
            if rt_cd == Some(TOKEN_EXPIRED_CODE) && attempt == 0 {
                warn!(tr_id, "broker token expired, invalidating and retrying once");
                self.tokens.clear().await;
                continue;
            }

            return Ok(body);
        }

        Err(CoreError::UpstreamAuth {
            provider: "kis".to_string(),
            detail: "token expired on retry".to_string(),
        })
    }

    /// Daily closing-price series for `code`, oldest first, used as RSI
    /// input during KR screening enrichment.
    pub async fn fetch_daily_closes(&self, code: &str) -> CoreResult<Vec<f64>> {
        let body = self
            .fetch_ranking(
                "FHKST01010400",
                "/uapi/domestic-stock/v1/quotations/inquire-daily-price",
                &[("FID_INPUT_ISCD", code), ("FID_PERIOD_DIV_CODE", "D"), ("FID_ORG_ADJ_PRC", "1")],
            )
            .await?;

        let mut closes: Vec<f64> = body
            .get("output")
            .and_then(|v| v.as_array())
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("stck_clpr").and_then(|v| v.as_str()))
                    .filter_map(|s| s.parse::<f64>().ok())
                    .collect()
            })
            .unwrap_or_default();

        // The broker returns newest-first; RSI wants oldest-first.
        closes.reverse();
        Ok(closes)
    }
}

struct BrokerTokenFetcher<'a> {
    client: &'a BrokerClient,
}

#[async_trait::async_trait]
impl<'a> TokenFetcher for BrokerTokenFetcher<'a> {
    async fn fetch(&self) -> CoreResult<(String, u64)> {
        self.client.issue_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedCache;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: String) -> BrokerClient {
        BrokerClient::with_base_url(
            base_url,
            "key",
            "secret",
            Arc::new(LimiterRegistry::new()),
            TokenManager::new(SharedCache::local_only()),
        )
    }

    #[tokio::test]
    async fn fetch_ranking_attaches_bearer_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/tokenP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uapi/domestic-stock/v1/ranking/market-cap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "msg_cd": "MCA00000",
                "output": [{"stck_bsop_date": "20260730"}],
            })))
            .mount(&server)
            .await;

        let c = client(server.uri());
        let body = c
            .fetch_ranking("FHPST01710000", "/uapi/domestic-stock/v1/ranking/market-cap", &[])
            .await
            .unwrap();
        assert_eq!(body["output"][0]["stck_bsop_date"], "20260730");
    }

    #[tokio::test]
    async fn expired_token_triggers_single_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/tokenP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/uapi/domestic-stock/v1/quotations/inquire-daily-price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "msg_cd": "EGW00123",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uapi/domestic-stock/v1/quotations/inquire-daily-price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "msg_cd": "MCA00000",
                "output": [{"stck_clpr": "100"}, {"stck_clpr": "99"}],
            })))
            .mount(&server)
            .await;

        let c = client(server.uri());
        let closes = c.fetch_daily_closes("005930").await.unwrap();
        assert_eq!(closes, vec![99.0, 100.0]);
    }
}

#[async_trait::async_trait]
impl MaxWorkingDateSource for BrokerClient {
    /// The broker's own "most recent working date" ranking response carries
    /// this as a top-level field on certain ranking calls; §4.D consults it
    /// as the authoritative-but-not-always-reachable trading date source.
    async fn fetch_max_working_date(&self) -> Option<String> {
        let body = self
            .fetch_ranking("FHPST01710000", "/uapi/domestic-stock/v1/ranking/market-cap", &[])
            .await
            .ok()?;
        body.get("output")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|row| row.get("stck_bsop_date"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}
