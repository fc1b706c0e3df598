// =============================================================================
// Crypto Exchange REST Adapter — ticker lists, market metadata, prices
// =============================================================================
//
// No authentication required for the public endpoints this crate consumes.
// Every call is still rate-limited per (provider="upbit", "METHOD /path"),
// since the exchange's public endpoints carry their own throttling.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::errors::{CoreError, CoreResult};
use crate::rate_limiter::registry::LimiterRegistry;

/// Market metadata entry (one KRW trading pair).
#[derive(Debug, Clone, Deserialize)]
pub struct MarketMeta {
    pub market: String,
    #[serde(default)]
    pub market_warning: Option<String>,
}

/// Current ticker snapshot for a single market.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    pub market: String,
    pub trade_price: f64,
    #[serde(default)]
    pub acc_trade_price_24h: f64,
    #[serde(default)]
    pub signed_change_rate: f64,
}

impl MarketMeta {
    /// §4.H "warning filter": markets flagged with elevated investor caution.
    pub fn is_warned(&self) -> bool {
        matches!(
            self.market_warning.as_deref(),
            Some("CAUTION") | Some("WARNING") | Some("true") | Some("Y") | Some("1")
        )
    }
}

pub struct CryptoExchangeClient {
    client: reqwest::Client,
    base_url: String,
    limiters: Arc<LimiterRegistry>,
}

impl CryptoExchangeClient {
    pub fn new(limiters: Arc<LimiterRegistry>) -> Self {
        Self::with_base_url("https://api.upbit.com/v1".to_string(), limiters)
    }

    pub fn with_base_url(base_url: String, limiters: Arc<LimiterRegistry>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build reqwest client"),
            base_url,
            limiters,
        }
    }

    async fn acquire(&self, endpoint: &str) {
        let limiter = self.limiters.get_limiter("upbit", endpoint, None, None);
        limiter.acquire_silent().await;
    }

    #[instrument(skip(self), name = "crypto_exchange::markets")]
    pub async fn fetch_markets(&self) -> CoreResult<Vec<MarketMeta>> {
        self.acquire("GET /market/all").await;
        let resp = self
            .client
            .get(format!("{}/market/all", self.base_url))
            .query(&[("isDetails", "true")])
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "upbit".to_string(),
                detail: e.to_string(),
            })?;

        resp.json::<Vec<MarketMeta>>().await.map_err(|e| CoreError::SchemaMismatch {
            resource: "market/all".to_string(),
            detail: e.to_string(),
        })
    }

    #[instrument(skip(self, markets), name = "crypto_exchange::tickers")]
    pub async fn fetch_tickers(&self, markets: &[String]) -> CoreResult<Vec<Ticker>> {
        if markets.is_empty() {
            return Ok(Vec::new());
        }
        self.acquire("GET /ticker").await;
        let joined = markets.join(",");
        let resp = self
            .client
            .get(format!("{}/ticker", self.base_url))
            .query(&[("markets", joined.as_str())])
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "upbit".to_string(),
                detail: e.to_string(),
            })?;

        resp.json::<Vec<Ticker>>().await.map_err(|e| CoreError::SchemaMismatch {
            resource: "ticker".to_string(),
            detail: e.to_string(),
        })
    }

    /// Daily closing-price series for `market`, oldest first, used as RSI
    /// input during screening enrichment.
    #[instrument(skip(self), name = "crypto_exchange::daily_closes")]
    pub async fn fetch_daily_closes(&self, market: &str, count: u32) -> CoreResult<Vec<f64>> {
        self.acquire("GET /candles/days").await;

        #[derive(Deserialize)]
        struct DayCandle {
            trade_price: f64,
        }

        let resp = self
            .client
            .get(format!("{}/candles/days", self.base_url))
            .query(&[("market", market), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "upbit".to_string(),
                detail: e.to_string(),
            })?;

        let mut candles: Vec<DayCandle> =
            resp.json().await.map_err(|e| CoreError::SchemaMismatch {
                resource: "candles/days".to_string(),
                detail: e.to_string(),
            })?;

        // Upstream returns newest-first; RSI wants oldest-first.
        candles.reverse();
        Ok(candles.into_iter().map(|c| c.trade_price).collect())
    }

    /// Most recent completed day's OHLCV bar for `market`, used by the
    /// recommender's composite-score ranking pass.
    #[instrument(skip(self), name = "crypto_exchange::latest_candle")]
    pub async fn fetch_latest_candle(&self, market: &str) -> CoreResult<crate::types::Candle> {
        self.acquire("GET /candles/days").await;

        #[derive(Deserialize)]
        struct DayCandle {
            opening_price: f64,
            high_price: f64,
            low_price: f64,
            trade_price: f64,
            candle_acc_trade_volume: f64,
            timestamp: i64,
        }

        let resp = self
            .client
            .get(format!("{}/candles/days", self.base_url))
            .query(&[("market", market), ("count", "1")])
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "upbit".to_string(),
                detail: e.to_string(),
            })?;

        let candles: Vec<DayCandle> =
            resp.json().await.map_err(|e| CoreError::SchemaMismatch {
                resource: "candles/days".to_string(),
                detail: e.to_string(),
            })?;

        let bar = candles.into_iter().next().ok_or_else(|| CoreError::SchemaMismatch {
            resource: "candles/days".to_string(),
            detail: "empty candle series".to_string(),
        })?;

        Ok(crate::types::Candle {
            open_time: bar.timestamp,
            open: bar.opening_price,
            high: bar.high_price,
            low: bar.low_price,
            close: bar.trade_price,
            volume: bar.candle_acc_trade_volume,
            close_time: bar.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_markets_parses_warning_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/market/all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"market": "KRW-BTC", "market_warning": "NONE"},
                {"market": "KRW-XYZ", "market_warning": "CAUTION"},
            ])))
            .mount(&server)
            .await;

        let client = CryptoExchangeClient::with_base_url(
            server.uri(),
            Arc::new(LimiterRegistry::new()),
        );
        let markets = client.fetch_markets().await.unwrap();
        assert_eq!(markets.len(), 2);
        assert!(!markets[0].is_warned());
        assert!(markets[1].is_warned());
    }

    #[tokio::test]
    async fn fetch_tickers_empty_markets_skips_the_call() {
        let client = CryptoExchangeClient::with_base_url(
            "http://unused.invalid".to_string(),
            Arc::new(LimiterRegistry::new()),
        );
        let result = client.fetch_tickers(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn fetch_tickers_returns_signed_change_rate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"market": "KRW-BTC", "trade_price": 50000000.0, "acc_trade_price_24h": 1.0e9, "signed_change_rate": -0.05},
            ])))
            .mount(&server)
            .await;

        let client = CryptoExchangeClient::with_base_url(
            server.uri(),
            Arc::new(LimiterRegistry::new()),
        );
        let tickers = client.fetch_tickers(&["KRW-BTC".to_string()]).await.unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].signed_change_rate, -0.05);
    }

    #[tokio::test]
    async fn fetch_daily_closes_reverses_to_oldest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/candles/days"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"trade_price": 3.0},
                {"trade_price": 2.0},
                {"trade_price": 1.0},
            ])))
            .mount(&server)
            .await;

        let client = CryptoExchangeClient::with_base_url(server.uri(), Arc::new(LimiterRegistry::new()));
        let closes = client.fetch_daily_closes("KRW-BTC", 3).await.unwrap();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn fetch_latest_candle_maps_ohlcv_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/candles/days"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"opening_price": 100.0, "high_price": 110.0, "low_price": 95.0,
                 "trade_price": 105.0, "candle_acc_trade_volume": 42.0, "timestamp": 1_700_000_000_000i64},
            ])))
            .mount(&server)
            .await;

        let client = CryptoExchangeClient::with_base_url(server.uri(), Arc::new(LimiterRegistry::new()));
        let candle = client.fetch_latest_candle("KRW-BTC").await.unwrap();
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.close, 105.0);
        assert_eq!(candle.volume, 42.0);
    }

    #[tokio::test]
    async fn upstream_failure_is_classified_as_unavailable() {
        let client = CryptoExchangeClient::with_base_url(
            "http://127.0.0.1:1".to_string(),
            Arc::new(LimiterRegistry::new()),
        );
        let err = client.fetch_markets().await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamUnavailable { .. }));
    }
}
