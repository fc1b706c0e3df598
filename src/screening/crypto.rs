// =============================================================================
// Crypto Screening Pipeline — Upbit KRW markets
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use crate::cache::{keys, SharedCache};
use crate::errors::CoreResult;
use crate::providers::crypto_exchange::CryptoExchangeClient;
use crate::rate_limiter::registry::LimiterRegistry;
use crate::screening::{
    apply_basic_filters, enrich_with_rsi, sorted_by_field, validate, Candidate, Market,
    ScreenRequest, DEFAULT_ENRICHMENT_CONCURRENCY, DEFAULT_ENRICHMENT_TIMEOUT,
};
use crate::types::{ScreenMeta, ScreenResult};

pub const CRYPTO_TOP_BY_VOLUME: usize = 100;
pub const CRASH_THRESHOLD: f64 = -0.30;
pub const MARKET_PANIC_THRESHOLD: f64 = -0.10;
const MARKET_CAP_SNAPSHOT_TTL: Duration = Duration::from_secs(600);
const MARKET_CAP_STALE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Abstraction over the external market-cap ranking source so the pipeline
/// can be tested without a live network call.
#[async_trait::async_trait]
pub trait MarketCapSource: Send + Sync {
    async fn fetch_market_caps(&self) -> CoreResult<std::collections::HashMap<String, f64>>;
}

pub struct CoinGeckoMarketCapSource {
    client: reqwest::Client,
    base_url: String,
    limiters: Arc<LimiterRegistry>,
}

impl CoinGeckoMarketCapSource {
    pub fn new(limiters: Arc<LimiterRegistry>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            limiters,
        }
    }
}

#[derive(Deserialize)]
struct CoinGeckoEntry {
    symbol: String,
    market_cap: Option<f64>,
}

#[async_trait::async_trait]
impl MarketCapSource for CoinGeckoMarketCapSource {
    async fn fetch_market_caps(&self) -> CoreResult<std::collections::HashMap<String, f64>> {
        let limiter = self.limiters.get_limiter("coingecko", "GET /coins/markets", None, None);
        limiter.acquire_silent().await;

        let resp = self
            .client
            .get(format!("{}/coins/markets", self.base_url))
            .query(&[("vs_currency", "krw"), ("per_page", "250")])
            .send()
            .await
            .map_err(|e| crate::errors::CoreError::UpstreamUnavailable {
                provider: "coingecko".to_string(),
                detail: e.to_string(),
            })?;

        let entries: Vec<CoinGeckoEntry> =
            resp.json().await.map_err(|e| crate::errors::CoreError::SchemaMismatch {
                resource: "coins/markets".to_string(),
                detail: e.to_string(),
            })?;

        Ok(entries
            .into_iter()
            .filter_map(|e| e.market_cap.map(|cap| (e.symbol.to_uppercase(), cap)))
            .collect())
    }
}

pub struct CryptoScreener {
    exchange: Arc<CryptoExchangeClient>,
    market_caps: Arc<dyn MarketCapSource>,
    cache: SharedCache,
}

impl CryptoScreener {
    pub fn new(exchange: Arc<CryptoExchangeClient>, market_caps: Arc<dyn MarketCapSource>, cache: SharedCache) -> Self {
        Self { exchange, market_caps, cache }
    }

    async fn market_cap_snapshot(&self, warnings: &mut Vec<String>, extra: &mut serde_json::Map<String, serde_json::Value>) -> std::collections::HashMap<String, f64> {
        let fresh_key = keys::MARKET_CAP_SNAPSHOT_KEY;
        let stale_key = format!("{fresh_key}:stale");

        if let Some((snapshot, age)) = self
            .cache
            .get_with_age::<std::collections::HashMap<String, f64>>(fresh_key, MARKET_CAP_SNAPSHOT_TTL)
            .await
        {
            extra.insert("coingecko_cached".into(), serde_json::Value::Bool(true));
            extra.insert("coingecko_age_seconds".into(), serde_json::Value::from(age.as_secs()));
            return snapshot;
        }

        match self.market_caps.fetch_market_caps().await {
            Ok(snapshot) => {
                self.cache.set(fresh_key, &snapshot, MARKET_CAP_SNAPSHOT_TTL).await;
                self.cache.set(&stale_key, &snapshot, MARKET_CAP_STALE_TTL).await;
                extra.insert("coingecko_cached".into(), serde_json::Value::Bool(false));
                extra.insert("coingecko_age_seconds".into(), serde_json::Value::from(0));
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "market cap snapshot fetch failed, trying stale fallback");
                if let Some((stale, age)) = self
                    .cache
                    .get_with_age::<std::collections::HashMap<String, f64>>(&stale_key, MARKET_CAP_STALE_TTL)
                    .await
                {
                    warnings.push("using stale market-cap snapshot".to_string());
                    extra.insert("coingecko_cached".into(), serde_json::Value::Bool(true));
                    extra.insert("coingecko_age_seconds".into(), serde_json::Value::from(age.as_secs()));
                    stale
                } else {
                    warnings.push("market-cap snapshot unavailable, fields set to null".to_string());
                    extra.insert("coingecko_cached".into(), serde_json::Value::Bool(false));
                    std::collections::HashMap::new()
                }
            }
        }
    }

    pub async fn screen(&self, req: ScreenRequest) -> CoreResult<ScreenResult> {
        let resolved = validate(Market::Crypto, req)?;
        let mut warnings = Vec::new();
        let mut extra = serde_json::Map::new();

        let markets = self.exchange.fetch_markets().await?;
        let total_markets = markets.len();
        let symbols: Vec<String> = markets.iter().map(|m| m.market.clone()).collect();
        let tickers = self.exchange.fetch_tickers(&symbols).await?;

        let mut by_market: std::collections::HashMap<String, &crate::providers::crypto_exchange::Ticker> =
            tickers.iter().map(|t| (t.market.clone(), t)).collect();

        let mut ranked_codes: Vec<String> = tickers.iter().map(|t| t.market.clone()).collect();
        ranked_codes.sort_by(|a, b| {
            let va = by_market.get(a).map(|t| t.acc_trade_price_24h).unwrap_or(0.0);
            let vb = by_market.get(b).map(|t| t.acc_trade_price_24h).unwrap_or(0.0);
            vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked_codes.truncate(CRYPTO_TOP_BY_VOLUME);
        let top_by_volume = ranked_codes.len();

        // §4.H crash filter: exclude any symbol whose 24h change <= -30%
        // while BTC's 24h change > -10%. Missing BTC change substitutes 0
        // and warns.
        let btc_change = by_market.get("KRW-BTC").map(|t| t.signed_change_rate);
        let btc_change = btc_change.unwrap_or_else(|| {
            warnings.push("BTC 24h change missing, substituted 0".to_string());
            0.0
        });

        let warning_markets: std::collections::HashSet<String> =
            markets.iter().filter(|m| m.is_warned()).map(|m| m.market.clone()).collect();

        let mut filtered_by_crash = 0usize;
        let mut filtered_by_warning = 0usize;

        let mut candidates: Vec<Candidate> = Vec::new();
        for code in &ranked_codes {
            let Some(ticker) = by_market.remove(code.as_str()) else { continue };

            if warning_markets.contains(code) {
                filtered_by_warning += 1;
                continue;
            }
            if ticker.signed_change_rate <= CRASH_THRESHOLD && btc_change > MARKET_PANIC_THRESHOLD {
                filtered_by_crash += 1;
                continue;
            }

            candidates.push(Candidate {
                code: ticker.market.clone(),
                name: ticker.market.clone(),
                close: Some(ticker.trade_price),
                volume: None,
                market_cap: None,
                // stored as percent to stay consistent with the KR pipeline's change_rate units
                change_rate: Some(ticker.signed_change_rate * 100.0),
                per: None,
                pbr: None,
                dividend_yield: None,
                trade_amount: Some(ticker.acc_trade_price_24h),
                rsi: None,
                is_kospi200: false,
                etf_categories: Vec::new(),
                warning_flag: None,
            });
        }

        let total_count = candidates.len();
        let market_cap_snapshot = self.market_cap_snapshot(&mut warnings, &mut extra).await;
        for candidate in candidates.iter_mut() {
            let symbol = candidate.code.trim_start_matches("KRW-");
            candidate.market_cap = market_cap_snapshot.get(symbol).copied();
        }

        let filtered = apply_basic_filters(candidates, &resolved);

        // Only pay for per-symbol OHLCV fetches when the request filters or
        // sorts on RSI; a plain volume/market-cap query has no use for it.
        let needs_rsi = resolved.max_rsi.is_some() || resolved.sort_by == "rsi";
        let mut enriched: Vec<Candidate> = filtered;
        let mut rsi_meta = crate::types::RsiEnrichmentMeta::default();
        if needs_rsi {
            let codes: Vec<String> = enriched.iter().map(|c| c.code.clone()).collect();
            let exchange = self.exchange.clone();
            let (rsi_values, meta) = enrich_with_rsi(
                codes,
                DEFAULT_ENRICHMENT_CONCURRENCY,
                DEFAULT_ENRICHMENT_TIMEOUT,
                move |market| {
                    let exchange = exchange.clone();
                    async move { exchange.fetch_daily_closes(&market, 30).await }
                },
            )
            .await;
            rsi_meta = meta;

            for candidate in enriched.iter_mut() {
                candidate.rsi = rsi_values.get(&candidate.code).copied().flatten();
            }
        }

        let rsi_enriched = enriched.iter().filter(|c| c.rsi.is_some()).count();

        let final_rows: Vec<Candidate> = if let Some(max_rsi) = resolved.max_rsi {
            enriched.into_iter().filter(|c| c.rsi.map_or(false, |v| v <= max_rsi)).collect()
        } else {
            enriched
        };

        // §4.H: for sort_by=rsi, bucket-of-5 ascending, ties by descending
        // trade amount, nulls last; order is forced ascending regardless of
        // the request.
        let sorted = if resolved.sort_by == "rsi" {
            if resolved.sort_order == "desc" {
                warnings.push("rsi sort is always ascending by bucket; ignoring sort_order=desc".to_string());
            }
            let mut rows = final_rows;
            rows.sort_by(|a, b| {
                let bucket_a = a.rsi.map(|v| ((v / 5.0).floor() * 5.0) as i64).unwrap_or(999);
                let bucket_b = b.rsi.map(|v| ((v / 5.0).floor() * 5.0) as i64).unwrap_or(999);
                bucket_a.cmp(&bucket_b).then_with(|| {
                    let ta = a.trade_amount.unwrap_or(0.0);
                    let tb = b.trade_amount.unwrap_or(0.0);
                    tb.partial_cmp(&ta).unwrap_or(std::cmp::Ordering::Equal)
                })
            });
            rows
        } else {
            sorted_by_field(final_rows, &resolved.sort_by, &resolved.sort_order)
        };

        let returned: Vec<Candidate> = sorted.into_iter().take(resolved.limit).collect();
        let returned_count = returned.len();
        let results: Vec<serde_json::Value> = returned
            .iter()
            .map(|c| {
                let mut row = c.to_json();
                let bucket = c.rsi.map(|v| ((v / 5.0).floor() * 5.0) as i64).unwrap_or(999);
                row["rsi_bucket"] = serde_json::Value::from(bucket);
                row
            })
            .collect();

        extra.insert("total_markets".into(), serde_json::Value::from(total_markets));
        extra.insert("top_by_volume".into(), serde_json::Value::from(top_by_volume));
        extra.insert("filtered_by_warning".into(), serde_json::Value::from(filtered_by_warning));
        extra.insert("filtered_by_crash".into(), serde_json::Value::from(filtered_by_crash));
        extra.insert("rsi_enriched".into(), serde_json::Value::from(rsi_enriched));
        extra.insert("final_count".into(), serde_json::Value::from(returned_count));
        extra.entry("coingecko_cached").or_insert(serde_json::Value::Bool(false));
        extra.entry("coingecko_age_seconds").or_insert(serde_json::Value::from(0));

        Ok(ScreenResult {
            results,
            total_count,
            returned_count,
            filters_applied: resolved.filters_applied,
            market: "crypto".to_string(),
            meta: ScreenMeta { rsi_enrichment: rsi_meta, extra },
            timestamp: Utc::now().to_rfc3339(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMarketCapSource(std::collections::HashMap<String, f64>);

    #[async_trait::async_trait]
    impl MarketCapSource for FixedMarketCapSource {
        async fn fetch_market_caps(&self) -> CoreResult<std::collections::HashMap<String, f64>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn bucket_of_5_rounds_down() {
        let bucket = |rsi: f64| ((rsi / 5.0).floor() * 5.0) as i64;
        assert_eq!(bucket(27.0), 25);
        assert_eq!(bucket(30.0), 30);
        assert_eq!(bucket(4.9), 0);
    }
}
