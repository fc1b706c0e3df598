// =============================================================================
// Bourse Bulk Portal — stock / ETF / valuation master lists
// =============================================================================
//
// For each of {all-stocks-by-market, all-ETFs, valuations} the fetch loop
// walks the trading-date resolver's candidates, consulting the cache first
// and falling back to the provider on miss; an empty provider response
// advances to the next candidate date rather than giving up.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{keys, SharedCache};
use crate::errors::{CoreError, CoreResult};
use crate::providers::normalize;
use crate::providers::trading_date::{MaxWorkingDateSource, TradingDateResolver};
use crate::rate_limiter::registry::LimiterRegistry;

const KRX_CACHE_TTL: Duration = Duration::from_secs(300);
const KOSPI200_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

/// KRX's own index code for the KOSPI200 composite index.
const KOSPI200_INDEX_CODE: &str = "1028";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketId {
    Kospi,
    Kosdaq,
}

impl MarketId {
    fn krx_code(self) -> &'static str {
        match self {
            MarketId::Kospi => "STK",
            MarketId::Kosdaq => "KSQ",
        }
    }
}

/// Raw row shape returned by the KRX stock-list endpoint. Extra fields are
/// ignored by serde's default behaviour.
#[derive(Debug, Deserialize)]
struct RawStockRow {
    #[serde(rename = "ISU_SRT_CD")]
    code: Option<String>,
    #[serde(rename = "ISU_ABBRV")]
    name: Option<String>,
    #[serde(rename = "TDD_CLSPRC")]
    close: Option<String>,
    #[serde(rename = "ACC_TRDVOL")]
    volume: Option<String>,
    #[serde(rename = "MKTCAP")]
    market_cap: Option<String>,
    #[serde(rename = "FLUC_RT")]
    change_magnitude: Option<String>,
    #[serde(rename = "FLUC_TP_CD")]
    change_direction: Option<String>,
}

/// Row shape for the index-constituent ("지수구성종목") resource — only the
/// stock code matters for membership tagging.
#[derive(Debug, Deserialize)]
struct RawIndexConstituentRow {
    #[serde(rename = "ISU_SRT_CD")]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawValuationRow {
    #[serde(rename = "ISU_SRT_CD")]
    code: Option<String>,
    #[serde(rename = "PER")]
    per: Option<String>,
    #[serde(rename = "PBR")]
    pbr: Option<String>,
    #[serde(rename = "DVD_YLD")]
    dividend_yield_pct: Option<String>,
}

fn normalize_stock_row(row: RawStockRow) -> Option<super::NormalizedRecord> {
    let code = row.code?;
    let name = row.name.unwrap_or_default();
    let close = row.close.as_deref().and_then(normalize::parse_number);
    let volume = row.volume.as_deref().and_then(normalize::parse_number);
    let market_cap_krw = row.market_cap.as_deref().and_then(normalize::parse_number);
    let magnitude = row.change_magnitude.as_deref().and_then(normalize::parse_number);
    let change_rate =
        normalize::signed_change_rate(magnitude, row.change_direction.as_deref());

    Some(super::NormalizedRecord {
        code,
        name,
        close,
        volume,
        market_cap: normalize::market_cap_to_eok(market_cap_krw),
        change_rate,
        per: None,
        pbr: None,
        dividend_yield: None,
        is_kospi200: false,
        etf_categories: Vec::new(),
        warning_flag: None,
    })
}

/// Validate + normalise a batch of valuation rows. Rows missing
/// `ISU_SRT_CD` are logged and discarded (schema-tolerance rule); if every
/// row in the batch is invalid the caller should treat this as a cache miss
/// and re-fetch from the provider.
fn normalize_valuation_rows(rows: Vec<Value>) -> Vec<(String, Option<f64>, Option<f64>, Option<f64>)> {
    let mut out = Vec::with_capacity(rows.len());
    for raw in rows {
        let row: RawValuationRow = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let Some(code) = row.code else {
            debug!("valuation row missing ISU_SRT_CD, discarding");
            continue;
        };
        let per = normalize::per_pbr(row.per.as_deref().and_then(normalize::parse_number));
        let pbr = normalize::per_pbr(row.pbr.as_deref().and_then(normalize::parse_number));
        let dividend_yield = normalize::dividend_yield_to_decimal(
            row.dividend_yield_pct.as_deref().and_then(normalize::parse_number),
        );
        out.push((code, per, pbr, dividend_yield));
    }
    out
}

/// Abstraction over the actual HTTP transport so tests can substitute a
/// canned provider without a live KRX endpoint.
#[async_trait::async_trait]
pub trait KrxTransport: Send + Sync {
    async fn fetch_stock_list(&self, market: MarketId, date: &str) -> CoreResult<Vec<Value>>;
    async fn fetch_etf_list(&self, date: &str, idx_cls_cd: Option<&str>) -> CoreResult<Vec<Value>>;
    async fn fetch_valuation_list(&self, market: &str, date: &str) -> CoreResult<Vec<Value>>;
    async fn fetch_index_constituents(&self, idx_ind_cd: &str, date: &str) -> CoreResult<Vec<Value>>;
    async fn fetch_max_working_date(&self) -> Option<String>;
}

/// Live HTTP transport against the KRX public JSON endpoints.
pub struct HttpKrxTransport {
    client: reqwest::Client,
    limiters: Arc<LimiterRegistry>,
    base_url: String,
}

impl HttpKrxTransport {
    pub fn new(limiters: Arc<LimiterRegistry>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            limiters,
            base_url: "https://data.krx.co.kr/comm/bldAttendant".to_string(),
        }
    }

    async fn post_bld(&self, bld: &str, extra: &[(&str, &str)]) -> CoreResult<Vec<Value>> {
        let limiter = self
            .limiters
            .get_limiter("krx_bulk", bld, None, None);
        limiter.acquire_silent().await;

        let mut form: Vec<(&str, &str)> = vec![
            ("bld", bld),
            ("share", "1"),
            ("money", "1"),
            ("csvxls_isNo", "false"),
        ];
        form.extend_from_slice(extra);

        let resp = self
            .client
            .post(format!("{}/getJsonData.cmd", self.base_url))
            .form(&form)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "krx".to_string(),
                detail: e.to_string(),
            })?;

        let body: Value = resp.json().await.map_err(|e| CoreError::SchemaMismatch {
            resource: bld.to_string(),
            detail: e.to_string(),
        })?;

        let rows = body
            .get("OutBlock_1")
            .or_else(|| body.get("output"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl KrxTransport for HttpKrxTransport {
    async fn fetch_stock_list(&self, market: MarketId, date: &str) -> CoreResult<Vec<Value>> {
        self.post_bld(
            "dbms/MDC/STAT/standard/MDCSTAT01501",
            &[("mktId", market.krx_code()), ("trdDd", date)],
        )
        .await
    }

    async fn fetch_etf_list(&self, date: &str, idx_cls_cd: Option<&str>) -> CoreResult<Vec<Value>> {
        let mut extra = vec![("trdDd", date)];
        if let Some(cls) = idx_cls_cd {
            extra.push(("idxIndClssCd", cls));
        }
        self.post_bld("dbms/MDC/STAT/standard/MDCSTAT01701", &extra).await
    }

    async fn fetch_valuation_list(&self, market: &str, date: &str) -> CoreResult<Vec<Value>> {
        self.post_bld(
            "dbms/MDC/STAT/standard/MDCSTAT03501",
            &[("mktId", market), ("trdDd", date)],
        )
        .await
    }

    async fn fetch_index_constituents(&self, idx_ind_cd: &str, date: &str) -> CoreResult<Vec<Value>> {
        self.post_bld(
            "dbms/MDC/STAT/standard/MDCSTAT00601",
            &[("idxIndCd", idx_ind_cd), ("trdDd", date)],
        )
        .await
    }

    async fn fetch_max_working_date(&self) -> Option<String> {
        let limiter = self.limiters.get_limiter("krx_bulk", "max_working_date", None, None);
        limiter.acquire_silent().await;

        let url = format!(
            "http://data.krx.co.kr/comm/bldAttendant/executeForResourceBundle.cmd?baseName=krx.mdc.i18n.component&key=B128.bld"
        );
        let resp = self.client.get(&url).send().await.ok()?;
        let body: Value = resp.json().await.ok()?;
        body.get("result")?
            .get("output")?
            .as_array()?
            .first()?
            .get("max_work_dt")?
            .as_str()
            .map(|s| s.to_string())
    }
}

pub struct KrxFetcher<T: KrxTransport> {
    transport: T,
    cache: SharedCache,
    resolver: TradingDateResolver,
}

struct TransportDateSource<'a, T: KrxTransport>(&'a T);

#[async_trait::async_trait]
impl<'a, T: KrxTransport> MaxWorkingDateSource for TransportDateSource<'a, T> {
    async fn fetch_max_working_date(&self) -> Option<String> {
        self.0.fetch_max_working_date().await
    }
}

impl<T: KrxTransport> KrxFetcher<T> {
    pub fn new(transport: T, cache: SharedCache) -> Self {
        Self {
            transport,
            cache,
            resolver: TradingDateResolver::new(),
        }
    }

    async fn candidates(&self, explicit_date: Option<&str>) -> Vec<String> {
        let source = TransportDateSource(&self.transport);
        self.resolver.candidates(explicit_date, Some(&source)).await
    }

    /// §4.E fetch loop for the all-stocks-by-market resource.
    pub async fn fetch_all_stocks(
        &self,
        market: MarketId,
        explicit_date: Option<&str>,
    ) -> Vec<super::NormalizedRecord> {
        for date in self.candidates(explicit_date).await {
            let cache_key = keys::krx_stock_all(market.krx_code(), &date);

            if let Some(cached) = self.cache.get::<Vec<super::NormalizedRecord>>(&cache_key).await {
                return cached;
            }

            match self.transport.fetch_stock_list(market, &date).await {
                Ok(rows) if !rows.is_empty() => {
                    let normalised: Vec<super::NormalizedRecord> = rows
                        .into_iter()
                        .filter_map(|v| serde_json::from_value::<RawStockRow>(v).ok())
                        .filter_map(normalize_stock_row)
                        .collect();
                    if !normalised.is_empty() {
                        self.cache.set(&cache_key, &normalised, KRX_CACHE_TTL).await;
                        return normalised;
                    }
                }
                Ok(_) => debug!(market = ?market, date, "krx stock list empty, trying next date"),
                Err(e) => warn!(error = %e, date, "krx stock list fetch failed, trying next date"),
            }
        }
        Vec::new()
    }

    /// §4.E fetch loop for the all-ETFs resource.
    pub async fn fetch_all_etfs(
        &self,
        idx_cls_cd: Option<&str>,
        explicit_date: Option<&str>,
    ) -> Vec<super::NormalizedRecord> {
        for date in self.candidates(explicit_date).await {
            let cache_key = keys::krx_etf_all(idx_cls_cd, &date);

            if let Some(cached) = self.cache.get::<Vec<super::NormalizedRecord>>(&cache_key).await {
                return cached;
            }

            match self.transport.fetch_etf_list(&date, idx_cls_cd).await {
                Ok(rows) if !rows.is_empty() => {
                    let normalised: Vec<super::NormalizedRecord> = rows
                        .into_iter()
                        .filter_map(|v| serde_json::from_value::<RawStockRow>(v).ok())
                        .filter_map(normalize_stock_row)
                        .collect();
                    if !normalised.is_empty() {
                        self.cache.set(&cache_key, &normalised, KRX_CACHE_TTL).await;
                        return normalised;
                    }
                }
                Ok(_) => debug!(date, "krx etf list empty, trying next date"),
                Err(e) => warn!(error = %e, date, "krx etf list fetch failed, trying next date"),
            }
        }
        Vec::new()
    }

    /// KOSPI200 index-constituent membership, keyed by stock code. Cached
    /// for a day since constituent changes are infrequent and scheduled, not
    /// intraday events. An empty provider response advances to the next
    /// candidate date like every other bulk resource here.
    pub async fn fetch_kospi200_codes(
        &self,
        explicit_date: Option<&str>,
    ) -> std::collections::HashSet<String> {
        for date in self.candidates(explicit_date).await {
            let cache_key = keys::krx_kospi200(&date);

            if let Some(cached) = self.cache.get::<Vec<String>>(&cache_key).await {
                return cached.into_iter().collect();
            }

            match self
                .transport
                .fetch_index_constituents(KOSPI200_INDEX_CODE, &date)
                .await
            {
                Ok(rows) if !rows.is_empty() => {
                    let codes: Vec<String> = rows
                        .into_iter()
                        .filter_map(|v| serde_json::from_value::<RawIndexConstituentRow>(v).ok())
                        .filter_map(|row| row.code)
                        .collect();
                    if !codes.is_empty() {
                        self.cache.set(&cache_key, &codes, KOSPI200_CACHE_TTL).await;
                        return codes.into_iter().collect();
                    }
                }
                Ok(_) => debug!(date, "kospi200 constituent list empty, trying next date"),
                Err(e) => warn!(error = %e, date, "kospi200 constituent fetch failed, trying next date"),
            }
        }
        std::collections::HashSet::new()
    }

    /// §4.E fetch loop for valuations, with the additional `ISU_SRT_CD`
    /// schema-tolerance rule: cached arrays whose entries have all lost
    /// that field are treated as a miss and re-fetched.
    pub async fn fetch_valuations(
        &self,
        market: &str,
        explicit_date: Option<&str>,
    ) -> Vec<(String, Option<f64>, Option<f64>, Option<f64>)> {
        for date in self.candidates(explicit_date).await {
            let cache_key = keys::krx_valuation(market, &date);

            if let Some(cached) = self.cache.get::<Vec<Value>>(&cache_key).await {
                let normalised = normalize_valuation_rows(cached);
                if !normalised.is_empty() {
                    return normalised;
                }
                debug!(date, "all cached valuation rows invalid, re-fetching");
            }

            match self.transport.fetch_valuation_list(market, &date).await {
                Ok(rows) if !rows.is_empty() => {
                    let normalised = normalize_valuation_rows(rows.clone());
                    if !normalised.is_empty() {
                        self.cache.set(&cache_key, &rows, KRX_CACHE_TTL).await;
                        return normalised;
                    }
                }
                Ok(_) => debug!(market, date, "krx valuation list empty, trying next date"),
                Err(e) => warn!(error = %e, date, "krx valuation fetch failed, trying next date"),
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        stock_rows: StdMutex<Vec<(String, Vec<Value>)>>,
        kospi200_rows: StdMutex<Vec<Value>>,
        max_date: Option<String>,
    }

    #[async_trait::async_trait]
    impl KrxTransport for FakeTransport {
        async fn fetch_stock_list(&self, _market: MarketId, date: &str) -> CoreResult<Vec<Value>> {
            let rows = self.stock_rows.lock().unwrap();
            Ok(rows
                .iter()
                .find(|(d, _)| d == date)
                .map(|(_, r)| r.clone())
                .unwrap_or_default())
        }

        async fn fetch_etf_list(&self, _date: &str, _idx: Option<&str>) -> CoreResult<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn fetch_valuation_list(&self, _market: &str, _date: &str) -> CoreResult<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn fetch_index_constituents(&self, _idx_ind_cd: &str, _date: &str) -> CoreResult<Vec<Value>> {
            Ok(self.kospi200_rows.lock().unwrap().clone())
        }

        async fn fetch_max_working_date(&self) -> Option<String> {
            self.max_date.clone()
        }
    }

    fn sample_row(code: &str) -> Value {
        serde_json::json!({
            "ISU_SRT_CD": code,
            "ISU_ABBRV": "Samsung Electronics",
            "TDD_CLSPRC": "71,000",
            "ACC_TRDVOL": "1,234,567",
            "MKTCAP": "480000000000000",
            "FLUC_RT": "1.23",
            "FLUC_TP_CD": "2",
        })
    }

    #[tokio::test]
    async fn trading_date_fallback_retries_next_date_on_empty() {
        let transport = FakeTransport {
            stock_rows: StdMutex::new(vec![("20250102".to_string(), vec![sample_row("005930")])]),
            kospi200_rows: StdMutex::new(Vec::new()),
            max_date: Some("20250103".to_string()),
        };
        let fetcher = KrxFetcher::new(transport, SharedCache::local_only());
        let result = fetcher.fetch_all_stocks(MarketId::Kospi, None).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].code, "005930");
        // The sign must have flipped since FLUC_TP_CD == "2".
        assert_eq!(result[0].change_rate, Some(-1.23));
    }

    #[tokio::test]
    async fn empty_universe_returns_empty_vec() {
        let transport = FakeTransport {
            stock_rows: StdMutex::new(Vec::new()),
            kospi200_rows: StdMutex::new(Vec::new()),
            max_date: None,
        };
        let fetcher = KrxFetcher::new(transport, SharedCache::local_only());
        let result = fetcher.fetch_all_stocks(MarketId::Kospi, None).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn second_call_hits_cache_not_transport() {
        let transport = FakeTransport {
            stock_rows: StdMutex::new(vec![("20250103".to_string(), vec![sample_row("005930")])]),
            kospi200_rows: StdMutex::new(Vec::new()),
            max_date: Some("20250103".to_string()),
        };
        let fetcher = KrxFetcher::new(transport, SharedCache::local_only());
        let first = fetcher.fetch_all_stocks(MarketId::Kospi, None).await;
        assert_eq!(first.len(), 1);

        // Clear the backing rows — if the second call still succeeds, it
        // came from the cache.
        fetcher.transport.stock_rows.lock().unwrap().clear();
        let second = fetcher.fetch_all_stocks(MarketId::Kospi, None).await;
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn kospi200_membership_is_fetched_and_cached() {
        let transport = FakeTransport {
            stock_rows: StdMutex::new(Vec::new()),
            kospi200_rows: StdMutex::new(vec![
                serde_json::json!({"ISU_SRT_CD": "005930"}),
                serde_json::json!({"ISU_SRT_CD": "000660"}),
            ]),
            max_date: Some("20250103".to_string()),
        };
        let fetcher = KrxFetcher::new(transport, SharedCache::local_only());
        let codes = fetcher.fetch_kospi200_codes(None).await;
        assert!(codes.contains("005930"));
        assert!(codes.contains("000660"));
        assert_eq!(codes.len(), 2);

        fetcher.transport.kospi200_rows.lock().unwrap().clear();
        let cached = fetcher.fetch_kospi200_codes(None).await;
        assert_eq!(cached.len(), 2, "second call should be served from cache");
    }

    #[tokio::test]
    async fn absent_kospi200_membership_yields_empty_set() {
        let transport = FakeTransport {
            stock_rows: StdMutex::new(Vec::new()),
            kospi200_rows: StdMutex::new(Vec::new()),
            max_date: None,
        };
        let fetcher = KrxFetcher::new(transport, SharedCache::local_only());
        assert!(fetcher.fetch_kospi200_codes(None).await.is_empty());
    }

    #[test]
    fn valuation_rows_missing_code_are_discarded() {
        let rows = vec![
            serde_json::json!({"ISU_SRT_CD": "005930", "PER": "12.3", "PBR": "1.1", "DVD_YLD": "2.56"}),
            serde_json::json!({"PER": "99.9"}),
        ];
        let out = normalize_valuation_rows(rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "005930");
        assert_eq!(out[0].3, Some(0.0256));
    }
}
