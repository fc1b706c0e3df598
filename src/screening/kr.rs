// =============================================================================
// KR Screening Pipeline — KOSPI / KOSDAQ stocks and ETFs
// =============================================================================

use std::sync::Arc;

use chrono::Utc;

use crate::errors::{CoreError, CoreResult};
use crate::providers::broker::BrokerClient;
use crate::providers::krx::{HttpKrxTransport, KrxFetcher, MarketId};
use crate::providers::NormalizedRecord;
use crate::screening::{
    apply_basic_filters, enrich_with_rsi, sorted_by_field, validate, Candidate, Market,
    ScreenRequest, DEFAULT_ENRICHMENT_CONCURRENCY, DEFAULT_ENRICHMENT_TIMEOUT,
};
use crate::types::{ScreenMeta, ScreenResult};

/// The closed set of multi-label ETF categories §4.H names. `기타` ("other")
/// is the fallback when nothing matches.
const ETF_CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("미국주식", &["미국", "나스닥", "S&P", "다우"]),
    ("인도", &["인도"]),
    ("일본", &["일본", "니케이"]),
    ("중국", &["중국", "차이나"]),
    ("반도체", &["반도체"]),
    ("AI", &["AI", "인공지능"]),
    ("배당", &["배당"]),
    ("채권", &["채권", "국채"]),
    ("2차전지", &["2차전지", "배터리"]),
    ("방산", &["방산", "국방"]),
    ("금", &["금현물", "골드"]),
    ("원유", &["원유", "WTI"]),
    ("코스피200", &["코스피200"]),
    ("코스닥150", &["코스닥150"]),
];

fn classify_etf_categories(name: &str) -> Vec<String> {
    let mut labels: Vec<String> = ETF_CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| name.contains(kw)))
        .map(|(label, _)| label.to_string())
        .collect();
    if labels.is_empty() {
        labels.push("기타".to_string());
    }
    labels
}

fn parse_market(market: &str) -> CoreResult<Market> {
    match market {
        "kospi" => Ok(Market::Kospi),
        "kosdaq" => Ok(Market::Kosdaq),
        "kr" => Ok(Market::Kr),
        other => Err(CoreError::validation(format!("unknown KR market '{other}'"))),
    }
}

fn normalized_to_candidate(record: NormalizedRecord) -> Candidate {
    Candidate {
        code: record.code,
        name: record.name,
        close: record.close,
        volume: record.volume,
        market_cap: record.market_cap,
        change_rate: record.change_rate,
        per: record.per,
        pbr: record.pbr,
        dividend_yield: record.dividend_yield,
        trade_amount: None,
        rsi: None,
        is_kospi200: record.is_kospi200,
        etf_categories: record.etf_categories,
        warning_flag: record.warning_flag,
    }
}

pub struct KrScreener {
    krx: Arc<KrxFetcher<HttpKrxTransport>>,
    broker: Arc<BrokerClient>,
}

impl KrScreener {
    pub fn new(krx: Arc<KrxFetcher<HttpKrxTransport>>, broker: Arc<BrokerClient>) -> Self {
        Self { krx, broker }
    }

    async fn universe(&self, market: Market, is_etf: bool) -> Vec<Candidate> {
        if is_etf {
            return self
                .krx
                .fetch_all_etfs(None, None)
                .await
                .into_iter()
                .map(|mut record| {
                    record.etf_categories = classify_etf_categories(&record.name);
                    normalized_to_candidate(record)
                })
                .collect();
        }

        let records = match market {
            Market::Kospi => self.krx.fetch_all_stocks(MarketId::Kospi, None).await,
            Market::Kosdaq => self.krx.fetch_all_stocks(MarketId::Kosdaq, None).await,
            Market::Kr => {
                let mut kospi = self.krx.fetch_all_stocks(MarketId::Kospi, None).await;
                let mut kosdaq = self.krx.fetch_all_stocks(MarketId::Kosdaq, None).await;
                kospi.append(&mut kosdaq);
                kospi
            }
            _ => unreachable!("parse_market only yields KR variants"),
        };

        let kospi200 = self.krx.fetch_kospi200_codes(None).await;
        records
            .into_iter()
            .map(|mut record| {
                record.is_kospi200 = kospi200.contains(&record.code);
                normalized_to_candidate(record)
            })
            .collect()
    }

    /// Best-effort valuation attach: PER/PBR/dividend yield. Failure is
    /// logged upstream inside `KrxFetcher` and simply yields an empty map
    /// here — it is never fatal to the screen.
    async fn attach_valuations(&self, market: Market, candidates: &mut [Candidate]) {
        let krx_market = match market {
            Market::Kospi => "STK",
            Market::Kosdaq => "KSQ",
            Market::Kr => "ALL",
            Market::Us | Market::Crypto => unreachable!("parse_market only yields KR variants"),
        };
        let valuations = self.krx.fetch_valuations(krx_market, None).await;
        if valuations.is_empty() {
            return;
        }
        let by_code: std::collections::HashMap<String, (Option<f64>, Option<f64>, Option<f64>)> =
            valuations.into_iter().map(|(code, per, pbr, div)| (code, (per, pbr, div))).collect();

        for candidate in candidates.iter_mut() {
            if let Some((per, pbr, div)) = by_code.get(&candidate.code) {
                candidate.per = *per;
                candidate.pbr = *pbr;
                candidate.dividend_yield = *div;
            }
        }
    }

    pub async fn screen(&self, market: &str, req: ScreenRequest) -> CoreResult<ScreenResult> {
        let market_enum = parse_market(market)?;
        let resolved = validate(market_enum, req)?;

        let is_etf = resolved.asset_type.as_deref() == Some("etf")
            || resolved
                .category
                .as_deref()
                .map_or(false, |c| ETF_CATEGORY_KEYWORDS.iter().any(|(label, _)| *label == c));

        let mut candidates = self.universe(market_enum, is_etf).await;
        if !is_etf {
            self.attach_valuations(market_enum, &mut candidates).await;
        }
        if let Some(category) = &resolved.category {
            candidates.retain(|c| c.etf_categories.iter().any(|label| label == category));
        }

        let total_count = candidates.len();
        let filtered = apply_basic_filters(candidates, &resolved);
        let sorted = sorted_by_field(filtered, &resolved.sort_by, &resolved.sort_order);

        let oversample = (resolved.limit * crate::screening::CANDIDATE_OVERSAMPLE_FACTOR)
            .min(crate::screening::CANDIDATE_OVERSAMPLE_CAP);
        let mut subset: Vec<Candidate> = sorted.into_iter().take(oversample).collect();

        let mut rsi_meta = crate::types::RsiEnrichmentMeta::default();

        // Only pay for per-symbol OHLCV fetches when the request actually
        // filters or sorts on RSI — a plain market-cap/price query must not
        // trigger any broker calls.
        let final_rows: Vec<Candidate> = if let Some(max_rsi) = resolved.max_rsi {
            let codes: Vec<String> = subset.iter().map(|c| c.code.clone()).collect();
            let broker = self.broker.clone();
            let (rsi_values, meta) = enrich_with_rsi(
                codes,
                DEFAULT_ENRICHMENT_CONCURRENCY,
                DEFAULT_ENRICHMENT_TIMEOUT,
                move |code| {
                    let broker = broker.clone();
                    async move { broker.fetch_daily_closes(&code).await }
                },
            )
            .await;
            rsi_meta = meta;

            for candidate in subset.iter_mut() {
                candidate.rsi = rsi_values.get(&candidate.code).copied().flatten();
            }

            subset.into_iter().filter(|c| c.rsi.map_or(false, |v| v <= max_rsi)).collect()
        } else {
            subset
        };

        let returned: Vec<Candidate> = final_rows.into_iter().take(resolved.limit).collect();
        let returned_count = returned.len();
        let results = returned.iter().map(Candidate::to_json).collect();

        Ok(ScreenResult {
            results,
            total_count,
            returned_count,
            filters_applied: resolved.filters_applied,
            market: market.to_string(),
            meta: ScreenMeta {
                rsi_enrichment: rsi_meta,
                extra: Default::default(),
            },
            timestamp: Utc::now().to_rfc3339(),
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_etf_categories_matches_keywords() {
        assert_eq!(classify_etf_categories("TIGER 미국나스닥100"), vec!["미국주식".to_string()]);
        assert_eq!(classify_etf_categories("KODEX 반도체"), vec!["반도체".to_string()]);
    }

    #[test]
    fn classify_etf_categories_falls_back_to_other() {
        assert_eq!(classify_etf_categories("KODEX 200"), vec!["기타".to_string()]);
    }

    #[test]
    fn classify_etf_categories_can_multi_label() {
        let labels = classify_etf_categories("미국 반도체 AI");
        assert!(labels.contains(&"미국주식".to_string()));
        assert!(labels.contains(&"반도체".to_string()));
        assert!(labels.contains(&"AI".to_string()));
    }

    #[test]
    fn parse_market_rejects_unknown() {
        assert!(parse_market("nasdaq").is_err());
    }
}
