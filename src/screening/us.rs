// =============================================================================
// US Screening Pipeline
// =============================================================================

use std::sync::Arc;

use chrono::Utc;

use crate::providers::us_screener::{ScreenerQuery, UsScreenerClient};
use crate::screening::{
    apply_basic_filters, enrich_with_rsi, sorted_by_field, validate, Candidate, Market,
    ScreenRequest, DEFAULT_ENRICHMENT_CONCURRENCY, DEFAULT_ENRICHMENT_TIMEOUT,
};
use crate::types::{ScreenMeta, ScreenResult};

pub struct UsScreener {
    client: Arc<UsScreenerClient>,
}

impl UsScreener {
    pub fn new(client: Arc<UsScreenerClient>) -> Self {
        Self { client }
    }

    pub async fn screen(&self, req: ScreenRequest) -> crate::errors::CoreResult<ScreenResult> {
        let resolved = validate(Market::Us, req)?;

        let query = ScreenerQuery {
            min_market_cap: resolved.min_market_cap,
            sort_by: Some(resolved.sort_by.clone()),
            sort_order: Some(resolved.sort_order.clone()),
            limit: (resolved.limit * crate::screening::CANDIDATE_OVERSAMPLE_FACTOR)
                .min(crate::screening::CANDIDATE_OVERSAMPLE_CAP) as u32,
        };
        let rows = self.client.screen(&query).await?;

        let candidates: Vec<Candidate> = rows
            .into_iter()
            // "drop rows without a usable price"
            .filter(|r| r.price.is_some())
            .map(|r| Candidate {
                code: r.symbol,
                name: r.name.unwrap_or_default(),
                close: r.price,
                volume: r.volume,
                market_cap: r.market_cap,
                change_rate: r.change_percent,
                per: None,
                pbr: None,
                dividend_yield: None,
                trade_amount: None,
                rsi: None,
                is_kospi200: false,
                etf_categories: Vec::new(),
                warning_flag: None,
            })
            .collect();

        let total_count = candidates.len();
        let filtered = apply_basic_filters(candidates, &resolved);
        let sorted = sorted_by_field(filtered, &resolved.sort_by, &resolved.sort_order);
        let mut subset = sorted;

        let mut rsi_meta = crate::types::RsiEnrichmentMeta::default();

        // Skip per-symbol OHLCV fetches entirely unless the request actually
        // filters on RSI.
        let final_rows: Vec<Candidate> = if let Some(max_rsi) = resolved.max_rsi {
            let codes: Vec<String> = subset.iter().map(|c| c.code.clone()).collect();
            let client = self.client.clone();
            let (rsi_values, meta) = enrich_with_rsi(
                codes,
                DEFAULT_ENRICHMENT_CONCURRENCY,
                DEFAULT_ENRICHMENT_TIMEOUT,
                move |symbol| {
                    let client = client.clone();
                    async move { client.fetch_daily_closes(&symbol).await }
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
            market: "us".to_string(),
            meta: ScreenMeta {
                rsi_enrichment: rsi_meta,
                extra: Default::default(),
            },
            timestamp: Utc::now().to_rfc3339(),
            warnings: Vec::new(),
        })
    }
}
