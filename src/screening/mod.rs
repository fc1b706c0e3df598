// =============================================================================
// Screening Pipeline — shared validation, presets, candidate model, enrichment
// =============================================================================
//
// `kr`, `us`, and `crypto` each assemble a universe into `Candidate` rows,
// hand them to the shared filter/sort/enrich helpers here, and wrap the
// result in `ScreenResult`. Keeping the market-specific fetch logic out of
// this module and the cross-market plumbing out of the market modules is the
// whole point of the split.
// =============================================================================

pub mod crypto;
pub mod kr;
pub mod us;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{CoreError, CoreResult};
use crate::types::{EnrichmentOutcome, RsiEnrichmentMeta};

pub const DEFAULT_ENRICHMENT_CONCURRENCY: usize = 10;
pub const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const CANDIDATE_OVERSAMPLE_FACTOR: usize = 3;
pub const CANDIDATE_OVERSAMPLE_CAP: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Kospi,
    Kosdaq,
    Kr,
    Us,
    Crypto,
}

impl Market {
    fn is_crypto(self) -> bool {
        matches!(self, Market::Crypto)
    }

    fn is_kr(self) -> bool {
        matches!(self, Market::Kospi | Market::Kosdaq | Market::Kr)
    }
}

/// Caller-supplied screening parameters. All optional fields fall back to
/// strategy-preset or hard-coded defaults during validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenRequest {
    pub asset_type: Option<String>,
    pub category: Option<String>,
    pub strategy: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub min_market_cap: Option<f64>,
    pub max_per: Option<f64>,
    pub max_pbr: Option<f64>,
    pub min_dividend_yield: Option<f64>,
    pub max_rsi: Option<f64>,
    pub limit: u32,
}

/// A request after strategy-preset application and fail-fast validation.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub asset_type: Option<String>,
    pub category: Option<String>,
    pub sort_by: String,
    pub sort_order: String,
    pub min_market_cap: Option<f64>,
    pub max_per: Option<f64>,
    pub max_pbr: Option<f64>,
    pub min_dividend_yield: Option<f64>,
    pub max_rsi: Option<f64>,
    pub limit: usize,
    pub filters_applied: Map<String, Value>,
}

/// §4.H strategy presets: fill `sort_by`/`sort_order`/`max_rsi` defaults
/// before validation runs, without clobbering an explicit caller override.
fn apply_strategy_preset(req: &mut ScreenRequest) {
    match req.strategy.as_deref() {
        Some("oversold") => {
            req.max_rsi.get_or_insert(30.0);
            req.sort_by.get_or_insert_with(|| "volume".to_string());
            req.sort_order.get_or_insert_with(|| "desc".to_string());
        }
        Some("momentum") => {
            req.sort_by.get_or_insert_with(|| "change_rate".to_string());
            req.sort_order.get_or_insert_with(|| "desc".to_string());
        }
        Some("high_volume") => {
            req.sort_by.get_or_insert_with(|| "volume".to_string());
            req.sort_order.get_or_insert_with(|| "desc".to_string());
        }
        _ => {}
    }
}

/// §4.H validation: fail-fast with descriptive errors; returns the resolved,
/// ready-to-run request plus the `filters_applied` diagnostic map.
pub fn validate(market: Market, mut req: ScreenRequest) -> CoreResult<ResolvedRequest> {
    apply_strategy_preset(&mut req);

    if req.limit == 0 {
        return Err(CoreError::validation("limit must be >= 1"));
    }
    let limit = (req.limit as usize).min(50);

    let sort_by = req.sort_by.unwrap_or_else(|| "market_cap".to_string());
    let sort_order = req.sort_order.unwrap_or_else(|| "desc".to_string());

    if market.is_crypto() {
        if req.max_per.is_some() {
            return Err(CoreError::validation("max_per is not applicable to crypto markets"));
        }
        if req.min_dividend_yield.is_some() {
            return Err(CoreError::validation(
                "min_dividend_yield is not applicable to crypto markets",
            ));
        }
        if matches!(sort_by.as_str(), "volume" | "dividend_yield") {
            return Err(CoreError::validation(format!(
                "sort_by={sort_by} is not valid for crypto; use trade_amount or rsi"
            )));
        }
    } else if matches!(sort_by.as_str(), "rsi" | "trade_amount") {
        return Err(CoreError::validation(format!(
            "sort_by={sort_by} is only valid for crypto markets"
        )));
    }

    if market.is_kr() && req.asset_type.as_deref() == Some("etn") {
        return Err(CoreError::validation("KR markets do not support asset_type=etn"));
    }

    let mut filters_applied = Map::new();
    filters_applied.insert("sort_by".into(), Value::String(sort_by.clone()));
    filters_applied.insert("sort_order".into(), Value::String(sort_order.clone()));
    filters_applied.insert("limit".into(), Value::from(limit));
    if let Some(v) = req.min_market_cap {
        filters_applied.insert("min_market_cap".into(), Value::from(v));
    }
    if let Some(v) = req.max_per {
        filters_applied.insert("max_per".into(), Value::from(v));
    }
    if let Some(v) = req.max_pbr {
        filters_applied.insert("max_pbr".into(), Value::from(v));
    }
    if let Some(v) = req.max_rsi {
        filters_applied.insert("max_rsi".into(), Value::from(v));
    }
    if let Some(asset_type) = &req.asset_type {
        filters_applied.insert("asset_type".into(), Value::String(asset_type.clone()));
    }
    if let Some(category) = &req.category {
        filters_applied.insert("category".into(), Value::String(category.clone()));
    }

    // §3 min_dividend_yield: values >= 1 are interpreted as percent.
    let min_dividend_yield = req.min_dividend_yield.map(|input| {
        let normalized = if input >= 1.0 { input / 100.0 } else { input };
        let mut entry = Map::new();
        entry.insert("_input".into(), Value::from(input));
        entry.insert("_normalized".into(), Value::from(normalized));
        filters_applied.insert("min_dividend_yield".into(), Value::Object(entry));
        normalized
    });

    Ok(ResolvedRequest {
        asset_type: req.asset_type,
        category: req.category,
        sort_by,
        sort_order,
        min_market_cap: req.min_market_cap,
        max_per: req.max_per,
        max_pbr: req.max_pbr,
        min_dividend_yield,
        max_rsi: req.max_rsi,
        limit,
        filters_applied,
    })
}

/// A normalised screening candidate shared by all three market pipelines.
/// Market-specific fields that don't apply to a given row are left at their
/// defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Candidate {
    pub code: String,
    pub name: String,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub change_rate: Option<f64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub trade_amount: Option<f64>,
    pub rsi: Option<f64>,
    pub is_kospi200: bool,
    pub etf_categories: Vec<String>,
    pub warning_flag: Option<String>,
}

impl Candidate {
    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            "market_cap" => self.market_cap,
            "volume" => self.volume,
            "change_rate" => self.change_rate,
            "per" => self.per,
            "pbr" => self.pbr,
            "dividend_yield" => self.dividend_yield,
            "rsi" => self.rsi,
            "trade_amount" => self.trade_amount,
            "close" => self.close,
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "code": self.code,
            "name": self.name,
            "close": self.close,
            "volume": self.volume,
            "market_cap": self.market_cap,
            "change_rate": self.change_rate,
            "per": self.per,
            "pbr": self.pbr,
            "dividend_yield": self.dividend_yield,
            "trade_amount": self.trade_amount,
            "rsi": self.rsi,
            "is_kospi200": self.is_kospi200,
            "etf_categories": self.etf_categories,
        })
    }
}

/// Apply every basic filter except `max_rsi` (run separately, after
/// enrichment).
pub fn apply_basic_filters(candidates: Vec<Candidate>, req: &ResolvedRequest) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| req.min_market_cap.map_or(true, |min| c.market_cap.map_or(false, |v| v >= min)))
        .filter(|c| req.max_per.map_or(true, |max| c.per.map_or(true, |v| v <= max)))
        .filter(|c| req.max_pbr.map_or(true, |max| c.pbr.map_or(true, |v| v <= max)))
        .filter(|c| {
            req.min_dividend_yield
                .map_or(true, |min| c.dividend_yield.map_or(false, |v| v >= min))
        })
        .collect()
}

/// Sorted copy by `field`; nulls last regardless of direction.
pub fn sorted_by_field(mut candidates: Vec<Candidate>, field: &str, order: &str) -> Vec<Candidate> {
    candidates.sort_by(|a, b| sort_key_cmp(a.field(field), b.field(field), order));
    candidates
}

fn sort_key_cmp(a: Option<f64>, b: Option<f64>, order: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let cmp = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if order == "desc" {
                cmp.reverse()
            } else {
                cmp
            }
        }
    }
}

/// §4.H bounded-concurrency RSI enrichment: fan out `fetch_closes` over
/// `codes` with `concurrency` in-flight at once, under a single global
/// `timeout`. Codes still outstanding when the deadline passes are folded
/// into the `timeout` counter, not `failed`.
pub async fn enrich_with_rsi<F, Fut>(
    codes: Vec<String>,
    concurrency: usize,
    timeout: Duration,
    fetch_closes: F,
) -> (HashMap<String, Option<f64>>, RsiEnrichmentMeta)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<Vec<f64>>> + Send + 'static,
{
    let fetch_closes = Arc::new(fetch_closes);
    let out: Arc<Mutex<HashMap<String, Option<f64>>>> = Arc::new(Mutex::new(HashMap::new()));
    let meta: Arc<Mutex<RsiEnrichmentMeta>> = Arc::new(Mutex::new(RsiEnrichmentMeta::default()));
    let finished: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let all_codes = codes.clone();
    let out_inner = out.clone();
    let meta_inner = meta.clone();
    let finished_inner = finished.clone();

    let handle = tokio::spawn(async move {
        stream::iter(codes.into_iter().map(|code| {
            let fetch_closes = fetch_closes.clone();
            let out = out_inner.clone();
            let meta = meta_inner.clone();
            let finished = finished_inner.clone();
            async move {
                match fetch_closes(code.clone()).await {
                    Ok(closes) => {
                        let value = crate::indicators::rsi::rsi(&closes);
                        out.lock().insert(code.clone(), value);
                        meta.lock().record(EnrichmentOutcome::Success, None);
                    }
                    Err(CoreError::RateLimitExhausted { .. }) => {
                        meta.lock().record(EnrichmentOutcome::RateLimited, None);
                    }
                    Err(e) => {
                        let detail = e.short_message();
                        meta.lock().record(EnrichmentOutcome::Error, Some(&detail));
                    }
                }
                finished.lock().insert(code);
            }
        }))
        .buffer_unordered(concurrency)
        .for_each(|_| async {})
        .await;
    });

    let _ = tokio::time::timeout(timeout, handle).await;

    let finished_set = finished.lock().clone();
    let mut meta_final = meta.lock().clone();
    for code in &all_codes {
        if !finished_set.contains(code) {
            meta_final.record(EnrichmentOutcome::Timeout, None);
        }
    }

    let out_final = out.lock().clone();
    (out_final, meta_final)
}
