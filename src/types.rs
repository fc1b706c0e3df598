// =============================================================================
// Shared data-model types for the market-data core
// =============================================================================
//
// `Candle` is the common OHLCV shape consumed by the indicator kernel.
// `IndicatorResult` and `ScreenResult` mirror the screening pipeline's public
// output contract; both derive `Serialize` so they cross the REST boundary
// unchanged.
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLCV bar. `open_time`/`close_time` are opaque millisecond
/// timestamps; the indicator kernel never interprets them, only orders by
/// slice position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

/// Candle-pattern classification attached to `IndicatorResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleType {
    Bullish,
    Hammer,
    BearishStrong,
    BearishNormal,
    Flat,
}

impl std::fmt::Display for CandleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bullish => "bullish",
            Self::Hammer => "hammer",
            Self::BearishStrong => "bearish_strong",
            Self::BearishNormal => "bearish_normal",
            Self::Flat => "flat",
        };
        write!(f, "{s}")
    }
}

/// Per-symbol indicator bundle produced by the indicator kernel and attached
/// to every screening result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plus_di: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minus_di: Option<f64>,
    pub candle_coef: f64,
    pub candle_type: CandleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ratio: Option<f64>,
    pub score: f64,
}

/// Per-symbol classification of an enrichment attempt, folded into
/// `RsiEnrichmentMeta` counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Success,
    Error,
    RateLimited,
    Timeout,
}

/// Diagnostics for the bounded-concurrency RSI enrichment pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RsiEnrichmentMeta {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub timeout: usize,
    pub error_samples: Vec<String>,
}

impl RsiEnrichmentMeta {
    /// Record an outcome, deduplicating `error_samples` and keeping at most
    /// three, each truncated to 100 characters.
    pub fn record(&mut self, outcome: EnrichmentOutcome, detail: Option<&str>) {
        self.attempted += 1;
        match outcome {
            EnrichmentOutcome::Success => self.succeeded += 1,
            EnrichmentOutcome::Error => self.failed += 1,
            EnrichmentOutcome::RateLimited => self.rate_limited += 1,
            EnrichmentOutcome::Timeout => self.timeout += 1,
        }
        if let Some(detail) = detail {
            if self.error_samples.len() < 3 && !self.error_samples.iter().any(|s| s == detail) {
                let truncated: String = detail.chars().take(100).collect();
                self.error_samples.push(truncated);
            }
        }
    }
}

/// Screener-wide diagnostics, extended per market by the caller (crypto adds
/// `total_markets`, `top_by_volume`, etc. via the `extra` bag).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenMeta {
    pub rsi_enrichment: RsiEnrichmentMeta,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Normalised screener output: what every `screen_*` entry point returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenResult {
    pub results: Vec<serde_json::Value>,
    pub total_count: usize,
    pub returned_count: usize,
    pub filters_applied: serde_json::Map<String, serde_json::Value>,
    pub market: String,
    pub meta: ScreenMeta,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
