// =============================================================================
// Provider Adapters
// =============================================================================
//
// Each adapter is a thin HTTP client guarded by the rate governor and,
// where applicable, the token manager. All adapters satisfy the same
// capability set so the screening pipeline can hold a market-identifier ->
// adapter mapping without a match on concrete provider types.
// =============================================================================

pub mod broker;
pub mod crypto_exchange;
pub mod krx;
pub mod normalize;
pub mod trading_date;
pub mod us_screener;
pub mod web_scrape;

use serde_json::Value;

use crate::errors::CoreResult;

/// Normalised stock/ETF record shared across providers. Fields mirror the
/// common keys spec.md calls for; providers populate what they have and
/// leave the rest `None`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct NormalizedRecord {
    pub code: String,
    pub name: String,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub change_rate: Option<f64>,
    #[serde(default)]
    pub per: Option<f64>,
    #[serde(default)]
    pub pbr: Option<f64>,
    #[serde(default)]
    pub dividend_yield: Option<f64>,
    #[serde(default)]
    pub is_kospi200: bool,
    #[serde(default)]
    pub etf_categories: Vec<String>,
    #[serde(default)]
    pub warning_flag: Option<String>,
}

/// A capability every provider adapter implements: fetch a resource by
/// opaque parameters, returning a raw JSON envelope; and invalidate any
/// cached credentials on an auth failure.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, resource: &str, params: &Value) -> CoreResult<Value>;

    /// No-op for adapters that need no credentials (crypto exchange, US
    /// screener, bulk portal, web-scraped pages).
    async fn invalidate_credentials(&self) {}
}
