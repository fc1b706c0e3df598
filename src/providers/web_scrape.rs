// =============================================================================
// Web-scrape Adapter — news, profile, financials, investor trends, opinions,
// short interest, sector peers
// =============================================================================
//
// A single adapter covering several loosely-related read-only pages on a
// retail finance portal. Each resource kind has its own response shape
// upstream; this adapter's job is to present a uniform contract back to
// callers: typed params in, a normalised record out. No authentication.
// Every call is rate-limited per (provider="web_scrape", resource).
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::errors::{CoreError, CoreResult};
use crate::rate_limiter::registry::LimiterRegistry;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct CompanyProfile {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct FinancialsSnapshot {
    pub code: String,
    #[serde(default)]
    pub revenue: Option<f64>,
    #[serde(default)]
    pub operating_profit: Option<f64>,
    #[serde(default)]
    pub net_profit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct InvestorTrend {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub foreign_net: Option<f64>,
    #[serde(default)]
    pub institution_net: Option<f64>,
    #[serde(default)]
    pub individual_net: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct AnalystOpinion {
    #[serde(default)]
    pub firm: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub target_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ShortInterest {
    pub code: String,
    #[serde(default)]
    pub short_volume: Option<f64>,
    #[serde(default)]
    pub short_ratio: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct SectorPeer {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub struct WebScrapeClient {
    client: reqwest::Client,
    base_url: String,
    limiters: Arc<LimiterRegistry>,
}

impl WebScrapeClient {
    pub fn new(limiters: Arc<LimiterRegistry>) -> Self {
        Self::with_base_url("https://finance.example.com".to_string(), limiters)
    }

    pub fn with_base_url(base_url: String, limiters: Arc<LimiterRegistry>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            base_url,
            limiters,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        resource: &str,
        path: &str,
        params: &[(&str, &str)],
    ) -> CoreResult<T> {
        let limiter = self.limiters.get_limiter("web_scrape", resource, None, None);
        limiter.acquire_silent().await;

        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                provider: "web_scrape".to_string(),
                detail: e.to_string(),
            })?;

        resp.json::<T>().await.map_err(|e| CoreError::SchemaMismatch {
            resource: resource.to_string(),
            detail: e.to_string(),
        })
    }

    #[instrument(skip(self), name = "web_scrape::news")]
    pub async fn fetch_news(&self, code: &str) -> CoreResult<Vec<NewsItem>> {
        self.get("news", "/news", &[("code", code)]).await
    }

    #[instrument(skip(self), name = "web_scrape::profile")]
    pub async fn fetch_profile(&self, code: &str) -> CoreResult<CompanyProfile> {
        self.get("profile", "/profile", &[("code", code)]).await
    }

    #[instrument(skip(self), name = "web_scrape::financials")]
    pub async fn fetch_financials(&self, code: &str) -> CoreResult<FinancialsSnapshot> {
        self.get("financials", "/financials", &[("code", code)]).await
    }

    #[instrument(skip(self), name = "web_scrape::investor_trends")]
    pub async fn fetch_investor_trends(&self, code: &str) -> CoreResult<Vec<InvestorTrend>> {
        self.get("investor_trends", "/investor-trends", &[("code", code)]).await
    }

    #[instrument(skip(self), name = "web_scrape::opinions")]
    pub async fn fetch_opinions(&self, code: &str) -> CoreResult<Vec<AnalystOpinion>> {
        self.get("opinions", "/opinions", &[("code", code)]).await
    }

    #[instrument(skip(self), name = "web_scrape::short_interest")]
    pub async fn fetch_short_interest(&self, code: &str) -> CoreResult<ShortInterest> {
        self.get("short_interest", "/short-interest", &[("code", code)]).await
    }

    #[instrument(skip(self), name = "web_scrape::sector_peers")]
    pub async fn fetch_sector_peers(&self, code: &str) -> CoreResult<Vec<SectorPeer>> {
        self.get("sector_peers", "/sector-peers", &[("code", code)]).await
    }
}
