// =============================================================================
// Recommender — turns screener output + current holdings into sized picks
// =============================================================================
//
// Plain struct-with-associated-fns, mirroring the screening pipeline's shape
// one level up: filter by strategy, exclude held symbols, size equally
// against budget, stop at max_positions. Crypto ranking additionally scores
// each candidate with the indicator kernel's composite score, which needs one
// OHLCV fetch per candidate — capped at MAX_OHLCV_CALLS to protect upstream
// quotas.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::CoreResult;
use crate::indicators::candle::candle_coefficient;
use crate::indicators::composite::{composite_score, trend_score, volume_score};
use crate::providers::crypto_exchange::CryptoExchangeClient;
use crate::screening::Candidate;

/// Upper bound on OHLCV fetches performed per `recommend` call.
pub const MAX_OHLCV_CALLS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Balanced,
    Growth,
    Value,
    Income,
}

impl std::str::FromStr for Strategy {
    type Err = crate::errors::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Self::Balanced),
            "growth" => Ok(Self::Growth),
            "value" => Ok(Self::Value),
            "income" => Ok(Self::Income),
            other => Err(crate::errors::CoreError::validation(format!("unknown strategy '{other}'"))),
        }
    }
}

/// Applies the strategy's inclusion test. `balanced` keeps everything and
/// defers to the existing screener ordering.
fn matches_strategy(strategy: Strategy, candidate: &Candidate) -> bool {
    match strategy {
        Strategy::Balanced => true,
        Strategy::Growth => candidate.change_rate.map_or(false, |v| v > 0.0),
        Strategy::Value => {
            candidate.per.map_or(true, |v| v > 0.0 && v < 15.0)
                && candidate.pbr.map_or(true, |v| v > 0.0 && v < 1.5)
        }
        Strategy::Income => candidate.dividend_yield.map_or(false, |v| v > 0.0),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub code: String,
    pub name: String,
    pub allocated_budget: f64,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendResult {
    pub market: String,
    pub strategy: String,
    pub budget: f64,
    pub allocated_budget: f64,
    pub recommendations: Vec<Recommendation>,
    pub timestamp: String,
}

pub struct Recommender {
    exchange: Arc<CryptoExchangeClient>,
}

impl Recommender {
    pub fn new(exchange: Arc<CryptoExchangeClient>) -> Self {
        Self { exchange }
    }

    /// Best-effort composite score for a single crypto candidate. A fetch
    /// failure drops the candidate to the back of the ranking rather than
    /// failing the whole recommendation.
    async fn crypto_score(&self, candidate: &Candidate) -> Option<f64> {
        let candle = self.exchange.fetch_latest_candle(&candidate.code).await.ok()?;
        let (candle_coef, _) = candle_coefficient(&candle);
        let vol_score = volume_score(candidate.volume, Some(candle.volume));
        let trend = trend_score(None, None, None);
        Some(composite_score(candidate.rsi, vol_score, candle_coef, trend))
    }

    pub async fn recommend(
        &self,
        market: &str,
        strategy: &str,
        budget: f64,
        max_positions: usize,
        exclude_held: bool,
        held_symbols: &[String],
        universe: Vec<Candidate>,
    ) -> CoreResult<RecommendResult> {
        let strategy: Strategy = strategy.parse()?;
        if budget <= 0.0 {
            return Err(crate::errors::CoreError::validation("budget must be positive"));
        }
        if max_positions == 0 {
            return Err(crate::errors::CoreError::validation("max_positions must be >= 1"));
        }

        let mut candidates: Vec<Candidate> = universe
            .into_iter()
            .filter(|c| matches_strategy(strategy, c))
            .filter(|c| !exclude_held || !held_symbols.iter().any(|h| h == &c.code))
            .collect();

        if market == "crypto" {
            let to_score: Vec<Candidate> = candidates.drain(..).collect();
            let mut scored: Vec<(Candidate, Option<f64>)> = Vec::with_capacity(to_score.len());
            for (idx, candidate) in to_score.into_iter().enumerate() {
                let score = if idx < MAX_OHLCV_CALLS {
                    self.crypto_score(&candidate).await
                } else {
                    None
                };
                scored.push((candidate, score));
            }
            scored.sort_by(|a, b| b.1.unwrap_or(0.0).partial_cmp(&a.1.unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal));

            let picked: Vec<(Candidate, Option<f64>)> = scored.into_iter().take(max_positions).collect();
            let per_position = budget / picked.len().max(1) as f64;
            let recommendations: Vec<Recommendation> = picked
                .into_iter()
                .map(|(c, score)| Recommendation {
                    code: c.code,
                    name: c.name,
                    allocated_budget: per_position,
                    score,
                })
                .collect();

            let allocated_budget = recommendations.iter().map(|r| r.allocated_budget).sum();
            return Ok(RecommendResult {
                market: market.to_string(),
                strategy: format!("{strategy:?}").to_lowercase(),
                budget,
                allocated_budget,
                recommendations,
                timestamp: Utc::now().to_rfc3339(),
            });
        }

        let picked: Vec<Candidate> = candidates.into_iter().take(max_positions).collect();
        let per_position = budget / picked.len().max(1) as f64;
        let recommendations: Vec<Recommendation> = picked
            .iter()
            .map(|c| Recommendation {
                code: c.code.clone(),
                name: c.name.clone(),
                allocated_budget: per_position,
                score: None,
            })
            .collect();
        let allocated_budget = recommendations.iter().map(|r| r.allocated_budget).sum();

        Ok(RecommendResult {
            market: market.to_string(),
            strategy: format!("{strategy:?}").to_lowercase(),
            budget,
            allocated_budget,
            recommendations,
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(code: &str, change_rate: Option<f64>, per: Option<f64>, pbr: Option<f64>, dy: Option<f64>) -> Candidate {
        Candidate {
            code: code.to_string(),
            name: code.to_string(),
            close: Some(1.0),
            volume: Some(100.0),
            market_cap: Some(1.0e9),
            change_rate,
            per,
            pbr,
            dividend_yield: dy,
            trade_amount: None,
            rsi: Some(40.0),
            is_kospi200: false,
            etf_categories: Vec::new(),
            warning_flag: None,
        }
    }

    #[test]
    fn growth_strategy_requires_positive_change_rate() {
        assert!(matches_strategy(Strategy::Growth, &candidate("A", Some(1.0), None, None, None)));
        assert!(!matches_strategy(Strategy::Growth, &candidate("B", Some(-1.0), None, None, None)));
        assert!(!matches_strategy(Strategy::Growth, &candidate("C", None, None, None, None)));
    }

    #[test]
    fn value_strategy_requires_low_per_and_pbr() {
        assert!(matches_strategy(Strategy::Value, &candidate("A", None, Some(10.0), Some(1.0), None)));
        assert!(!matches_strategy(Strategy::Value, &candidate("B", None, Some(20.0), Some(1.0), None)));
    }

    #[test]
    fn income_strategy_requires_dividend() {
        assert!(matches_strategy(Strategy::Income, &candidate("A", None, None, None, Some(0.02))));
        assert!(!matches_strategy(Strategy::Income, &candidate("B", None, None, None, None)));
    }

    #[test]
    fn balanced_strategy_accepts_everything() {
        assert!(matches_strategy(Strategy::Balanced, &candidate("A", None, None, None, None)));
    }

    #[tokio::test]
    async fn unknown_strategy_is_rejected() {
        let recommender = Recommender::new(Arc::new(CryptoExchangeClient::new(Arc::new(
            crate::rate_limiter::registry::LimiterRegistry::new(),
        ))));
        let result = recommender
            .recommend("kr", "unknown", 1000.0, 3, false, &[], vec![candidate("A", None, None, None, None)])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn budget_is_split_equally_across_picks() {
        let recommender = Recommender::new(Arc::new(CryptoExchangeClient::new(Arc::new(
            crate::rate_limiter::registry::LimiterRegistry::new(),
        ))));
        let universe = vec![
            candidate("A", None, None, None, None),
            candidate("B", None, None, None, None),
        ];
        let result = recommender.recommend("kr", "balanced", 1000.0, 2, false, &[], universe).await.unwrap();
        assert_eq!(result.recommendations.len(), 2);
        assert_eq!(result.recommendations[0].allocated_budget, 500.0);
    }

    #[tokio::test]
    async fn excludes_held_symbols_when_requested() {
        let recommender = Recommender::new(Arc::new(CryptoExchangeClient::new(Arc::new(
            crate::rate_limiter::registry::LimiterRegistry::new(),
        ))));
        let universe = vec![
            candidate("A", None, None, None, None),
            candidate("B", None, None, None, None),
        ];
        let result = recommender
            .recommend("kr", "balanced", 1000.0, 5, true, &["A".to_string()], universe)
            .await
            .unwrap();
        assert_eq!(result.recommendations.len(), 1);
        assert_eq!(result.recommendations[0].code, "B");
    }

    #[tokio::test]
    async fn stops_at_max_positions() {
        let recommender = Recommender::new(Arc::new(CryptoExchangeClient::new(Arc::new(
            crate::rate_limiter::registry::LimiterRegistry::new(),
        ))));
        let universe: Vec<Candidate> = (0..10).map(|i| candidate(&format!("S{i}"), None, None, None, None)).collect();
        let result = recommender.recommend("kr", "balanced", 1000.0, 3, false, &[], universe).await.unwrap();
        assert_eq!(result.recommendations.len(), 3);
    }
}
