// =============================================================================
// Trading-Date Resolver
// =============================================================================
//
// Produces an ordered list of YYYYMMDD candidates for bulk-data queries:
// an explicit date if given, else the broker's self-reported most-recent
// working date (if reachable) prepended to a weekday-filtered lookback
// window. Bulk endpoints return empty on non-trading days, so the caller
// retries candidates in order until one yields a non-empty response.
// =============================================================================

use chrono::{Datelike, Duration as ChronoDuration, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Seoul;

const DEFAULT_MAX_LOOKBACK: usize = 10;

/// Returns today's date in KST as `YYYYMMDD`, plus each prior calendar day,
/// keeping only Monday-Friday, up to `max_lookback` entries.
fn recent_weekdays(max_lookback: usize) -> Vec<String> {
    let now_kst = Utc::now().with_timezone(&Seoul);
    let mut out = Vec::with_capacity(max_lookback);
    let mut cursor = now_kst.date_naive();

    while out.len() < max_lookback {
        if !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(cursor.format("%Y%m%d").to_string());
        }
        cursor -= ChronoDuration::days(1);
    }
    out
}

/// Fetch the broker's self-reported most-recent working date. Abstracted as
/// a trait so the resolver has no direct HTTP dependency; `providers::broker`
/// supplies the real implementation.
#[async_trait::async_trait]
pub trait MaxWorkingDateSource: Send + Sync {
    async fn fetch_max_working_date(&self) -> Option<String>;
}

pub struct TradingDateResolver {
    max_lookback: usize,
}

impl TradingDateResolver {
    pub fn new() -> Self {
        Self {
            max_lookback: DEFAULT_MAX_LOOKBACK,
        }
    }

    pub fn with_max_lookback(max_lookback: usize) -> Self {
        Self { max_lookback }
    }

    /// Resolve candidate dates. `source` is consulted only when
    /// `explicit_date` is absent.
    pub async fn candidates(
        &self,
        explicit_date: Option<&str>,
        source: Option<&dyn MaxWorkingDateSource>,
    ) -> Vec<String> {
        if let Some(date) = explicit_date {
            return vec![date.to_string()];
        }

        let mut weekdays = recent_weekdays(self.max_lookback);

        if let Some(source) = source {
            if let Some(max_date) = source.fetch_max_working_date().await {
                weekdays.retain(|d| d != &max_date);
                weekdays.insert(0, max_date);
            }
        }

        weekdays.truncate(self.max_lookback);
        weekdays
    }
}

impl Default for TradingDateResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `true` if `yyyymmdd` falls on a Saturday or Sunday in the
/// proleptic Gregorian calendar (used by tests and by callers validating
/// externally supplied dates).
pub fn is_weekend(yyyymmdd: &str) -> Option<bool> {
    let year: i32 = yyyymmdd.get(0..4)?.parse().ok()?;
    let month: u32 = yyyymmdd.get(4..6)?.parse().ok()?;
    let day: u32 = yyyymmdd.get(6..8)?.parse().ok()?;
    let date = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()?;
    Some(matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Option<String>);

    #[async_trait::async_trait]
    impl MaxWorkingDateSource for FixedSource {
        async fn fetch_max_working_date(&self) -> Option<String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn explicit_date_is_singleton() {
        let resolver = TradingDateResolver::new();
        let candidates = resolver.candidates(Some("20250101"), None).await;
        assert_eq!(candidates, vec!["20250101".to_string()]);
    }

    #[tokio::test]
    async fn no_source_falls_back_to_recent_weekdays_only() {
        let resolver = TradingDateResolver::new();
        let candidates = resolver.candidates(None, None).await;
        assert!(!candidates.is_empty());
        for date in &candidates {
            assert_eq!(is_weekend(date), Some(false));
        }
    }

    #[tokio::test]
    async fn broker_date_is_prepended_and_deduplicated() {
        let resolver = TradingDateResolver::new();
        let source = FixedSource(Some("20250103".to_string()));
        let candidates = resolver.candidates(None, Some(&source)).await;
        assert_eq!(candidates[0], "20250103");
        assert_eq!(candidates.iter().filter(|d| *d == "20250103").count(), 1);
    }

    #[tokio::test]
    async fn broker_source_unavailable_uses_weekdays_alone() {
        let resolver = TradingDateResolver::new();
        let source = FixedSource(None);
        let with_source = resolver.candidates(None, Some(&source)).await;
        let without_source = resolver.candidates(None, None).await;
        assert_eq!(with_source, without_source);
    }

    #[tokio::test]
    async fn never_includes_weekend_dates() {
        let resolver = TradingDateResolver::with_max_lookback(10);
        let candidates = resolver.candidates(None, None).await;
        for date in candidates {
            assert_eq!(is_weekend(&date), Some(false), "weekend date leaked: {date}");
        }
    }

    #[tokio::test]
    async fn respects_max_lookback_cap() {
        let resolver = TradingDateResolver::with_max_lookback(3);
        let candidates = resolver.candidates(None, None).await;
        assert!(candidates.len() <= 3);
    }
}
