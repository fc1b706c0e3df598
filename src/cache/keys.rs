// =============================================================================
// Cache key builders — exact shapes from the external interface contract
// =============================================================================

/// `krx:stock:all:<market-id>:<yyyymmdd>` where `<market-id> ∈ {STK, KSQ}`.
pub fn krx_stock_all(market_id: &str, yyyymmdd: &str) -> String {
    format!("krx:stock:all:{market_id}:{yyyymmdd}")
}

/// `krx:etf:all:<yyyymmdd>`, with an optional classification code inserted
/// before the date when a classification filter is used.
pub fn krx_etf_all(idx_cls_cd: Option<&str>, yyyymmdd: &str) -> String {
    match idx_cls_cd {
        Some(cls) => format!("krx:etf:all:{cls}:{yyyymmdd}"),
        None => format!("krx:etf:all:{yyyymmdd}"),
    }
}

/// `krx:valuation:<market-id>:<yyyymmdd>` where `<market-id> ∈ {STK, KSQ, ALL}`.
pub fn krx_valuation(market_id: &str, yyyymmdd: &str) -> String {
    format!("krx:valuation:{market_id}:{yyyymmdd}")
}

/// `krx:kospi200:<yyyymmdd>` — KOSPI200 index-constituent membership list.
pub fn krx_kospi200(yyyymmdd: &str) -> String {
    format!("krx:kospi200:{yyyymmdd}")
}

/// Well-known token cache key.
pub const TOKEN_KEY: &str = "kis:access_token";

/// Well-known token refresh mutex key.
pub const TOKEN_LOCK_KEY: &str = "kis:token:lock";

/// Market-cap snapshot key (external ranking source, 10-minute TTL).
pub const MARKET_CAP_SNAPSHOT_KEY: &str = "crypto:market_cap_snapshot";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_key_shape() {
        assert_eq!(krx_stock_all("STK", "20250103"), "krx:stock:all:STK:20250103");
    }

    #[test]
    fn etf_key_without_classification() {
        assert_eq!(krx_etf_all(None, "20250103"), "krx:etf:all:20250103");
    }

    #[test]
    fn etf_key_with_classification() {
        assert_eq!(
            krx_etf_all(Some("300"), "20250103"),
            "krx:etf:all:300:20250103"
        );
    }

    #[test]
    fn valuation_key_shape() {
        assert_eq!(krx_valuation("ALL", "20250103"), "krx:valuation:ALL:20250103");
    }

    #[test]
    fn kospi200_key_shape() {
        assert_eq!(krx_kospi200("20250103"), "krx:kospi200:20250103");
    }
}
