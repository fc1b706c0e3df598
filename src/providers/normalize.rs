// =============================================================================
// Bit-exact normalisation rules shared by the bulk data fetchers
// =============================================================================

/// Parse a provider-formatted number: strips thousands separators, treats
/// `"-"` or an empty string as null.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    trimmed.replace(',', "").parse::<f64>().ok()
}

/// Market cap arrives from the provider in KRW; divide by 1e8 to get "억 KRW".
pub fn market_cap_to_eok(krw: Option<f64>) -> Option<f64> {
    krw.map(|v| v / 1e8)
}

/// The provider returns an unsigned magnitude plus a direction code
/// (1=up, 2=down, 3=flat). Negate the magnitude when the direction is "2".
/// A missing direction code means "no sign flip" (open question, resolved
/// in DESIGN.md).
pub fn signed_change_rate(magnitude: Option<f64>, direction_code: Option<&str>) -> Option<f64> {
    let magnitude = magnitude?;
    match direction_code {
        Some("2") => Some(-magnitude),
        _ => Some(magnitude),
    }
}

/// Dividend yield arrives as a percentage (e.g. `2.56`); store as a decimal
/// fraction (`0.0256`).
pub fn dividend_yield_to_decimal(percent: Option<f64>) -> Option<f64> {
    percent.map(|v| v / 100.0)
}

/// PER/PBR: the provider's `0` or missing value does not mean "free" — both
/// map to null.
pub fn per_pbr(raw: Option<f64>) -> Option<f64> {
    raw.filter(|&v| v != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_strips_commas() {
        assert_eq!(parse_number("1,234"), Some(1234.0));
    }

    #[test]
    fn parse_number_dash_is_null() {
        assert_eq!(parse_number("-"), None);
    }

    #[test]
    fn parse_number_empty_is_null() {
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn parse_number_decimal() {
        assert_eq!(parse_number("12.5"), Some(12.5));
    }

    #[test]
    fn market_cap_division() {
        assert_eq!(market_cap_to_eok(Some(480_000_000_000_000.0)), Some(4_800_000.0));
    }

    #[test]
    fn signed_change_rate_negates_on_down_code() {
        assert_eq!(signed_change_rate(Some(1.5), Some("2")), Some(-1.5));
    }

    #[test]
    fn signed_change_rate_keeps_sign_on_up_code() {
        assert_eq!(signed_change_rate(Some(1.5), Some("1")), Some(1.5));
    }

    #[test]
    fn signed_change_rate_missing_code_means_no_flip() {
        assert_eq!(signed_change_rate(Some(1.5), None), Some(1.5));
    }

    #[test]
    fn dividend_yield_percent_to_decimal() {
        assert_eq!(dividend_yield_to_decimal(Some(2.56)), Some(0.0256));
    }

    #[test]
    fn per_pbr_zero_is_null() {
        assert_eq!(per_pbr(Some(0.0)), None);
    }

    #[test]
    fn per_pbr_missing_is_null() {
        assert_eq!(per_pbr(None), None);
    }

    #[test]
    fn per_pbr_nonzero_passes_through() {
        assert_eq!(per_pbr(Some(12.3)), Some(12.3));
    }
}
