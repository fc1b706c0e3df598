// =============================================================================
// Candle-pattern coefficient
// =============================================================================
//
// A single-bar classifier that maps one OHLC quadruple to a multiplier in
// [0.0, 1.0] used to dampen or amplify the volume score in the composite
// calculation, plus a human-readable pattern label.
//
// Evaluation order matters: bullish must be checked before the hammer
// shadow-ratio test, otherwise a bullish candle with a long lower shadow
// would misclassify as a hammer.
// =============================================================================

use crate::types::{Candle, CandleType};

/// Classify one candle, returning `(coefficient, pattern)`.
pub fn candle_coefficient(candle: &Candle) -> (f64, CandleType) {
    let (o, h, l, c) = (candle.open, candle.high, candle.low, candle.close);
    let total_range = h - l;

    if total_range <= 0.0 {
        return (0.5, CandleType::Flat);
    }

    if c > o {
        return (1.0, CandleType::Bullish);
    }

    let body = (c - o).abs();
    let lower_shadow = o.min(c) - l;

    if lower_shadow > 2.0 * body {
        return (0.8, CandleType::Hammer);
    }

    if body > 0.7 * total_range {
        return (0.0, CandleType::BearishStrong);
    }

    (0.5, CandleType::BearishNormal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            open_time: 0,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1.0,
            close_time: 0,
        }
    }

    #[test]
    fn flat_when_no_range() {
        let (coef, kind) = candle_coefficient(&bar(100.0, 100.0, 100.0, 100.0));
        assert_eq!(coef, 0.5);
        assert_eq!(kind, CandleType::Flat);
    }

    #[test]
    fn bullish_when_close_above_open() {
        let (coef, kind) = candle_coefficient(&bar(100.0, 105.0, 98.0, 102.0));
        assert_eq!(coef, 1.0);
        assert_eq!(kind, CandleType::Bullish);
    }

    #[test]
    fn bullish_wins_over_hammer_shape() {
        // O=100, H=105, L=80, C=101: long lower shadow but still bullish.
        let (coef, kind) = candle_coefficient(&bar(100.0, 105.0, 80.0, 101.0));
        assert_eq!(coef, 1.0);
        assert_eq!(kind, CandleType::Bullish);
    }

    #[test]
    fn hammer_when_bearish_with_long_lower_shadow() {
        // O=100, C=99 (bearish), body=1, lower_shadow = min(100,99)-80 = 19 > 2.
        let (coef, kind) = candle_coefficient(&bar(100.0, 101.0, 80.0, 99.0));
        assert_eq!(coef, 0.8);
        assert_eq!(kind, CandleType::Hammer);
    }

    #[test]
    fn bearish_strong_when_body_dominates_range() {
        // O=100, C=80 (bearish), total_range = 100-79 = 21, body = 20 > 0.7*21.
        let (coef, kind) = candle_coefficient(&bar(100.0, 100.0, 79.0, 80.0));
        assert_eq!(coef, 0.0);
        assert_eq!(kind, CandleType::BearishStrong);
    }

    #[test]
    fn bearish_normal_otherwise() {
        // O=100, C=99, small body, small shadow relative to range.
        let (coef, kind) = candle_coefficient(&bar(100.0, 102.0, 98.0, 99.0));
        assert_eq!(coef, 0.5);
        assert_eq!(kind, CandleType::BearishNormal);
    }
}
