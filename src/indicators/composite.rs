// =============================================================================
// Composite score — volume, trend, and RSI sub-scores folded into one number
// =============================================================================

/// §4.G "Volume score": `min(100, 33.3 * today / avg_20d)`. Either input
/// missing or the average being non-positive yields 0.
pub fn volume_score(today_volume: Option<f64>, avg_20d_volume: Option<f64>) -> f64 {
    match (today_volume, avg_20d_volume) {
        (Some(today), Some(avg)) if avg > 0.0 => (33.3 * today / avg).min(100.0),
        _ => 0.0,
    }
}

/// §4.G "Trend score": directional win takes priority over ADX buckets.
pub fn trend_score(adx: Option<f64>, plus_di: Option<f64>, minus_di: Option<f64>) -> f64 {
    if let (Some(plus), Some(minus)) = (plus_di, minus_di) {
        if plus > minus {
            return 90.0;
        }
    }
    match adx {
        None => 30.0,
        Some(adx) if adx < 35.0 => 60.0,
        Some(adx) if adx <= 50.0 => 30.0,
        Some(_) => 10.0,
    }
}

/// §4.G "RSI score": `100 - rsi`, defaulting to neutral 50 when RSI is null.
pub fn rsi_score(rsi: Option<f64>) -> f64 {
    100.0 - rsi.unwrap_or(50.0)
}

/// §4.G "Composite": weighted blend of the three sub-scores, clamped to
/// `[0, 100]` and rounded to two decimal places.
pub fn composite_score(rsi: Option<f64>, vol_score: f64, candle_coef: f64, trend: f64) -> f64 {
    let raw = 0.4 * rsi_score(rsi) + 0.3 * vol_score * candle_coef + 0.3 * trend;
    let clamped = raw.clamp(0.0, 100.0);
    (clamped * 100.0).round() / 100.0
}
