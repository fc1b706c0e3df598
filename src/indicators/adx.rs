// =============================================================================
// Average Directional Index
// =============================================================================
//
// ADX measures trend strength independent of direction, built from a stack
// of Wilder-smoothed series derived from each bar's directional movement and
// true range:
//
//   +DM / -DM  — how much of today's high/low excursion was directional
//   TR         — the bar's true range (handles gaps across the prior close)
//   +DI / -DI  — +DM / -DM expressed as a percentage of smoothed TR
//   DX         — how lopsided +DI and -DI are, as a percentage
//   ADX        — a further Wilder smoothing of DX itself
//
// Above ~25, ADX is read as "trending"; below ~20, "ranging".
// =============================================================================

use crate::types::Candle;

/// One bar's raw directional-movement inputs, derived from it and its
/// predecessor.
struct BarMovement {
    true_range: f64,
    plus_dm: f64,
    minus_dm: f64,
}

fn bar_movement(prev: &Candle, cur: &Candle) -> BarMovement {
    let true_range = (cur.high - cur.low)
        .max((cur.high - prev.close).abs())
        .max((cur.low - prev.close).abs());

    let rise = cur.high - prev.high;
    let fall = prev.low - cur.low;

    let plus_dm = if rise > fall && rise > 0.0 { rise } else { 0.0 };
    let minus_dm = if fall > rise && fall > 0.0 { fall } else { 0.0 };

    BarMovement {
        true_range,
        plus_dm,
        minus_dm,
    }
}

/// Apply one step of Wilder's running-total smoothing: `total - total/n + x`.
/// Equivalent to the average form but avoids re-dividing on every step.
fn wilder_carry(running_total: f64, next_value: f64, period: f64) -> f64 {
    running_total - running_total / period + next_value
}

fn directional_index(plus_dm_total: f64, minus_dm_total: f64, tr_total: f64) -> Option<f64> {
    if tr_total == 0.0 {
        return None;
    }
    let plus_di = plus_dm_total / tr_total * 100.0;
    let minus_di = minus_dm_total / tr_total * 100.0;
    let di_total = plus_di + minus_di;
    let dx = if di_total == 0.0 {
        0.0
    } else {
        (plus_di - minus_di).abs() / di_total * 100.0
    };
    dx.is_finite().then_some(dx)
}

/// Most recent ADX value over `period` bars, or `None` if there isn't enough
/// history (need `2 * period + 1` candles: `period` to seed the +DM/-DM/TR
/// smoothing, then `period` more DX readings to seed the ADX average) or an
/// intermediate value is non-finite.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<f64> {
    calculate_adx_di(candles, period).map(|(adx, _, _)| adx)
}

/// Latest `(adx, plus_di, minus_di)` triple over `period` bars, computed
/// from the same Wilder-smoothing pipeline as [`calculate_adx`] but also
/// surfacing the final smoothed +DI/-DI pair.
pub fn calculate_adx_di(candles: &[Candle], period: usize) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }
    let period_f = period as f64;

    let movements: Vec<BarMovement> = candles
        .windows(2)
        .map(|pair| bar_movement(&pair[0], &pair[1]))
        .collect();

    let mut plus_dm_total: f64 = movements[..period].iter().map(|m| m.plus_dm).sum();
    let mut minus_dm_total: f64 = movements[..period].iter().map(|m| m.minus_dm).sum();
    let mut tr_total: f64 = movements[..period].iter().map(|m| m.true_range).sum();

    let mut dx_series = vec![directional_index(plus_dm_total, minus_dm_total, tr_total)?];
    for m in &movements[period..] {
        plus_dm_total = wilder_carry(plus_dm_total, m.plus_dm, period_f);
        minus_dm_total = wilder_carry(minus_dm_total, m.minus_dm, period_f);
        tr_total = wilder_carry(tr_total, m.true_range, period_f);
        dx_series.push(directional_index(plus_dm_total, minus_dm_total, tr_total)?);
    }

    if dx_series.len() < period {
        return None;
    }

    let seed_adx: f64 = dx_series[..period].iter().sum::<f64>() / period_f;
    if !seed_adx.is_finite() {
        return None;
    }
    let mut adx = seed_adx;
    for &dx in &dx_series[period..] {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
        if !adx.is_finite() {
            return None;
        }
    }

    if tr_total == 0.0 {
        return None;
    }
    let plus_di = plus_dm_total / tr_total * 100.0;
    let minus_di = minus_dm_total / tr_total * 100.0;
    if !plus_di.is_finite() || !minus_di.is_finite() {
        return None;
    }

    Some((adx, plus_di, minus_di))
}
