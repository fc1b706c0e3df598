// =============================================================================
// Relative Strength Index
// =============================================================================
//
// RSI turns a run of closing prices into an oscillator in [0, 100] by
// tracking the running ratio of average gains to average losses (Wilder's
// smoothing), then mapping that ratio onto the 0-100 scale. Readings above
// 70 are conventionally "overbought", below 30 "oversold".
// =============================================================================

/// Tracks the Wilder-smoothed average gain/loss as closes stream in one at a
/// time. `period` controls how heavily the running average weighs new deltas
/// against history (`1/period` per step, once seeded).
struct WilderAverages {
    period: f64,
    avg_gain: f64,
    avg_loss: f64,
}

impl WilderAverages {
    fn seed(period: usize, gains: f64, losses: f64) -> Self {
        let period_f = period as f64;
        Self {
            period: period_f,
            avg_gain: gains / period_f,
            avg_loss: losses / period_f,
        }
    }

    /// Fold in the next price delta and return the RSI implied by the
    /// updated averages, or `None` if the result isn't a finite number.
    fn step(&mut self, delta: f64) -> Option<f64> {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        self.avg_gain = (self.avg_gain * (self.period - 1.0) + gain) / self.period;
        self.avg_loss = (self.avg_loss * (self.period - 1.0) + loss) / self.period;
        self.rsi()
    }

    fn rsi(&self) -> Option<f64> {
        let value = match (self.avg_gain, self.avg_loss) {
            (0.0, 0.0) => 50.0,
            (_, 0.0) => 100.0,
            (gain, loss) => 100.0 - 100.0 / (1.0 + gain / loss),
        };
        value.is_finite().then_some(value)
    }
}

/// Compute the full Wilder-smoothed RSI series for `closes` at the given
/// `period`. The first entry of the result corresponds to the `period`-th
/// price delta (the initial `period` deltas are spent seeding the averages),
/// so the output is shorter than `closes` by `period`.
///
/// Returns an empty vector if there isn't enough history (`closes.len()`
/// must exceed `period`) or if `period` is zero.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let mut deltas = closes.windows(2).map(|pair| pair[1] - pair[0]);
    let (seed_gain, seed_loss) = deltas
        .by_ref()
        .take(period)
        .fold((0.0, 0.0), |(gain, loss), d| {
            (gain + d.max(0.0), loss + (-d).max(0.0))
        });

    let mut averages = WilderAverages::seed(period, seed_gain, seed_loss);
    let Some(first) = averages.rsi() else {
        return Vec::new();
    };

    let mut series = vec![first];
    for delta in deltas {
        match averages.step(delta) {
            Some(value) => series.push(value),
            None => break,
        }
    }
    series
}

/// The latest 14-period RSI reading for a close series, or `None` when there
/// isn't enough history (14-period RSI needs at least 15 closes).
pub fn rsi(closes: &[f64]) -> Option<f64> {
    calculate_rsi(closes, 14).last().copied()
}

/// Latest RSI reading paired with its zone label (`"OVERBOUGHT"` above 70,
/// `"OVERSOLD"` at or below 30, `"NEUTRAL"` otherwise).
pub fn current_rsi(closes: &[f64], period: usize) -> Option<(f64, &'static str)> {
    let value = *calculate_rsi(closes, period).last()?;
    let label = if value >= 70.0 {
        "OVERBOUGHT"
    } else if value <= 30.0 {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    };
    Some((value, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: i64, ascending: bool) -> Vec<f64> {
        let range: Vec<i64> = (1..=n).collect();
        if ascending {
            range.into_iter().map(|x| x as f64).collect()
        } else {
            range.into_iter().rev().map(|x| x as f64).collect()
        }
    }

    #[test]
    fn empty_series_yields_no_rsi() {
        assert!(calculate_rsi(&[], 14).is_empty());
    }

    #[test]
    fn zero_period_yields_no_rsi() {
        assert!(calculate_rsi(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn exactly_period_closes_is_still_insufficient() {
        // period deltas require period + 1 closes.
        assert!(calculate_rsi(&ramp(14, true), 14).is_empty());
    }

    #[test]
    fn strictly_rising_closes_saturate_at_100() {
        let series = calculate_rsi(&ramp(30, true), 14);
        assert!(!series.is_empty());
        assert!(series.iter().all(|&v| (v - 100.0).abs() < 1e-9));
    }

    #[test]
    fn strictly_falling_closes_bottom_out_at_0() {
        let series = calculate_rsi(&ramp(30, false), 14);
        assert!(!series.is_empty());
        assert!(series.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn flat_closes_are_neutral_at_50() {
        let series = calculate_rsi(&vec![100.0; 30], 14);
        assert!(!series.is_empty());
        assert!(series.iter().all(|&v| (v - 50.0).abs() < 1e-9));
    }

    #[test]
    fn rsi_stays_within_bounds_on_mixed_data() {
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let series = calculate_rsi(&closes, 14);
        assert!(series.iter().all(|&v| (0.0..=100.0).contains(&v)));
    }

    #[test]
    fn current_rsi_labels_overbought() {
        let (value, label) = current_rsi(&ramp(30, true), 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
        assert_eq!(label, "OVERBOUGHT");
    }

    #[test]
    fn current_rsi_labels_oversold() {
        let (value, label) = current_rsi(&ramp(30, false), 14).unwrap();
        assert!(value.abs() < 1e-9);
        assert_eq!(label, "OVERSOLD");
    }

    #[test]
    fn current_rsi_labels_neutral() {
        let (value, label) = current_rsi(&vec![100.0; 30], 14).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
        assert_eq!(label, "NEUTRAL");
    }

    #[test]
    fn current_rsi_none_on_insufficient_history() {
        assert!(current_rsi(&[], 14).is_none());
    }

    #[test]
    fn front_door_matches_fourteen_period_current_rsi() {
        let closes = ramp(30, true);
        assert_eq!(rsi(&closes), current_rsi(&closes, 14).map(|(v, _)| v));
    }

    #[test]
    fn front_door_none_on_short_series() {
        assert!(rsi(&[1.0, 2.0, 3.0]).is_none());
    }
}
