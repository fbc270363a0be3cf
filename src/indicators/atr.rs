use super::{backfill, rolling_mean};

/// True range per candle; the first candle has no previous close and uses `high - low`
pub fn true_range_series(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    (0..closes.len())
        .map(|i| {
            let hl = highs[i] - lows[i];
            if i == 0 {
                return hl;
            }
            let prev_close = closes[i - 1];
            let hc = (highs[i] - prev_close).abs();
            let lc = (lows[i] - prev_close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Rolling-mean ATR, back-filled over the warm-up rows
pub fn atr_series(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr: Vec<Option<f64>> = true_range_series(highs, lows, closes)
        .into_iter()
        .map(|v| if v.is_finite() { Some(v) } else { None })
        .collect();
    backfill(&rolling_mean(&tr, period))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_true_range_uses_high_low() {
        let tr = true_range_series(&[12.0, 15.0], &[10.0, 13.0], &[11.0, 14.0]);
        assert_eq!(tr[0], 2.0);
        // gap up: |15 - 11| = 4 beats high-low 2
        assert_eq!(tr[1], 4.0);
    }

    #[test]
    fn test_atr_backfilled_warmup() {
        let highs: Vec<f64> = (0..20).map(|i| 11.0 + i as f64).collect();
        let lows: Vec<f64> = (0..20).map(|i| 9.0 + i as f64).collect();
        let closes: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        let atr = atr_series(&highs, &lows, &closes, 14);
        assert!(atr.iter().all(|v| v.is_some()));
        assert_eq!(atr[0], atr[13]);
        assert!((atr[19].unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_atr_short_series_undefined() {
        let atr = atr_series(&[2.0; 5], &[1.0; 5], &[1.5; 5], 14);
        assert!(atr.iter().all(|v| v.is_none()));
    }
}
