use super::ema::ema_series;

#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub diff: Vec<f64>,
}

/// MACD line, signal line and histogram for every input row
pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);

    let macd: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema_series(&macd, signal);
    let diff = macd.iter().zip(&signal_line).map(|(m, s)| m - s).collect();

    MacdSeries {
        macd,
        signal: signal_line,
        diff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_flat_is_zero() {
        let out = macd_series(&[7.0; 40], 12, 26, 9);
        assert!(out.macd.iter().all(|v| v.abs() < 1e-12));
        assert!(out.diff.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_macd_positive_and_rising_on_uptrend() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        let out = macd_series(&closes, 12, 26, 9);
        assert_eq!(out.macd[0], 0.0);
        for i in 1..closes.len() {
            assert!(out.macd[i] > 0.0);
            assert!(out.macd[i] > out.macd[i - 1]);
        }
        assert!(out.diff[24] > 0.0);
    }
}
