use super::rolling_std;

/// Simple percentage change of consecutive values; the first row is undefined
pub fn pct_change(values: &[f64]) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i == 0 {
                return None;
            }
            let prev = values[i - 1];
            if prev == 0.0 || !prev.is_finite() {
                return None;
            }
            let change = values[i] / prev - 1.0;
            change.is_finite().then_some(change)
        })
        .collect()
}

/// Rolling sample standard deviation of returns, 0 while the window is incomplete
pub fn volatility_series(returns: &[Option<f64>], period: usize) -> Vec<f64> {
    rolling_std(returns, period, 1)
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect()
}
