pub mod ema;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod atr;
pub mod returns;

pub use rsi::*;
pub use macd::*;
pub use bollinger::*;
pub use atr::*;
pub use returns::*;

/// Values of the trailing `period` window ending at `end`, if every slot is defined
fn window(values: &[Option<f64>], end: usize, period: usize) -> Option<Vec<f64>> {
    if period == 0 || end + 1 < period {
        return None;
    }
    values[end + 1 - period..=end].iter().copied().collect()
}

/// Rolling simple mean; undefined until a full window of defined values exists
pub fn rolling_mean(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| window(values, i, period).map(|w| w.iter().sum::<f64>() / period as f64))
        .collect()
}

/// Rolling standard deviation with `ddof` delta degrees of freedom
pub fn rolling_std(values: &[Option<f64>], period: usize, ddof: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let w = window(values, i, period)?;
            if period <= ddof {
                return None;
            }
            let mean = w.iter().sum::<f64>() / period as f64;
            let variance = w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period - ddof) as f64;
            Some(variance.sqrt())
        })
        .collect()
}

/// Fill each gap with the next defined value
pub fn backfill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut next: Option<f64> = None;
    for slot in out.iter_mut().rev() {
        match slot {
            Some(v) => next = Some(*v),
            None => *slot = next,
        }
    }
    out
}

pub fn defined(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|v| if v.is_finite() { Some(*v) } else { None }).collect()
}
