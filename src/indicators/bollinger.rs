use super::{backfill, rolling_mean, rolling_std};

/// Below this the middle band is treated as zero and width is undefined
pub const MIN_BAND_MIDDLE: f64 = 1e-12;

#[derive(Debug, Clone, Default)]
pub struct BollingerSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

impl BollingerSeries {
    /// `(upper - lower) / middle`, undefined when the middle band is ~0
    pub fn width(&self, i: usize) -> Option<f64> {
        let (upper, middle, lower) = (self.upper[i]?, self.middle[i]?, self.lower[i]?);
        if middle.abs() < MIN_BAND_MIDDLE || !middle.is_normal() {
            return None;
        }
        Some((upper - lower) / middle)
    }
}

/// Bands over a rolling population standard deviation, back-filled over warm-up
pub fn bollinger_series(closes: &[f64], period: usize, std_dev_multiplier: f64) -> BollingerSeries {
    let values: Vec<Option<f64>> = closes
        .iter()
        .map(|v| if v.is_finite() { Some(*v) } else { None })
        .collect();
    let middle = rolling_mean(&values, period);
    let std = rolling_std(&values, period, 0);

    let mut upper = Vec::with_capacity(closes.len());
    let mut lower = Vec::with_capacity(closes.len());
    for (m, s) in middle.iter().zip(&std) {
        match (m, s) {
            (Some(m), Some(s)) => {
                upper.push(Some(m + std_dev_multiplier * s));
                lower.push(Some(m - std_dev_multiplier * s));
            }
            _ => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    BollingerSeries {
        upper: backfill(&upper),
        middle: backfill(&middle),
        lower: backfill(&lower),
    }
}
