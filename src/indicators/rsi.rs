use super::rolling_mean;

pub const RSI_NEUTRAL: f64 = 50.0;

/// RSI over simple rolling means of gains and losses.
///
/// Rows inside the warm-up window read as neutral (50) rather than undefined.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());

    for i in 0..closes.len() {
        if i == 0 {
            gains.push(None);
            losses.push(None);
            continue;
        }
        let change = closes[i] - closes[i - 1];
        if change.is_finite() {
            gains.push(Some(change.max(0.0)));
            losses.push(Some((-change).max(0.0)));
        } else {
            gains.push(None);
            losses.push(None);
        }
    }

    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .iter()
        .zip(avg_loss.iter())
        .map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) => rsi_from_averages(*g, *l),
            _ => RSI_NEUTRAL,
        })
        .collect()
}

/// `100 - 100 / (1 + avg_gain / avg_loss)`, bounded to [0, 100].
///
/// A flat window (no gains, no losses) has no defined ratio and reads as
/// neutral; a window with gains and no losses saturates at 100.
pub fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= f64::EPSILON {
        if avg_gain <= f64::EPSILON {
            return RSI_NEUTRAL;
        }
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RSIZone {
    Oversold,
    BearishNeutral,
    BullishNeutral,
    Overbought,
}

impl RSIZone {
    pub fn from_value(value: f64) -> Self {
        if value < 30.0 {
            RSIZone::Oversold
        } else if value > 70.0 {
            RSIZone::Overbought
        } else if value < 50.0 {
            RSIZone::BearishNeutral
        } else {
            RSIZone::BullishNeutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_warmup_is_neutral() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi = rsi_series(&closes, 14);
        assert!(rsi[..14].iter().all(|v| *v == RSI_NEUTRAL));
        assert_eq!(rsi[14], 100.0);
    }

    #[test]
    fn test_rsi_flat_series_is_neutral() {
        let closes = vec![5.0; 30];
        let rsi = rsi_series(&closes, 14);
        assert!(rsi.iter().all(|v| *v == RSI_NEUTRAL));
    }

    #[test]
    fn test_rsi_falling_series_hits_zero() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let rsi = rsi_series(&closes, 14);
        assert_eq!(rsi[19], 0.0);
    }

    #[test]
    fn test_rsi_bounded() {
        let closes = [10.0, 12.0, 11.0, 15.0, 9.0, 9.5, 14.0, 13.0, 8.0, 12.5, 13.5, 11.0, 10.0, 16.0, 15.5, 9.0];
        for value in rsi_series(&closes, 5) {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_rsi_equal_gains_and_losses() {
        assert!((rsi_from_averages(1.0, 1.0) - 50.0).abs() < 1e-12);
        assert_eq!(RSIZone::from_value(75.0), RSIZone::Overbought);
        assert_eq!(RSIZone::from_value(20.0), RSIZone::Oversold);
    }
}
