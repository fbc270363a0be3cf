/// Exponential moving average seeded from the first value (no bias correction).
///
/// `ema[0] = x[0]`, `ema[i] = alpha * x[i] + (1 - alpha) * ema[i-1]` with
/// `alpha = 2 / (span + 1)`.
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let mut ema = EMA::new(span);
    values.iter().map(|v| ema.update(*v)).collect()
}

#[derive(Debug, Clone)]
pub struct EMA {
    multiplier: f64,
    value: Option<f64>,
}

impl EMA {
    pub fn new(span: usize) -> Self {
        Self {
            multiplier: 2.0 / (span as f64 + 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        let next = match self.value {
            Some(prev) => (price - prev) * self.multiplier + prev,
            None => price,
        };
        self.value = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seeded_from_first_value() {
        let ema = ema_series(&[10.0, 10.0, 10.0], 12);
        assert_eq!(ema, vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_ema_recursion() {
        // span 3 => alpha 0.5
        let ema = ema_series(&[2.0, 4.0, 8.0], 3);
        assert_eq!(ema, vec![2.0, 3.0, 5.5]);
    }

    #[test]
    fn test_incremental_matches_series() {
        let prices = [1.0, 3.0, 2.0, 5.0, 4.0];
        let series = ema_series(&prices, 4);
        let mut ema = EMA::new(4);
        for (price, expected) in prices.iter().zip(series) {
            assert!((ema.update(*price) - expected).abs() < 1e-12);
        }
    }
}
