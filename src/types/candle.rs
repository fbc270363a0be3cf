use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLC price bar for one fixed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self { timestamp, open, high, low, close }
    }

    pub fn high_f64(&self) -> f64 {
        to_f64(self.high)
    }

    pub fn low_f64(&self) -> f64 {
        to_f64(self.low)
    }

    pub fn close_f64(&self) -> f64 {
        to_f64(self.close)
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Chronological candles for a single instrument, oldest first
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub instrument: String,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(instrument: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            instrument: instrument.into(),
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close_f64()).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high_f64()).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low_f64()).collect()
    }

    /// True when timestamps strictly increase
    pub fn is_chronological(&self) -> bool {
        self.candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn candle(minute: i64, close: Decimal) -> Candle {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle::new(ts, close, close + dec!(1), close - dec!(1), close)
    }

    #[test]
    fn test_chronological_check() {
        let ordered = CandleSeries::new("A", vec![candle(0, dec!(1)), candle(1, dec!(2))]);
        let reversed = CandleSeries::new("A", vec![candle(1, dec!(1)), candle(0, dec!(2))]);
        assert!(ordered.is_chronological());
        assert!(!reversed.is_chronological());
    }

    #[test]
    fn test_float_projections() {
        let c = candle(0, dec!(100.5));
        assert_eq!(c.close_f64(), 100.5);
        assert_eq!(c.high_f64(), 101.5);
    }
}
