use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use crate::indicators::{
    atr_series, bollinger_series, macd_series, pct_change, rsi_series, volatility_series, BollingerSeries,
    MacdSeries,
};
use crate::types::CandleSeries;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const ATR_PERIOD: usize = 14;
pub const BB_PERIOD: usize = 20;
pub const BB_STD_DEV: f64 = 2.0;
pub const VOLATILITY_WINDOW: usize = 10;

/// Shorter series produce an empty frame
pub const MIN_CANDLES: usize = BB_PERIOD;

/// Named indicator columns, in frame order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Returns,
    Volatility,
    Rsi,
    Macd,
    MacdSignal,
    MacdDiff,
    Atr,
    BbUpper,
    BbMiddle,
    BbLower,
    BbWidth,
}

impl Feature {
    pub const ALL: [Feature; 11] = [
        Feature::Returns,
        Feature::Volatility,
        Feature::Rsi,
        Feature::Macd,
        Feature::MacdSignal,
        Feature::MacdDiff,
        Feature::Atr,
        Feature::BbUpper,
        Feature::BbMiddle,
        Feature::BbLower,
        Feature::BbWidth,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Feature::Returns => "returns",
            Feature::Volatility => "volatility",
            Feature::Rsi => "rsi",
            Feature::Macd => "macd",
            Feature::MacdSignal => "macd_signal",
            Feature::MacdDiff => "macd_diff",
            Feature::Atr => "atr",
            Feature::BbUpper => "bb_upper",
            Feature::BbMiddle => "bb_middle",
            Feature::BbLower => "bb_lower",
            Feature::BbWidth => "bb_width",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Feature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Feature::ALL
            .iter()
            .find(|f| f.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown feature: {}", s))
    }
}

/// Ordered feature subset fed to the classifier. Training stores it in the
/// artifact and inference must extract exactly the same list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub features: Vec<Feature>,
}

impl FeatureSchema {
    pub const CANONICAL_VERSION: u32 = 1;

    pub fn canonical() -> Self {
        Self {
            version: Self::CANONICAL_VERSION,
            features: vec![
                Feature::Rsi,
                Feature::Macd,
                Feature::MacdDiff,
                Feature::Atr,
                Feature::Volatility,
                Feature::BbWidth,
            ],
        }
    }

    pub fn new(version: u32, features: Vec<Feature>) -> Self {
        Self { version, features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.as_str()).collect()
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::canonical()
    }
}

impl std::fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}[{}]", self.version, self.names().join(","))
    }
}

/// Full indicator set for one candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub returns: f64,
    pub volatility: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_diff: f64,
    pub atr: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
}

impl FeatureVector {
    pub const NUM_FEATURES: usize = 11;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.returns,
            self.volatility,
            self.rsi,
            self.macd,
            self.macd_signal,
            self.macd_diff,
            self.atr,
            self.bb_upper,
            self.bb_middle,
            self.bb_lower,
            self.bb_width,
        ]
    }

    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::Returns => self.returns,
            Feature::Volatility => self.volatility,
            Feature::Rsi => self.rsi,
            Feature::Macd => self.macd,
            Feature::MacdSignal => self.macd_signal,
            Feature::MacdDiff => self.macd_diff,
            Feature::Atr => self.atr,
            Feature::BbUpper => self.bb_upper,
            Feature::BbMiddle => self.bb_middle,
            Feature::BbLower => self.bb_lower,
            Feature::BbWidth => self.bb_width,
        }
    }

    /// Values in schema order
    pub fn project(&self, schema: &FeatureSchema) -> Vec<f64> {
        schema.features.iter().map(|f| self.get(*f)).collect()
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// One frame row, tied back to its candle by `index`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    pub rows: Vec<FeatureRow>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&FeatureRow> {
        self.rows.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureRow> {
        self.rows.iter()
    }
}

struct IndicatorColumns {
    returns: Vec<Option<f64>>,
    volatility: Vec<f64>,
    rsi: Vec<f64>,
    macd: MacdSeries,
    atr: Vec<Option<f64>>,
    bands: BollingerSeries,
}

impl IndicatorColumns {
    fn vector(&self, i: usize) -> Option<FeatureVector> {
        let vector = FeatureVector {
            returns: self.returns[i]?,
            volatility: self.volatility[i],
            rsi: self.rsi[i],
            macd: self.macd.macd[i],
            macd_signal: self.macd.signal[i],
            macd_diff: self.macd.diff[i],
            atr: self.atr[i]?,
            bb_upper: self.bands.upper[i]?,
            bb_middle: self.bands.middle[i]?,
            bb_lower: self.bands.lower[i]?,
            bb_width: self.bands.width(i)?,
        };
        vector.is_finite().then_some(vector)
    }
}

/// Candle series to feature frame. Pure: no I/O, no hidden state.
///
/// Rows whose indicator set is not fully defined are dropped (always the
/// first row, which has no return). ATR and band warm-up rows are
/// back-filled, RSI warm-up reads neutral and volatility warm-up reads 0.
pub fn compute_features(series: &CandleSeries) -> FeatureFrame {
    if series.len() < MIN_CANDLES {
        debug!(
            "{}: {} candles, need {} for features",
            series.instrument,
            series.len(),
            MIN_CANDLES
        );
        return FeatureFrame::default();
    }

    let closes = series.closes();
    let highs = series.highs();
    let lows = series.lows();

    let returns = pct_change(&closes);
    let columns = IndicatorColumns {
        volatility: volatility_series(&returns, VOLATILITY_WINDOW),
        rsi: rsi_series(&closes, RSI_PERIOD),
        macd: macd_series(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
        atr: atr_series(&highs, &lows, &closes, ATR_PERIOD),
        bands: bollinger_series(&closes, BB_PERIOD, BB_STD_DEV),
        returns,
    };

    let rows = series
        .candles
        .iter()
        .enumerate()
        .filter_map(|(index, candle)| {
            columns.vector(index).map(|features| FeatureRow {
                index,
                timestamp: candle.timestamp,
                close: closes[index],
                features,
            })
        })
        .collect();

    FeatureFrame { rows }
}
