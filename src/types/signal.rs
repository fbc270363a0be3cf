use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Discrete outcome of one signal evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
    Breakout,
}

impl SignalKind {
    pub fn as_str(&self) -> &str {
        match self {
            SignalKind::Buy => "BUY",
            SignalKind::Sell => "SELL",
            SignalKind::Hold => "HOLD",
            SignalKind::Breakout => "BREAKOUT",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, SignalKind::Hold)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalKind::Buy),
            "SELL" => Ok(SignalKind::Sell),
            "HOLD" => Ok(SignalKind::Hold),
            "BREAKOUT" => Ok(SignalKind::Breakout),
            _ => Err(anyhow::anyhow!("Unknown signal kind: {}", s)),
        }
    }
}

/// Predicted direction of the next candle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Single "up" probability to direction + confidence
    pub fn from_probability(p_up: f64) -> (Self, f64) {
        let direction = if p_up >= 0.5 { Direction::Up } else { Direction::Down };
        (direction, p_up.max(1.0 - p_up))
    }

    pub fn signal(&self) -> SignalKind {
        match self {
            Direction::Up => SignalKind::Buy,
            Direction::Down => SignalKind::Sell,
        }
    }
}

/// Signal handed to delivery surfaces; never persisted here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub kind: SignalKind,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(instrument: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            instrument: instrument.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.instrument,
            self.kind
        )
    }
}
