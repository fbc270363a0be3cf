use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::market::{fetch_series, MarketData};
use crate::types::Candle;

/// Completed prior session of one instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviousDayRecord {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub session_start: DateTime<Utc>,
}

impl PreviousDayRecord {
    fn from_candle(candle: &Candle) -> Self {
        Self {
            high: candle.high,
            low: candle.low,
            close: candle.close,
            session_start: candle.timestamp,
        }
    }

    /// Candle traded outside the prior session's range (strictly)
    pub fn is_breakout(&self, candle: &Candle) -> bool {
        candle.high > self.high || candle.low < self.low
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
}

/// Per-instrument previous-day high/low/close.
///
/// A refresh fetches everything first and then swaps records in under one
/// short write lock, so lookups never wait on the network. Instruments that
/// fail keep their previous record.
pub struct PreviousDayCache {
    source: Arc<dyn MarketData>,
    daily_interval_secs: u64,
    candles: usize,
    records: RwLock<HashMap<String, PreviousDayRecord>>,
}

impl PreviousDayCache {
    pub fn new(source: Arc<dyn MarketData>, daily_interval_secs: u64, candles: usize) -> Self {
        Self {
            source,
            daily_interval_secs,
            candles,
            records: RwLock::new(HashMap::new()),
        }
    }

    async fn fetch_record(&self, instrument: &str) -> Result<PreviousDayRecord, EngineError> {
        let series = fetch_series(self.source.as_ref(), instrument, self.daily_interval_secs, self.candles).await?;
        if series.len() < 2 {
            return Err(EngineError::data_unavailable(
                instrument,
                format!("{} daily candles, need 2", series.len()),
            ));
        }
        // last candle is the session in progress
        Ok(PreviousDayRecord::from_candle(&series.candles[series.len() - 2]))
    }

    pub async fn refresh(&self, instruments: &[String]) -> RefreshSummary {
        let mut fresh = Vec::with_capacity(instruments.len());
        let mut summary = RefreshSummary::default();

        for instrument in instruments {
            match self.fetch_record(instrument).await {
                Ok(record) => fresh.push((instrument.clone(), record)),
                Err(e) => {
                    warn!("Previous-day refresh failed, keeping cached value: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary.refreshed = fresh.len();
        self.records.write().await.extend(fresh);

        info!(
            "Previous-day cache refreshed: {} ok, {} failed",
            summary.refreshed, summary.failed
        );
        summary
    }

    pub async fn lookup(&self, instrument: &str) -> Option<PreviousDayRecord> {
        self.records.read().await.get(instrument).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}
