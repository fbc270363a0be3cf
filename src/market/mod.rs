pub mod replay;

pub use replay::FileMarketData;

use async_trait::async_trait;
use tracing::warn;

use crate::error::EngineError;
use crate::types::{Candle, CandleSeries};

/// Candle source the engine reads from. Implementations own sessions,
/// retries and rate limits; the engine treats any error as "no data".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Tradable instruments in the source's order
    async fn get_instruments(&self) -> anyhow::Result<Vec<String>>;

    /// Last `count` candles of `interval_secs` each, oldest first
    async fn get_historical_candles(
        &self,
        instrument: &str,
        interval_secs: u64,
        count: usize,
    ) -> anyhow::Result<Vec<Candle>>;
}

/// Fetch a series, mapping transport errors and out-of-order data to `EngineError::Fetch`
pub async fn fetch_series(
    source: &dyn MarketData,
    instrument: &str,
    interval_secs: u64,
    count: usize,
) -> Result<CandleSeries, EngineError> {
    let candles = source
        .get_historical_candles(instrument, interval_secs, count)
        .await
        .map_err(|e| EngineError::fetch(instrument, e))?;

    let series = CandleSeries::new(instrument, candles);
    if series.is_empty() {
        return Err(EngineError::data_unavailable(instrument, "source returned no candles"));
    }
    if !series.is_chronological() {
        return Err(EngineError::fetch(instrument, "candles are not oldest-first"));
    }
    Ok(series)
}

/// Instruments offered by the source, capped at `max`. Falls back to the
/// configured list when the source errors or lists nothing.
pub async fn select_instruments(source: &dyn MarketData, max: usize, fallback: &[String]) -> Vec<String> {
    let mut instruments = match source.get_instruments().await {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => {
            warn!("Data source listed no instruments, using fallback list");
            fallback.to_vec()
        }
        Err(e) => {
            warn!("Failed to list instruments ({}), using fallback list", e);
            fallback.to_vec()
        }
    };
    instruments.truncate(max);
    instruments
}
