use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::MarketData;
use crate::types::Candle;

/// Market data served from recorded candle files, one `<instrument>.json`
/// array per instrument under a directory. Candles are resampled to the
/// requested interval, so a minute recording also answers daily queries.
pub struct FileMarketData {
    dir: PathBuf,
}

impl FileMarketData {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, instrument: &str) -> Result<PathBuf> {
        if instrument.is_empty() || instrument.contains(['/', '\\']) || instrument.starts_with('.') {
            return Err(anyhow!("Invalid instrument name: {:?}", instrument));
        }
        Ok(self.dir.join(format!("{}.json", instrument)))
    }

    async fn read_candles(&self, instrument: &str) -> Result<Vec<Candle>> {
        let path = self.file_for(instrument)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut candles: Vec<Candle> =
            serde_json::from_slice(&bytes).with_context(|| format!("Malformed candle file {}", path.display()))?;
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        Ok(candles)
    }
}

#[async_trait]
impl MarketData for FileMarketData {
    async fn get_instruments(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut instruments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                instruments.push(stem.to_string());
            }
        }
        instruments.sort();
        Ok(instruments)
    }

    async fn get_historical_candles(&self, instrument: &str, interval_secs: u64, count: usize) -> Result<Vec<Candle>> {
        let candles = self.read_candles(instrument).await?;
        let mut resampled = resample(&candles, interval_secs)?;
        if resampled.len() > count {
            resampled.drain(..resampled.len() - count);
        }
        debug!(
            "{}: serving {} candles of {}s from {} recorded",
            instrument,
            resampled.len(),
            interval_secs,
            candles.len()
        );
        Ok(resampled)
    }
}

/// Aggregate chronological candles into buckets aligned to multiples of
/// `interval_secs` since the epoch. Each bucket is stamped with its start.
pub fn resample(candles: &[Candle], interval_secs: u64) -> Result<Vec<Candle>> {
    if interval_secs == 0 {
        return Err(anyhow!("Interval must be positive"));
    }
    let interval = i64::try_from(interval_secs)?;

    let mut out: Vec<Candle> = Vec::new();
    for candle in candles {
        let bucket = bucket_start(candle.timestamp, interval)?;
        match out.last_mut() {
            Some(current) if current.timestamp == bucket => {
                current.high = current.high.max(candle.high);
                current.low = current.low.min(candle.low);
                current.close = candle.close;
            }
            _ => out.push(Candle::new(bucket, candle.open, candle.high, candle.low, candle.close)),
        }
    }
    Ok(out)
}

fn bucket_start(timestamp: DateTime<Utc>, interval: i64) -> Result<DateTime<Utc>> {
    let secs = timestamp.timestamp();
    let start = secs - secs.rem_euclid(interval);
    Utc.timestamp_opt(start, 0)
        .single()
        .ok_or_else(|| anyhow!("Timestamp out of range: {}", start))
}
