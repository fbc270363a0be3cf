//! Builders shared by unit tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::config::AppConfig;
use crate::ml::persistence::{ModelArtifact, ModelMetrics, ModelVersion};
use crate::ml::{FeatureSchema, SequenceClassifier, StandardScaler};
use crate::types::{Candle, CandleSeries};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn candle_at(minute: i64, high: Decimal, low: Decimal, close: Decimal) -> Candle {
    Candle::new(start_time() + Duration::minutes(minute), close, high, low, close)
}

/// Candles with the given closes, one minute apart, high/low one unit around close
pub fn series_from_closes(instrument: &str, closes: &[i64]) -> CandleSeries {
    let candles = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let close = Decimal::from(*close);
            candle_at(i as i64, close + Decimal::ONE, close - Decimal::ONE, close)
        })
        .collect();
    CandleSeries::new(instrument, candles)
}

/// Close rises by exactly 1 every candle starting at 100
pub fn ascending_series(n: usize) -> CandleSeries {
    let closes: Vec<i64> = (0..n as i64).map(|i| 100 + i).collect();
    series_from_closes("EURUSD_otc", &closes)
}

/// Bounded oscillation between 100 and 110
pub fn zigzag_series(n: usize) -> CandleSeries {
    let closes: Vec<i64> = (0..n as i64).map(|i| 100 + (i * 7) % 11).collect();
    series_from_closes("GBPUSD_otc", &closes)
}

/// Fresh directory under the system temp dir
pub fn scratch_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("signal_engine_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Single-connection in-memory SQLite pool; the database lives as long as the pool
pub async fn memory_pool() -> sqlx::SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

/// Canonical-schema artifact whose scaler means all equal `marker` and whose
/// classifier always answers `p_up`
pub fn test_artifact(version: ModelVersion, marker: f64, p_up: f64) -> ModelArtifact {
    let schema = FeatureSchema::canonical();
    ModelArtifact {
        version,
        trained_at: Utc::now(),
        metrics: ModelMetrics {
            validation_accuracy: 0.8,
            validation_loss: 0.4,
            train_samples: 80,
            validation_samples: 20,
        },
        scaler: StandardScaler {
            mean: vec![marker; schema.len()],
            scale: vec![1.0; schema.len()],
        },
        classifier: SequenceClassifier::constant(schema.len(), p_up),
        feature_schema: schema,
    }
}

/// Reduced network that reliably learns the 25-candle ascending trend.
///
/// With the production defaults (128/64 LSTM, lr 0.001, batch 64) the 18
/// training samples give one Adam step per epoch and 50 epochs do not
/// converge, so trend-learning tests need this configuration.
pub fn fast_training_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.model.lstm1_units = 16;
    config.model.lstm2_units = 8;
    config.model.dense_units = 8;
    config.training.epochs = 100;
    config.training.learning_rate = 0.01;
    config
}
