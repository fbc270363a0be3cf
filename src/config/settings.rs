use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralSettings,
    pub data: DataSettings,
    pub training: TrainingSettings,
    pub model: ModelSettings,
    pub inference: InferenceSettings,
    pub storage: StorageSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // General validation
        if self.general.max_instruments == 0 {
            errors.push("general.max_instruments must be > 0".to_string());
        }

        // Data validation
        if self.data.interval_seconds == 0 {
            errors.push("data.interval_seconds must be > 0".to_string());
        }
        if self.data.daily_interval_seconds == 0 {
            errors.push("data.daily_interval_seconds must be > 0".to_string());
        }
        if self.data.previous_day_candles < 2 {
            errors.push("data.previous_day_candles must be >= 2".to_string());
        }
        if let Err(e) = parse_time_of_day(&self.data.refresh_at) {
            errors.push(format!("data.refresh_at: {}", e));
        }

        // Training validation
        if self.training.candles_per_instrument == 0 {
            errors.push("training.candles_per_instrument must be > 0".to_string());
        }
        if self.training.validation_split <= 0.0 || self.training.validation_split >= 1.0 {
            errors.push("training.validation_split must be between 0 and 1 (exclusive)".to_string());
        }
        if !in_unit_interval(self.training.acceptance_threshold) {
            errors.push("training.acceptance_threshold must be in (0, 1]".to_string());
        }
        if self.training.epochs == 0 {
            errors.push("training.epochs must be > 0".to_string());
        }
        if self.training.batch_size == 0 {
            errors.push("training.batch_size must be > 0".to_string());
        }
        if self.training.learning_rate <= 0.0 {
            errors.push("training.learning_rate must be > 0".to_string());
        }
        if let Err(e) = parse_time_of_day(&self.training.retrain_at) {
            errors.push(format!("training.retrain_at: {}", e));
        }

        // Model validation
        if self.model.lstm1_units == 0 || self.model.lstm2_units == 0 || self.model.dense_units == 0 {
            errors.push("model layer sizes must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            errors.push("model.dropout must be in [0, 1)".to_string());
        }

        // Inference validation
        if self.inference.window_candles == 0 {
            errors.push("inference.window_candles must be > 0".to_string());
        }
        if !in_unit_interval(self.inference.confidence_threshold) {
            errors.push("inference.confidence_threshold must be in (0, 1]".to_string());
        }
        if self.inference.poll_interval_secs == 0 {
            errors.push("inference.poll_interval_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn in_unit_interval(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

/// `HH:MM` wall-clock time (UTC)
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| format!("expected HH:MM, got {:?} ({})", value, e))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub max_instruments: usize,
    /// Used when the data source lists no instruments
    pub fallback_instruments: Vec<String>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            max_instruments: 5,
            fallback_instruments: vec![
                "EURUSD_otc".to_string(),
                "GBPUSD_otc".to_string(),
                "USDJPY_otc".to_string(),
                "AUDCAD_otc".to_string(),
                "EURJPY_otc".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory of recorded `<instrument>.json` candle files
    pub source_dir: PathBuf,
    pub interval_seconds: u64,
    pub daily_interval_seconds: u64,
    pub previous_day_candles: usize,
    /// Daily previous-day refresh time, `HH:MM` UTC
    pub refresh_at: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("data/candles"),
            interval_seconds: 60,
            daily_interval_seconds: 86_400,
            previous_day_candles: 2,
            refresh_at: "00:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub candles_per_instrument: usize,
    pub validation_split: f64,
    /// Commit only when validation accuracy is strictly above this
    pub acceptance_threshold: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    /// Daily retrain time, `HH:MM` UTC
    pub retrain_at: String,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            candles_per_instrument: 1000,
            validation_split: 0.2,
            acceptance_threshold: 0.75,
            epochs: 50,
            batch_size: 64,
            learning_rate: 0.001,
            seed: 42,
            retrain_at: "23:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub lstm1_units: usize,
    pub lstm2_units: usize,
    pub dense_units: usize,
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            lstm1_units: 128,
            lstm2_units: 64,
            dense_units: 32,
            dropout: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub window_candles: usize,
    /// Fewer feature rows than this is "insufficient data"
    pub min_rows: usize,
    pub confidence_threshold: f64,
    pub poll_interval_secs: u64,
    /// Wait before fetching the confirmation candle; defaults to one candle period
    pub confirmation_delay_secs: Option<u64>,
    pub history_size: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            window_candles: 100,
            min_rows: 10,
            confidence_threshold: 0.92,
            poll_interval_secs: 30,
            confirmation_delay_secs: None,
            history_size: 20,
        }
    }
}

impl InferenceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: String,
    pub models_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://signal_engine.db".to_string(),
            models_dir: PathBuf::from("models"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.general.max_instruments, 5);
        assert_eq!(config.inference.confidence_threshold, 0.92);
        assert_eq!(config.training.acceptance_threshold, 0.75);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = AppConfig::default();
        config.training.validation_split = 1.0;
        config.inference.confidence_threshold = 1.5;
        config.training.retrain_at = "25:00".to_string();
        config.model.dropout = 1.0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("retrain_at")));
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("23:00").unwrap(), NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        assert!(parse_time_of_day("noon").is_err());
    }
}
