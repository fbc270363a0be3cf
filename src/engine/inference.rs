use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::controller::ShutdownSignal;
use super::previous_day::PreviousDayCache;
use crate::config::InferenceSettings;
use crate::error::EngineError;
use crate::market::{fetch_series, MarketData};
use crate::ml::persistence::ModelVersion;
use crate::ml::{compute_features, ArtifactStore, FeatureSchema, ModelArtifact};
use crate::types::{Direction, SignalKind};

/// Signal kind plus the reason it was reached, for the per-call log line
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub kind: SignalKind,
    pub reason: String,
}

impl Decision {
    fn new(kind: SignalKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    fn hold(reason: impl Into<String>) -> Self {
        Self::new(SignalKind::Hold, reason)
    }
}

/// Turns the latest candle window into BUY / SELL / HOLD / BREAKOUT.
///
/// Holds a read-only snapshot of the accepted artifact; `load_model` swaps
/// in a new snapshot without blocking calls already in flight.
pub struct SignalEngine {
    source: Arc<dyn MarketData>,
    store: Arc<ArtifactStore>,
    cache: Arc<PreviousDayCache>,
    model: RwLock<Option<Arc<ModelArtifact>>>,
    schema: FeatureSchema,
    settings: InferenceSettings,
    interval_secs: u64,
}

impl SignalEngine {
    pub fn new(
        source: Arc<dyn MarketData>,
        store: Arc<ArtifactStore>,
        cache: Arc<PreviousDayCache>,
        settings: InferenceSettings,
        interval_secs: u64,
    ) -> Self {
        Self {
            source,
            store,
            cache,
            model: RwLock::new(None),
            schema: FeatureSchema::canonical(),
            settings,
            interval_secs,
        }
    }

    /// (Re)load the accepted artifact.
    ///
    /// A schema mismatch is returned as an error and nothing is swapped in.
    /// A missing registry entry clears the model; an unreadable artifact is
    /// logged and the current snapshot is kept (none at startup).
    pub async fn load_model(&self) -> Result<Option<ModelVersion>, EngineError> {
        match self.store.load().await {
            Ok(Some(artifact)) => {
                if artifact.feature_schema != self.schema {
                    return Err(EngineError::SchemaMismatch {
                        expected: self.schema.clone(),
                        found: artifact.feature_schema,
                    });
                }
                let version = artifact.version.clone();
                info!(
                    "Model v{} loaded (validation accuracy {:.3}, schema {})",
                    version,
                    artifact.validation_accuracy(),
                    artifact.feature_schema
                );
                *self.model.write().await = Some(Arc::new(artifact));
                Ok(Some(version))
            }
            Ok(None) => {
                warn!("No accepted model yet, ML signals disabled (breakouts still active)");
                *self.model.write().await = None;
                Ok(None)
            }
            Err(e) => {
                error!("Failed to load model: {:#}", e);
                Ok(self.model_version().await)
            }
        }
    }

    pub async fn model_version(&self) -> Option<ModelVersion> {
        self.model.read().await.as_ref().map(|m| m.version.clone())
    }

    fn confirmation_delay(&self) -> Duration {
        Duration::from_secs(self.settings.confirmation_delay_secs.unwrap_or(self.interval_secs))
    }

    /// Evaluate one instrument. Never fails: every error degrades to HOLD.
    pub async fn generate_signal(&self, instrument: &str, shutdown: &ShutdownSignal) -> SignalKind {
        let decision = match self.evaluate(instrument, shutdown.clone()).await {
            Ok(decision) => decision,
            Err(e) => Decision::hold(format!("error: {:#}", e)),
        };

        if decision.kind.is_actionable() {
            info!("{}: {} ({})", instrument, decision.kind, decision.reason);
        } else {
            debug!("{}: {} ({})", instrument, decision.kind, decision.reason);
        }
        decision.kind
    }

    async fn evaluate(&self, instrument: &str, mut shutdown: ShutdownSignal) -> Result<Decision> {
        // 1. recent window
        let series = match fetch_series(
            self.source.as_ref(),
            instrument,
            self.interval_secs,
            self.settings.window_candles,
        )
        .await
        {
            Ok(series) => series,
            Err(e) => return Ok(Decision::hold(e.to_string())),
        };
        let frame = compute_features(&series);
        let (Some(latest_row), Some(latest)) = (frame.last(), series.last()) else {
            return Ok(Decision::hold(format!("{} candles, no feature rows", series.len())));
        };
        if frame.len() < self.settings.min_rows {
            return Ok(Decision::hold(format!(
                "{} feature rows, need {}",
                frame.len(),
                self.settings.min_rows
            )));
        }

        // 2. breakout against the prior session
        if let Some(previous) = self.cache.lookup(instrument).await {
            if previous.is_breakout(latest) {
                return Ok(Decision::new(
                    SignalKind::Breakout,
                    format!(
                        "high {} / low {} outside previous day {} - {}",
                        latest.high, latest.low, previous.low, previous.high
                    ),
                ));
            }
        }

        // 3. model with confidence gate
        let Some(model) = self.model.read().await.clone() else {
            return Ok(Decision::hold("no model loaded"));
        };
        if latest_row.index + 1 != series.len() {
            return Ok(Decision::hold(format!(
                "latest candle has no feature row (newest row is {} of {})",
                latest_row.index,
                series.len()
            )));
        }
        let p_up = model.predict_up_probability(&latest_row.features)?;
        let Some((direction, confidence)) = gated_direction(p_up, self.settings.confidence_threshold) else {
            return Ok(Decision::hold(format!(
                "p_up {:.3} inside the {:.2} confidence gate",
                p_up, self.settings.confidence_threshold
            )));
        };

        // 4. wait one candle and confirm against the realized move
        if !shutdown.sleep(self.confirmation_delay()).await {
            return Ok(Decision::hold("cancelled while awaiting confirmation"));
        }
        let next = match fetch_series(self.source.as_ref(), instrument, self.interval_secs, 1).await {
            Ok(series) => series.last().cloned(),
            Err(e) => return Ok(Decision::hold(format!("confirmation unavailable: {}", e))),
        };
        let Some(next) = next else {
            return Ok(Decision::hold("confirmation unavailable: no candle"));
        };
        if next.timestamp <= latest.timestamp {
            return Ok(Decision::hold("confirmation candle is not newer than the prediction candle"));
        }

        Ok(confirm(direction, confidence, latest.close, next.close))
    }
}

/// Direction and confidence when the prediction clears the gate (inclusive)
fn gated_direction(p_up: f64, threshold: f64) -> Option<(Direction, f64)> {
    let (direction, confidence) = Direction::from_probability(p_up);
    (confidence >= threshold).then_some((direction, confidence))
}

fn confirm(direction: Direction, confidence: f64, predicted_from: Decimal, realized: Decimal) -> Decision {
    let confirmed = match direction {
        Direction::Up => realized > predicted_from,
        Direction::Down => realized < predicted_from,
    };
    if confirmed {
        Decision::new(
            direction.signal(),
            format!("confidence {:.3}, close {} -> {}", confidence, predicted_from, realized),
        )
    } else {
        Decision::hold(format!(
            "predicted {:?} at {:.3} but close went {} -> {}",
            direction, confidence, predicted_from, realized
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::EngineController;
    use crate::market::MockMarketData;
    use crate::ml::Feature;
    use crate::test_support::{ascending_series, candle_at, memory_pool, scratch_dir, series_from_closes, test_artifact};
    use crate::types::{Candle, CandleSeries};
    use rust_decimal_macros::dec;

    const DAY: u64 = 86_400;

    /// Serves `window` for the recent window, `next` for the single confirmation
    /// candle and `previous_day` for the daily series
    fn source_with(window: Vec<Candle>, next: Option<Candle>, previous_day: Option<Vec<Candle>>) -> MockMarketData {
        let mut source = MockMarketData::new();
        source
            .expect_get_historical_candles()
            .returning(move |_, interval, count| match (interval, count) {
                (DAY, _) => previous_day.clone().ok_or_else(|| anyhow::anyhow!("no daily data")),
                (_, 1) => Ok(next.clone().into_iter().collect()),
                _ => Ok(window.clone()),
            });
        source
    }

    fn no_wait() -> InferenceSettings {
        InferenceSettings {
            confirmation_delay_secs: Some(0),
            ..InferenceSettings::default()
        }
    }

    async fn engine_with(source: MockMarketData, p_up: Option<f64>) -> SignalEngine {
        let source: Arc<dyn MarketData> = Arc::new(source);
        let store = Arc::new(ArtifactStore::with_pool(memory_pool().await, scratch_dir()).await.unwrap());
        if let Some(p) = p_up {
            store.commit(&test_artifact(ModelVersion::initial(), 0.0, p)).await.unwrap();
        }
        let cache = Arc::new(PreviousDayCache::new(source.clone(), DAY, 2));
        cache.refresh(&["EURUSD_otc".to_string()]).await;

        let engine = SignalEngine::new(source, store, cache, no_wait(), 60);
        engine.load_model().await.unwrap();
        engine
    }

    fn next_close(close: i64) -> Option<Candle> {
        let close = Decimal::from(close);
        Some(candle_at(30, close + Decimal::ONE, close - Decimal::ONE, close))
    }

    #[tokio::test]
    async fn test_breakout_without_model() {
        let mut window = series_from_closes("EURUSD_otc", &[105; 29]).candles;
        window.push(candle_at(29, dec!(111), dec!(101), dec!(106)));
        let previous_day = vec![
            candle_at(-2880, dec!(110), dec!(100), dec!(105)),
            candle_at(-1440, dec!(108), dec!(104), dec!(105)),
        ];

        let engine = engine_with(source_with(window, None, Some(previous_day)), None).await;
        assert!(engine.model_version().await.is_none());

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Breakout);
    }

    #[tokio::test]
    async fn test_confident_up_contradicted_is_hold() {
        let window = ascending_series(30).candles;
        let engine = engine_with(source_with(window, next_close(128), None), Some(0.95)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_confident_up_confirmed_is_buy() {
        let window = ascending_series(30).candles;
        let engine = engine_with(source_with(window, next_close(130), None), Some(0.95)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Buy);
    }

    #[tokio::test]
    async fn test_confident_down_confirmed_is_sell() {
        let window = ascending_series(30).candles;
        let engine = engine_with(source_with(window, next_close(127), None), Some(0.03)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Sell);
    }

    #[tokio::test]
    async fn test_equal_close_is_hold() {
        let window = ascending_series(30).candles;
        let engine = engine_with(source_with(window, next_close(129), None), Some(0.99)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_low_confidence_is_hold() {
        let window = ascending_series(30).candles;
        let engine = engine_with(source_with(window, next_close(200), None), Some(0.9)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[test]
    fn test_confidence_gate_is_inclusive() {
        assert_eq!(gated_direction(0.92, 0.92), Some((Direction::Up, 0.92)));
        assert_eq!(gated_direction(0.9199999, 0.92), None);
        assert_eq!(gated_direction(0.0799999, 0.92).map(|(d, _)| d), Some(Direction::Down));
        assert_eq!(gated_direction(0.5, 0.5), Some((Direction::Up, 0.5)));
    }

    #[tokio::test]
    async fn test_confidence_just_around_gate() {
        let window = ascending_series(30).candles;
        let controller = EngineController::new_running();

        let engine = engine_with(source_with(window.clone(), next_close(130), None), Some(0.921)).await;
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Buy);

        let engine = engine_with(source_with(window, next_close(130), None), Some(0.919)).await;
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_dropped_latest_row_is_hold() {
        // zero close leaves the newest candle without a return, so its row is dropped
        let mut window = ascending_series(30).candles;
        window[28] = candle_at(28, dec!(1), dec!(0), dec!(0));
        assert_eq!(compute_features(&CandleSeries::new("EURUSD_otc", window.clone())).last().unwrap().index, 28);

        let engine = engine_with(source_with(window, next_close(130), None), Some(0.95)).await;
        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_stale_confirmation_is_hold() {
        let window = ascending_series(30).candles;
        let stale = window.last().cloned().map(|mut c| {
            c.close = dec!(500);
            c
        });
        let engine = engine_with(source_with(window, stale, None), Some(0.95)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_missing_confirmation_is_hold() {
        let window = ascending_series(30).candles;
        let engine = engine_with(source_with(window, None, None), Some(0.95)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_insufficient_history_is_hold() {
        for n in [0, 5, 10] {
            let window = ascending_series(n).candles;
            let engine = engine_with(source_with(window, next_close(130), None), Some(0.95)).await;

            let controller = EngineController::new_running();
            let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
            assert_eq!(kind, SignalKind::Hold);
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_is_hold() {
        let mut source = MockMarketData::new();
        source
            .expect_get_historical_candles()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection reset")));
        let engine = engine_with(source, Some(0.95)).await;

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_stop_aborts_confirmation_wait() {
        let window = ascending_series(30).candles;
        let source: Arc<dyn MarketData> = Arc::new(source_with(window, next_close(130), None));
        let store = Arc::new(ArtifactStore::with_pool(memory_pool().await, scratch_dir()).await.unwrap());
        store.commit(&test_artifact(ModelVersion::initial(), 0.0, 0.95)).await.unwrap();
        let cache = Arc::new(PreviousDayCache::new(source.clone(), DAY, 2));
        let settings = InferenceSettings {
            confirmation_delay_secs: Some(3600),
            ..InferenceSettings::default()
        };
        let engine = SignalEngine::new(source, store, cache, settings, 60);
        engine.load_model().await.unwrap();

        let controller = EngineController::new_running();
        controller.stop().unwrap();
        let kind = tokio::time::timeout(
            Duration::from_secs(5),
            engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()),
        )
        .await
        .unwrap();
        assert_eq!(kind, SignalKind::Hold);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_fatal() {
        let source: Arc<dyn MarketData> = Arc::new(MockMarketData::new());
        let store = Arc::new(ArtifactStore::with_pool(memory_pool().await, scratch_dir()).await.unwrap());

        let mut artifact = test_artifact(ModelVersion::initial(), 0.0, 0.95);
        // same width, different order
        artifact.feature_schema = FeatureSchema::new(
            1,
            vec![
                Feature::Macd,
                Feature::Rsi,
                Feature::MacdDiff,
                Feature::Atr,
                Feature::Volatility,
                Feature::BbWidth,
            ],
        );
        store.commit(&artifact).await.unwrap();

        let cache = Arc::new(PreviousDayCache::new(source.clone(), DAY, 2));
        let engine = SignalEngine::new(source, store, cache, no_wait(), 60);
        let err = engine.load_model().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(engine.model_version().await.is_none());
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_version() {
        let window = ascending_series(30).candles;
        let source: Arc<dyn MarketData> = Arc::new(source_with(window, next_close(130), None));
        let store = Arc::new(ArtifactStore::with_pool(memory_pool().await, scratch_dir()).await.unwrap());
        let cache = Arc::new(PreviousDayCache::new(source.clone(), DAY, 2));
        let engine = SignalEngine::new(source, store.clone(), cache, no_wait(), 60);

        assert_eq!(engine.load_model().await.unwrap(), None);
        store.commit(&test_artifact(ModelVersion::initial(), 0.0, 0.95)).await.unwrap();
        assert_eq!(engine.load_model().await.unwrap(), Some(ModelVersion::initial()));

        let controller = EngineController::new_running();
        let kind = engine.generate_signal("EURUSD_otc", &controller.shutdown_signal()).await;
        assert_eq!(kind, SignalKind::Buy);
    }
}
