use anyhow::{anyhow, Result};
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::controller::{EngineController, ShutdownSignal};
use super::inference::SignalEngine;
use super::previous_day::PreviousDayCache;
use crate::ml::Trainer;
use crate::notifications::SignalSink;
use crate::types::Signal;

/// Time left until the next occurrence of `at` (UTC wall clock), never zero
pub fn until_next(now: DateTime<Utc>, at: NaiveTime) -> Duration {
    let today = now.date_naive().and_time(at).and_utc();
    let next = if today > now {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[derive(Debug, Clone)]
pub struct Schedule {
    pub poll_interval: Duration,
    pub retrain_at: NaiveTime,
    pub refresh_at: NaiveTime,
}

/// Owns the long-running loops: one inference loop per instrument, the
/// daily retrain and the daily previous-day refresh. All of them stop on
/// the controller's shutdown signal.
pub struct EngineRunner {
    engine: Arc<SignalEngine>,
    trainer: Arc<Trainer>,
    cache: Arc<PreviousDayCache>,
    sink: Arc<dyn SignalSink>,
    controller: Arc<EngineController>,
    instruments: Vec<String>,
    schedule: Schedule,
}

impl EngineRunner {
    pub fn new(
        engine: Arc<SignalEngine>,
        trainer: Arc<Trainer>,
        cache: Arc<PreviousDayCache>,
        sink: Arc<dyn SignalSink>,
        controller: Arc<EngineController>,
        instruments: Vec<String>,
        schedule: Schedule,
    ) -> Self {
        Self {
            engine,
            trainer,
            cache,
            sink,
            controller,
            instruments,
            schedule,
        }
    }

    /// Run until stopped. Returns an error only for fatal conditions
    /// (a committed model the engine cannot use).
    pub async fn run(self) -> Result<()> {
        let summary = self.cache.refresh(&self.instruments).await;
        if summary.refreshed == 0 && !self.instruments.is_empty() {
            warn!("No previous-day data at startup, breakouts disabled until next refresh");
        }

        let mut tasks = JoinSet::new();

        for instrument in self.instruments.clone() {
            tasks.spawn(inference_loop(
                instrument,
                self.engine.clone(),
                self.sink.clone(),
                self.controller.clone(),
                self.schedule.poll_interval,
            ));
        }
        tasks.spawn(training_loop(
            self.trainer.clone(),
            self.engine.clone(),
            self.controller.clone(),
            self.schedule.retrain_at,
        ));
        tasks.spawn(refresh_loop(
            self.cache.clone(),
            self.instruments.clone(),
            self.controller.shutdown_signal(),
            self.schedule.refresh_at,
        ));

        info!(
            "Engine running: {} instruments, poll every {:?}, retrain at {}, refresh at {}",
            self.instruments.len(),
            self.schedule.poll_interval,
            self.schedule.retrain_at,
            self.schedule.refresh_at
        );

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| anyhow!("Engine task panicked: {}", e)).and_then(|r| r);
            if let Err(e) = result {
                error!("{:#}", e);
                let _ = self.controller.stop();
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        let state = self.controller.get_state();
        info!(
            "Engine {} after {}s, {} signals emitted",
            state.status, state.uptime_seconds, state.signals_emitted
        );
        outcome
    }
}

async fn inference_loop(
    instrument: String,
    engine: Arc<SignalEngine>,
    sink: Arc<dyn SignalSink>,
    controller: Arc<EngineController>,
    poll_interval: Duration,
) -> Result<()> {
    let mut shutdown = controller.shutdown_signal();

    while !shutdown.is_shutdown() {
        let kind = engine.generate_signal(&instrument, &shutdown).await;
        if kind.is_actionable() {
            controller.increment_signals();
        }
        sink.deliver(&Signal::new(instrument.clone(), kind)).await;

        if !shutdown.sleep(poll_interval).await {
            break;
        }
    }
    Ok(())
}

async fn training_loop(
    trainer: Arc<Trainer>,
    engine: Arc<SignalEngine>,
    controller: Arc<EngineController>,
    retrain_at: NaiveTime,
) -> Result<()> {
    let mut shutdown = controller.shutdown_signal();

    if engine.model_version().await.is_none() {
        info!("No accepted model, performing initial training");
        retrain(&trainer, &engine).await?;
    }

    loop {
        let wait = until_next(Utc::now(), retrain_at);
        info!("Next retrain in {}m", wait.as_secs() / 60);
        if !shutdown.sleep(wait).await {
            return Ok(());
        }
        retrain(&trainer, &engine).await?;
    }
}

/// One training run, reloading the engine after a commit. Errors only when
/// the committed model cannot be served.
async fn retrain(trainer: &Trainer, engine: &SignalEngine) -> Result<()> {
    match trainer.train().await {
        Ok(report) if report.committed => {
            if let Err(e) = engine.load_model().await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                error!("Reload after training failed: {}", e);
            }
        }
        Ok(_) => {}
        Err(e) => error!("Training run failed: {:#}", e),
    }
    Ok(())
}

async fn refresh_loop(
    cache: Arc<PreviousDayCache>,
    instruments: Vec<String>,
    mut shutdown: ShutdownSignal,
    refresh_at: NaiveTime,
) -> Result<()> {
    loop {
        if !shutdown.sleep(until_next(Utc::now(), refresh_at)).await {
            return Ok(());
        }
        cache.refresh(&instruments).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, InferenceSettings};
    use crate::market::{MarketData, MockMarketData};
    use crate::ml::ArtifactStore;
    use crate::notifications::SignalNotifier;
    use crate::ml::persistence::ModelVersion;
    use crate::test_support::{
        ascending_series, candle_at, fast_training_config, memory_pool, scratch_dir, series_from_closes, test_artifact,
    };
    use crate::types::SignalKind;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_until_next_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap();
        assert_eq!(until_next(now, time(23, 0)), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_until_next_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(until_next(now, time(23, 0)), Duration::from_secs(24 * 3600));

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(until_next(now, time(0, 0)), Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn test_runner_emits_breakouts_until_stopped() {
        let mut source = MockMarketData::new();
        source.expect_get_historical_candles().returning(|_, interval, _| {
            if interval == 86_400 {
                Ok(vec![
                    candle_at(-2880, dec!(110), dec!(100), dec!(105)),
                    candle_at(-1440, dec!(108), dec!(104), dec!(105)),
                ])
            } else {
                let mut window = series_from_closes("EURUSD_otc", &[105; 29]).candles;
                window.push(candle_at(29, dec!(111), dec!(101), dec!(106)));
                Ok(window)
            }
        });
        let source: Arc<dyn MarketData> = Arc::new(source);
        let store = Arc::new(ArtifactStore::with_pool(memory_pool().await, scratch_dir()).await.unwrap());
        let cache = Arc::new(PreviousDayCache::new(source.clone(), 86_400, 2));
        let engine = Arc::new(SignalEngine::new(
            source.clone(),
            store.clone(),
            cache.clone(),
            InferenceSettings::default(),
            60,
        ));
        // an accepted model skips the startup training run
        store.commit(&test_artifact(ModelVersion::initial(), 0.0, 0.5)).await.unwrap();
        engine.load_model().await.unwrap();
        let trainer = Arc::new(Trainer::new(source, store, AppConfig::default()));
        let notifier = Arc::new(SignalNotifier::new(10));
        let controller = Arc::new(EngineController::new_running());

        let runner = EngineRunner::new(
            engine,
            trainer,
            cache,
            notifier.clone(),
            controller.clone(),
            vec!["EURUSD_otc".to_string()],
            Schedule {
                poll_interval: Duration::from_millis(10),
                retrain_at: time(23, 0),
                refresh_at: time(0, 0),
            },
        );
        let handle = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let recent = notifier.recent().await;
        assert!(!recent.is_empty());
        assert!(recent.iter().all(|s| s.kind == SignalKind::Breakout));
        assert!(controller.get_state().signals_emitted >= recent.len() as u64);
    }

    #[tokio::test]
    async fn test_initial_training_without_waiting_for_schedule() {
        let mut source = MockMarketData::new();
        source
            .expect_get_instruments()
            .returning(|| Ok(vec!["EURUSD_otc".to_string()]));
        source
            .expect_get_historical_candles()
            .returning(|_, _, _| Ok(ascending_series(25).candles));
        let source: Arc<dyn MarketData> = Arc::new(source);

        let config = fast_training_config();
        let store = Arc::new(ArtifactStore::with_pool(memory_pool().await, scratch_dir()).await.unwrap());
        let cache = Arc::new(PreviousDayCache::new(source.clone(), 86_400, 2));
        let engine = Arc::new(SignalEngine::new(
            source.clone(),
            store.clone(),
            cache.clone(),
            config.inference.clone(),
            60,
        ));
        assert!(engine.model_version().await.is_none());

        let trainer = Arc::new(Trainer::new(source, store.clone(), config));
        let controller = Arc::new(EngineController::new_running());
        let runner = EngineRunner::new(
            engine.clone(),
            trainer,
            cache,
            Arc::new(SignalNotifier::default()),
            controller.clone(),
            vec!["EURUSD_otc".to_string()],
            Schedule {
                poll_interval: Duration::from_secs(3600),
                // next scheduled run is hours away whatever the wall clock says
                retrain_at: (Utc::now() - chrono::Duration::minutes(1)).time(),
                refresh_at: time(0, 0),
            },
        );
        let handle = tokio::spawn(runner.run());

        let loaded = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if let Some(version) = engine.model_version().await {
                    return version;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(loaded, ModelVersion::initial());
        assert_eq!(store.list().await.unwrap().len(), 1);

        controller.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
