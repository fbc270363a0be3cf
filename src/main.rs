mod config;
mod engine;
mod error;
mod indicators;
mod market;
mod ml;
mod notifications;
mod types;

#[cfg(test)]
mod test_support;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{load_config, parse_time_of_day, AppConfig};
use engine::{EngineController, EngineRunner, PreviousDayCache, Schedule, SignalEngine};
use indicators::RSIZone;
use market::{fetch_series, select_instruments, FileMarketData, MarketData};
use ml::{compute_features, ArtifactStore, Trainer};
use notifications::SignalNotifier;

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(version = "0.1.0")]
#[command(about = "BUY / SELL / HOLD / BREAKOUT signals for OTC instruments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "signal_engine.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one training pass and commit the model if it is accepted
    Train,
    /// Run the inference, retrain and previous-day loops until Ctrl-C
    Run,
    /// Evaluate a single instrument once and print the signal
    Signal {
        /// Instrument name, e.g. EURUSD_otc
        #[arg(short, long)]
        instrument: String,
    },
    /// Print the latest feature rows of an instrument
    Features {
        #[arg(short, long)]
        instrument: String,

        /// Number of rows to print
        #[arg(short, long, default_value = "5")]
        rows: usize,
    },
    /// List registered model versions
    Models,
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs)?;

    info!("Signal Engine v0.1.0");
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Train => train(config).await?,
        Commands::Run => run(config).await?,
        Commands::Signal { instrument } => single_signal(config, &instrument).await?,
        Commands::Features { instrument, rows } => show_features(config, &instrument, rows).await?,
        Commands::Models => list_models(config).await?,
    }

    Ok(())
}

fn market_data(config: &AppConfig) -> Arc<dyn MarketData> {
    let source = FileMarketData::new(&config.data.source_dir);
    info!("Reading candles from {}", source.dir().display());
    Arc::new(source)
}

async fn open_store(config: &AppConfig) -> Result<Arc<ArtifactStore>> {
    let store = ArtifactStore::open(&config.storage.database_url, &config.storage.models_dir).await?;
    Ok(Arc::new(store))
}

fn build_engine(
    config: &AppConfig,
    source: Arc<dyn MarketData>,
    store: Arc<ArtifactStore>,
) -> (Arc<PreviousDayCache>, Arc<SignalEngine>) {
    let cache = Arc::new(PreviousDayCache::new(
        source.clone(),
        config.data.daily_interval_seconds,
        config.data.previous_day_candles,
    ));
    let engine = Arc::new(SignalEngine::new(
        source,
        store,
        cache.clone(),
        config.inference.clone(),
        config.data.interval_seconds,
    ));
    (cache, engine)
}

/// Stop the controller on Ctrl-C
fn stop_on_ctrl_c(controller: Arc<EngineController>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            let _ = controller.stop();
        }
    });
}

async fn train(config: AppConfig) -> Result<()> {
    let source = market_data(&config);
    let store = open_store(&config).await?;
    let trainer = Trainer::new(source, store, config);

    let report = trainer.train().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    let source = market_data(&config);
    let store = open_store(&config).await?;
    let (cache, engine) = build_engine(&config, source.clone(), store.clone());

    // an incompatible model is fatal before any loop starts
    engine.load_model().await?;

    let instruments = select_instruments(
        source.as_ref(),
        config.general.max_instruments,
        &config.general.fallback_instruments,
    )
    .await;
    if instruments.is_empty() {
        return Err(anyhow!("No instruments available"));
    }
    info!("Instruments: {}", instruments.join(", "));

    let schedule = Schedule {
        poll_interval: config.inference.poll_interval(),
        retrain_at: parse_time_of_day(&config.training.retrain_at).map_err(|e| anyhow!(e))?,
        refresh_at: parse_time_of_day(&config.data.refresh_at).map_err(|e| anyhow!(e))?,
    };

    let controller = Arc::new(EngineController::new_running());
    stop_on_ctrl_c(controller.clone());

    let notifier = Arc::new(SignalNotifier::new(config.inference.history_size));
    let trainer = Arc::new(Trainer::new(source, store, config));
    let runner = EngineRunner::new(engine, trainer, cache, notifier.clone(), controller, instruments, schedule);

    let outcome = runner.run().await;

    let recent = notifier.recent().await;
    if !recent.is_empty() {
        info!("Last {} signals:", recent.len());
        for signal in &recent {
            info!("  {}", signal);
        }
    }
    outcome
}

async fn single_signal(config: AppConfig, instrument: &str) -> Result<()> {
    let source = market_data(&config);
    let store = open_store(&config).await?;
    let (cache, engine) = build_engine(&config, source, store);

    if engine.load_model().await?.is_none() {
        warn!("Only breakouts can be reported without a model");
    }
    let summary = cache.refresh(&[instrument.to_string()]).await;
    if summary.failed > 0 {
        warn!("No previous-day data for {}", instrument);
    }

    let controller = Arc::new(EngineController::new_running());
    stop_on_ctrl_c(controller.clone());

    let kind = engine.generate_signal(instrument, &controller.shutdown_signal()).await;
    println!("{}", types::Signal::new(instrument, kind));
    Ok(())
}

async fn show_features(config: AppConfig, instrument: &str, rows: usize) -> Result<()> {
    let source = market_data(&config);
    let series = fetch_series(
        source.as_ref(),
        instrument,
        config.data.interval_seconds,
        config.inference.window_candles,
    )
    .await?;

    let frame = compute_features(&series);
    if frame.is_empty() {
        error!("{}: {} candles, not enough for features", instrument, series.len());
        return Ok(());
    }

    println!(
        "{:<20} {:>12} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}  zone",
        "timestamp", "close", "rsi", "macd", "macd_diff", "atr", "vol", "bb_width"
    );
    let skip = frame.len().saturating_sub(rows);
    for row in frame.iter().skip(skip) {
        let f = &row.features;
        println!(
            "{:<20} {:>12.5} {:>8.2} {:>10.6} {:>10.6} {:>10.6} {:>10.6} {:>10.6}  {:?}",
            row.timestamp.format("%Y-%m-%d %H:%M"),
            row.close,
            f.rsi,
            f.macd,
            f.macd_diff,
            f.atr,
            f.volatility,
            f.bb_width,
            RSIZone::from_value(f.rsi)
        );
    }
    Ok(())
}

async fn list_models(config: AppConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let records = store.list().await?;
    if records.is_empty() {
        println!("No models in {}", store.models_dir().display());
        return Ok(());
    }

    println!(
        "{:>4} {:<10} {:<20} {:>9} {:>9} {:>7}  active",
        "id", "version", "trained_at", "accuracy", "loss", "samples"
    );
    for record in records {
        println!(
            "{:>4} {:<10} {:<20} {:>9.4} {:>9.4} {:>7}  {}",
            record.id,
            record.version.to_string(),
            record.trained_at.format("%Y-%m-%d %H:%M"),
            record.metrics.validation_accuracy,
            record.metrics.validation_loss,
            record.metrics.train_samples + record.metrics.validation_samples,
            if record.is_active { "*" } else { "" }
        );
    }
    Ok(())
}
