use anyhow::{anyhow, Result};
use chrono::Utc;
use ndarray::{s, Array3, Axis};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::features::{compute_features, FeatureSchema};
use super::labels::{build_labels, TrainingDataset};
use super::lstm::{ClassifierConfig, Evaluation, FitOptions, SequenceClassifier};
use super::persistence::{ArtifactStore, ModelArtifact, ModelMetrics, ModelVersion};
use super::scaler::StandardScaler;
use crate::config::AppConfig;
use crate::market::{fetch_series, select_instruments, MarketData};

/// Outcome of one training run. "No data" and "below threshold" are normal
/// outcomes reported here with `committed == false`.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub instruments_used: Vec<String>,
    pub instruments_skipped: Vec<String>,
    pub samples: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub validation_accuracy: Option<f64>,
    pub validation_loss: Option<f64>,
    pub committed: bool,
    pub version: Option<ModelVersion>,
}

impl TrainingReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            instruments_used: Vec::new(),
            instruments_skipped: Vec::new(),
            samples: 0,
            train_samples: 0,
            validation_samples: 0,
            validation_accuracy: None,
            validation_loss: None,
            committed: false,
            version: None,
        }
    }
}

/// Fits scaler + classifier on fresh history and commits the result when
/// validation accuracy clears the acceptance gate.
pub struct Trainer {
    source: Arc<dyn MarketData>,
    store: Arc<ArtifactStore>,
    config: AppConfig,
    schema: FeatureSchema,
}

impl Trainer {
    pub fn new(source: Arc<dyn MarketData>, store: Arc<ArtifactStore>, config: AppConfig) -> Self {
        Self {
            source,
            store,
            config,
            schema: FeatureSchema::canonical(),
        }
    }

    async fn collect_dataset(&self, report: &mut TrainingReport) -> TrainingDataset {
        let general = &self.config.general;
        let instruments =
            select_instruments(self.source.as_ref(), general.max_instruments, &general.fallback_instruments).await;

        let mut dataset = TrainingDataset::new();
        for instrument in instruments {
            let series = match fetch_series(
                self.source.as_ref(),
                &instrument,
                self.config.data.interval_seconds,
                self.config.training.candles_per_instrument,
            )
            .await
            {
                Ok(series) => series,
                Err(e) => {
                    warn!("Skipping {}: {}", instrument, e);
                    report.instruments_skipped.push(instrument);
                    continue;
                }
            };

            let frame = compute_features(&series);
            let examples = build_labels(&frame, &series.closes());
            if examples.is_empty() {
                warn!("Skipping {}: no usable rows from {} candles", instrument, series.len());
                report.instruments_skipped.push(instrument);
                continue;
            }

            dataset.push_instrument(&instrument, examples);
        }

        report.instruments_used = dataset.instruments.clone();
        dataset
    }

    /// One training run
    pub async fn train(&self) -> Result<TrainingReport> {
        let mut report = TrainingReport::new(Uuid::new_v4());
        info!("Training run {} started", report.run_id);

        let dataset = self.collect_dataset(&mut report).await;
        report.samples = dataset.len();
        if dataset.is_empty() {
            warn!("Training run {}: no usable data, nothing committed", report.run_id);
            return Ok(report);
        }
        debug!("{} samples, {} labelled up", dataset.len(), dataset.positives());

        let training = &self.config.training;
        let n_train = (dataset.len() as f64 * (1.0 - training.validation_split)) as usize;
        let n_validation = dataset.len() - n_train;
        if n_train == 0 || n_validation == 0 {
            warn!(
                "Training run {}: {} samples is not enough for a train/validation split, nothing committed",
                report.run_id,
                dataset.len()
            );
            return Ok(report);
        }
        report.train_samples = n_train;
        report.validation_samples = n_validation;

        let (matrix, labels) = dataset.to_matrix(&self.schema);
        let scaler = StandardScaler::fit(&matrix)?;
        // single-timestep sequences: [samples, 1, features]
        let x = scaler.transform(&matrix)?.insert_axis(Axis(1));

        let (classifier, evaluation) = self.fit_classifier(x, labels, n_train).await?;
        report.validation_accuracy = Some(evaluation.accuracy);
        report.validation_loss = Some(evaluation.loss);

        if evaluation.accuracy > training.acceptance_threshold {
            let artifact = ModelArtifact {
                version: self.store.next_version().await?,
                trained_at: Utc::now(),
                feature_schema: self.schema.clone(),
                metrics: ModelMetrics {
                    validation_accuracy: evaluation.accuracy,
                    validation_loss: evaluation.loss,
                    train_samples: n_train,
                    validation_samples: n_validation,
                },
                scaler,
                classifier,
            };
            let record = self.store.commit(&artifact).await?;
            report.committed = true;
            report.version = Some(record.version);
        }

        info!(
            "Training run {}: {} samples from {:?}, validation accuracy {:.3}, loss {:.4}, {}",
            report.run_id,
            report.samples,
            report.instruments_used,
            evaluation.accuracy,
            evaluation.loss,
            match &report.version {
                Some(version) => format!("committed v{}", version),
                None => format!(
                    "not above {:.2}, previous model kept",
                    training.acceptance_threshold
                ),
            }
        );

        Ok(report)
    }

    /// Chronological split (no shuffling across the boundary), then fit on a
    /// blocking thread.
    async fn fit_classifier(
        &self,
        x: Array3<f64>,
        labels: Vec<f64>,
        n_train: usize,
    ) -> Result<(SequenceClassifier, Evaluation)> {
        let x_train = x.slice(s![..n_train, .., ..]).to_owned();
        let x_validation = x.slice(s![n_train.., .., ..]).to_owned();
        let (y_train, y_validation) = labels.split_at(n_train);
        let (y_train, y_validation) = (y_train.to_vec(), y_validation.to_vec());

        let model = &self.config.model;
        let classifier_config = ClassifierConfig {
            input_size: self.schema.len(),
            lstm1_units: model.lstm1_units,
            lstm2_units: model.lstm2_units,
            dense_units: model.dense_units,
            dropout: model.dropout,
        };
        let options = FitOptions {
            epochs: self.config.training.epochs,
            batch_size: self.config.training.batch_size,
            learning_rate: self.config.training.learning_rate,
            seed: self.config.training.seed,
        };

        tokio::task::spawn_blocking(move || {
            let mut classifier = SequenceClassifier::new(classifier_config, options.seed);
            classifier.fit(&x_train, &y_train, &options)?;
            let evaluation = classifier.evaluate(&x_validation, &y_validation)?;
            Ok::<_, anyhow::Error>((classifier, evaluation))
        })
        .await
        .map_err(|e| anyhow!("Training task failed: {}", e))?
    }
}
