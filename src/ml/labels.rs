use chrono::{DateTime, Utc};
use ndarray::Array2;

use super::features::{FeatureFrame, FeatureSchema, FeatureVector};

/// Feature vector with its next-candle direction: 1 when the next close is
/// strictly higher, 0 otherwise (ties count as "not increased").
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub timestamp: DateTime<Utc>,
    pub features: FeatureVector,
    pub label: u8,
}

/// Label every frame row that has a following candle.
///
/// `closes` is the close column of the series the frame was computed from;
/// the row for the final candle has no successor and is dropped.
pub fn build_labels(frame: &FeatureFrame, closes: &[f64]) -> Vec<LabeledExample> {
    frame
        .iter()
        .filter_map(|row| {
            let current = *closes.get(row.index)?;
            let next = *closes.get(row.index + 1)?;
            Some(LabeledExample {
                timestamp: row.timestamp,
                features: row.features,
                label: u8::from(next > current),
            })
        })
        .collect()
}

/// Per-instrument label slices, concatenated in a fixed instrument order
#[derive(Debug, Clone, Default)]
pub struct TrainingDataset {
    pub examples: Vec<LabeledExample>,
    pub instruments: Vec<String>,
}

impl TrainingDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_instrument(&mut self, instrument: &str, slice: Vec<LabeledExample>) {
        self.instruments.push(instrument.to_string());
        self.examples.extend(slice);
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.examples.iter().filter(|e| e.label == 1).count()
    }

    /// Feature matrix in schema order plus the label column
    pub fn to_matrix(&self, schema: &FeatureSchema) -> (Array2<f64>, Vec<f64>) {
        let mut features = Array2::<f64>::zeros((self.examples.len(), schema.len()));
        let mut labels = Vec::with_capacity(self.examples.len());

        for (i, example) in self.examples.iter().enumerate() {
            for (j, value) in example.features.project(schema).into_iter().enumerate() {
                features[[i, j]] = value;
            }
            labels.push(f64::from(example.label));
        }

        (features, labels)
    }
}
