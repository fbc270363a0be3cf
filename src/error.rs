use std::path::PathBuf;
use thiserror::Error;

use crate::ml::FeatureSchema;

/// Failure classes of the signal engine.
///
/// Only `SchemaMismatch` is fatal (it stops inference startup); the others
/// degrade to HOLD or to a skipped instrument inside the public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Insufficient data for {instrument}: {reason}")]
    DataUnavailable { instrument: String, reason: String },

    #[error("Feature schema mismatch: engine extracts {expected}, artifact was trained on {found}")]
    SchemaMismatch {
        expected: FeatureSchema,
        found: FeatureSchema,
    },

    #[error("Model artifact {path} is unreadable: {reason}")]
    ArtifactCorrupt { path: PathBuf, reason: String },

    #[error("Market data fetch failed for {instrument}: {reason}")]
    Fetch { instrument: String, reason: String },
}

impl EngineError {
    pub fn data_unavailable(instrument: &str, reason: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            instrument: instrument.to_string(),
            reason: reason.into(),
        }
    }

    pub fn fetch(instrument: &str, reason: impl std::fmt::Display) -> Self {
        EngineError::Fetch {
            instrument: instrument.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::SchemaMismatch { .. })
    }
}
