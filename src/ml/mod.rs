pub mod features;
pub mod labels;
pub mod lstm;
pub mod persistence;
pub mod scaler;
pub mod trainer;

pub use features::{compute_features, Feature, FeatureSchema};
pub use lstm::SequenceClassifier;
pub use persistence::{ArtifactStore, ModelArtifact};
pub use scaler::StandardScaler;
pub use trainer::Trainer;
