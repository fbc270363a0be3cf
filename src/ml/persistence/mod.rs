use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::features::{FeatureSchema, FeatureVector};
use super::lstm::SequenceClassifier;
use super::scaler::StandardScaler;
use crate::error::EngineError;

/// Registry key of the classifier family stored here
pub const MODEL_TYPE: &str = "lstm";

/// Semantic version for models
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl FromStr for ModelVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow!("Invalid version format: {}", s));
        }

        Ok(Self {
            major: parts[0].parse()?,
            minor: parts[1].parse()?,
            patch: parts[2].parse()?,
        })
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Validation metrics recorded alongside each artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub validation_accuracy: f64,
    pub validation_loss: f64,
    pub train_samples: usize,
    pub validation_samples: usize,
}

impl ModelMetrics {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Everything inference needs from one training run, persisted as a single blob
/// so the scaler and classifier can never be mixed across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,
    pub feature_schema: FeatureSchema,
    pub metrics: ModelMetrics,
    pub scaler: StandardScaler,
    pub classifier: SequenceClassifier,
}

impl ModelArtifact {
    pub fn validation_accuracy(&self) -> f64 {
        self.metrics.validation_accuracy
    }

    /// Probability that the next close is higher, for one unscaled feature vector
    pub fn predict_up_probability(&self, features: &FeatureVector) -> Result<f64> {
        let projected = features.project(&self.feature_schema);
        let scaled = self.scaler.transform_row(&projected)?;
        self.classifier.predict_one(&scaled)
    }

    fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.feature_schema.is_empty() {
            return Err("empty feature schema".to_string());
        }
        let width = self.feature_schema.len();
        if self.scaler.n_features() != width || self.classifier.input_size() != width {
            return Err(format!(
                "schema has {} features, scaler {}, classifier {}",
                width,
                self.scaler.n_features(),
                self.classifier.input_size()
            ));
        }
        Ok(())
    }
}

/// Model record from database
#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub id: i64,
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,
    pub metrics: ModelMetrics,
    pub model_path: PathBuf,
    pub is_active: bool,
}

impl ModelRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let version_str: String = row.get("version");
        let metrics_json: String = row.get("metrics_json");
        let trained_at_str: String = row.get("trained_at");

        Ok(Self {
            id: row.get("id"),
            version: ModelVersion::from_str(&version_str)?,
            trained_at: DateTime::parse_from_rfc3339(&trained_at_str)?.with_timezone(&Utc),
            metrics: ModelMetrics::from_json(&metrics_json)?,
            model_path: PathBuf::from(row.get::<String, _>("model_path")),
            is_active: row.get::<i32, _>("is_active") == 1,
        })
    }
}

/// Versioned artifact blobs on disk plus the `ml_models` registry.
///
/// Blobs are immutable once written; the active row in the registry is the
/// "current" pointer and is swapped inside a single transaction, so `load`
/// sees either the previous artifact or the new one in full.
pub struct ArtifactStore {
    pool: SqlitePool,
    models_dir: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the registry database at `database_url`
    pub async fn open(database_url: &str, models_dir: impl Into<PathBuf>) -> Result<Self> {
        info!("Opening model registry at: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, models_dir).await
    }

    pub async fn with_pool(pool: SqlitePool, models_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            pool,
            models_dir: models_dir.into(),
        };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ml_models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_type TEXT NOT NULL,
                version TEXT NOT NULL,
                trained_at TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                model_path TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                UNIQUE (model_type, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn blob_path(&self, version: &ModelVersion) -> PathBuf {
        self.models_dir.join(format!("{}_{}.json", MODEL_TYPE, version))
    }

    /// Patch bump of the newest registered version, or 1.0.0
    pub async fn next_version(&self) -> Result<ModelVersion> {
        let row = sqlx::query(
            r#"
            SELECT version FROM ml_models
            WHERE model_type = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(MODEL_TYPE)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let version_str: String = row.get("version");
                Ok(ModelVersion::from_str(&version_str)?.bump_patch())
            }
            None => Ok(ModelVersion::initial()),
        }
    }

    /// Stage the blob, then register and activate it in one transaction;
    /// the staged blob is moved into place just before the transaction
    /// commits. The only mutator of the store.
    ///
    /// A blob left behind by an earlier failed commit is not registered and
    /// gets overwritten; a registered version is never replaced.
    pub async fn commit(&self, artifact: &ModelArtifact) -> Result<ModelRecord> {
        artifact
            .check_consistency()
            .map_err(|reason| anyhow!("Refusing to commit inconsistent artifact: {}", reason))?;

        tokio::fs::create_dir_all(&self.models_dir).await?;
        let model_path = self.blob_path(&artifact.version);

        let json = serde_json::to_vec(artifact)?;
        let staged_path = self
            .models_dir
            .join(format!(".{}_{}.{}.tmp", MODEL_TYPE, artifact.version, Uuid::new_v4()));
        tokio::fs::write(&staged_path, &json).await?;
        debug!("Staged {} bytes at {}", json.len(), staged_path.display());

        let registered = self.register(artifact, &staged_path, &model_path).await;
        if registered.is_err() {
            // already moved when only the final commit failed
            let _ = tokio::fs::remove_file(&staged_path).await;
        }
        let id = registered?;

        info!(
            "Committed {} model v{} (validation accuracy {:.3}) to {}",
            MODEL_TYPE,
            artifact.version,
            artifact.validation_accuracy(),
            model_path.display()
        );

        Ok(ModelRecord {
            id,
            version: artifact.version.clone(),
            trained_at: artifact.trained_at,
            metrics: artifact.metrics.clone(),
            model_path,
            is_active: true,
        })
    }

    async fn register(&self, artifact: &ModelArtifact, staged_path: &Path, model_path: &Path) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        // fails on an already registered version, before any file is touched
        let id = sqlx::query(
            r#"
            INSERT INTO ml_models (model_type, version, trained_at, metrics_json, model_path, is_active)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(MODEL_TYPE)
        .bind(artifact.version.to_string())
        .bind(artifact.trained_at.to_rfc3339())
        .bind(artifact.metrics.to_json()?)
        .bind(model_path.to_string_lossy().to_string())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE ml_models SET is_active = 0 WHERE model_type = ?")
            .bind(MODEL_TYPE)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE ml_models SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tokio::fs::rename(staged_path, model_path).await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn active_record(&self) -> Result<Option<ModelRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, version, trained_at, metrics_json, model_path, is_active
            FROM ml_models
            WHERE model_type = ? AND is_active = 1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(MODEL_TYPE)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(ModelRecord::from_row).transpose()
    }

    /// Current accepted artifact. `Ok(None)` when nothing was ever committed;
    /// an unreadable blob is an `EngineError::ArtifactCorrupt`.
    pub async fn load(&self) -> Result<Option<ModelArtifact>> {
        let Some(record) = self.active_record().await? else {
            return Ok(None);
        };

        let corrupt = |reason: String| EngineError::ArtifactCorrupt {
            path: record.model_path.clone(),
            reason,
        };

        let bytes = tokio::fs::read(&record.model_path)
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        artifact.check_consistency().map_err(corrupt)?;

        if artifact.version != record.version {
            return Err(corrupt(format!(
                "blob holds v{} but registry points at v{}",
                artifact.version, record.version
            ))
            .into());
        }

        debug!("Loaded {} model v{} from {}", MODEL_TYPE, artifact.version, record.model_path.display());
        Ok(Some(artifact))
    }

    /// Registry history, newest first
    pub async fn list(&self) -> Result<Vec<ModelRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, trained_at, metrics_json, model_path, is_active
            FROM ml_models
            WHERE model_type = ?
            ORDER BY id DESC
            "#,
        )
        .bind(MODEL_TYPE)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ModelRecord::from_row).collect()
    }
}
