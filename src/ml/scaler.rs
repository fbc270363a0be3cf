use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Zero-mean / unit-variance normalizer fitted on the training matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(features: &Array2<f64>) -> Result<Self> {
        if features.nrows() == 0 {
            return Err(anyhow!("Cannot fit scaler on an empty matrix"));
        }
        let mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow!("Cannot fit scaler on an empty matrix"))?;
        let std = features.std_axis(Axis(0), 0.0);

        // constant columns keep their offset but are not rescaled
        let scale = std.iter().map(|s| if *s > 1e-10 { *s } else { 1.0 }).collect();

        Ok(Self {
            mean: mean.to_vec(),
            scale,
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        if features.ncols() != self.n_features() {
            return Err(anyhow!(
                "Scaler fitted on {} features, got {}",
                self.n_features(),
                features.ncols()
            ));
        }
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        Ok((features - &mean) / &scale)
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.n_features() {
            return Err(anyhow!(
                "Scaler fitted on {} features, got {}",
                self.n_features(),
                row.len()
            ));
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }
}
