//! Feature transforms
//!
//! Optional transforms applied to an already-extracted feature matrix. They
//! only ever see extractor output, never day records or hidden state.

use serde::{Deserialize, Serialize};

/// Swappable transform over a row-major feature matrix
pub trait FeatureTransform: Send + Sync {
    /// Learn parameters from training rows
    fn fit(&mut self, rows: &[Vec<f64>]);

    /// Apply the learned transform
    fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>>;

    /// Column names after the transform
    fn output_columns(&self, input: &[String]) -> Vec<String> {
        input.to_vec()
    }

    fn fit_transform(&mut self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        self.fit(rows);
        self.transform(rows)
    }
}

/// Per-column standardization to zero mean and unit variance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        !self.means.is_empty()
    }
}

impl FeatureTransform for StandardScaler {
    fn fit(&mut self, rows: &[Vec<f64>]) {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len().max(1) as f64;
        self.means = (0..width)
            .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        self.stds = (0..width)
            .map(|j| {
                let mean = self.means[j];
                let variance = rows.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n;
                let std = variance.sqrt();
                // Constant columns pass through centered
                if std > 1e-12 {
                    std
                } else {
                    1.0
                }
            })
            .collect();
    }

    fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| match (self.means.get(j), self.stds.get(j)) {
                        (Some(mean), Some(std)) => (v - mean) / std,
                        _ => *v,
                    })
                    .collect()
            })
            .collect()
    }
}
