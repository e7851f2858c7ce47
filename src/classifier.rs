//! Classifier capability
//!
//! The evaluator only needs `fit` and `predict`. [`LogisticRegression`] is the
//! reference implementation used for the regularization sweep.

use crate::config::EvaluatorConfig;
use crate::error::SimError;
use crate::transform::{FeatureTransform, StandardScaler};

/// Trainable classifier over a dense feature matrix and class indices
pub trait Classifier: Send {
    fn fit(&mut self, rows: &[Vec<f64>], labels: &[usize]) -> Result<(), SimError>;

    fn predict(&self, rows: &[Vec<f64>]) -> Vec<usize>;
}

/// Gradient tolerance for early stopping
const GRADIENT_TOLERANCE: f64 = 1e-6;

/// L2-regularized multinomial logistic regression on standardized features
///
/// `c` is the inverse regularization strength: the objective is
/// `c · Σ wᵢ·lossᵢ + ½‖W‖²`, minimized by full-batch gradient descent from zero
/// weights, so fitting is deterministic.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    c: f64,
    max_iterations: usize,
    learning_rate: f64,
    balanced: bool,
    scaler: StandardScaler,
    weights: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
}

impl LogisticRegression {
    pub fn new(c: f64) -> Self {
        Self {
            c,
            max_iterations: 500,
            learning_rate: 1.0,
            balanced: true,
            scaler: StandardScaler::new(),
            weights: Vec::new(),
            intercepts: Vec::new(),
        }
    }

    pub fn with_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_balanced_weights(mut self, balanced: bool) -> Self {
        self.balanced = balanced;
        self
    }

    /// Build classifiers for each regularization candidate from evaluator settings
    pub fn factory(config: &EvaluatorConfig) -> impl Fn(f64) -> LogisticRegression {
        let max_iterations = config.max_iterations;
        let learning_rate = config.learning_rate;
        let balanced = config.balanced_class_weights;
        move |c| {
            LogisticRegression::new(c)
                .with_iterations(max_iterations)
                .with_learning_rate(learning_rate)
                .with_balanced_weights(balanced)
        }
    }

    pub fn regularization(&self) -> f64 {
        self.c
    }

    fn logits(&self, row: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.intercepts)
            .map(|(w, b)| b + w.iter().zip(row).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect()
    }

    /// Per-sample weights; balanced weights are `n / (k · count(class))`
    fn sample_weights(&self, labels: &[usize], n_classes: usize) -> Vec<f64> {
        if !self.balanced {
            return vec![1.0; labels.len()];
        }
        let mut counts = vec![0usize; n_classes];
        for &y in labels {
            counts[y] += 1;
        }
        let present = counts.iter().filter(|c| **c > 0).count().max(1) as f64;
        let n = labels.len() as f64;
        labels
            .iter()
            .map(|&y| n / (present * counts[y] as f64))
            .collect()
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, rows: &[Vec<f64>], labels: &[usize]) -> Result<(), SimError> {
        if rows.is_empty() {
            return Err(SimError::EmptyDataset(
                "cannot fit a classifier on zero rows".to_string(),
            ));
        }
        if rows.len() != labels.len() {
            return Err(SimError::ShapeMismatch(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(SimError::ShapeMismatch(
                "feature rows have inconsistent widths".to_string(),
            ));
        }

        let x = self.scaler.fit_transform(rows);
        let n_classes = labels.iter().copied().max().unwrap_or(0) + 1;
        let sample_weights = self.sample_weights(labels, n_classes);
        let total_weight: f64 = sample_weights.iter().sum();

        // Step bounded by the inverse Lipschitz constant of the objective
        let trace: f64 = x.iter().flatten().map(|v| v * v).sum::<f64>() / rows.len() as f64;
        let lipschitz = 0.5 * (trace + 1.0) + 1.0 / (self.c * total_weight);
        let step = self.learning_rate / lipschitz;

        self.weights = vec![vec![0.0; width]; n_classes];
        self.intercepts = vec![0.0; n_classes];

        for _ in 0..self.max_iterations {
            let mut grad_w = vec![vec![0.0; width]; n_classes];
            let mut grad_b = vec![0.0; n_classes];

            for ((row, &y), &weight) in x.iter().zip(labels).zip(&sample_weights) {
                let probs = softmax(&self.logits(row));
                for (class, p) in probs.iter().enumerate() {
                    let residual = weight * (p - if class == y { 1.0 } else { 0.0 });
                    grad_b[class] += residual;
                    for (g, xi) in grad_w[class].iter_mut().zip(row) {
                        *g += residual * xi;
                    }
                }
            }

            let mut max_grad: f64 = 0.0;
            for class in 0..n_classes {
                grad_b[class] /= total_weight;
                max_grad = max_grad.max(grad_b[class].abs());
                self.intercepts[class] -= step * grad_b[class];
                for j in 0..width {
                    let g = grad_w[class][j] / total_weight
                        + self.weights[class][j] / (self.c * total_weight);
                    max_grad = max_grad.max(g.abs());
                    self.weights[class][j] -= step * g;
                }
            }
            if max_grad < GRADIENT_TOLERANCE {
                break;
            }
        }
        Ok(())
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Vec<usize> {
        self.scaler
            .transform(rows)
            .iter()
            .map(|row| argmax(&self.logits(row)))
            .collect()
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value, lowest index on ties
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let jitter = (i % 5) as f64 * 0.1;
            rows.push(vec![1.0 + jitter, 0.0]);
            labels.push(0);
            rows.push(vec![-1.0 - jitter, 0.5]);
            labels.push(1);
            rows.push(vec![0.0, 3.0 + jitter]);
            labels.push(2);
        }
        (rows, labels)
    }

    #[test]
    fn test_learns_separable_classes() {
        let (rows, labels) = separable();
        let mut model = LogisticRegression::new(1.0);
        model.fit(&rows, &labels).unwrap();
        assert_eq!(model.predict(&rows), labels);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (rows, labels) = separable();
        let mut a = LogisticRegression::new(0.1);
        let mut b = LogisticRegression::new(0.1);
        a.fit(&rows, &labels).unwrap();
        b.fit(&rows, &labels).unwrap();
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.intercepts, b.intercepts);
    }

    #[test]
    fn test_strong_regularization_shrinks_weights() {
        let (rows, labels) = separable();
        let mut weak = LogisticRegression::new(10.0);
        let mut strong = LogisticRegression::new(0.001);
        weak.fit(&rows, &labels).unwrap();
        strong.fit(&rows, &labels).unwrap();
        let norm = |m: &LogisticRegression| -> f64 {
            m.weights.iter().flatten().map(|w| w * w).sum::<f64>()
        };
        assert!(norm(&strong) < norm(&weak));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let mut model = LogisticRegression::new(1.0);
        assert!(matches!(
            model.fit(&[], &[]),
            Err(SimError::EmptyDataset(_))
        ));
        assert!(matches!(
            model.fit(&[vec![1.0]], &[0, 1]),
            Err(SimError::ShapeMismatch(_))
        ));
        assert!(matches!(
            model.fit(&[vec![1.0], vec![1.0, 2.0]], &[0, 1]),
            Err(SimError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_softmax_and_argmax() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), 1);
        assert_eq!(argmax(&[]), 0);
    }
}
