//! Classification metrics
//!
//! Precision, recall and F1 are `None` where they are undefined (a class never
//! predicted, or a class with no support). Macro averages stay `None` if any
//! participating class is undefined rather than silently treating it as zero.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-class precision/recall/F1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: String,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    /// Number of true instances of the class
    pub support: usize,
}

/// Accuracy plus macro-averaged precision/recall/F1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub per_class: Vec<ClassMetrics>,
}

/// Fraction of matching predictions; 0 for empty input
pub fn accuracy(truth: &[usize], predicted: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / truth.len() as f64
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

/// Compute the full report over the given class list
///
/// Classes that neither occur in `truth` nor get predicted are left out of the
/// macro averages.
pub fn classification_report(
    truth: &[usize],
    predicted: &[usize],
    classes: &[String],
) -> ClassificationReport {
    let mut per_class = Vec::with_capacity(classes.len());
    let mut participating = Vec::new();

    for (index, class) in classes.iter().enumerate() {
        let mut true_positive = 0;
        let mut predicted_count = 0;
        let mut support = 0;
        for (t, p) in truth.iter().zip(predicted) {
            if *p == index {
                predicted_count += 1;
                if *t == index {
                    true_positive += 1;
                }
            }
            if *t == index {
                support += 1;
            }
        }

        let precision = ratio(true_positive, predicted_count);
        let recall = ratio(true_positive, support);
        let f1 = match (precision, recall) {
            (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };

        let metrics = ClassMetrics {
            class: class.clone(),
            precision,
            recall,
            f1,
            support,
        };
        if support > 0 || predicted_count > 0 {
            participating.push(per_class.len());
        }
        per_class.push(metrics);
    }

    let macro_average = |name: &str, pick: fn(&ClassMetrics) -> Option<f64>| -> Option<f64> {
        let values: Option<Vec<f64>> = participating.iter().map(|&i| pick(&per_class[i])).collect();
        match values {
            Some(v) if !v.is_empty() => Some(v.iter().sum::<f64>() / v.len() as f64),
            Some(_) => None,
            None => {
                warn!(metric = name, "Macro average undefined for at least one class");
                None
            }
        }
    };

    let precision = macro_average("precision", |m| m.precision);
    let recall = macro_average("recall", |m| m.recall);
    let f1 = macro_average("f1", |m| m.f1);

    ClassificationReport {
        accuracy: accuracy(truth, predicted),
        precision,
        recall,
        f1,
        per_class,
    }
}
