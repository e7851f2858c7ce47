//! Leakage audit
//!
//! Flags feature columns that correlate near-deterministically with a target
//! (label index, hidden archetype code, or a binary indicator) and columns
//! whose per-class value ranges do not overlap at all.

use crate::error::SimError;
use crate::evaluator::LabeledDataset;
use crate::pipeline::SimulatedCohort;
use crate::types::Archetype;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Correlation band of a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakageSeverity {
    Ok,
    Moderate,
    High,
    Critical,
}

impl LeakageSeverity {
    pub fn from_correlation(correlation: f64) -> Self {
        let r = correlation.abs();
        if r >= 0.9 {
            LeakageSeverity::Critical
        } else if r > 0.7 {
            LeakageSeverity::High
        } else if r > 0.5 {
            LeakageSeverity::Moderate
        } else {
            LeakageSeverity::Ok
        }
    }
}

/// Audit outcome for one feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLeakage {
    pub column: String,
    pub correlation: f64,
    pub severity: LeakageSeverity,
    /// Classes whose value range overlaps no other class
    pub isolated_classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakageReport {
    pub target: String,
    pub columns: Vec<ColumnLeakage>,
}

impl LeakageReport {
    /// No column reaches the critical band
    pub fn is_clean(&self) -> bool {
        self.columns
            .iter()
            .all(|c| c.severity < LeakageSeverity::Critical)
    }

    /// Columns at high or critical severity
    pub fn flagged(&self) -> Vec<&ColumnLeakage> {
        self.columns
            .iter()
            .filter(|c| c.severity >= LeakageSeverity::High)
            .collect()
    }

    pub fn max_abs_correlation(&self) -> f64 {
        self.columns
            .iter()
            .map(|c| c.correlation.abs())
            .fold(0.0, f64::max)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnLeakage> {
        self.columns.iter().find(|c| c.column == name)
    }
}

/// Pearson correlation; 0 when either side has zero variance
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Audit every column of `dataset` against its own class indices
pub fn audit_labels(dataset: &LabeledDataset) -> Result<LeakageReport, SimError> {
    let target: Vec<f64> = dataset.labels.iter().map(|&l| l as f64).collect();
    audit(dataset, "label_index", &target)
}

/// Audit the clean dataset against the ordinal archetype code, then against
/// each archetype's one-vs-rest indicator
///
/// An ordinal code can average away a single archetype that separates from
/// the rest; the indicators cannot.
pub fn audit_archetypes(cohort: &SimulatedCohort) -> Result<Vec<LeakageReport>, SimError> {
    let clean = cohort.clean_dataset()?;
    let mut reports = Vec::with_capacity(Archetype::ALL.len() + 1);
    reports.push(audit(&clean, "archetype_ordinal", &cohort.archetype_ordinals())?);
    for archetype in Archetype::ALL {
        let target = format!("is_{}", archetype.as_str());
        reports.push(audit(&clean, &target, &cohort.archetype_indicator(archetype))?);
    }
    Ok(reports)
}

/// Audit every column of `dataset` against a numeric target
///
/// Class ranges are grouped by the dataset's own labels.
pub fn audit(
    dataset: &LabeledDataset,
    target_name: &str,
    target: &[f64],
) -> Result<LeakageReport, SimError> {
    if dataset.is_empty() {
        return Err(SimError::EmptyDataset(format!(
            "cannot audit empty dataset '{}'",
            dataset.name
        )));
    }
    if target.len() != dataset.len() || dataset.labels.len() != dataset.len() {
        return Err(SimError::ShapeMismatch(format!(
            "dataset '{}' has {} rows, {} labels and {} target values",
            dataset.name,
            dataset.len(),
            dataset.labels.len(),
            target.len()
        )));
    }

    let mut columns = Vec::with_capacity(dataset.columns.len());
    for (j, name) in dataset.columns.iter().enumerate() {
        let values: Vec<f64> = dataset.rows.iter().map(|r| r[j]).collect();
        let correlation = pearson(&values, target);
        let severity = LeakageSeverity::from_correlation(correlation);
        let isolated_classes = isolated_classes(&values, &dataset.labels, &dataset.classes);

        if severity >= LeakageSeverity::High {
            warn!(
                column = %name,
                correlation,
                severity = ?severity,
                target = target_name,
                "Suspicious feature correlation"
            );
        }
        columns.push(ColumnLeakage {
            column: name.clone(),
            correlation,
            severity,
            isolated_classes,
        });
    }

    let report = LeakageReport {
        target: target_name.to_string(),
        columns,
    };
    info!(
        target = target_name,
        max_abs_correlation = report.max_abs_correlation(),
        clean = report.is_clean(),
        "Leakage audit complete"
    );
    Ok(report)
}

/// Classes whose `[min, max]` for this column overlaps no other present class
fn isolated_classes(values: &[f64], labels: &[usize], classes: &[String]) -> Vec<String> {
    let ranges: Vec<Option<(f64, f64)>> = (0..classes.len())
        .map(|class| {
            values
                .iter()
                .zip(labels)
                .filter(|(_, l)| **l == class)
                .map(|(v, _)| *v)
                .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                    None => Some((v, v)),
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                })
        })
        .collect();

    let present = ranges.iter().filter(|r| r.is_some()).count();
    if present < 2 {
        return Vec::new();
    }

    ranges
        .iter()
        .enumerate()
        .filter_map(|(i, range)| {
            let (lo, hi) = (*range)?;
            let overlaps = ranges.iter().enumerate().any(|(k, other)| match other {
                Some((olo, ohi)) if k != i => lo <= *ohi && hi >= *olo,
                _ => false,
            });
            if overlaps {
                None
            } else {
                Some(classes[i].clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> LabeledDataset {
        // "leak" encodes the label exactly, "noise" is unrelated, "flat" is constant
        let labels: Vec<usize> = (0..40).map(|i| i % 4).collect();
        let rows = labels
            .iter()
            .enumerate()
            .map(|(i, &l)| vec![l as f64 * 10.0, ((i * 7919) % 13) as f64, 5.0])
            .collect();
        LabeledDataset::new(
            "audit",
            vec!["leak".to_string(), "noise".to_string(), "flat".to_string()],
            rows,
            labels,
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
        )
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(pearson(&[1.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(LeakageSeverity::from_correlation(0.95), LeakageSeverity::Critical);
        assert_eq!(LeakageSeverity::from_correlation(-0.9), LeakageSeverity::Critical);
        assert_eq!(LeakageSeverity::from_correlation(0.8), LeakageSeverity::High);
        assert_eq!(LeakageSeverity::from_correlation(0.6), LeakageSeverity::Moderate);
        assert_eq!(LeakageSeverity::from_correlation(0.5), LeakageSeverity::Ok);
    }

    #[test]
    fn test_direct_encoding_is_critical() {
        let report = audit_labels(&dataset()).unwrap();
        let leak = report.column("leak").unwrap();
        assert_eq!(leak.severity, LeakageSeverity::Critical);
        assert_eq!(leak.isolated_classes.len(), 4);
        assert!(!report.is_clean());
        assert_eq!(report.flagged().len(), 1);

        let flat = report.column("flat").unwrap();
        assert_eq!(flat.correlation, 0.0);
        assert!(flat.isolated_classes.is_empty());
    }

    #[test]
    fn test_clean_once_leak_removed() {
        let mut data = dataset();
        data.columns.remove(0);
        for row in &mut data.rows {
            row.remove(0);
        }
        let report = audit_labels(&data).unwrap();
        assert!(report.is_clean());
        assert!(report.max_abs_correlation() < 0.9);
    }

    #[test]
    fn test_indicator_catches_single_class_separation() {
        // "high" marks class 0 exactly; an ordinal code 0..3 only sees r = -0.775
        let labels: Vec<usize> = (0..40).map(|i| i % 4).collect();
        let rows = labels
            .iter()
            .map(|&l| vec![if l == 0 { 1.0 } else { 0.0 }])
            .collect();
        let data = LabeledDataset::new(
            "single",
            vec!["high".to_string()],
            rows,
            labels.clone(),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
        );
        let ordinal: Vec<f64> = labels.iter().map(|&l| l as f64).collect();
        let by_ordinal = audit(&data, "ordinal", &ordinal).unwrap();
        assert!(by_ordinal.is_clean());
        assert!((by_ordinal.columns[0].correlation + 0.7746).abs() < 1e-3);

        let indicator: Vec<f64> = labels.iter().map(|&l| if l == 0 { 1.0 } else { 0.0 }).collect();
        let by_indicator = audit(&data, "is_a", &indicator).unwrap();
        assert!(!by_indicator.is_clean());
        assert_eq!(by_indicator.columns[0].severity, LeakageSeverity::Critical);
    }

    #[test]
    fn test_archetype_audit_covers_each_indicator() {
        use crate::config::SimulationConfig;
        use crate::pipeline::simulate;

        let cohort = simulate(&SimulationConfig::default().with_entities(40)).unwrap();
        let reports = audit_archetypes(&cohort).unwrap();
        let targets: Vec<&str> = reports.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "archetype_ordinal",
                "is_stable_high",
                "is_gradual_decline",
                "is_sudden_drop",
                "is_inconsistent"
            ]
        );
        assert!(reports
            .iter()
            .all(|r| r.columns.len() == cohort.features.columns.len()));
    }

    #[test]
    fn test_target_length_checked() {
        let data = dataset();
        assert!(matches!(
            audit(&data, "short", &[1.0, 2.0]),
            Err(SimError::ShapeMismatch(_))
        ));
    }
}
