//! Cross-distribution evaluator
//!
//! Trains a classifier on one labeled dataset, scores it on both, and reports
//! the generalization gap `|acc(X→A) − acc(X→B)|`. The regularization sweep
//! selects the candidate that keeps accuracy high on both distributions:
//! `(acc_A + acc_B)/2 − gap_penalty·gap`.

use crate::classifier::Classifier;
use crate::config::EvaluatorConfig;
use crate::error::SimError;
use crate::metrics::{accuracy, classification_report, ClassMetrics};
use crate::rng::{entity_rng, run_rng, Stream};
use crate::transform::FeatureTransform;
use crate::types::{FeatureTable, Label};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Feature matrix paired with one label vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledDataset {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// Class index per row, into `classes`
    pub labels: Vec<usize>,
    pub classes: Vec<String>,
}

impl LabeledDataset {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<f64>>,
        labels: Vec<usize>,
        classes: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
            labels,
            classes,
        }
    }

    /// Pair an extracted feature table with outcome labels
    pub fn from_features(
        name: impl Into<String>,
        table: &FeatureTable,
        labels: &[Label],
    ) -> Result<Self, SimError> {
        if table.len() != labels.len() {
            return Err(SimError::ShapeMismatch(format!(
                "{} feature rows but {} labels",
                table.len(),
                labels.len()
            )));
        }
        Ok(Self::new(
            name,
            table.columns.clone(),
            table.matrix(),
            labels.iter().map(|l| l.index()).collect(),
            Label::class_names(),
        ))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One-vs-rest relabelling: `positive` becomes class 1, everything else 0
    pub fn binarize(&self, positive: &str) -> Result<Self, SimError> {
        let target = self
            .classes
            .iter()
            .position(|c| c == positive)
            .ok_or_else(|| {
                SimError::InvalidConfig(format!(
                    "unknown class '{positive}' (known: {})",
                    self.classes.join(", ")
                ))
            })?;
        Ok(Self {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self.rows.clone(),
            labels: self.labels.iter().map(|&l| usize::from(l == target)).collect(),
            classes: vec![format!("not_{positive}"), positive.to_string()],
        })
    }

    /// Apply an already-fitted transform to the feature matrix
    pub fn transformed<T: FeatureTransform + ?Sized>(&self, transform: &T) -> Self {
        Self {
            name: self.name.clone(),
            columns: transform.output_columns(&self.columns),
            rows: transform.transform(&self.rows),
            labels: self.labels.clone(),
            classes: self.classes.clone(),
        }
    }

    /// Class counts keyed by class name
    pub fn distribution(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            self.classes.iter().map(|c| (c.clone(), 0)).collect();
        for &label in &self.labels {
            if let Some(class) = self.classes.get(label) {
                *counts.entry(class.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Usable for training and testing: at least two rows, consistent shapes
    pub fn validate(&self) -> Result<(), SimError> {
        if self.rows.is_empty() {
            return Err(SimError::EmptyDataset(format!(
                "dataset '{}' has no rows",
                self.name
            )));
        }
        if self.rows.len() < 2 {
            return Err(SimError::InvalidConfig(format!(
                "dataset '{}' has {} row; evaluation needs at least 2",
                self.name,
                self.rows.len()
            )));
        }
        if self.rows.len() != self.labels.len() {
            return Err(SimError::ShapeMismatch(format!(
                "dataset '{}' has {} rows but {} labels",
                self.name,
                self.rows.len(),
                self.labels.len()
            )));
        }
        if let Some(row) = self.rows.iter().find(|r| r.len() != self.columns.len()) {
            return Err(SimError::ShapeMismatch(format!(
                "dataset '{}' has a row of width {} for {} columns",
                self.name,
                row.len(),
                self.columns.len()
            )));
        }
        if let Some(label) = self.labels.iter().find(|l| **l >= self.classes.len()) {
            return Err(SimError::ShapeMismatch(format!(
                "dataset '{}' has label index {label} for {} classes",
                self.name,
                self.classes.len()
            )));
        }
        Ok(())
    }

    fn subset(&self, indices: &[usize], name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            classes: self.classes.clone(),
        }
    }

    fn concat(&self, other: &LabeledDataset) -> Self {
        let mut combined = self.clone();
        combined.name = format!("{}+{}", self.name, other.name);
        combined.rows.extend(other.rows.iter().cloned());
        combined.labels.extend(other.labels.iter().copied());
        combined
    }
}

/// Both datasets must share feature columns and class list
fn check_compatible(a: &LabeledDataset, b: &LabeledDataset) -> Result<(), SimError> {
    if a.columns != b.columns {
        return Err(schema_mismatch(&a.columns, &b.columns));
    }
    if a.classes != b.classes {
        return Err(schema_mismatch(&a.classes, &b.classes));
    }
    Ok(())
}

fn schema_mismatch(left: &[String], right: &[String]) -> SimError {
    let l: BTreeSet<&String> = left.iter().collect();
    let r: BTreeSet<&String> = right.iter().collect();
    let mut left_only: Vec<String> = l.difference(&r).map(|s| s.to_string()).collect();
    let mut right_only: Vec<String> = r.difference(&l).map(|s| s.to_string()).collect();
    // Same names in a different order
    if left_only.is_empty() && right_only.is_empty() {
        left_only = left.to_vec();
        right_only = right.to_vec();
    }
    SimError::SchemaMismatch {
        left_only,
        right_only,
    }
}

/// One (model, train set, test set) combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub train_distribution: String,
    pub test_distribution: String,
    pub accuracy: f64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub per_class: Vec<ClassMetrics>,
    /// Gap of the model trained on `train_distribution`
    pub generalization_gap: f64,
}

/// All four train/test combinations over datasets A and B
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossEvaluation {
    /// Ordered A→A, A→B, B→A, B→B
    pub results: Vec<EvaluationResult>,
    pub gap_trained_on_a: f64,
    pub gap_trained_on_b: f64,
}

impl CrossEvaluation {
    pub fn result(&self, train: &str, test: &str) -> Option<&EvaluationResult> {
        self.results
            .iter()
            .find(|r| r.train_distribution == train && r.test_distribution == test)
    }
}

/// Score of one regularization candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub regularization: f64,
    pub accuracy_a: f64,
    pub accuracy_b: f64,
    pub gap: f64,
    pub holdout_accuracy: f64,
    pub holdout_f1: Option<f64>,
    /// Mean macro F1 over stratified folds of the train split
    pub cv_f1_mean: Option<f64>,
    /// Population std of the per-fold macro F1
    pub cv_f1_std: Option<f64>,
    pub score: f64,
}

/// Outcome of a regularization sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub candidates: Vec<CandidateScore>,
    pub best: CandidateScore,
    /// Candidates not evaluated because the budget ran out
    pub skipped: usize,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Sweep followed by the cross matrix of the selected candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub sweep: SweepReport,
    pub cross: CrossEvaluation,
}

/// Train/test index split
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Per-class split keeping each class on both sides
///
/// Each class with `count` rows contributes `round(count · test_fraction)`
/// clamped to `[1, count − 1]` test rows. Absent classes are ignored; a class
/// with a single row cannot be split.
pub fn stratified_split(
    labels: &[usize],
    classes: &[String],
    test_fraction: f64,
    seed: u64,
) -> Result<Split, SimError> {
    let mut rng = run_rng(seed, Stream::Split);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for (class_index, class) in classes.iter().enumerate() {
        let mut members = class_members(labels, class_index);
        let count = members.len();
        if count == 0 {
            continue;
        }
        // One row can never sit on both sides, whatever the fraction
        if count < 2 {
            return Err(SimError::MissingClassSupport {
                class: class.clone(),
                split: "train/test".to_string(),
            });
        }
        members.shuffle(&mut rng);
        let n_test = ((count as f64 * test_fraction).round() as usize).clamp(1, count - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok(Split { train, test })
}

/// Stratified k-fold partition, one [`Split`] per held-out fold
///
/// Each class is shuffled, then all classes are dealt round-robin across the
/// folds in class order. Fold sizes differ by at most one row, and so do the
/// per-class counts of any two folds.
pub fn stratified_folds(
    labels: &[usize],
    classes: &[String],
    k: usize,
    seed: u64,
) -> Result<Vec<Split>, SimError> {
    if k < 2 || k > labels.len() {
        return Err(SimError::InvalidConfig(format!(
            "cannot make {k} folds from {} rows",
            labels.len()
        )));
    }
    // Indexed by fold count, apart from the holdout split's run stream
    let mut rng = entity_rng(seed, Stream::Split, k);
    let mut fold_of = vec![0usize; labels.len()];
    let mut dealt = 0;
    for class_index in 0..classes.len() {
        let mut members = class_members(labels, class_index);
        members.shuffle(&mut rng);
        for i in members {
            fold_of[i] = dealt % k;
            dealt += 1;
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| fold_of[i] == fold);
            Split { train, test }
        })
        .collect())
}

fn class_members(labels: &[usize], class_index: usize) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, l)| **l == class_index)
        .map(|(i, _)| i)
        .collect()
}

/// Mean and population std of the per-fold macro F1
///
/// Undefined if any fold's F1 is undefined.
fn cross_validated_f1<C, F>(
    make: &F,
    c: f64,
    train: &LabeledDataset,
    folds: &[Split],
) -> Result<(Option<f64>, Option<f64>), SimError>
where
    C: Classifier,
    F: Fn(f64) -> C,
{
    let mut scores = Vec::with_capacity(folds.len());
    for fold in folds {
        let fit_on = train.subset(&fold.train, "fold_train");
        let held_out = train.subset(&fold.test, "fold_test");
        let mut model = make(c);
        model.fit(&fit_on.rows, &fit_on.labels)?;
        let report =
            classification_report(&held_out.labels, &model.predict(&held_out.rows), &held_out.classes);
        match report.f1 {
            Some(f1) => scores.push(f1),
            None => return Ok((None, None)),
        }
    }
    if scores.is_empty() {
        return Ok((None, None));
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    Ok((Some(mean), Some(variance.sqrt())))
}

/// Evaluates classifiers across two label distributions
#[derive(Debug, Clone)]
pub struct CrossDistributionEvaluator {
    config: EvaluatorConfig,
}

impl CrossDistributionEvaluator {
    pub fn new(config: EvaluatorConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    fn check_inputs(a: &LabeledDataset, b: &LabeledDataset) -> Result<(), SimError> {
        a.validate()?;
        b.validate()?;
        check_compatible(a, b)
    }

    /// Train on A and on B, test each model on both
    pub fn cross_evaluate<C, F>(
        &self,
        a: &LabeledDataset,
        b: &LabeledDataset,
        make: F,
    ) -> Result<CrossEvaluation, SimError>
    where
        C: Classifier,
        F: Fn() -> C,
    {
        Self::check_inputs(a, b)?;

        let mut results = Vec::with_capacity(4);
        let mut gaps = [0.0; 2];
        for (slot, train) in [a, b].into_iter().enumerate() {
            let mut model = make();
            model.fit(&train.rows, &train.labels)?;

            let on_a = score(&model, train, a);
            let on_b = score(&model, train, b);
            let gap = (on_a.accuracy - on_b.accuracy).abs();
            gaps[slot] = gap;
            for mut result in [on_a, on_b] {
                result.generalization_gap = gap;
                results.push(result);
            }
            debug!(train = %train.name, gap, "Cross evaluation step");
        }

        info!(
            gap_trained_on_a = gaps[0],
            gap_trained_on_b = gaps[1],
            "Cross evaluation complete"
        );
        Ok(CrossEvaluation {
            results,
            gap_trained_on_a: gaps[0],
            gap_trained_on_b: gaps[1],
        })
    }

    /// Select the regularization strength that balances both distributions
    pub fn sweep_regularization<C, F>(
        &self,
        a: &LabeledDataset,
        b: &LabeledDataset,
        make: F,
    ) -> Result<SweepReport, SimError>
    where
        C: Classifier,
        F: Fn(f64) -> C,
    {
        Self::check_inputs(a, b)?;

        let combined = a.concat(b);
        let split = stratified_split(
            &combined.labels,
            &combined.classes,
            self.config.test_fraction,
            self.config.seed,
        )?;
        let train = combined.subset(&split.train, "train");
        let holdout = combined.subset(&split.test, "test");

        let k = self.config.cv_folds;
        let folds = if k == 0 {
            Vec::new()
        } else if train.len() < k {
            warn!(folds = k, rows = train.len(), "Train split too small for cross-validation");
            Vec::new()
        } else {
            stratified_folds(&train.labels, &train.classes, k, self.config.seed)?
        };

        let started = Instant::now();
        let total = self.config.regularization_candidates.len();
        let mut candidates: Vec<CandidateScore> = Vec::with_capacity(total);

        for &c in &self.config.regularization_candidates {
            if let Some(limit) = self.config.budget.max_candidates {
                if candidates.len() >= limit {
                    warn!(limit, "Candidate budget reached");
                    break;
                }
            }
            if let Some(limit_ms) = self.config.budget.max_duration_ms {
                if started.elapsed().as_millis() >= u128::from(limit_ms) {
                    warn!(limit_ms, "Sweep time budget reached");
                    break;
                }
            }

            let mut model = make(c);
            model.fit(&train.rows, &train.labels)?;

            let accuracy_a = accuracy(&a.labels, &model.predict(&a.rows));
            let accuracy_b = accuracy(&b.labels, &model.predict(&b.rows));
            let gap = (accuracy_a - accuracy_b).abs();
            let holdout_report =
                classification_report(&holdout.labels, &model.predict(&holdout.rows), &holdout.classes);
            let (cv_f1_mean, cv_f1_std) = cross_validated_f1(&make, c, &train, &folds)?;
            let candidate = CandidateScore {
                regularization: c,
                accuracy_a,
                accuracy_b,
                gap,
                holdout_accuracy: holdout_report.accuracy,
                holdout_f1: holdout_report.f1,
                cv_f1_mean,
                cv_f1_std,
                score: (accuracy_a + accuracy_b) / 2.0 - self.config.gap_penalty * gap,
            };
            debug!(
                regularization = c,
                accuracy_a,
                accuracy_b,
                gap,
                cv_f1_mean = ?candidate.cv_f1_mean,
                score = candidate.score,
                "Evaluated candidate"
            );
            candidates.push(candidate);
        }

        let mut best: Option<&CandidateScore> = None;
        for candidate in &candidates {
            if best.map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
        let best = best.cloned().ok_or_else(|| {
            SimError::BudgetExhausted(format!(
                "no regularization candidate evaluated out of {total}"
            ))
        })?;

        info!(
            regularization = best.regularization,
            score = best.score,
            gap = best.gap,
            evaluated = candidates.len(),
            "Selected regularization"
        );
        Ok(SweepReport {
            skipped: total - candidates.len(),
            candidates,
            best,
            train_rows: train.len(),
            test_rows: holdout.len(),
        })
    }

    /// Sweep, then cross-evaluate the selected candidate
    pub fn evaluate<C, F>(
        &self,
        a: &LabeledDataset,
        b: &LabeledDataset,
        make: F,
    ) -> Result<EvaluationReport, SimError>
    where
        C: Classifier,
        F: Fn(f64) -> C,
    {
        let sweep = self.sweep_regularization(a, b, &make)?;
        let c = sweep.best.regularization;
        let cross = self.cross_evaluate(a, b, || make(c))?;
        Ok(EvaluationReport { sweep, cross })
    }
}

fn score<C: Classifier>(
    model: &C,
    train: &LabeledDataset,
    test: &LabeledDataset,
) -> EvaluationResult {
    let predicted = model.predict(&test.rows);
    let report = classification_report(&test.labels, &predicted, &test.classes);
    EvaluationResult {
        train_distribution: train.name.clone(),
        test_distribution: test.name.clone(),
        accuracy: report.accuracy,
        precision: report.precision,
        recall: report.recall,
        f1: report.f1,
        per_class: report.per_class,
        generalization_gap: 0.0,
    }
}
