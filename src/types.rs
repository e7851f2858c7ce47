//! Core types for the Synheart Cohort pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: hidden entities and trajectories, observable day records, feature
//! rows and labels.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hidden behavioral archetype governing an entity's trajectory shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    StableHigh,
    GradualDecline,
    SuddenDrop,
    Inconsistent,
}

impl Archetype {
    /// All archetypes in allocation order
    pub const ALL: [Archetype; 4] = [
        Archetype::StableHigh,
        Archetype::GradualDecline,
        Archetype::SuddenDrop,
        Archetype::Inconsistent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Archetype::StableHigh => "stable_high",
            Archetype::GradualDecline => "gradual_decline",
            Archetype::SuddenDrop => "sudden_drop",
            Archetype::Inconsistent => "inconsistent",
        }
    }

    pub fn from_name(name: &str) -> Option<Archetype> {
        Archetype::ALL.into_iter().find(|a| a.as_str() == name)
    }

    /// Numeric tag used when correlating features against the raw archetype
    pub fn ordinal(&self) -> usize {
        match self {
            Archetype::StableHigh => 0,
            Archetype::GradualDecline => 1,
            Archetype::SuddenDrop => 2,
            Archetype::Inconsistent => 3,
        }
    }
}

/// Categorical engagement outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Dropout,
    Struggling,
    Moderate,
    HighlyEngaged,
}

impl Label {
    /// Full label set, in class-index order
    pub const ALL: [Label; 4] = [
        Label::Dropout,
        Label::Struggling,
        Label::Moderate,
        Label::HighlyEngaged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Dropout => "dropout",
            Label::Struggling => "struggling",
            Label::Moderate => "moderate",
            Label::HighlyEngaged => "highly_engaged",
        }
    }

    /// Class index of this label within [`Label::ALL`]
    pub fn index(&self) -> usize {
        match self {
            Label::Dropout => 0,
            Label::Struggling => 1,
            Label::Moderate => 2,
            Label::HighlyEngaged => 3,
        }
    }

    pub fn class_names() -> Vec<String> {
        Label::ALL.iter().map(|l| l.as_str().to_string()).collect()
    }
}

/// Observable daily metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Steps,
    MeditationMinutes,
    ExerciseMinutes,
    SleepHours,
    WaterGlasses,
    SocialInteractions,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Steps => "steps",
            MetricKind::MeditationMinutes => "meditation_minutes",
            MetricKind::ExerciseMinutes => "exercise_minutes",
            MetricKind::SleepHours => "sleep_hours",
            MetricKind::WaterGlasses => "water_glasses",
            MetricKind::SocialInteractions => "social_interactions",
        }
    }

    /// Feature column holding the per-entity mean of this metric
    pub fn mean_column(&self) -> String {
        format!("mean_{}", self.as_str())
    }
}

/// Hidden daily engagement intensity, every value in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    values: Vec<f64>,
}

impl Trajectory {
    /// Build a trajectory, clipping every value into [0, 1]
    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            values: values.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Intensity on a given day (None past the end of the window)
    pub fn at(&self, day: usize) -> Option<f64> {
        self.values.get(day).copied()
    }
}

/// One simulated user together with its hidden generating state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier (`user_0000`, ...)
    pub id: String,
    /// Position within the run, used to derive per-entity random streams
    pub index: usize,
    pub archetype: Archetype,
    pub trajectory: Trajectory,
}

/// Materialized metrics for one entity on one day
///
/// Never carries the hidden intensity or the archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub entity_id: String,
    /// Zero-based day index within the window
    pub day: u32,
    pub date: NaiveDate,
    /// Whether the daily goal was completed
    pub completed: bool,
    /// Observed metric values; `None` marks a sensor gap
    pub metrics: BTreeMap<MetricKind, Option<f64>>,
}

impl DayRecord {
    /// Observed value of a metric, `None` when missing or not materialized
    pub fn metric(&self, kind: MetricKind) -> Option<f64> {
        self.metrics.get(&kind).copied().flatten()
    }
}

/// Quality flag raised while extracting features
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    /// Fewer days than the longest lookback window; slope and decline set to 0
    InsufficientHistory,
    /// A lookback window contained no observed value; its feature set to 0
    EmptyWindow,
    /// Metric was never observed; its mean set to 0
    AllMissing(MetricKind),
}

/// Temporal feature column names, in matrix order
pub const TEMPORAL_COLUMNS: [&str; 4] = [
    "activity_slope",
    "short_window_decline",
    "momentum",
    "consistency",
];

/// One row of leakage-safe features for a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub entity_id: String,
    /// (mean of last 7 days - mean of first 7 days) / 7
    pub activity_slope: f64,
    /// mean of days [n-10, n-3) - mean of the last 3 days
    pub short_window_decline: f64,
    /// mean of the last 7 days - mean of the whole window
    pub momentum: f64,
    /// 1 / (1 + std), in (0, 1]
    pub consistency: f64,
    pub completion_rate: f64,
    pub days_active: u32,
    /// Days observed; row metadata, constant within a run and kept out of the matrix
    pub total_days: u32,
    /// Mean of every observed value per metric
    pub metric_means: BTreeMap<MetricKind, f64>,
    pub social_interactions_total: f64,
    pub flags: Vec<FeatureFlag>,
}

impl FeatureRow {
    /// Numeric values in the column order produced by [`feature_columns`]
    pub fn values(&self, metrics: &[MetricKind]) -> Vec<f64> {
        let mut values = vec![
            self.activity_slope,
            self.short_window_decline,
            self.momentum,
            self.consistency,
            self.completion_rate,
            self.days_active as f64,
        ];
        values.extend(
            metrics
                .iter()
                .map(|m| self.metric_means.get(m).copied().unwrap_or(0.0)),
        );
        values.push(self.social_interactions_total);
        values
    }
}

/// Column names for a feature matrix built over the given metrics
pub fn feature_columns(metrics: &[MetricKind]) -> Vec<String> {
    let mut columns: Vec<String> = TEMPORAL_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.push("completion_rate".to_string());
    columns.push("days_active".to_string());
    columns.extend(metrics.iter().map(|m| m.mean_column()));
    columns.push("social_interactions_total".to_string());
    columns
}

/// Feature rows with a fixed, named column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub metrics: Vec<MetricKind>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(metrics: Vec<MetricKind>, rows: Vec<FeatureRow>) -> Self {
        Self {
            columns: feature_columns(&metrics),
            metrics,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dense row-major matrix in column order
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.values(&self.metrics)).collect()
    }

    /// All values of one named column
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.values(&self.metrics)[idx])
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_clips_into_unit_interval() {
        let t = Trajectory::from_values(vec![-0.3, 0.4, 1.7]);
        assert_eq!(t.values(), &[0.0, 0.4, 1.0]);
        assert_eq!(t.at(1), Some(0.4));
        assert_eq!(t.at(3), None);
    }

    #[test]
    fn test_label_indices_match_order() {
        for (i, label) in Label::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
        }
        assert_eq!(Label::class_names()[3], "highly_engaged");
        assert_eq!(Archetype::from_name("sudden_drop"), Some(Archetype::SuddenDrop));
        assert_eq!(Archetype::from_name("dropout"), None);
    }

    #[test]
    fn test_feature_columns_follow_metric_order() {
        let metrics = vec![MetricKind::Steps, MetricKind::SleepHours];
        let columns = feature_columns(&metrics);
        assert_eq!(columns.len(), 9);
        assert_eq!(columns[0], "activity_slope");
        assert_eq!(columns[5], "days_active");
        assert_eq!(columns[6], "mean_steps");
        assert_eq!(columns[7], "mean_sleep_hours");
        assert_eq!(columns[8], "social_interactions_total");
        assert!(!columns.iter().any(|c| c == "total_days"));
    }

    #[test]
    fn test_row_values_align_with_columns() {
        let mut metric_means = BTreeMap::new();
        metric_means.insert(MetricKind::Steps, 6000.0);
        let row = FeatureRow {
            entity_id: "user_0000".to_string(),
            activity_slope: -0.01,
            short_window_decline: 0.2,
            momentum: -0.05,
            consistency: 0.8,
            completion_rate: 0.5,
            days_active: 15,
            total_days: 30,
            metric_means,
            social_interactions_total: 42.0,
            flags: vec![],
        };
        let table = FeatureTable::new(vec![MetricKind::Steps], vec![row]);
        assert_eq!(table.column("mean_steps"), Some(vec![6000.0]));
        assert_eq!(table.column("days_active"), Some(vec![15.0]));
        assert_eq!(table.column("total_days"), None);
        assert_eq!(table.column("unknown"), None);
        assert_eq!(table.matrix()[0].len(), table.columns.len());
    }

    #[test]
    fn test_metric_keys_serialize_as_names() {
        let mut metrics = BTreeMap::new();
        metrics.insert(MetricKind::SleepHours, Some(7.1));
        metrics.insert(MetricKind::Steps, None);
        let record = DayRecord {
            entity_id: "user_0001".to_string(),
            day: 0,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            completed: true,
            metrics,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"sleep_hours\":7.1"));
        assert!(json.contains("\"steps\":null"));
        assert_eq!(record.metric(MetricKind::Steps), None);
        assert_eq!(record.metric(MetricKind::WaterGlasses), None);
    }
}
