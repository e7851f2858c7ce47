//! Simulation and evaluation configuration
//!
//! All knobs carry defaults and are validated up front, so a bad configuration
//! fails before any entity is generated.

use crate::error::SimError;
use crate::features::LONGEST_LOOKBACK_DAYS;
use crate::labels::LabelMap;
use crate::materializer::MetricTable;
use crate::trajectory::ShapeTable;
use crate::types::{Archetype, MetricKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of simulated entities
pub const DEFAULT_ENTITIES: usize = 1000;

/// Default window length in days
pub const DEFAULT_DAYS: usize = 30;

/// Default label-noise probability
pub const DEFAULT_LABEL_NOISE: f64 = 0.05;

/// Default run seed
pub const DEFAULT_SEED: u64 = 42;

const PROPORTION_TOLERANCE: f64 = 1e-6;

/// Proportion of entities assigned to each archetype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeMix {
    pub proportions: BTreeMap<Archetype, f64>,
}

impl Default for ArchetypeMix {
    fn default() -> Self {
        Self::uniform()
    }
}

impl ArchetypeMix {
    /// Equal share for every archetype
    pub fn uniform() -> Self {
        let share = 1.0 / Archetype::ALL.len() as f64;
        Self {
            proportions: Archetype::ALL.iter().map(|a| (*a, share)).collect(),
        }
    }

    pub fn from_pairs(pairs: &[(Archetype, f64)]) -> Self {
        Self {
            proportions: pairs.iter().copied().collect(),
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.proportions.is_empty() {
            return Err(SimError::InvalidConfig(
                "archetype mix has no entries".to_string(),
            ));
        }
        for (archetype, p) in &self.proportions {
            if !p.is_finite() || *p < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "proportion for {} must be a non-negative number, got {p}",
                    archetype.as_str()
                )));
            }
        }
        let total: f64 = self.proportions.values().sum();
        if (total - 1.0).abs() > PROPORTION_TOLERANCE {
            return Err(SimError::InvalidConfig(format!(
                "archetype proportions must sum to 1, got {total}"
            )));
        }
        Ok(())
    }
}

/// How a flipped label is redrawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    /// Uniform over the labels other than the clean one; flip rate equals `p_noise`
    DifferentLabel,
    /// Uniform over the full label set; the clean label may be redrawn
    AnyLabel,
}

/// Label noise process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelNoiseConfig {
    pub p_noise: f64,
    pub mode: NoiseMode,
}

impl Default for LabelNoiseConfig {
    fn default() -> Self {
        Self {
            p_noise: DEFAULT_LABEL_NOISE,
            mode: NoiseMode::DifferentLabel,
        }
    }
}

impl LabelNoiseConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&self.p_noise) {
            return Err(SimError::InvalidConfig(format!(
                "label noise probability must be in [0, 1], got {}",
                self.p_noise
            )));
        }
        Ok(())
    }
}

/// Observable metric standing in for intensity in the temporal features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub metric: MetricKind,
    /// Multiplier applied to each observed value
    pub scale: f64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::Steps,
            scale: 1.0 / 10_000.0,
        }
    }
}

/// Full configuration of a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub n_entities: usize,
    pub n_days: usize,
    pub archetype_mix: ArchetypeMix,
    pub shapes: ShapeTable,
    pub metrics: MetricTable,
    /// Std of the noise added to intensity before thresholding the completion flag
    pub completion_noise_std: f64,
    pub proxy: ProxyConfig,
    pub label_map: LabelMap,
    pub label_noise: LabelNoiseConfig,
    pub seed: u64,
    /// Calendar date of day 0
    pub start_date: NaiveDate,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_entities: DEFAULT_ENTITIES,
            n_days: DEFAULT_DAYS,
            archetype_mix: ArchetypeMix::uniform(),
            shapes: ShapeTable::default(),
            metrics: MetricTable::default(),
            completion_noise_std: 0.05,
            proxy: ProxyConfig::default(),
            label_map: LabelMap::default(),
            label_noise: LabelNoiseConfig::default(),
            seed: DEFAULT_SEED,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
        }
    }
}

impl SimulationConfig {
    pub fn with_entities(mut self, n_entities: usize) -> Self {
        self.n_entities = n_entities;
        self
    }

    pub fn with_days(mut self, n_days: usize) -> Self {
        self.n_days = n_days;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_label_noise(mut self, p_noise: f64) -> Self {
        self.label_noise.p_noise = p_noise;
        self
    }

    pub fn with_noise_mode(mut self, mode: NoiseMode) -> Self {
        self.label_noise.mode = mode;
        self
    }

    pub fn with_archetype_mix(mut self, mix: ArchetypeMix) -> Self {
        self.archetype_mix = mix;
        self
    }

    /// Fail fast on any invalid setting
    pub fn validate(&self) -> Result<(), SimError> {
        if self.n_entities == 0 {
            return Err(SimError::InvalidConfig(
                "entity count must be positive".to_string(),
            ));
        }
        if self.n_days < LONGEST_LOOKBACK_DAYS {
            return Err(SimError::InvalidConfig(format!(
                "day count {} is below the minimum feature window of {LONGEST_LOOKBACK_DAYS} days",
                self.n_days
            )));
        }
        if !self.completion_noise_std.is_finite() || self.completion_noise_std < 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "completion noise std must be non-negative, got {}",
                self.completion_noise_std
            )));
        }
        if !self.proxy.scale.is_finite() || self.proxy.scale <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "proxy scale must be positive, got {}",
                self.proxy.scale
            )));
        }
        if self.metrics.spec(self.proxy.metric).is_none() {
            return Err(SimError::InvalidConfig(format!(
                "proxy metric {} is not in the metric table",
                self.proxy.metric.as_str()
            )));
        }
        self.archetype_mix.validate()?;
        self.shapes.validate(&self.archetype_mix)?;
        self.metrics.validate()?;
        self.label_map.validate(&self.archetype_mix)?;
        self.label_noise.validate()
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Limits on the regularization sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepBudget {
    /// Stop after this many candidates
    pub max_candidates: Option<usize>,
    /// Stop starting new candidates once this much wall-clock time has elapsed
    pub max_duration_ms: Option<u64>,
}

/// Cross-distribution evaluator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Inverse regularization strengths to sweep
    pub regularization_candidates: Vec<f64>,
    /// Held-out fraction of the combined dataset
    pub test_fraction: f64,
    pub seed: u64,
    /// Weight of the generalization gap in the candidate score
    pub gap_penalty: f64,
    /// Stratified folds for the per-candidate cross-validated F1; 0 disables
    pub cv_folds: usize,
    pub budget: SweepBudget,
    pub max_iterations: usize,
    pub learning_rate: f64,
    pub balanced_class_weights: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            regularization_candidates: vec![0.01, 0.05, 0.1, 0.5, 1.0],
            test_fraction: 0.2,
            seed: DEFAULT_SEED,
            gap_penalty: 2.0,
            cv_folds: 5,
            budget: SweepBudget::default(),
            max_iterations: 500,
            learning_rate: 1.0,
            balanced_class_weights: true,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.regularization_candidates.is_empty() {
            return Err(SimError::InvalidConfig(
                "regularization candidate set is empty".to_string(),
            ));
        }
        if let Some(c) = self
            .regularization_candidates
            .iter()
            .find(|c| !c.is_finite() || **c <= 0.0)
        {
            return Err(SimError::InvalidConfig(format!(
                "regularization candidates must be positive, got {c}"
            )));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(SimError::InvalidConfig(format!(
                "test fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if !self.gap_penalty.is_finite() || self.gap_penalty < 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "gap penalty must be non-negative, got {}",
                self.gap_penalty
            )));
        }
        if self.cv_folds == 1 {
            return Err(SimError::InvalidConfig(
                "cross-validation needs at least 2 folds (0 disables it)".to_string(),
            ));
        }
        if self.max_iterations == 0 || !(self.learning_rate > 0.0 && self.learning_rate.is_finite())
        {
            return Err(SimError::InvalidConfig(
                "classifier needs a positive iteration count and learning rate".to_string(),
            ));
        }
        Ok(())
    }
}
