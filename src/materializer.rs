//! Behavior materialization
//!
//! Maps each day's hidden intensity to observable metrics. Every metric is
//! drawn from a distribution whose mean depends on intensity, so archetypes
//! produce overlapping observable distributions rather than a deterministic
//! encoding.
//!
//! Metrics and their distribution families live in a [`MetricTable`]; adding a
//! metric only means adding a table entry.

use crate::error::SimError;
use crate::rng::{entity_rng, Stream};
use crate::types::{DayRecord, Entity, MetricKind};
use chrono::{Days, NaiveDate};
use rand::Rng;
use rand_distr::{Distribution, Exp, Gamma, Poisson, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Intensity threshold for the completed flag
pub const COMPLETION_THRESHOLD: f64 = 0.5;

/// Default share of numeric entries dropped to model sensor gaps
pub const DEFAULT_MISSING_RATE: f64 = 0.05;

/// Default spread of the per-entity personal level around 1
pub const DEFAULT_PERSONAL_STD: f64 = 0.15;

/// Distribution family of a metric, parameterized by the day's intensity `e`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DistributionFamily {
    /// `e × Gamma(shape, scale)`, right-skewed volume
    ScaledGamma { shape: f64, scale: f64 },
    /// With probability `participation × e` draw `Exp(mean)`, else 0
    GatedExponential { participation: f64, mean: f64 },
    /// `base + slope × (e − 0.5) + N(0, std)`, duration-like
    ShiftedNormal { base: f64, slope: f64, std: f64 },
    /// `Poisson(base + rate × e)`, counts
    Poisson { base: f64, rate: f64 },
}

impl DistributionFamily {
    /// Draw one raw (unclipped) value for the given intensity
    pub fn sample<R: Rng>(&self, intensity: f64, rng: &mut R) -> Result<f64, SimError> {
        match self {
            DistributionFamily::ScaledGamma { shape, scale } => {
                let gamma = Gamma::new(*shape, *scale).map_err(distribution_error)?;
                Ok(intensity * gamma.sample(rng))
            }
            DistributionFamily::GatedExponential {
                participation,
                mean,
            } => {
                let p = (participation * intensity).clamp(0.0, 1.0);
                if rng.gen::<f64>() >= p {
                    return Ok(0.0);
                }
                let exp = Exp::new(1.0 / mean).map_err(distribution_error)?;
                Ok(exp.sample(rng))
            }
            DistributionFamily::ShiftedNormal { base, slope, std } => {
                let z: f64 = rng.sample(StandardNormal);
                Ok(base + slope * (intensity - 0.5) + z * std)
            }
            DistributionFamily::Poisson { base, rate } => {
                let lambda = base + rate * intensity;
                if lambda <= 0.0 {
                    return Ok(0.0);
                }
                let poisson = Poisson::new(lambda).map_err(distribution_error)?;
                Ok(poisson.sample(rng))
            }
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            DistributionFamily::ScaledGamma { shape, scale } => {
                *shape > 0.0 && *scale > 0.0 && shape.is_finite() && scale.is_finite()
            }
            DistributionFamily::GatedExponential {
                participation,
                mean,
            } => (0.0..=1.0).contains(participation) && *mean > 0.0 && mean.is_finite(),
            DistributionFamily::ShiftedNormal { base, slope, std } => {
                base.is_finite() && slope.is_finite() && std.is_finite() && *std >= 0.0
            }
            DistributionFamily::Poisson { base, rate } => {
                base.is_finite() && rate.is_finite() && *base >= 0.0 && *rate >= 0.0
            }
        }
    }
}

fn distribution_error<E: std::fmt::Display>(e: E) -> SimError {
    SimError::InvalidConfig(format!("invalid distribution parameters: {e}"))
}

/// How a clipped value is rounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Whole units, truncated
    Floor,
    /// Round half away from zero to this many decimals
    Decimals(u32),
    Exact,
}

impl Rounding {
    fn apply(&self, value: f64) -> f64 {
        match self {
            Rounding::Floor => value.floor(),
            Rounding::Decimals(places) => {
                let factor = 10f64.powi(*places as i32);
                (value * factor).round() / factor
            }
            Rounding::Exact => value,
        }
    }
}

/// Materialization rule for one observable metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub kind: MetricKind,
    pub family: DistributionFamily,
    /// Physical lower bound; values below are clipped
    pub min: f64,
    /// Physical upper bound; values above are clipped
    pub max: f64,
    pub rounding: Rounding,
    /// Probability a day's value is recorded as missing
    pub missing_rate: f64,
    /// Spread of the entity's personal level, which scales the intensity
    /// every day of the window. Keeps per-entity means from tracking the
    /// archetype's mean intensity.
    #[serde(default = "default_personal_std")]
    pub personal_std: f64,
}

fn default_personal_std() -> f64 {
    DEFAULT_PERSONAL_STD
}

impl MetricSpec {
    /// Draw the entity's personal level, `max(0, 1 + N(0, personal_std))`
    pub fn personal_level<R: Rng>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        (1.0 + z * self.personal_std).max(0.0)
    }

    /// Draw an observed value, or `None` for a sensor gap
    pub fn observe<R: Rng>(&self, intensity: f64, rng: &mut R) -> Result<Option<f64>, SimError> {
        let raw = self.family.sample(intensity, rng)?;
        let value = self.rounding.apply(raw.clamp(self.min, self.max));
        let missing = rng.gen::<f64>() < self.missing_rate;
        Ok(if missing { None } else { Some(value) })
    }
}

/// Metric → distribution lookup table, in materialization order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTable {
    pub specs: Vec<MetricSpec>,
}

impl Default for MetricTable {
    fn default() -> Self {
        let spec = |kind, family, min, max, rounding| MetricSpec {
            kind,
            family,
            min,
            max,
            rounding,
            missing_rate: DEFAULT_MISSING_RATE,
            personal_std: DEFAULT_PERSONAL_STD,
        };
        Self {
            specs: vec![
                spec(
                    MetricKind::Steps,
                    DistributionFamily::ScaledGamma {
                        shape: 3.0,
                        scale: 2500.0,
                    },
                    0.0,
                    20_000.0,
                    Rounding::Floor,
                ),
                spec(
                    MetricKind::MeditationMinutes,
                    DistributionFamily::GatedExponential {
                        participation: 0.7,
                        mean: 15.0,
                    },
                    0.0,
                    60.0,
                    Rounding::Floor,
                ),
                spec(
                    MetricKind::ExerciseMinutes,
                    DistributionFamily::ScaledGamma {
                        shape: 2.0,
                        scale: 22.5,
                    },
                    0.0,
                    120.0,
                    Rounding::Floor,
                ),
                spec(
                    MetricKind::SleepHours,
                    DistributionFamily::ShiftedNormal {
                        base: 7.0,
                        slope: 2.0,
                        std: 1.0,
                    },
                    4.0,
                    10.0,
                    Rounding::Decimals(1),
                ),
                spec(
                    MetricKind::WaterGlasses,
                    DistributionFamily::Poisson {
                        base: 1.5,
                        rate: 6.0,
                    },
                    0.0,
                    12.0,
                    Rounding::Floor,
                ),
                spec(
                    MetricKind::SocialInteractions,
                    DistributionFamily::Poisson {
                        base: 0.0,
                        rate: 3.0,
                    },
                    0.0,
                    20.0,
                    Rounding::Floor,
                ),
            ],
        }
    }
}

impl MetricTable {
    pub fn spec(&self, kind: MetricKind) -> Option<&MetricSpec> {
        self.specs.iter().find(|s| s.kind == kind)
    }

    /// Metric kinds in table order
    pub fn kinds(&self) -> Vec<MetricKind> {
        self.specs.iter().map(|s| s.kind).collect()
    }

    /// Override the missing rate of every metric
    pub fn with_missing_rate(mut self, rate: f64) -> Self {
        for spec in &mut self.specs {
            spec.missing_rate = rate;
        }
        self
    }

    /// Override the personal-level spread of every metric
    pub fn with_personal_std(mut self, std: f64) -> Self {
        for spec in &mut self.specs {
            spec.personal_std = std;
        }
        self
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.specs.is_empty() {
            return Err(SimError::InvalidConfig("metric table is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for spec in &self.specs {
            let name = spec.kind.as_str();
            if !seen.insert(spec.kind) {
                return Err(SimError::InvalidConfig(format!(
                    "metric {name} configured more than once"
                )));
            }
            if !(spec.min.is_finite() && spec.max.is_finite() && spec.min <= spec.max) {
                return Err(SimError::InvalidConfig(format!(
                    "metric {name} has invalid bounds [{}, {}]",
                    spec.min, spec.max
                )));
            }
            if !(0.0..=1.0).contains(&spec.missing_rate) {
                return Err(SimError::InvalidConfig(format!(
                    "metric {name} missing rate must be in [0, 1], got {}",
                    spec.missing_rate
                )));
            }
            if !spec.personal_std.is_finite() || spec.personal_std < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "metric {name} personal std must be non-negative, got {}",
                    spec.personal_std
                )));
            }
            if !spec.family.is_valid() {
                return Err(SimError::InvalidConfig(format!(
                    "metric {name} has invalid distribution parameters: {:?}",
                    spec.family
                )));
            }
        }
        Ok(())
    }
}

/// Materializer turning hidden trajectories into observable day records
#[derive(Debug, Clone)]
pub struct BehaviorMaterializer {
    metrics: MetricTable,
    completion_noise_std: f64,
    seed: u64,
    start_date: NaiveDate,
}

impl BehaviorMaterializer {
    pub fn new(
        metrics: MetricTable,
        completion_noise_std: f64,
        seed: u64,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            metrics,
            completion_noise_std,
            seed,
            start_date,
        }
    }

    pub fn metrics(&self) -> &MetricTable {
        &self.metrics
    }

    /// Produce one record per day of the entity's trajectory
    ///
    /// A pure function of the trajectory and the entity's materialization stream.
    pub fn materialize(&self, entity: &Entity) -> Result<Vec<DayRecord>, SimError> {
        let mut rng = entity_rng(self.seed, Stream::Materialize, entity.index);
        let levels: Vec<f64> = self
            .metrics
            .specs
            .iter()
            .map(|spec| spec.personal_level(&mut rng))
            .collect();
        entity
            .trajectory
            .values()
            .iter()
            .enumerate()
            .map(|(day, &intensity)| {
                let date = self
                    .start_date
                    .checked_add_days(Days::new(day as u64))
                    .ok_or_else(|| {
                        SimError::InvalidConfig(format!("day {day} overflows the calendar"))
                    })?;

                let z: f64 = rng.sample(StandardNormal);
                let completed = intensity + z * self.completion_noise_std > COMPLETION_THRESHOLD;

                let mut metrics = BTreeMap::new();
                for (spec, level) in self.metrics.specs.iter().zip(&levels) {
                    metrics.insert(spec.kind, spec.observe(intensity * level, &mut rng)?);
                }

                Ok(DayRecord {
                    entity_id: entity.id.clone(),
                    day: day as u32,
                    date,
                    completed,
                    metrics,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Archetype, Trajectory};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn entity(values: Vec<f64>) -> Entity {
        Entity {
            id: "user_0000".to_string(),
            index: 0,
            archetype: Archetype::StableHigh,
            trajectory: Trajectory::from_values(values),
        }
    }

    fn materializer(metrics: MetricTable) -> BehaviorMaterializer {
        BehaviorMaterializer::new(
            metrics,
            0.05,
            42,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
    }

    #[test]
    fn test_one_record_per_day_with_dates() {
        let records = materializer(MetricTable::default())
            .materialize(&entity(vec![0.8; 12]))
            .unwrap();
        assert_eq!(records.len(), 12);
        assert_eq!(records[0].day, 0);
        assert_eq!(records[11].day, 11);
        assert_eq!(
            records[11].date,
            NaiveDate::from_ymd_opt(2024, 1, 12).unwrap()
        );
        assert!(records.iter().all(|r| r.metrics.len() == 6));
    }

    #[test]
    fn test_values_respect_bounds() {
        let table = MetricTable::default();
        let records = materializer(table.clone())
            .materialize(&entity((0..200).map(|i| (i % 11) as f64 / 10.0).collect()))
            .unwrap();
        for record in &records {
            for spec in &table.specs {
                if let Some(v) = record.metric(spec.kind) {
                    assert!(v >= spec.min && v <= spec.max, "{:?} = {v}", spec.kind);
                }
            }
        }
    }

    #[test]
    fn test_zero_intensity_yields_no_volume() {
        let records = materializer(MetricTable::default().with_missing_rate(0.0))
            .materialize(&entity(vec![0.0; 20]))
            .unwrap();
        for record in &records {
            assert_eq!(record.metric(MetricKind::Steps), Some(0.0));
            assert_eq!(record.metric(MetricKind::MeditationMinutes), Some(0.0));
            assert_eq!(record.metric(MetricKind::SocialInteractions), Some(0.0));
            assert!(!record.completed);
        }
    }

    #[test]
    fn test_mean_tracks_intensity() {
        let m = materializer(
            MetricTable::default()
                .with_missing_rate(0.0)
                .with_personal_std(0.0),
        );
        let mean_steps = |intensity: f64| {
            let records = m.materialize(&entity(vec![intensity; 400])).unwrap();
            records
                .iter()
                .filter_map(|r| r.metric(MetricKind::Steps))
                .sum::<f64>()
                / records.len() as f64
        };
        let low = mean_steps(0.2);
        let high = mean_steps(0.9);
        // Expected means are 1500 and 6750
        assert!(low < high);
        assert!((high - 6750.0).abs() < 1000.0);
    }

    #[test]
    fn test_personal_level_varies_across_entities() {
        let m = materializer(MetricTable::default().with_missing_rate(0.0));
        let mean_steps = |index: usize| {
            let mut e = entity(vec![0.8; 300]);
            e.index = index;
            let records = m.materialize(&e).unwrap();
            records
                .iter()
                .filter_map(|r| r.metric(MetricKind::Steps))
                .sum::<f64>()
                / records.len() as f64
        };
        let means: Vec<f64> = (0..40).map(mean_steps).collect();
        let spread = means.iter().cloned().fold(f64::MIN, f64::max)
            - means.iter().cloned().fold(f64::MAX, f64::min);
        // Day-to-day noise alone leaves 300-day means within a few hundred steps
        assert!(spread > 1500.0, "spread {spread}");

        let flat = materializer(MetricTable::default().with_personal_std(0.0));
        let spec = &flat.metrics().specs[0];
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        assert_eq!(spec.personal_level(&mut rng), 1.0);
    }

    #[test]
    fn test_personal_std_validated() {
        let table = MetricTable::default().with_personal_std(-0.1);
        assert!(table.validate().is_err());
        let json = r#"{"kind":"steps","family":{"family":"poisson","base":0.0,"rate":1.0},"min":0.0,"max":5.0,"rounding":"floor","missing_rate":0.0}"#;
        let spec: MetricSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.personal_std, DEFAULT_PERSONAL_STD);
    }

    #[test]
    fn test_missing_rate_roughly_honored() {
        let records = materializer(MetricTable::default())
            .materialize(&entity(vec![0.6; 1000]))
            .unwrap();
        let missing = records
            .iter()
            .filter(|r| r.metric(MetricKind::Steps).is_none())
            .count();
        let rate = missing as f64 / records.len() as f64;
        assert!(rate > 0.025 && rate < 0.08, "missing rate {rate}");
    }

    #[test]
    fn test_completion_threshold() {
        let m = BehaviorMaterializer::new(
            MetricTable::default(),
            0.0,
            1,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let records = m.materialize(&entity(vec![0.49, 0.51, 0.9, 0.1])).unwrap();
        let flags: Vec<bool> = records.iter().map(|r| r.completed).collect();
        assert_eq!(flags, vec![false, true, true, false]);
    }

    #[test]
    fn test_rounding_modes() {
        assert_eq!(Rounding::Floor.apply(7.9), 7.0);
        assert_eq!(Rounding::Decimals(1).apply(7.26), 7.3);
        assert_eq!(Rounding::Exact.apply(7.26), 7.26);
    }

    #[test]
    fn test_poisson_zero_rate() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let family = DistributionFamily::Poisson {
            base: 0.0,
            rate: 3.0,
        };
        assert_eq!(family.sample(0.0, &mut rng).unwrap(), 0.0);
    }

    #[test]
    fn test_duplicate_metric_rejected() {
        let mut table = MetricTable::default();
        let first = table.specs[0].clone();
        table.specs.push(first);
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut table = MetricTable::default();
        table.specs[0].min = 10.0;
        table.specs[0].max = 1.0;
        assert!(table.validate().is_err());
        assert!(MetricTable::default().validate().is_ok());
    }
}
