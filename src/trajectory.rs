//! Archetype trajectory generation
//!
//! Produces the hidden daily engagement intensity of each entity. The shape of
//! every trajectory is looked up in a [`ShapeTable`], so archetypes can be
//! re-parameterized without touching materialization or extraction.

use crate::config::ArchetypeMix;
use crate::error::SimError;
use crate::rng::{entity_rng, Stream};
use crate::types::{Archetype, Entity, Trajectory};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::debug;

/// Closed interval sampled uniformly
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformRange {
    pub low: f64,
    pub high: f64,
}

impl UniformRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.high <= self.low {
            return self.low;
        }
        rng.gen_range(self.low..=self.high)
    }

    fn is_valid(&self) -> bool {
        self.low.is_finite() && self.high.is_finite() && self.low <= self.high
    }
}

/// Parametric shape of a hidden trajectory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    /// Per-entity baseline with small daily perturbation
    Plateau {
        base: UniformRange,
        noise_std: f64,
        floor: f64,
        ceiling: f64,
    },
    /// Linear interpolation from a start to an end level, plus noise
    LinearDecline {
        start: UniformRange,
        end: UniformRange,
        noise_std: f64,
    },
    /// I.i.d. baseline days followed by a short tail of low days
    TailDrop {
        baseline: UniformRange,
        dropped: UniformRange,
        min_tail_days: usize,
        max_tail_days: usize,
    },
    /// Sinusoid over the window, plus noise
    Periodic {
        center: f64,
        amplitude: f64,
        cycles: f64,
        noise_std: f64,
    },
}

impl Shape {
    /// Sample one trajectory of `n_days` values, clipped into [0, 1]
    pub fn sample<R: Rng>(&self, n_days: usize, rng: &mut R) -> Trajectory {
        let values = match self {
            Shape::Plateau {
                base,
                noise_std,
                floor,
                ceiling,
            } => {
                let level = base.sample(rng);
                (0..n_days)
                    .map(|_| (level + gaussian(rng, *noise_std)).clamp(*floor, *ceiling))
                    .collect()
            }
            Shape::LinearDecline {
                start,
                end,
                noise_std,
            } => {
                let from = start.sample(rng);
                let to = end.sample(rng);
                (0..n_days)
                    .map(|day| lerp(from, to, fraction(day, n_days)) + gaussian(rng, *noise_std))
                    .collect()
            }
            Shape::TailDrop {
                baseline,
                dropped,
                min_tail_days,
                max_tail_days,
            } => {
                let tail = rng
                    .gen_range(*min_tail_days..=(*max_tail_days).max(*min_tail_days))
                    .min(n_days.saturating_sub(1));
                let head = n_days - tail;
                let mut values: Vec<f64> = (0..head).map(|_| baseline.sample(rng)).collect();
                values.extend((0..tail).map(|_| dropped.sample(rng)));
                values
            }
            Shape::Periodic {
                center,
                amplitude,
                cycles,
                noise_std,
            } => (0..n_days)
                .map(|day| {
                    let x = cycles * 2.0 * PI * fraction(day, n_days);
                    center + amplitude * x.sin() + gaussian(rng, *noise_std)
                })
                .collect(),
        };
        Trajectory::from_values(values)
    }

    fn validate(&self) -> Result<(), String> {
        let ok = match self {
            Shape::Plateau {
                base,
                noise_std,
                floor,
                ceiling,
            } => base.is_valid() && valid_std(*noise_std) && floor <= ceiling,
            Shape::LinearDecline {
                start,
                end,
                noise_std,
            } => start.is_valid() && end.is_valid() && valid_std(*noise_std),
            Shape::TailDrop {
                baseline,
                dropped,
                min_tail_days,
                max_tail_days,
            } => baseline.is_valid() && dropped.is_valid() && min_tail_days <= max_tail_days,
            Shape::Periodic {
                center,
                amplitude,
                cycles,
                noise_std,
            } => center.is_finite() && amplitude.is_finite() && cycles.is_finite() && valid_std(*noise_std),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("invalid shape parameters: {self:?}"))
        }
    }
}

fn gaussian<R: Rng>(rng: &mut R, std: f64) -> f64 {
    if std <= 0.0 {
        return 0.0;
    }
    let z: f64 = rng.sample(StandardNormal);
    z * std
}

fn valid_std(std: f64) -> bool {
    std.is_finite() && std >= 0.0
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// Position of `day` within the window as a fraction in [0, 1]
fn fraction(day: usize, n_days: usize) -> f64 {
    if n_days <= 1 {
        return 0.0;
    }
    day as f64 / (n_days - 1) as f64
}

/// Archetype → shape lookup table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeTable {
    pub shapes: BTreeMap<Archetype, Shape>,
}

impl Default for ShapeTable {
    fn default() -> Self {
        let mut shapes = BTreeMap::new();
        shapes.insert(
            Archetype::StableHigh,
            Shape::Plateau {
                base: UniformRange::new(0.75, 0.95),
                noise_std: 0.05,
                floor: 0.5,
                ceiling: 1.0,
            },
        );
        shapes.insert(
            Archetype::GradualDecline,
            Shape::LinearDecline {
                start: UniformRange::new(0.7, 0.9),
                end: UniformRange::new(0.1, 0.3),
                noise_std: 0.08,
            },
        );
        shapes.insert(
            Archetype::SuddenDrop,
            Shape::TailDrop {
                baseline: UniformRange::new(0.5, 0.8),
                dropped: UniformRange::new(0.0, 0.2),
                min_tail_days: 3,
                max_tail_days: 7,
            },
        );
        shapes.insert(
            Archetype::Inconsistent,
            Shape::Periodic {
                center: 0.5,
                amplitude: 0.3,
                cycles: 2.0,
                noise_std: 0.15,
            },
        );
        Self { shapes }
    }
}

impl ShapeTable {
    pub fn shape(&self, archetype: Archetype) -> Option<&Shape> {
        self.shapes.get(&archetype)
    }

    /// Check every shape and that each archetype in `mix` has one
    pub fn validate(&self, mix: &ArchetypeMix) -> Result<(), SimError> {
        for shape in self.shapes.values() {
            shape.validate().map_err(SimError::InvalidConfig)?;
        }
        for (archetype, proportion) in &mix.proportions {
            if *proportion > 0.0 && !self.shapes.contains_key(archetype) {
                return Err(SimError::InvalidConfig(format!(
                    "no shape configured for archetype {}",
                    archetype.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Exact per-archetype counts for `n` entities (largest-remainder rounding)
pub fn allocate_counts(mix: &ArchetypeMix, n: usize) -> Vec<(Archetype, usize)> {
    let quotas: Vec<(Archetype, f64)> = mix
        .proportions
        .iter()
        .map(|(a, p)| (*a, p * n as f64))
        .collect();
    let mut counts: Vec<(Archetype, usize)> =
        quotas.iter().map(|(a, q)| (*a, q.floor() as usize)).collect();
    let assigned: usize = counts.iter().map(|(_, c)| c).sum();

    let mut order: Vec<usize> = (0..quotas.len()).collect();
    order.sort_by(|&i, &j| {
        let fi = quotas[i].1 - quotas[i].1.floor();
        let fj = quotas[j].1 - quotas[j].1.floor();
        fj.partial_cmp(&fi).unwrap_or(std::cmp::Ordering::Equal)
    });
    for &i in order.iter().cycle().take(n.saturating_sub(assigned)) {
        counts[i].1 += 1;
    }
    counts
}

/// Archetype of every entity, in contiguous archetype blocks
pub fn allocate_archetypes(mix: &ArchetypeMix, n: usize) -> Vec<Archetype> {
    allocate_counts(mix, n)
        .into_iter()
        .flat_map(|(a, count)| std::iter::repeat(a).take(count))
        .collect()
}

/// Generator for hidden entity trajectories
#[derive(Debug, Clone)]
pub struct TrajectoryGenerator {
    shapes: ShapeTable,
    n_days: usize,
    seed: u64,
}

impl TrajectoryGenerator {
    pub fn new(shapes: ShapeTable, n_days: usize, seed: u64) -> Self {
        Self {
            shapes,
            n_days,
            seed,
        }
    }

    /// Generate a single entity from its own random stream
    pub fn generate_entity(&self, index: usize, archetype: Archetype) -> Result<Entity, SimError> {
        let shape = self.shapes.shape(archetype).ok_or_else(|| {
            SimError::InvalidConfig(format!(
                "no shape configured for archetype {}",
                archetype.as_str()
            ))
        })?;
        let mut rng = entity_rng(self.seed, Stream::Trajectory, index);
        Ok(Entity {
            id: entity_id(index),
            index,
            archetype,
            trajectory: shape.sample(self.n_days, &mut rng),
        })
    }

    /// Generate `n` entities distributed according to `mix`
    pub fn generate(&self, mix: &ArchetypeMix, n: usize) -> Result<Vec<Entity>, SimError> {
        let archetypes = allocate_archetypes(mix, n);
        debug!(
            entities = archetypes.len(),
            days = self.n_days,
            "Generating trajectories"
        );
        archetypes
            .into_par_iter()
            .enumerate()
            .map(|(index, archetype)| self.generate_entity(index, archetype))
            .collect()
    }
}

/// Stable identifier of the entity at `index`
pub fn entity_id(index: usize) -> String {
    format!("user_{index:04}")
}
