//! Label assignment with noise injection
//!
//! Clean labels come from the hidden archetype through a fixed [`LabelMap`].
//! Noisy labels are the clean labels perturbed independently per entity, each
//! from its own label-noise stream, so both vectors pair with the same feature
//! matrix and are reproducible from the run seed.

use crate::config::{ArchetypeMix, LabelNoiseConfig, NoiseMode};
use crate::error::SimError;
use crate::rng::{entity_rng, Stream};
use crate::types::{Archetype, Entity, Label};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Archetype → outcome label table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMap {
    pub mapping: BTreeMap<Archetype, Label>,
}

impl Default for LabelMap {
    fn default() -> Self {
        let mapping = [
            (Archetype::StableHigh, Label::HighlyEngaged),
            (Archetype::GradualDecline, Label::Struggling),
            (Archetype::SuddenDrop, Label::Dropout),
            (Archetype::Inconsistent, Label::Moderate),
        ]
        .into_iter()
        .collect();
        Self { mapping }
    }
}

impl LabelMap {
    pub fn clean_label(&self, archetype: Archetype) -> Option<Label> {
        self.mapping.get(&archetype).copied()
    }

    /// Every archetype that can be generated must map to a label
    pub fn validate(&self, mix: &ArchetypeMix) -> Result<(), SimError> {
        for (archetype, proportion) in &mix.proportions {
            if *proportion > 0.0 && !self.mapping.contains_key(archetype) {
                return Err(SimError::InvalidConfig(format!(
                    "no label configured for archetype {}",
                    archetype.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Clean and noisy label vectors over the same entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    pub clean: Vec<Label>,
    pub noisy: Vec<Label>,
}

impl LabelSet {
    pub fn len(&self) -> usize {
        self.clean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clean.is_empty()
    }

    /// Number of entities whose noisy label differs from the clean one
    pub fn flipped(&self) -> usize {
        self.clean
            .iter()
            .zip(&self.noisy)
            .filter(|(c, n)| c != n)
            .count()
    }

    /// Fraction of entities whose noisy label differs from the clean one
    pub fn flipped_fraction(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.flipped() as f64 / self.len() as f64
    }

    /// Count of each label in a vector
    pub fn distribution(labels: &[Label]) -> BTreeMap<Label, usize> {
        let mut counts: BTreeMap<Label, usize> = Label::ALL.iter().map(|l| (*l, 0)).collect();
        for label in labels {
            *counts.entry(*label).or_insert(0) += 1;
        }
        counts
    }
}

/// Assigns clean labels and injects label noise
#[derive(Debug, Clone)]
pub struct LabelAssigner {
    map: LabelMap,
    noise: LabelNoiseConfig,
    seed: u64,
}

impl LabelAssigner {
    pub fn new(map: LabelMap, noise: LabelNoiseConfig, seed: u64) -> Self {
        Self { map, noise, seed }
    }

    /// Noisy label for one entity, drawn from its label-noise stream
    pub fn perturb(&self, index: usize, clean: Label) -> Label {
        let mut rng = entity_rng(self.seed, Stream::LabelNoise, index);
        if rng.gen::<f64>() >= self.noise.p_noise {
            return clean;
        }
        match self.noise.mode {
            NoiseMode::AnyLabel => *Label::ALL.choose(&mut rng).unwrap_or(&clean),
            NoiseMode::DifferentLabel => {
                let others: Vec<Label> = Label::ALL.iter().copied().filter(|l| *l != clean).collect();
                *others.choose(&mut rng).unwrap_or(&clean)
            }
        }
    }

    /// Assign clean and noisy labels to every entity
    pub fn assign(&self, entities: &[Entity]) -> Result<LabelSet, SimError> {
        let clean = entities
            .iter()
            .map(|e| {
                self.map.clean_label(e.archetype).ok_or_else(|| {
                    SimError::InvalidConfig(format!(
                        "no label configured for archetype {}",
                        e.archetype.as_str()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let noisy: Vec<Label> = entities
            .iter()
            .zip(&clean)
            .map(|(e, label)| self.perturb(e.index, *label))
            .collect();

        let labels = LabelSet { clean, noisy };
        info!(
            entities = labels.len(),
            flipped = labels.flipped(),
            p_noise = self.noise.p_noise,
            "Assigned labels"
        );
        Ok(labels)
    }
}
