//! Synheart Cohort - Synthetic longitudinal behavior cohorts with controllable label noise
//!
//! Cohort simulates daily user-behavior series through a deterministic pipeline:
//! hidden archetype trajectories → observable day records → temporal features
//! → clean and noisy labels. A cross-distribution evaluator then measures how
//! well classifiers generalize between the two label regimes.
//!
//! ## Modules
//!
//! - **Simulation**: `trajectory`, `materializer`, `features`, `labels`, driven by `pipeline`
//! - **Evaluation**: `classifier`, `metrics`, `evaluator`, `leakage`
//! - **Export**: `encoder` for NDJSON/JSON rows and reports

pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod labels;
pub mod leakage;
pub mod materializer;
pub mod metrics;
pub mod pipeline;
pub mod rng;
pub mod trajectory;
pub mod transform;
pub mod types;

pub use classifier::{Classifier, LogisticRegression};
pub use config::{EvaluatorConfig, NoiseMode, SimulationConfig};
pub use encoder::CohortEncoder;
pub use error::SimError;
pub use evaluator::{CrossDistributionEvaluator, LabeledDataset};
pub use pipeline::{simulate, CohortSimulator, SimulatedCohort};
pub use types::{Archetype, DayRecord, FeatureRow, Label, MetricKind};

/// Cohort version embedded in every dataset summary
pub const COHORT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for dataset summaries
pub const PRODUCER_NAME: &str = "synheart-cohort";
