//! Error types for Synheart Cohort

use thiserror::Error;

/// Errors that can occur during simulation or evaluation
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Feature schema mismatch (only in left: {left_only:?}, only in right: {right_only:?})")]
    SchemaMismatch {
        left_only: Vec<String>,
        right_only: Vec<String>,
    },

    #[error("Class '{class}' has no support in the {split} split")]
    MissingClassSupport { class: String, split: String },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Evaluation budget exhausted: {0}")]
    BudgetExhausted(String),
}
