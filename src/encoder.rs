//! Cohort export
//!
//! Encodes simulated cohorts into NDJSON or JSON rows for persistence
//! collaborators. Row output is a pure function of the cohort; run metadata
//! (run id, timestamps) lives only in the separate [`DatasetSummary`].

use crate::config::NoiseMode;
use crate::error::SimError;
use crate::evaluator::EvaluationReport;
use crate::labels::LabelSet;
use crate::leakage::LeakageReport;
use crate::pipeline::SimulatedCohort;
use crate::types::{FeatureFlag, Label};
use crate::{COHORT_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current export schema version
pub const EXPORT_VERSION: &str = "1.0.0";

/// One entity's feature row with both label vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub entity_id: String,
    /// Named feature values in extractor column order, written as a JSON object
    #[serde(with = "ordered_features")]
    pub features: Vec<(String, f64)>,
    pub total_days: u32,
    pub flags: Vec<FeatureFlag>,
    pub clean_label: Label,
    pub noisy_label: Label,
}

/// Whole-cohort JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortExport {
    pub export_version: String,
    pub columns: Vec<String>,
    pub classes: Vec<String>,
    pub rows: Vec<ExportRow>,
}

impl ExportRow {
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| *value)
    }
}

/// Serializes `(name, value)` pairs as a map, keeping their order both ways
mod ordered_features {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(pairs: &[(String, f64)], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (name, value) in pairs {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, f64)>, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = Vec<(String, f64)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of feature names to numbers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, f64>()? {
                    pairs.push(entry);
                }
                Ok(pairs)
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
}

/// Run metadata and label statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub run_id: String,
    pub generated_at_utc: String,
    pub producer: Producer,
    pub n_entities: usize,
    pub n_days: usize,
    pub seed: u64,
    pub p_noise: f64,
    pub noise_mode: NoiseMode,
    pub flipped: usize,
    pub flipped_fraction: f64,
    pub clean_distribution: BTreeMap<Label, usize>,
    pub noisy_distribution: BTreeMap<Label, usize>,
}

/// Encoder for cohort exports and evaluation reports
pub struct CohortEncoder {
    run_id: String,
}

impl Default for CohortEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CohortEncoder {
    /// Create a new encoder with a unique run ID
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific run ID
    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Row view of the cohort in entity order
    pub fn rows(&self, cohort: &SimulatedCohort) -> Vec<ExportRow> {
        let columns = &cohort.features.columns;
        cohort
            .features
            .rows
            .iter()
            .zip(cohort.labels.clean.iter().zip(&cohort.labels.noisy))
            .map(|(row, (clean, noisy))| {
                let values = row.values(&cohort.features.metrics);
                ExportRow {
                    entity_id: row.entity_id.clone(),
                    features: columns.iter().cloned().zip(values).collect(),
                    total_days: row.total_days,
                    flags: row.flags.clone(),
                    clean_label: *clean,
                    noisy_label: *noisy,
                }
            })
            .collect()
    }

    /// One JSON object per line, newline-terminated
    pub fn encode_rows_ndjson(&self, cohort: &SimulatedCohort) -> Result<String, SimError> {
        let mut out = String::new();
        for row in self.rows(cohort) {
            out.push_str(&serde_json::to_string(&row)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Read rows back from NDJSON, skipping blank lines
    pub fn decode_rows_ndjson(ndjson: &str) -> Result<Vec<ExportRow>, SimError> {
        ndjson
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SimError::from))
            .collect()
    }

    /// Whole-cohort document
    pub fn encode_json(&self, cohort: &SimulatedCohort) -> Result<String, SimError> {
        let export = CohortExport {
            export_version: EXPORT_VERSION.to_string(),
            columns: cohort.features.columns.clone(),
            classes: Label::class_names(),
            rows: self.rows(cohort),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    pub fn summary(&self, cohort: &SimulatedCohort) -> DatasetSummary {
        let labels = &cohort.labels;
        DatasetSummary {
            run_id: self.run_id.clone(),
            generated_at_utc: Utc::now().to_rfc3339(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: COHORT_VERSION.to_string(),
            },
            n_entities: cohort.len(),
            n_days: cohort.config.n_days,
            seed: cohort.config.seed,
            p_noise: cohort.config.label_noise.p_noise,
            noise_mode: cohort.config.label_noise.mode,
            flipped: labels.flipped(),
            flipped_fraction: labels.flipped_fraction(),
            clean_distribution: LabelSet::distribution(&labels.clean),
            noisy_distribution: LabelSet::distribution(&labels.noisy),
        }
    }

    pub fn encode_summary_json(&self, cohort: &SimulatedCohort) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(&self.summary(cohort))?)
    }

    pub fn encode_report_json(&self, report: &EvaluationReport) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(report)?)
    }

    /// Leakage reports as one JSON array
    pub fn encode_leakage_json(&self, reports: &[LeakageReport]) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(reports)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::pipeline::simulate;

    fn cohort() -> SimulatedCohort {
        simulate(&SimulationConfig::default().with_entities(12).with_label_noise(0.25)).unwrap()
    }

    #[test]
    fn test_ndjson_one_line_per_entity() {
        let cohort = cohort();
        let ndjson = CohortEncoder::new().encode_rows_ndjson(&cohort).unwrap();
        assert_eq!(ndjson.lines().count(), 12);
        assert!(ndjson.ends_with('\n'));

        let first: serde_json::Value = serde_json::from_str(ndjson.lines().next().unwrap()).unwrap();
        assert_eq!(first["entity_id"], "user_0000");
        assert_eq!(first["total_days"], 30);
        assert_eq!(first["clean_label"], "highly_engaged");
        assert!(first["features"]["activity_slope"].is_number());
        assert!(first.get("generated_at_utc").is_none());
    }

    #[test]
    fn test_rows_independent_of_run_id() {
        let cohort = cohort();
        let a = CohortEncoder::with_run_id("a".to_string());
        let b = CohortEncoder::with_run_id("b".to_string());
        assert_eq!(
            a.encode_rows_ndjson(&cohort).unwrap(),
            b.encode_rows_ndjson(&cohort).unwrap()
        );
        assert_eq!(a.encode_json(&cohort).unwrap(), b.encode_json(&cohort).unwrap());
    }

    #[test]
    fn test_decode_ndjson() {
        let cohort = cohort();
        let encoder = CohortEncoder::new();
        let decoded =
            CohortEncoder::decode_rows_ndjson(&encoder.encode_rows_ndjson(&cohort).unwrap()).unwrap();
        assert_eq!(decoded.len(), 12);
        assert_eq!(decoded[3].noisy_label, cohort.labels.noisy[3]);
        assert_eq!(decoded[3].features.len(), cohort.features.columns.len());
        assert_eq!(
            decoded[3].feature("momentum"),
            cohort.features.column("momentum").map(|c| c[3])
        );
        assert!(CohortEncoder::decode_rows_ndjson("{not json").is_err());
    }

    #[test]
    fn test_row_keys_follow_column_order() {
        let cohort = cohort();
        let ndjson = CohortEncoder::new().encode_rows_ndjson(&cohort).unwrap();
        let line = ndjson.lines().next().unwrap();
        let positions: Vec<usize> = cohort
            .features
            .columns
            .iter()
            .map(|c| line.find(&format!("\"{c}\":")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{line}");

        let decoded = CohortEncoder::decode_rows_ndjson(&ndjson).unwrap();
        let names: Vec<&str> = decoded[0].features.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, cohort.features.columns);
    }

    #[test]
    fn test_summary() {
        let cohort = cohort();
        let summary = CohortEncoder::with_run_id("run-1".to_string()).summary(&cohort);
        assert_eq!(summary.run_id, "run-1");
        assert_eq!(summary.producer.name, "synheart-cohort");
        assert_eq!(summary.clean_distribution.values().sum::<usize>(), 12);
        assert_eq!(summary.noisy_distribution.values().sum::<usize>(), 12);
        assert_eq!(summary.flipped, cohort.labels.flipped());
        assert_eq!(summary.clean_distribution[&Label::Dropout], 3);
    }

    #[test]
    fn test_leakage_reports_encode_as_array() {
        let cohort = cohort();
        let reports = crate::leakage::audit_archetypes(&cohort).unwrap();
        let json = CohortEncoder::new().encode_leakage_json(&reports).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 5);
        assert_eq!(parsed[1]["target"], "is_stable_high");
    }

    #[test]
    fn test_json_document() {
        let cohort = cohort();
        let json = CohortEncoder::new().encode_json(&cohort).unwrap();
        let export: CohortExport = serde_json::from_str(&json).unwrap();
        assert_eq!(export.export_version, EXPORT_VERSION);
        assert_eq!(export.columns, cohort.features.columns);
        assert_eq!(export.classes.len(), 4);
        assert_eq!(export.rows.len(), 12);
    }
}
