//! End-to-end scenarios: simulate, export, evaluate, audit

use approx::assert_abs_diff_eq;
use pretty_assertions::assert_eq;
use synheart_cohort::config::{EvaluatorConfig, NoiseMode, SimulationConfig};
use synheart_cohort::evaluator::{CrossDistributionEvaluator, LabeledDataset};
use synheart_cohort::labels::LabelSet;
use synheart_cohort::leakage::{audit, audit_archetypes, pearson};
use synheart_cohort::types::{Archetype, Label, TEMPORAL_COLUMNS};
use synheart_cohort::{simulate, CohortEncoder, LogisticRegression, SimError};

fn evaluator() -> CrossDistributionEvaluator {
    CrossDistributionEvaluator::new(EvaluatorConfig::default()).unwrap()
}

#[test]
fn scenario_uniform_archetype_split() {
    let cohort = simulate(&SimulationConfig::default().with_entities(200).with_days(30)).unwrap();
    let counts = cohort.archetype_counts();
    assert_eq!(counts.len(), 4);
    for archetype in Archetype::ALL {
        assert_eq!(counts[&archetype], 50, "{}", archetype.as_str());
    }
    assert_eq!(cohort.features.len(), 200);
}

#[test]
fn scenario_zero_noise_labels_identical() {
    let cohort = simulate(&SimulationConfig::default().with_entities(200).with_label_noise(0.0)).unwrap();
    assert_eq!(cohort.labels.clean, cohort.labels.noisy);
    assert_eq!(cohort.labels.flipped(), 0);
}

#[test]
fn scenario_full_noise_labels_uniform() {
    for mode in [NoiseMode::DifferentLabel, NoiseMode::AnyLabel] {
        let config = SimulationConfig::default()
            .with_entities(2000)
            .with_label_noise(1.0)
            .with_noise_mode(mode);
        let cohort = simulate(&config).unwrap();
        let distribution = LabelSet::distribution(&cohort.labels.noisy);
        for label in Label::ALL {
            let frequency = distribution[&label] as f64 / 2000.0;
            assert_abs_diff_eq!(frequency, 0.25, epsilon = 0.04);
        }
    }
}

#[test]
fn noise_rate_matches_configuration() {
    let cohort = simulate(&SimulationConfig::default().with_entities(1000).with_label_noise(0.10)).unwrap();
    let rate = cohort.labels.flipped_fraction();
    assert!((0.07..=0.13).contains(&rate), "observed flip rate {rate}");
}

#[test]
fn any_label_noise_rate_is_below_nominal() {
    // Self-assignment is allowed, so the effective rate is p * (1 - 1/4)
    let config = SimulationConfig::default()
        .with_entities(1000)
        .with_label_noise(0.4)
        .with_noise_mode(NoiseMode::AnyLabel);
    let rate = simulate(&config).unwrap().labels.flipped_fraction();
    assert_abs_diff_eq!(rate, 0.3, epsilon = 0.05);
}

#[test]
fn generation_is_byte_identical() {
    let config = SimulationConfig::default().with_entities(60).with_label_noise(0.2).with_seed(99);
    let a = simulate(&config).unwrap();
    let b = simulate(&config).unwrap();
    let encoder = CohortEncoder::new();
    assert_eq!(
        encoder.encode_rows_ndjson(&a).unwrap(),
        CohortEncoder::new().encode_rows_ndjson(&b).unwrap()
    );
    assert_eq!(a.labels.noisy, b.labels.noisy);
}

#[test]
fn no_feature_column_encodes_archetype() {
    for seed in 0..5 {
        let cohort = simulate(&SimulationConfig::default().with_entities(400).with_seed(seed)).unwrap();
        let ordinals = cohort.archetype_ordinals();
        for column in TEMPORAL_COLUMNS {
            let values = cohort.features.column(column).unwrap();
            let r = pearson(&values, &ordinals);
            assert!(r.abs() < 0.9, "{column} correlates {r} with the archetype code");
        }

        let reports = audit_archetypes(&cohort).unwrap();
        assert_eq!(reports.len(), 1 + Archetype::ALL.len());
        for report in &reports {
            assert_eq!(report.columns.len(), cohort.features.columns.len());
            for column in &report.columns {
                assert!(
                    column.correlation.abs() < 0.9,
                    "seed {seed}: {} correlates {} with {}",
                    column.column,
                    column.correlation,
                    report.target
                );
            }
            assert!(report.is_clean());
        }
    }
}

#[test]
fn stable_high_indicator_audit_is_clean() {
    let cohort = simulate(&SimulationConfig::default()).unwrap();
    let clean = cohort.clean_dataset().unwrap();
    let indicator = cohort.archetype_indicator(Archetype::StableHigh);
    let report = audit(&clean, "is_stable_high", &indicator).unwrap();
    for name in ["mean_sleep_hours", "mean_steps", "mean_water_glasses", "completion_rate"] {
        let column = report.column(name).unwrap();
        assert!(column.correlation.abs() < 0.9, "{name} r = {}", column.correlation);
    }
    assert!(report.is_clean());
}

#[test]
fn scenario_identical_datasets_report_zero_gap() {
    let cohort = simulate(&SimulationConfig::default().with_entities(80)).unwrap();
    let a = cohort.clean_dataset().unwrap();
    let b = LabeledDataset {
        name: "copy".to_string(),
        ..a.clone()
    };

    let cross = evaluator()
        .cross_evaluate(&a, &b, || LogisticRegression::new(1.0))
        .unwrap();
    assert_eq!(cross.gap_trained_on_a, 0.0);
    assert_eq!(cross.gap_trained_on_b, 0.0);
    let first = cross.results[0].accuracy;
    for result in &cross.results {
        assert_eq!(result.accuracy, first);
        assert_eq!(result.generalization_gap, 0.0);
    }

    let config = EvaluatorConfig::default();
    let sweep = evaluator()
        .sweep_regularization(&a, &b, LogisticRegression::factory(&config))
        .unwrap();
    assert!(sweep.candidates.iter().all(|c| c.gap == 0.0));
}

#[test]
fn scenario_single_row_is_configuration_error() {
    let cohort = simulate(&SimulationConfig::default().with_entities(4)).unwrap();
    let full = cohort.clean_dataset().unwrap();
    let single = LabeledDataset::new(
        "single",
        full.columns.clone(),
        vec![full.rows[0].clone()],
        vec![full.labels[0]],
        full.classes.clone(),
    );
    let config = EvaluatorConfig::default();
    let err = evaluator()
        .sweep_regularization(&single, &single, LogisticRegression::factory(&config))
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidConfig(_)), "got {err:?}");
}

#[test]
fn clean_model_learns_temporal_patterns() {
    let cohort = simulate(&SimulationConfig::default().with_entities(200).with_label_noise(0.2)).unwrap();
    let clean = cohort.clean_dataset().unwrap();
    let noisy = cohort.noisy_dataset().unwrap();
    let config = EvaluatorConfig::default();
    let report = CrossDistributionEvaluator::new(config.clone())
        .unwrap()
        .evaluate(&clean, &noisy, LogisticRegression::factory(&config))
        .unwrap();

    assert_eq!(report.cross.results.len(), 4);
    let clean_on_clean = report.cross.result("clean", "clean").unwrap();
    // Well above the 0.25 chance level of four balanced classes
    assert!(clean_on_clean.accuracy > 0.5, "accuracy {}", clean_on_clean.accuracy);
    assert_eq!(report.sweep.candidates.len(), 5);
    assert!(report
        .sweep
        .candidates
        .iter()
        .all(|c| c.score <= report.sweep.best.score));
}

#[test]
fn binary_dropout_evaluation() {
    let cohort = simulate(&SimulationConfig::default().with_entities(120).with_label_noise(0.1)).unwrap();
    let clean = cohort.clean_dataset().unwrap().binarize("dropout").unwrap();
    let noisy = cohort.noisy_dataset().unwrap().binarize("dropout").unwrap();
    assert_eq!(clean.distribution()["dropout"], 30);

    let config = EvaluatorConfig::default();
    let report = CrossDistributionEvaluator::new(config.clone())
        .unwrap()
        .evaluate(&clean, &noisy, LogisticRegression::factory(&config))
        .unwrap();
    let json = CohortEncoder::new().encode_report_json(&report).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["cross"]["results"].as_array().unwrap().len(), 4);
    assert_eq!(
        parsed["cross"]["results"][0]["per_class"][1]["class"],
        "dropout"
    );
}
