//! Temporal feature extraction
//!
//! Computes per-entity features from observable day records only. The extractor
//! has no access to trajectories or archetypes; its input type carries neither.

use crate::config::{ProxyConfig, SimulationConfig};
use crate::types::{feature_columns, DayRecord, FeatureFlag, FeatureRow, FeatureTable, MetricKind};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Longest lookback any feature needs (the short-window decline)
pub const LONGEST_LOOKBACK_DAYS: usize = 10;

/// Window for slope and momentum
pub const TREND_WINDOW_DAYS: usize = 7;

/// Final window of the short-window decline
pub const RECENT_DROP_DAYS: usize = 3;

/// Feature extractor over observable day records
#[derive(Debug, Clone)]
pub struct TemporalFeatureExtractor {
    metrics: Vec<MetricKind>,
    proxy: ProxyConfig,
}

impl TemporalFeatureExtractor {
    pub fn new(metrics: Vec<MetricKind>, proxy: ProxyConfig) -> Self {
        Self { metrics, proxy }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.metrics.kinds(), config.proxy.clone())
    }

    /// Column names of the rows this extractor produces
    pub fn columns(&self) -> Vec<String> {
        feature_columns(&self.metrics)
    }

    /// Extract one feature row from a single entity's records
    pub fn extract(&self, records: &[DayRecord]) -> FeatureRow {
        let mut sorted: Vec<&DayRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.day);

        let mut flags = Vec::new();
        let proxy: Vec<Option<f64>> = sorted
            .iter()
            .map(|r| r.metric(self.proxy.metric).map(|v| v * self.proxy.scale))
            .collect();
        let n = proxy.len();

        // Trend and decline need the full lookback
        let (activity_slope, short_window_decline) = if n < LONGEST_LOOKBACK_DAYS {
            flags.push(FeatureFlag::InsufficientHistory);
            (0.0, 0.0)
        } else {
            let slope = difference(
                window_mean(&proxy[n - TREND_WINDOW_DAYS..]),
                window_mean(&proxy[..TREND_WINDOW_DAYS]),
                &mut flags,
            ) / TREND_WINDOW_DAYS as f64;
            let decline = difference(
                window_mean(&proxy[n - LONGEST_LOOKBACK_DAYS..n - RECENT_DROP_DAYS]),
                window_mean(&proxy[n - RECENT_DROP_DAYS..]),
                &mut flags,
            );
            (slope, decline)
        };

        let momentum = difference(
            window_mean(&proxy[n.saturating_sub(TREND_WINDOW_DAYS)..]),
            window_mean(&proxy),
            &mut flags,
        );

        let observed: Vec<f64> = proxy.iter().flatten().copied().collect();
        let consistency = 1.0 / (1.0 + sample_std(&observed));

        let days_active = sorted.iter().filter(|r| r.completed).count() as u32;
        let completion_rate = if n == 0 {
            0.0
        } else {
            days_active as f64 / n as f64
        };

        let mut metric_means = BTreeMap::new();
        for &kind in &self.metrics {
            let values: Vec<Option<f64>> = sorted.iter().map(|r| r.metric(kind)).collect();
            let mean = window_mean(&values).unwrap_or_else(|| {
                flags.push(FeatureFlag::AllMissing(kind));
                0.0
            });
            metric_means.insert(kind, mean);
        }

        let social_interactions_total = sorted
            .iter()
            .filter_map(|r| r.metric(MetricKind::SocialInteractions))
            .sum();

        FeatureRow {
            entity_id: sorted
                .first()
                .map(|r| r.entity_id.clone())
                .unwrap_or_default(),
            activity_slope,
            short_window_decline,
            momentum,
            consistency,
            completion_rate,
            days_active,
            total_days: n as u32,
            metric_means,
            social_interactions_total,
            flags,
        }
    }

    /// Extract rows for many entities, one record slice per entity
    pub fn extract_table(&self, records: &[Vec<DayRecord>]) -> FeatureTable {
        let rows = records.par_iter().map(|r| self.extract(r)).collect();
        FeatureTable::new(self.metrics.clone(), rows)
    }
}

/// Mean of the observed values in a window; missing days are omitted
fn window_mean(window: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = window
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// `a - b`, or 0 with an `EmptyWindow` flag when either side is unobserved
fn difference(a: Option<f64>, b: Option<f64>, flags: &mut Vec<FeatureFlag>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => a - b,
        _ => {
            if !flags.contains(&FeatureFlag::EmptyWindow) {
                flags.push(FeatureFlag::EmptyWindow);
            }
            0.0
        }
    }
}

/// Sample standard deviation (n - 1), 0 for fewer than two values
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}
