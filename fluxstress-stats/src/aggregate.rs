//! Metrics Aggregator
//!
//! Collects `(worker, description, value)` samples and combines them into one
//! line per distinct description. Lines come out in the order their
//! description was first recorded.

use crate::means::{arithmetic_mean, geometric_mean, harmonic_mean};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How samples sharing a description are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    /// Harmonic mean, for rates
    #[default]
    HarmonicMean,
    /// Geometric mean, for ratios
    GeometricMean,
    /// Arithmetic mean
    ArithmeticMean,
    /// Sum
    Total,
    /// Largest sample
    Maximum,
}

impl MetricKind {
    /// Compact code stored in shared metric slots
    pub fn code(self) -> u8 {
        match self {
            MetricKind::HarmonicMean => 0,
            MetricKind::GeometricMean => 1,
            MetricKind::ArithmeticMean => 2,
            MetricKind::Total => 3,
            MetricKind::Maximum => 4,
        }
    }

    /// Inverse of [`code`](Self::code); unknown codes fall back to the default.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MetricKind::GeometricMean,
            2 => MetricKind::ArithmeticMean,
            3 => MetricKind::Total,
            4 => MetricKind::Maximum,
            _ => MetricKind::HarmonicMean,
        }
    }

    /// Combine samples according to this kind
    pub fn combine(self, samples: &[f64]) -> f64 {
        match self {
            MetricKind::HarmonicMean => harmonic_mean(samples),
            MetricKind::GeometricMean => geometric_mean(samples),
            MetricKind::ArithmeticMean => arithmetic_mean(samples),
            MetricKind::Total => samples.iter().filter(|x| x.is_finite()).sum(),
            MetricKind::Maximum => samples
                .iter()
                .copied()
                .filter(|x| x.is_finite())
                .fold(None, |max: Option<f64>, x| Some(max.map_or(x, |m| m.max(x))))
                .unwrap_or(0.0),
        }
    }
}

/// One aggregated line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetric {
    /// Description shared by the samples
    pub description: String,
    /// How the samples were combined
    pub kind: MetricKind,
    /// Combined value
    pub value: f64,
    /// Number of samples combined
    pub samples: usize,
    /// Number of distinct workers that contributed
    pub workers: usize,
}

#[derive(Debug, Default)]
struct Series {
    kind: MetricKind,
    values: Vec<f64>,
    workers: BTreeSet<usize>,
}

/// Accumulates samples until [`finalize`](Self::finalize).
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    order: Vec<String>,
    series: HashMap<String, Series>,
}

impl MetricsAggregator {
    /// Empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record with the default (harmonic mean) combination
    pub fn record(&mut self, worker: usize, description: &str, value: f64) {
        self.record_kind(worker, description, value, MetricKind::default());
    }

    /// Record a sample. The first sample for a description fixes its kind.
    pub fn record_kind(&mut self, worker: usize, description: &str, value: f64, kind: MetricKind) {
        if !self.series.contains_key(description) {
            self.order.push(description.to_string());
        }
        let series = self
            .series
            .entry(description.to_string())
            .or_insert_with(|| Series {
                kind,
                ..Series::default()
            });
        series.values.push(value);
        series.workers.insert(worker);
    }

    /// Whether no sample was recorded
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Combine every description into one line
    pub fn finalize(self) -> Vec<AggregateMetric> {
        let MetricsAggregator { order, mut series } = self;
        order
            .into_iter()
            .filter_map(|description| {
                let s = series.remove(&description)?;
                Some(AggregateMetric {
                    value: s.kind.combine(&s.values),
                    kind: s.kind,
                    samples: s.values.len(),
                    workers: s.workers.len(),
                    description,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_order() {
        let mut agg = MetricsAggregator::new();
        agg.record(0, "zeta ops/s", 1.0);
        agg.record(0, "alpha ops/s", 2.0);
        agg.record(1, "zeta ops/s", 1.0);

        let lines = agg.finalize();
        let names: Vec<_> = lines.iter().map(|l| l.description.as_str()).collect();
        assert_eq!(names, vec!["zeta ops/s", "alpha ops/s"]);
        assert_eq!(lines[0].workers, 2);
        assert_eq!(lines[0].samples, 2);
    }

    #[test]
    fn test_harmonic_by_default() {
        let mut agg = MetricsAggregator::new();
        agg.record(0, "rate", 1.0);
        agg.record(1, "rate", 4.0);
        let lines = agg.finalize();
        assert!((lines[0].value - 1.6).abs() < 1e-12);
        assert_eq!(lines[0].kind, MetricKind::HarmonicMean);
    }

    #[test]
    fn test_other_kinds() {
        let mut agg = MetricsAggregator::new();
        for (w, v) in [(0, 2.0), (1, 8.0)] {
            agg.record_kind(w, "total", v, MetricKind::Total);
            agg.record_kind(w, "max", v, MetricKind::Maximum);
            agg.record_kind(w, "geo", v, MetricKind::GeometricMean);
            agg.record_kind(w, "avg", v, MetricKind::ArithmeticMean);
        }
        let lines = agg.finalize();
        assert_eq!(lines[0].value, 10.0);
        assert_eq!(lines[1].value, 8.0);
        assert!((lines[2].value - 4.0).abs() < 1e-9);
        assert_eq!(lines[3].value, 5.0);
    }

    #[test]
    fn test_all_non_positive_is_zero() {
        let mut agg = MetricsAggregator::new();
        agg.record(0, "rate", 0.0);
        agg.record(1, "rate", -2.0);
        assert_eq!(agg.finalize()[0].value, 0.0);
    }

    #[test]
    fn test_kind_codes() {
        for kind in [
            MetricKind::HarmonicMean,
            MetricKind::GeometricMean,
            MetricKind::ArithmeticMean,
            MetricKind::Total,
            MetricKind::Maximum,
        ] {
            assert_eq!(MetricKind::from_code(kind.code()), kind);
        }
        assert_eq!(MetricKind::from_code(200), MetricKind::HarmonicMean);
    }
}
