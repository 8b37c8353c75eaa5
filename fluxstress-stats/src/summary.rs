//! Rate Summary
//!
//! Spread of per-instance bogo-op rates within one stressor. A large
//! coefficient of variation points at instances that were starved or
//! throttled relative to their siblings.

use serde::{Deserialize, Serialize};

/// Summary of per-instance rates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSummary {
    /// Arithmetic mean
    pub mean: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    /// Smallest rate
    pub min: f64,
    /// Largest rate
    pub max: f64,
    /// Finite rates summarised
    pub sample_count: usize,
}

/// Summarise rates; non-finite values are dropped.
pub fn compute_rate_summary(rates: &[f64]) -> RateSummary {
    let all: Vec<f64> = rates.iter().copied().filter(|x| x.is_finite()).collect();
    if all.is_empty() {
        return RateSummary::default();
    }

    let mean = all.iter().sum::<f64>() / all.len() as f64;

    let std_dev = if all.len() < 2 {
        0.0
    } else {
        let variance = all.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (all.len() - 1) as f64;
        variance.sqrt()
    };

    let min = all
        .iter()
        .cloned()
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(0.0);
    let max = all
        .iter()
        .cloned()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(0.0);

    RateSummary {
        mean,
        std_dev,
        min,
        max,
        sample_count: all.len(),
    }
}

impl RateSummary {
    /// Coefficient of variation (relative stddev, percent)
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            (self.std_dev / self.mean) * 100.0
        }
    }
}
