#![warn(missing_docs)]
//! FluxStress Metric Statistics
//!
//! Combines per-worker samples into report lines:
//! - Harmonic, geometric and arithmetic means for rate-like metrics
//! - Metrics Aggregator keyed by description, first-seen order preserved
//! - Spread of per-instance rates within a stressor

mod aggregate;
mod means;
mod summary;

pub use aggregate::{AggregateMetric, MetricKind, MetricsAggregator};
pub use means::{arithmetic_mean, geometric_mean, harmonic_mean};
pub use summary::{RateSummary, compute_rate_summary};
