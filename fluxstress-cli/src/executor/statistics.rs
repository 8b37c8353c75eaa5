//! Statistics Computation
//!
//! Parallel aggregation of per-stressor figures.
//!
//! Uses Rayon to process stressors independently. For each stressor:
//! - Bogo-ops summed over every instance that ran
//! - Wall clock, CPU times and trusted bogo-ops summed over passed instances
//! - Bogo-op rates against real time and against user + system time
//! - Spread of per-instance real-time rates
//! - Worker metric slots combined per description (harmonic mean unless the
//!   worker asked for another kind)
//!
//! Rates and metrics only take passed instances: anything else has numbers
//! the report must not average in.

use super::execution::StressorRun;
use fluxstress_report::{InstanceReport, Outcome};
use fluxstress_shm::Region;
use fluxstress_stats::{
    AggregateMetric, MetricKind, MetricsAggregator, RateSummary, compute_rate_summary,
};
use rayon::prelude::*;

/// Aggregated figures for one stressor
#[derive(Debug, Clone, Default)]
pub struct StressorStatistics {
    /// Total across all instances, trusted or not
    pub bogo_ops: u64,
    /// Total across passed instances
    pub trusted_bogo_ops: u64,
    /// Longest passed instance
    pub wall_secs: f64,
    /// User time of passed instances
    pub usr_secs: f64,
    /// System time of passed instances
    pub sys_secs: f64,
    /// Trusted bogo-ops per wall-clock second
    pub ops_per_sec_real: f64,
    /// Trusted bogo-ops per CPU second
    pub ops_per_sec_cpu: f64,
    /// Spread of per-instance rates
    pub rates: RateSummary,
    /// Hottest thermal reading of any instance
    pub max_thermal_c: Option<f64>,
    /// Worker metrics combined by description
    pub metrics: Vec<AggregateMetric>,
}

/// Compute statistics for every stressor run (parallelized with Rayon)
///
/// `instances` holds the verified records of each run, in the same order.
pub fn compute_statistics(
    region: &Region,
    runs: &[StressorRun<'_>],
    instances: &[Vec<InstanceReport>],
) -> Vec<StressorStatistics> {
    runs.par_iter()
        .zip(instances.par_iter())
        .map(|(run, reports)| stressor_statistics(region, run, reports))
        .collect()
}

fn stressor_statistics(region: &Region, run: &StressorRun<'_>, reports: &[InstanceReport]) -> StressorStatistics {
    let mut stats = StressorStatistics::default();
    let mut aggregator = MetricsAggregator::new();
    let mut rates = Vec::new();

    for (result, report) in run.instances.iter().zip(reports) {
        if let Some(c) = report.max_thermal_c {
            stats.max_thermal_c = Some(stats.max_thermal_c.map_or(c, |m: f64| m.max(c)));
        }
        stats.bogo_ops += report.bogo_ops;
        if report.outcome != Outcome::Passed {
            continue;
        }

        stats.trusted_bogo_ops += report.bogo_ops;
        stats.wall_secs = stats.wall_secs.max(report.wall_secs);
        stats.usr_secs += report.usr_secs;
        stats.sys_secs += report.sys_secs;
        if report.wall_secs > 0.0 {
            rates.push(report.bogo_ops as f64 / report.wall_secs);
        }

        let Some(slot) = result.slot else {
            continue;
        };
        for sample in region.metrics(slot).samples() {
            match region.read_str(sample.description) {
                Some(description) => aggregator.record_kind(
                    report.instance as usize,
                    &description,
                    sample.value,
                    MetricKind::from_code(sample.kind),
                ),
                None => tracing::debug!(
                    stressor = run.entry.def.name,
                    index = sample.index,
                    "metric description not readable, dropping sample"
                ),
            }
        }
    }

    if stats.wall_secs == 0.0 && stats.trusted_bogo_ops > 0 {
        stats.wall_secs = run.launch_secs;
    }
    if stats.wall_secs > 0.0 {
        stats.ops_per_sec_real = stats.trusted_bogo_ops as f64 / stats.wall_secs;
    }
    let cpu_secs = stats.usr_secs + stats.sys_secs;
    if cpu_secs > 0.0 {
        stats.ops_per_sec_cpu = stats.trusted_bogo_ops as f64 / cpu_secs;
    }
    stats.rates = compute_rate_summary(&rates);
    stats.metrics = aggregator.finalize();
    stats
}
