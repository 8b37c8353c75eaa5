//! Report Building
//!
//! Constructs the complete run report from verified instances and their
//! statistics.
//!
//! ## Pipeline
//!
//! ```text
//! StressorRun (instance results)
//!              │
//!              ▼
//!   ┌─────────────────────┐
//!   │    verification     │  checksum + outcome per instance
//!   └──────────┬──────────┘
//!              │
//!              ▼
//!   ┌─────────────────────┐
//!   │     statistics      │  Rayon-parallel per stressor
//!   └──────────┬──────────┘
//!              │
//!              ▼
//!   ┌─────────────────────┐
//!   │       Report        │  Ready for human/JSON/YAML output
//!   └─────────────────────┘
//! ```

use super::execution::StressorRun;
use super::metadata::build_report_meta;
use super::statistics::compute_statistics;
use super::verification::verify_run;
use crate::planner::RunPlan;
use fluxstress_report::{OutcomeTally, Report, ReportSummary, RunConfigInfo, StressorReport};
use fluxstress_shm::Region;

/// Build a complete Report from the runs of `plan`
///
/// # Arguments
/// * `plan` - The plan the runs were executed from
/// * `region` - Shared state the workers reported into
/// * `runs` - Per-stressor instance results, in plan order
/// * `total_duration_secs` - Wall time of the whole run
pub fn build_report(
    plan: &RunPlan,
    region: &Region,
    runs: &[StressorRun<'_>],
    total_duration_secs: f64,
) -> Report {
    let instances: Vec<_> = runs.iter().map(|run| verify_run(region, run)).collect();
    let stats = compute_statistics(region, runs, &instances);

    let stressors: Vec<StressorReport> = runs
        .iter()
        .zip(instances)
        .zip(stats)
        .map(|((run, instances), stats)| {
            let tally: OutcomeTally = instances.iter().map(|i| i.outcome).collect();
            StressorReport {
                name: run.entry.def.name.to_string(),
                classes: run.entry.def.classes.iter().map(|c| c.name().to_string()).collect(),
                requested_instances: run.entry.instances,
                started_instances: instances.iter().filter(|i| i.pid.is_some()).count() as u32,
                tally,
                bogo_ops: stats.bogo_ops,
                trusted_bogo_ops: stats.trusted_bogo_ops,
                wall_secs: stats.wall_secs,
                usr_secs: stats.usr_secs,
                sys_secs: stats.sys_secs,
                ops_per_sec_real: stats.ops_per_sec_real,
                ops_per_sec_cpu: stats.ops_per_sec_cpu,
                rates: stats.rates,
                max_thermal_c: stats.max_thermal_c,
                metrics: stats.metrics,
                skip_reason: run.entry.unsupported.clone(),
                instances,
            }
        })
        .collect();

    let summary = ReportSummary::from_stressors(&stressors, total_duration_secs);
    let meta = build_report_meta(RunConfigInfo {
        mode: plan.mode.label().to_string(),
        timeout_secs: plan.timeout.map(|t| t.as_secs_f64()),
        ops: plan.ops,
        verify: plan.verify,
    });

    Report {
        meta,
        stressors,
        summary,
    }
}
