//! Instance Verification
//!
//! Checks every reaped instance against its checksum record and classifies
//! it into exactly one outcome.
//!
//! ## Checks
//!
//! - **Checksum**: the record stored at worker exit must hash correctly and
//!   agree with the primary counter block, and no monitor tick may have
//!   caught it with a broken hash while the worker ran.
//! - **Counter ready**: a worker that died mid-update leaves the flag clear.
//! - **Regression**: flagged by the supervisor's per-tick integrity pass.
//!
//! A failed check only downgrades the instance to bad-metrics. It never
//! aborts the run.

use super::execution::StressorRun;
use crate::supervisor::{Termination, describe_verdict};
use fluxstress_report::{InstanceReport, Outcome};
use fluxstress_shm::{ChecksumVerdict, Region};

/// Classify every instance of a stressor run and build its records.
///
/// Failing outcomes are added to the region's `failed` tally.
pub fn verify_run(region: &Region, run: &StressorRun<'_>) -> Vec<InstanceReport> {
    run.instances
        .iter()
        .map(|result| {
            let Some(slot) = result.slot else {
                let (outcome, reason) = result.classify(ChecksumVerdict::Missing, false);
                if outcome == Outcome::Failed {
                    region.tallies().worker_failed();
                }
                return InstanceReport {
                    instance: result.instance,
                    pid: result.pid,
                    outcome,
                    reason,
                    exit_code: None,
                    signal: None,
                    force_killed: false,
                    bogo_ops: 0,
                    counter_ready: false,
                    checksum_ok: false,
                    wall_secs: 0.0,
                    usr_secs: 0.0,
                    sys_secs: 0.0,
                    max_thermal_c: None,
                    faults: 0,
                };
            };

            let block = region.block(slot);
            let verdict = region.checksum(slot).verify_block(block);
            let counter_ready = block.counter().is_ready();
            let (outcome, reason) = result.classify(verdict, counter_ready);

            if !verdict.is_ok() && !result.force_killed {
                tracing::debug!(
                    stressor = run.entry.def.name,
                    instance = result.instance,
                    "{}",
                    describe_verdict(verdict)
                );
            }
            if outcome == Outcome::Failed {
                region.tallies().worker_failed();
            }

            let (exit_code, signal) = match result.termination {
                Termination::Exited(code) => (Some(code), None),
                Termination::Signaled { signal, .. } => (None, Some(signal)),
                _ => (None, None),
            };
            let start = block.start_time();
            let finish = block.finish_time();
            let wall_secs = if start > 0.0 && finish >= start { finish - start } else { 0.0 };
            let (usr_us, sys_us) = block.cpu_times();

            InstanceReport {
                instance: result.instance,
                pid: result.pid,
                outcome,
                reason,
                exit_code,
                signal,
                force_killed: block.force_killed(),
                bogo_ops: block.counter().raw(),
                counter_ready,
                checksum_ok: verdict.is_ok() && !result.checksum_corrupted,
                wall_secs,
                usr_secs: usr_us as f64 / 1e6,
                sys_secs: sys_us as f64 / 1e6,
                max_thermal_c: block.thermal().map(|mc| mc as f64 / 1000.0),
                faults: block.fault().map(|f| f.count).unwrap_or(0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{PlanRequest, Selection, build_plan};
    use crate::supervisor::InstanceResult;
    use fluxstress_shm::CounterSnapshot;

    #[test]
    fn test_corrupted_counter_is_bad_metrics() {
        let plan = build_plan(
            &Selection {
                names: vec!["cpu".into()],
                ..Default::default()
            },
            &PlanRequest {
                instances: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let region = Region::create(2).unwrap();

        let mut instances = Vec::new();
        for instance in 0..2 {
            let slot = region.claim_slot().unwrap();
            let block = region.block(slot);
            block.counter().add(100);
            block.set_run_ok(true);
            region.checksum(slot).store(&CounterSnapshot::of(block));
            instances.push(InstanceResult {
                instance,
                slot: Some(slot),
                pid: Some(1000 + instance as i32),
                termination: Termination::Exited(0),
                force_killed: false,
                counter_regressed: false,
                checksum_corrupted: false,
            });
        }
        // stray write into the second block after the record was stored
        region.block(instances[1].slot.unwrap()).counter().add(1);

        let run = StressorRun {
            entry: &plan.entries[0],
            instances,
            launch_secs: 0.1,
        };
        let reports = verify_run(&region, &run);
        assert_eq!(reports[0].outcome, Outcome::Passed);
        assert!(reports[0].checksum_ok);
        assert_eq!(reports[0].bogo_ops, 100);
        assert_eq!(reports[1].outcome, Outcome::BadMetrics);
        assert!(!reports[1].checksum_ok);
        assert_eq!(region.tallies().snapshot().failed, 0);
    }

    #[test]
    fn test_not_run_and_launch_failures() {
        let plan = build_plan(
            &Selection {
                names: vec!["cpu".into()],
                ..Default::default()
            },
            &PlanRequest {
                instances: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let region = Region::create(0).unwrap();
        let run = StressorRun {
            entry: &plan.entries[0],
            instances: vec![
                InstanceResult::not_run(0, "unsupported"),
                InstanceResult {
                    instance: 1,
                    slot: None,
                    pid: None,
                    termination: Termination::LaunchFailed("fork: EAGAIN".into()),
                    force_killed: false,
                    counter_regressed: false,
                    checksum_corrupted: false,
                },
            ],
            launch_secs: 0.0,
        };
        let reports = verify_run(&region, &run);
        assert_eq!(reports[0].outcome, Outcome::Skipped);
        assert_eq!(reports[1].outcome, Outcome::Failed);
        assert_eq!(region.tallies().snapshot().failed, 1);
    }
}
