//! Plan Execution
//!
//! Turns a [`RunPlan`] into per-stressor instance results.
//!
//! ## Launch Modes
//!
//! - **Parallel**: every runnable entry forks into one launch group. All
//!   workers share the start barrier and the deadline.
//! - **Sequential**: one launch group per entry, in plan order, with a
//!   progress bar ticking once per stressor. The stop latch is re-armed
//!   between groups.
//!
//! Entries rejected at plan time, and entries whose `init` hook fails, are
//! recorded as not run for every requested instance and never fork.
//!
//! ## Data Flow
//!
//! ```text
//!      RunPlan
//!        │
//!        ▼
//!  init hooks (controller)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │   Supervisor     │  fork → barrier → monitor → reap
//! └────────┬─────────┘
//!          │
//!          ▼
//!  deinit hooks (controller)
//!          │
//!          ▼
//!  StressorRun (instance results, launch wall time)
//! ```

use crate::planner::{ExecutionMode, PlanEntry, RunPlan};
use crate::supervisor::{InstanceResult, Supervisor, SupervisorConfig, controller_stop_requested};
use fluxstress_shm::Region;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// Instance results for one plan entry
#[derive(Debug)]
pub struct StressorRun<'p> {
    /// Plan entry that was run
    pub entry: &'p PlanEntry,
    /// One result per instance, by index
    pub instances: Vec<InstanceResult>,
    /// Wall time of the launch group the entry ran in
    pub launch_secs: f64,
}

impl<'p> StressorRun<'p> {
    fn not_run(entry: &'p PlanEntry, reason: &str) -> Self {
        Self {
            entry,
            instances: (0..entry.instances)
                .map(|i| InstanceResult::not_run(i, reason))
                .collect(),
            launch_secs: 0.0,
        }
    }
}

/// Executes run plans against a shared state region
pub struct Executor {
    supervisor: Supervisor,
}

impl Executor {
    /// Create an executor with the given supervisor settings
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            supervisor: Supervisor::new(config),
        }
    }

    /// Run every entry of the plan. Results come back in plan order.
    pub fn execute<'p>(&self, plan: &'p RunPlan, region: &Region) -> Vec<StressorRun<'p>> {
        let mut runs: Vec<Option<StressorRun<'p>>> = plan.entries.iter().map(|_| None).collect();
        let mut launchable: Vec<usize> = Vec::new();

        for (index, entry) in plan.entries.iter().enumerate() {
            if let Some(reason) = &entry.unsupported {
                runs[index] = Some(StressorRun::not_run(entry, reason));
            } else if entry.instances > 0 {
                launchable.push(index);
            } else {
                runs[index] = Some(StressorRun::not_run(entry, ""));
            }
        }

        match plan.mode {
            ExecutionMode::Parallel => {
                let ready: Vec<usize> = launchable
                    .into_iter()
                    .filter(|&index| self.init_entry(plan, index, region, &mut runs))
                    .collect();
                if !ready.is_empty() {
                    let entries: Vec<&PlanEntry> = ready.iter().map(|&i| &plan.entries[i]).collect();
                    let start = Instant::now();
                    let groups = self.supervisor.launch_group(region, &entries);
                    let launch_secs = start.elapsed().as_secs_f64();
                    for (&index, instances) in ready.iter().zip(groups) {
                        let entry = &plan.entries[index];
                        entry.def.kind.deinit(region);
                        runs[index] = Some(StressorRun {
                            entry,
                            instances,
                            launch_secs,
                        });
                    }
                }
            }
            ExecutionMode::Sequential => {
                let pb = ProgressBar::new(launchable.len() as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );

                for index in launchable {
                    let entry = &plan.entries[index];
                    pb.set_message(entry.def.name);
                    if controller_stop_requested() {
                        runs[index] = Some(StressorRun::not_run(entry, "run interrupted"));
                    } else if self.init_entry(plan, index, region, &mut runs) {
                        let start = Instant::now();
                        let instances = self
                            .supervisor
                            .launch_group(region, &[entry])
                            .into_iter()
                            .next()
                            .unwrap_or_default();
                        entry.def.kind.deinit(region);
                        runs[index] = Some(StressorRun {
                            entry,
                            instances,
                            launch_secs: start.elapsed().as_secs_f64(),
                        });
                    }
                    pb.inc(1);
                }
                pb.finish_with_message("Complete");
            }
        }

        runs.into_iter()
            .zip(&plan.entries)
            .map(|(run, entry)| run.unwrap_or_else(|| StressorRun::not_run(entry, "not launched")))
            .collect()
    }

    /// Run the entry's `init` hook; on failure record it as not run.
    fn init_entry<'p>(
        &self,
        plan: &'p RunPlan,
        index: usize,
        region: &Region,
        runs: &mut [Option<StressorRun<'p>>],
    ) -> bool {
        let entry = &plan.entries[index];
        match entry.def.kind.init(region, &entry.options) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(stressor = entry.def.name, "init failed: {}", e);
                runs[index] = Some(StressorRun::not_run(entry, &format!("init failed: {}", e)));
                false
            }
        }
    }
}
