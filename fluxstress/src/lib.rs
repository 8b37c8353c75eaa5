#![warn(missing_docs)]
//! # FluxStress
//!
//! Process-supervised stress harness with shared-memory counters and fault recovery.
//!
//! FluxStress forks one worker process per stressor instance and supervises it:
//! - **Shared State Region**: one anonymous shared mapping per run holding every
//!   worker's counter block, checksum record and metric slots
//! - **Bogo-op Protocol**: lock-free counters with a ready flag, so a worker that
//!   dies mid-update is detected instead of reported
//! - **Fault Recovery**: stressors that provoke SIGILL/SIGSEGV recover in attempt
//!   children and mask the capability that faulted
//! - **Stop Escalation**: a shared stop flag, then SIGTERM, then SIGKILL, with
//!   force-killed instances reported as bad-metrics
//! - **Outcome Taxonomy**: every instance ends passed, failed, skipped or
//!   bad-metrics, and the exit code follows from the tally
//!
//! ## Quick Start
//!
//! ```ignore
//! use fluxstress::{PlanRequest, Selection, SupervisorConfig, build_plan, run_stress};
//!
//! let selection = Selection { names: vec!["cpu".into()], ..Default::default() };
//! let request = PlanRequest { instances: 4, ops: 1000, ..Default::default() };
//! let plan = build_plan(&selection, &request)?;
//! let report = run_stress(&plan, &SupervisorConfig::default())?;
//! assert_eq!(report.summary.exit_code(), 0);
//! ```

// Re-export the controller side
pub use fluxstress_cli::{
    Cli, ExecutionMode, FluxStressConfig, PlanEntry, PlanError, PlanRequest, RetryPolicy, RunPlan,
    Selection, SupervisorConfig, SupervisorError, build_plan, parse_option_args, run_stress,
};

// Re-export worker runtime types
pub use fluxstress_core::{
    Class, ExitStatus, STRESSORS, StressContext, StressorDef, StressorKind, VerifyMode, find,
};

// Re-export report types
pub use fluxstress_report::{
    InstanceReport, Outcome, OutputFormat, Report, ReportSummary, StressorReport,
    generate_json_report, generate_yaml_report,
};

// Re-export shared state
pub use fluxstress_shm::{ChecksumVerdict, Region, TallySnapshot};

// Re-export stats
pub use fluxstress_stats::{MetricKind, RateSummary, compute_rate_summary, harmonic_mean};

/// Run the FluxStress command line.
///
/// ```ignore
/// fn main() -> std::process::ExitCode {
///     match fluxstress::run() {
///         Ok(code) => std::process::ExitCode::from(code as u8),
///         Err(_) => std::process::ExitCode::FAILURE,
///     }
/// }
/// ```
pub use fluxstress_cli::run;
