//! Run Executor
//!
//! Runs a plan and turns what the workers left in the shared state region
//! into a report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! RunPlan (built by the planner)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  execution  │  Fork launch groups, reap instances
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │verification │  Checksums, one outcome per instance
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ statistics  │  Rates and metric aggregation (parallel)
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   report    │  Build Report with system metadata
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ formatting  │  Human-readable output
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`execution`] - Launch groups in parallel or sequential mode
//! - [`verification`] - Checksum verification and outcome classification
//! - [`statistics`] - Parallel per-stressor aggregation
//! - [`report`] - Report building
//! - [`formatting`] - Human-readable output formatting
//! - [`metadata`] - System metadata collection

mod execution;
mod formatting;
mod metadata;
mod report;
mod statistics;
mod verification;

pub use execution::{Executor, StressorRun};
pub use formatting::format_human_output;
pub use metadata::build_report_meta;
pub use report::build_report;
pub use statistics::{StressorStatistics, compute_statistics};
pub use verification::verify_run;
