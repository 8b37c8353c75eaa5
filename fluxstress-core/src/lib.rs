#![warn(missing_docs)]
//! FluxStress Core - Worker Runtime
//!
//! This crate provides everything that runs inside a worker process:
//! - Stressor descriptors and the closed set of shipped stressors
//! - `StressContext`, the bogo-op protocol every stressor body reports through
//! - `FaultGuard`, fault recovery for bodies that may raise SIGILL/SIGSEGV/SIGBUS
//! - `run_worker`, the entry point a freshly forked worker calls

mod context;
mod fault;
mod measure;
mod options;
mod stressors;
mod worker;

pub use context::{CHECKSUM_REFRESH_OPS, StressContext, WorkerLimits};
pub use fault::{AbortReason, Attempt, FaultGuard, FaultState};
pub use measure::{cpu_times, online_cpus, page_size, physical_memory, read_max_thermal, wall_clock};
pub use options::{OptionDef, OptionKind, StressorOptions, parse_bytes};
pub use stressors::{STRESSORS, StressorKind, find};
pub use worker::{WorkerSpec, run_worker};

use fluxstress_shm::ShmError;
use thiserror::Error;

/// Result codes a stressor body (and its worker process) exits with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// Ran to completion
    Success,
    /// Generic failure, including detected miscomputation
    Failure,
    /// A resource or capability the stressor needs is missing
    NoResource,
    /// Not implemented on this system
    NotImplemented,
    /// Terminated by an unexpected signal
    Signaled,
    /// Exited through a library `exit` call rather than returning
    ByLibraryExit,
    /// Completed, but its own numbers cannot be trusted
    MetricsUntrustworthy,
}

impl ExitStatus {
    /// Process exit code
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::NoResource => 3,
            ExitStatus::NotImplemented => 4,
            ExitStatus::Signaled => 5,
            ExitStatus::ByLibraryExit => 6,
            ExitStatus::MetricsUntrustworthy => 7,
        }
    }

    /// Map a process exit code back to a status
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ExitStatus::Success,
            1 => ExitStatus::Failure,
            3 => ExitStatus::NoResource,
            4 => ExitStatus::NotImplemented,
            5 => ExitStatus::Signaled,
            6 => ExitStatus::ByLibraryExit,
            7 => ExitStatus::MetricsUntrustworthy,
            _ => return None,
        })
    }
}

/// Stressor classification tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Class {
    /// CPU compute
    Cpu,
    /// Memory and VM subsystem
    Memory,
    /// CPU caches
    Cache,
    /// Signal delivery and fault handling
    Os,
    /// May hang or hog the machine; excluded from `--all` by default
    Pathological,
}

impl Class {
    /// Every class, in display order
    pub const ALL: &'static [Class] = &[
        Class::Cpu,
        Class::Memory,
        Class::Cache,
        Class::Os,
        Class::Pathological,
    ];

    /// Lower-case name
    pub fn name(self) -> &'static str {
        match self {
            Class::Cpu => "cpu",
            Class::Memory => "memory",
            Class::Cache => "cache",
            Class::Os => "os",
            Class::Pathological => "pathological",
        }
    }
}

impl std::fmt::Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Class {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Class::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownClass(s.to_string()))
    }
}

/// Whether a stressor checks its own results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// No verification implemented
    None,
    /// Verifies when `--verify` is given
    Optional,
    /// Always verifies
    Always,
}

/// Static metadata for one stressor
#[derive(Debug)]
pub struct StressorDef {
    /// Name used on the command line
    pub name: &'static str,
    /// Variant carrying the stressor's hooks
    pub kind: StressorKind,
    /// Classification tags
    pub classes: &'static [Class],
    /// Options this stressor accepts
    pub options: &'static [OptionDef],
    /// One-line help
    pub help: &'static str,
    /// Verification support
    pub verify: VerifyMode,
}

impl StressorDef {
    /// Whether the stressor carries `class`
    pub fn has_class(&self, class: Class) -> bool {
        self.classes.contains(&class)
    }

    /// Whether this stressor should verify in a run with `--verify` set to `requested`
    pub fn verifies(&self, requested: bool) -> bool {
        match self.verify {
            VerifyMode::None => false,
            VerifyMode::Optional => requested,
            VerifyMode::Always => true,
        }
    }

    /// Option declared under `name`
    pub fn option(&self, name: &str) -> Option<&'static OptionDef> {
        self.options.iter().find(|o| o.name == name)
    }
}

/// Errors from stressor lookup, option handling and worker setup
#[derive(Debug, Error)]
pub enum CoreError {
    /// No stressor has this name
    #[error("Unknown stressor: {0}")]
    UnknownStressor(String),

    /// No class has this name
    #[error("Unknown stressor class: {0}")]
    UnknownClass(String),

    /// The stressor declares no such option
    #[error("Stressor '{stressor}' has no option '{option}'")]
    UnknownOption { stressor: String, option: String },

    /// An option value failed to parse
    #[error("Invalid value '{value}' for option '{option}': {reason}")]
    InvalidOption {
        /// Option name
        option: String,
        /// Value as given
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Forking the attempt child failed
    #[error("Failed to fork attempt process: {0}")]
    Fork(#[source] std::io::Error),

    /// Waiting for the attempt child failed
    #[error("Failed to wait for attempt process: {0}")]
    Wait(#[source] std::io::Error),

    /// sigaction failed
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// A stressor init hook failed
    #[error("Stressor initialisation failed: {0}")]
    Init(String),

    /// Shared region error
    #[error("Shared state error: {0}")]
    Shm(#[from] ShmError),
}
