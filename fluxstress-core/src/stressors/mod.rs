//! Shipped stressors
//!
//! A closed set: each [`StressorKind`] variant carries the hooks for one
//! stressor and [`STRESSORS`] holds its static descriptor.

mod cache;
mod cpu;
mod sigill;
mod sigsegv;
mod spin;
mod vm;

use crate::context::StressContext;
use crate::options::{OptionDef, OptionKind, StressorOptions};
use crate::{Class, CoreError, ExitStatus, StressorDef, VerifyMode};
use fluxstress_shm::Region;

/// Warn-once ids used by stressor bodies
pub(crate) const WARN_METRIC: u32 = 0;
pub(crate) const WARN_VM_ALLOC: u32 = 1;
pub(crate) const WARN_CACHE_LOCK: u32 = 2;
pub(crate) const WARN_ATTEMPT_FORK: u32 = 3;

/// Stressor variants and their hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StressorKind {
    /// Floating point and integer folding
    Cpu,
    /// Page touching over an anonymous mapping
    Vm,
    /// Threads thrashing the shared cache scratch area
    Cache,
    /// Illegal opcodes under fault recovery
    Sigill,
    /// Writes to a protected page under fault recovery
    Sigsegv,
    /// Ignores stop requests
    Spin,
}

impl StressorKind {
    /// Worker body
    pub fn run(self, ctx: &StressContext<'_>) -> ExitStatus {
        match self {
            StressorKind::Cpu => cpu::run(ctx),
            StressorKind::Vm => vm::run(ctx),
            StressorKind::Cache => cache::run(ctx),
            StressorKind::Sigill => sigill::run(ctx),
            StressorKind::Sigsegv => sigsegv::run(ctx),
            StressorKind::Spin => spin::run(ctx),
        }
    }

    /// Capability check at plan time. `Err` carries the reason it is skipped.
    pub fn supported(self) -> Result<(), String> {
        match self {
            StressorKind::Sigill => sigill::supported(),
            _ => Ok(()),
        }
    }

    /// Controller-side setup before the first worker of the stressor forks
    pub fn init(self, region: &Region, _options: &StressorOptions) -> Result<(), CoreError> {
        match self {
            StressorKind::Cache => cache::init(region),
            _ => Ok(()),
        }
    }

    /// Controller-side teardown after every worker of the stressor was reaped
    pub fn deinit(self, region: &Region) {
        if self == StressorKind::Cache {
            cache::deinit(region);
        }
    }

    /// Clamp options to what `instances` concurrent workers may use
    pub fn set_limit(self, instances: u32, options: &mut StressorOptions) {
        if self == StressorKind::Vm {
            vm::set_limit(instances, options);
        }
    }
}

/// All shipped stressors, in listing order
pub static STRESSORS: &[StressorDef] = &[
    StressorDef {
        name: "cpu",
        kind: StressorKind::Cpu,
        classes: &[Class::Cpu],
        options: &[OptionDef {
            name: "cpu-fold",
            kind: OptionKind::Count,
            default: "1024",
            help: "integers folded per bogo-op",
        }],
        help: "integer fold loop, checks the closed-form sum with --verify",
        verify: VerifyMode::Optional,
    },
    StressorDef {
        name: "vm",
        kind: StressorKind::Vm,
        classes: &[Class::Memory],
        options: &[OptionDef {
            name: "vm-bytes",
            kind: OptionKind::Bytes,
            default: "4m",
            help: "bytes of anonymous memory per instance",
        }],
        help: "fill an anonymous buffer with a pattern and read it back",
        verify: VerifyMode::Optional,
    },
    StressorDef {
        name: "cache",
        kind: StressorKind::Cache,
        classes: &[Class::Cache, Class::Memory],
        options: &[OptionDef {
            name: "cache-threads",
            kind: OptionKind::Count,
            default: "2",
            help: "threads per instance sharing one counter",
        }],
        help: "threads thrash a shared scratch buffer under a cross-process lock",
        verify: VerifyMode::None,
    },
    StressorDef {
        name: "sigill",
        kind: StressorKind::Sigill,
        classes: &[Class::Os, Class::Cpu],
        options: &[],
        help: "execute illegal opcodes and recover from SIGILL",
        verify: VerifyMode::None,
    },
    StressorDef {
        name: "sigsegv",
        kind: StressorKind::Sigsegv,
        classes: &[Class::Os, Class::Memory],
        options: &[],
        help: "write to an inaccessible page and recover from SIGSEGV",
        verify: VerifyMode::None,
    },
    StressorDef {
        name: "spin",
        kind: StressorKind::Spin,
        classes: &[Class::Cpu, Class::Pathological],
        options: &[],
        help: "busy loop that ignores stop requests until killed",
        verify: VerifyMode::None,
    },
];

/// Look up a stressor by name
pub fn find(name: &str) -> Option<&'static StressorDef> {
    STRESSORS.iter().find(|s| s.name == name)
}
