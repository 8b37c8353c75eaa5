//! Executes illegal opcodes.
//!
//! Each known illegal opcode is a capability. Executing one raises SIGILL in
//! an attempt child, the fault masks the capability and the next one is tried.
//! When every capability has faulted (here or in a sibling) there is nothing
//! left to exercise and the instance ends with `NoResource`.

use crate::ExitStatus;
use crate::context::StressContext;
use crate::fault::{Attempt, FaultGuard};
use fluxstress_stats::MetricKind;

struct Opcode {
    name: &'static str,
    trap: fn(),
}

#[cfg(target_arch = "x86_64")]
fn ud2() {
    // SAFETY: raises SIGILL, caught by the attempt child's fault handler.
    unsafe { std::arch::asm!("ud2", options(nomem, nostack)) };
}

#[cfg(target_arch = "x86_64")]
fn ud1() {
    // ud1 eax, eax
    // SAFETY: raises SIGILL, caught by the attempt child's fault handler.
    unsafe { std::arch::asm!(".byte 0x0f, 0xb9, 0xc0", options(nomem, nostack)) };
}

#[cfg(target_arch = "aarch64")]
fn udf() {
    // SAFETY: permanently undefined encoding, raises SIGILL.
    unsafe { std::arch::asm!("udf #0", options(nomem, nostack)) };
}

fn raise() {
    // SAFETY: raise has no preconditions.
    unsafe {
        libc::raise(libc::SIGILL);
    }
}

#[cfg(target_arch = "x86_64")]
const OPCODES: &[Opcode] = &[
    Opcode { name: "ud2", trap: ud2 },
    Opcode { name: "ud1", trap: ud1 },
    Opcode { name: "raise", trap: raise },
];

#[cfg(target_arch = "aarch64")]
const OPCODES: &[Opcode] = &[
    Opcode { name: "udf", trap: udf },
    Opcode { name: "raise", trap: raise },
];

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const OPCODES: &[Opcode] = &[Opcode { name: "raise", trap: raise }];

pub(super) fn supported() -> Result<(), String> {
    if OPCODES.iter().any(|o| o.name != "raise") {
        Ok(())
    } else {
        Err(format!("no illegal opcode known for {}", std::env::consts::ARCH))
    }
}

pub(super) fn run(ctx: &StressContext<'_>) -> ExitStatus {
    let mut guard = FaultGuard::new(ctx, "sigill");

    let status = loop {
        let Some(capability) = (0..OPCODES.len() as u32).find(|&c| !guard.is_masked(c)) else {
            break ExitStatus::NoResource;
        };
        let opcode = &OPCODES[capability as usize];
        let trap = opcode.trap;

        match guard.attempt(Some(capability), |_| {
            trap();
            ExitStatus::Success
        }) {
            Ok(Attempt::Recovered { .. }) => ctx.bogo_inc(),
            Ok(Attempt::Completed(ExitStatus::Success)) => {
                tracing::debug!(opcode = opcode.name, "opcode did not trap");
                guard.mask(capability);
            }
            Ok(Attempt::Completed(other)) => break other,
            // stopped or faulting the same way twice: nothing meaningful left to run
            Ok(Attempt::Aborted(_)) => break ExitStatus::NoResource,
            Err(e) => {
                ctx.warn_once(super::WARN_ATTEMPT_FORK, &format!("sigill attempt failed: {}", e));
                break ExitStatus::NoResource;
            }
        }
    };

    if let Err(e) = ctx.record_metric(0, "illegal opcodes trapped", guard.faults() as f64, MetricKind::Total) {
        ctx.warn_once(super::WARN_METRIC, &format!("cannot record sigill metric: {}", e));
    }
    status
}
