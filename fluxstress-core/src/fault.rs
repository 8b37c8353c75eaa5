//! Fault Recovery
//!
//! Lets a stressor body survive SIGILL, SIGSEGV and SIGBUS raised by its own
//! workload. Rust cannot unwind or jump out of a signal handler, so the
//! resumption point is a process boundary: each attempt runs in a short-lived
//! attempt child and the worker itself is the point execution resumes from.
//!
//! In the attempt child the handlers are one-shot (`SA_RESETHAND | SA_NODEFER`).
//! A handler only stores the signal into the counter block with atomic stores
//! and re-raises it, so the attempt child dies of the fault. Handlers never allocate,
//! log or take a lock.
//!
//! The worker then drives an explicit state machine:
//!
//! ```text
//! Running --fault--> Faulted --> Recovering --should_continue--> Running
//!                                    |
//!                                    +--stop / identical fault--> Aborted
//! ```
//!
//! A fault is identical to the previous one when it has the same signal and
//! armed capability and no bogo-op was counted in between. The capability
//! armed for a faulting attempt is masked locally and published as a region
//! skip flag so sibling instances do not fault on it again.

use crate::context::StressContext;
use crate::{CoreError, ExitStatus};
use fluxstress_shm::CounterBlock;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Signals treated as workload faults
pub const FAULT_SIGNALS: [libc::c_int; 3] = [libc::SIGILL, libc::SIGSEGV, libc::SIGBUS];

/// Counter block of the attempt child, read by the fault handler.
static FAULT_BLOCK: AtomicPtr<CounterBlock> = AtomicPtr::new(std::ptr::null_mut());

/// Recovery state of one guarded resumption point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultState {
    /// Executing the body
    Running,
    /// The last attempt died of a fault
    Faulted,
    /// Deciding whether to resume
    Recovering,
    /// No further attempts
    Aborted,
}

/// Why a guard ended in [`FaultState::Aborted`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The same fault recurred right after recovery
    RepeatedFault { signal: i32 },
    /// `should_continue` was false when recovering
    Stopped,
}

/// Result of one guarded attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The body returned without faulting
    Completed(ExitStatus),
    /// The body faulted and the guard is back in `Running`
    Recovered { signal: i32, capability: Option<u32> },
    /// The guard gave up; no further attempts run
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FaultSignature {
    signal: i32,
    capability: Option<u32>,
    progress: u64,
}

/// A registered resumption point
#[derive(Debug)]
pub struct FaultGuard<'c> {
    ctx: &'c StressContext<'c>,
    point: &'static str,
    state: FaultState,
    abort: Option<AbortReason>,
    last_fault: Option<FaultSignature>,
    masked: u64,
    faults: u64,
}

impl<'c> FaultGuard<'c> {
    /// Register a resumption point named `point`
    pub fn new(ctx: &'c StressContext<'c>, point: &'static str) -> Self {
        Self {
            ctx,
            point,
            state: FaultState::Running,
            abort: None,
            last_fault: None,
            masked: 0,
            faults: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> FaultState {
        self.state
    }

    /// Faults recovered from (or aborted on) so far
    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Whether `capability` faulted here or in a sibling instance
    pub fn is_masked(&self, capability: u32) -> bool {
        capability < 64 && self.masked & (1 << capability) != 0
            || self.ctx.region().capability_skipped(capability)
    }

    /// Permanently disable `capability` for this worker and its siblings
    pub fn mask(&mut self, capability: u32) {
        if capability < 64 {
            self.masked |= 1 << capability;
        }
        self.ctx.region().skip_capability(capability);
    }

    /// Run `body` once under the resumption point, with `capability` armed.
    pub fn attempt(
        &mut self,
        capability: Option<u32>,
        body: impl FnOnce(&StressContext<'_>) -> ExitStatus,
    ) -> Result<Attempt, CoreError> {
        if let Some(reason) = self.abort {
            return Ok(Attempt::Aborted(reason));
        }

        let block = self.ctx.region().block(self.ctx.slot());
        block.arm_capability(capability);
        let faults_before = block.fault().map_or(0, |f| f.count);

        // SAFETY: the child only runs the body and leaves through _exit.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            block.arm_capability(None);
            return Err(CoreError::Fork(std::io::Error::last_os_error()));
        }
        if pid == 0 {
            enter_attempt_child(block);
            let status = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(self.ctx)))
                .unwrap_or(ExitStatus::Failure);
            // SAFETY: leave the attempt child without running the worker's exit path.
            unsafe { libc::_exit(status.code()) };
        }

        let status = wait_child(pid);
        block.arm_capability(None);
        let status = status?;

        if libc::WIFEXITED(status) {
            self.last_fault = None;
            let code = libc::WEXITSTATUS(status);
            return Ok(Attempt::Completed(
                ExitStatus::from_code(code).unwrap_or(ExitStatus::Failure),
            ));
        }

        let signal = libc::WTERMSIG(status);
        if !FAULT_SIGNALS.contains(&signal) {
            return Ok(Attempt::Completed(ExitStatus::Signaled));
        }

        // Prefer what the handler recorded; fall back to the wait status if
        // the attempt child died before its handler ran.
        self.state = FaultState::Faulted;
        let signal = match block.fault() {
            Some(record) if record.count > faults_before => record.signal,
            _ => signal,
        };
        Ok(self.recover(signal, capability))
    }

    fn recover(&mut self, signal: i32, capability: Option<u32>) -> Attempt {
        self.state = FaultState::Recovering;
        self.faults += 1;

        let signature = FaultSignature {
            signal,
            capability,
            progress: self.ctx.bogo_get(),
        };
        if self.last_fault == Some(signature) {
            tracing::debug!(point = self.point, signal, ?capability, "identical fault after recovery, aborting");
            return self.abort(AbortReason::RepeatedFault { signal });
        }
        self.last_fault = Some(signature);

        if let Some(capability) = capability {
            self.mask(capability);
        }
        if !self.ctx.should_continue() {
            return self.abort(AbortReason::Stopped);
        }

        self.state = FaultState::Running;
        Attempt::Recovered { signal, capability }
    }

    fn abort(&mut self, reason: AbortReason) -> Attempt {
        self.state = FaultState::Aborted;
        self.abort = Some(reason);
        Attempt::Aborted(reason)
    }
}

/// Attempt child setup: no core dumps, one-shot recording handlers.
fn enter_attempt_child(block: &CounterBlock) {
    FAULT_BLOCK.store(block as *const CounterBlock as *mut CounterBlock, Ordering::Relaxed);
    // SAFETY: plain libc calls on zeroed, fully initialised arguments.
    unsafe {
        let no_core = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        libc::setrlimit(libc::RLIMIT_CORE, &no_core);

        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = fault_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESETHAND | libc::SA_NODEFER;
        libc::sigemptyset(&mut sa.sa_mask);
        for signal in FAULT_SIGNALS {
            libc::sigaction(signal, &sa, std::ptr::null_mut());
        }
    }
}

extern "C" fn fault_handler(signal: libc::c_int) {
    let block = FAULT_BLOCK.load(Ordering::Relaxed);
    if !block.is_null() {
        // SAFETY: the block lives in the shared mapping, which outlives the
        // attempt child; record_fault performs atomic stores only.
        unsafe { (*block).record_fault(signal) };
    }
    // SAFETY: SA_RESETHAND restored the default action, so this terminates.
    unsafe {
        libc::raise(signal);
    }
}

fn wait_child(pid: libc::pid_t) -> Result<libc::c_int, CoreError> {
    let mut status = 0;
    loop {
        // SAFETY: waiting on our own child.
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == pid {
            return Ok(status);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(CoreError::Wait(err));
        }
    }
}
