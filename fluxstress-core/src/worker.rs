//! Worker Process Entry Point
//!
//! Handles the worker side of the supervisor-worker architecture. The
//! supervisor forks, then calls [`run_worker`] in the child and exits with the
//! returned status code.
//!
//! A worker installs handlers for SIGTERM, SIGINT and SIGALRM that only set a
//! local stop flag, arms an interval timer for its own deadline, waits on the
//! start barrier and runs the stressor body. On the way out it stores CPU
//! times, the thermal snapshot, `run_ok` and the checksum record.

use crate::context::{StressContext, WorkerLimits};
use crate::measure::{cpu_times, read_max_thermal, wall_clock};
use crate::options::StressorOptions;
use crate::{ExitStatus, StressorDef};
use fluxstress_shm::{BarrierWait, CounterSnapshot, NamedLock, Region, SlotId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Set by the stop handlers (SIGTERM, SIGINT, SIGALRM).
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Whether this process received a stop signal
#[inline]
pub(crate) fn local_stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::Relaxed)
}

/// Install the stop handlers. Async-signal-safe: the handler only sets an atomic.
fn install_stop_handlers() {
    // SAFETY: zeroed sigaction with a plain extern "C" handler.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = stop_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        for signal in [libc::SIGTERM, libc::SIGINT, libc::SIGALRM] {
            libc::sigaction(signal, &sa, std::ptr::null_mut());
        }
    }
}

extern "C" fn stop_handler(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::Relaxed);
}

/// Arm (or with `None`, disarm) the real-time interval timer.
fn set_deadline_timer(timeout: Option<Duration>) {
    let value = timeout.unwrap_or_default();
    let timer = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval {
            tv_sec: value.as_secs() as libc::time_t,
            tv_usec: value.subsec_micros() as libc::suseconds_t,
        },
    };
    // SAFETY: setitimer reads the struct we pass and nothing else.
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut());
    }
}

/// Everything a worker needs besides the region and its slot
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Instance index within the stressor
    pub instance: u32,
    /// Total instances of the stressor
    pub instances: u32,
    /// Operation limit, 0 = unbounded
    pub ops: u64,
    /// Time limit, `None` = unbounded
    pub timeout: Option<Duration>,
    /// Verify results
    pub verify: bool,
    /// Resolved options
    pub options: StressorOptions,
    /// Barrier generation this worker belongs to
    pub barrier_generation: u64,
    /// Longest wait for the start release
    pub barrier_grace: Duration,
    /// Sample thermal zones on exit
    pub thermal: bool,
}

/// Run a stressor as the current (freshly forked) worker process.
pub fn run_worker(region: &Region, slot: SlotId, def: &'static StressorDef, spec: &WorkerSpec) -> ExitStatus {
    install_stop_handlers();

    let block = region.block(slot);
    // SAFETY: getpid has no preconditions.
    block.set_pid(unsafe { libc::getpid() });

    let barrier = region.barrier();
    barrier.arrive();
    if barrier.wait_release(spec.barrier_generation, spec.barrier_grace) == BarrierWait::TimedOut {
        tracing::debug!(stressor = def.name, instance = spec.instance, "start barrier timed out, starting anyway");
    }

    block.set_start_time(wall_clock());
    let limits = WorkerLimits {
        ops: spec.ops,
        deadline: spec.timeout.map(|t| Instant::now() + t),
    };
    if spec.timeout.is_some() {
        set_deadline_timer(spec.timeout);
    }

    let ctx = StressContext::new(
        region,
        slot,
        def,
        spec.instance,
        spec.instances,
        limits,
        spec.verify,
        &spec.options,
    );

    let status = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| def.kind.run(&ctx)))
        .unwrap_or_else(|panic| {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            tracing::error!(stressor = def.name, instance = spec.instance, "stressor panicked: {}", message);
            ExitStatus::Failure
        });

    set_deadline_timer(None);
    finish(region, slot, spec.thermal, status);
    status
}

/// Exit bookkeeping: timings, thermal snapshot, run_ok and checksum record.
fn finish(region: &Region, slot: SlotId, thermal: bool, status: ExitStatus) {
    let block = region.block(slot);
    block.set_finish_time(wall_clock());
    let (usr, sys) = cpu_times();
    block.set_cpu_times(usr, sys);

    if thermal {
        match region.lock(NamedLock::ThermalZone).lock() {
            Ok(_guard) => {
                if let Some(mc) = read_max_thermal() {
                    block.set_thermal(mc);
                }
            }
            Err(e) => tracing::debug!("skipping thermal sample: {}", e),
        }
    }

    block.set_run_ok(status == ExitStatus::Success);
    region.checksum(slot).store(&CounterSnapshot::of(block));
}
