//! Worker Counter Blocks
//!
//! One [`CounterBlock`] per worker slot. The owning worker writes it, the
//! controller reads it at any time (and after the worker is gone).
//!
//! Field mutability is part of the type:
//! - [`FlaggedCounter`]: single writer, flagged double-barrier update
//! - [`Latch`]: single word, set by one side and read by the other
//! - plain atomics with documented writer (worker or controller)

use crate::lock::SharedLock;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering, fence};

/// Bogo-op counter guarded by a ready flag.
///
/// The writer clears `ready`, fences, updates the value, fences, and sets
/// `ready` again. Readers only trust a value read while `ready` was true on
/// both sides of the load. There is exactly one writer at a time: the owning
/// worker, or whoever holds the block lock for the locked variants.
#[repr(C)]
#[derive(Debug, Default)]
pub struct FlaggedCounter {
    value: AtomicU64,
    ready: AtomicBool,
}

impl FlaggedCounter {
    /// Add `n` using the flagged update protocol.
    #[inline]
    pub fn add(&self, n: u64) {
        self.update(|v| v.wrapping_add(n));
    }

    /// Overwrite the counter using the flagged update protocol.
    #[inline]
    pub fn set(&self, v: u64) {
        self.update(|_| v);
    }

    #[inline]
    fn update(&self, f: impl FnOnce(u64) -> u64) {
        self.ready.store(false, Ordering::Relaxed);
        fence(Ordering::Release);
        let next = f(self.value.load(Ordering::Relaxed));
        self.value.store(next, Ordering::Relaxed);
        fence(Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    /// Writer-side read. Only the current writer may rely on this value.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reader-side read: `None` while an update is in flight.
    #[inline]
    pub fn read(&self) -> Option<u64> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let value = self.value.load(Ordering::Acquire);
        fence(Ordering::Acquire);
        self.ready.load(Ordering::Relaxed).then_some(value)
    }

    /// Whether the last writer left the counter in a settled state
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mark the counter settled at its current value (used when a slot is handed out).
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

/// Single-word flag, set once and observed by the other side.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    /// Set the flag
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the flag is set
    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Re-arm the latch. Controller only, while no worker that reads it is alive.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fault information written by the fault handler (signal-safe stores only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// Signal number of the most recent fault
    pub signal: i32,
    /// Capability armed when the fault occurred (`None` when nothing was armed)
    pub capability: Option<u32>,
    /// Total faults observed for this slot
    pub count: u32,
}

/// Capability value meaning "nothing armed"
const NO_CAPABILITY: u32 = u32::MAX;

/// Per-worker counter block.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CounterBlock {
    counter: FlaggedCounter,
    /// Serialises the locked bogo variants between a worker's own threads
    lock: SharedLock,
    /// Written by the worker when it exits cooperatively
    run_ok: AtomicBool,
    /// Written by the controller when it had to SIGKILL the worker
    force_killed: Latch,
    pid: AtomicI32,
    start_time_bits: AtomicU64,
    finish_time_bits: AtomicU64,
    usr_time_us: AtomicU64,
    sys_time_us: AtomicU64,
    thermal_valid: AtomicBool,
    thermal_mc: AtomicI64,
    fault_signal: AtomicI32,
    fault_count: AtomicU32,
    /// Stored as capability + 1 so the zeroed state means "nothing armed"
    armed_capability: AtomicU32,
}

impl CounterBlock {
    /// Bogo-op counter
    pub fn counter(&self) -> &FlaggedCounter {
        &self.counter
    }

    /// Lock taken by the locked bogo variants
    pub fn lock(&self) -> &SharedLock {
        &self.lock
    }

    /// Record whether the worker ended cooperatively
    pub fn set_run_ok(&self, ok: bool) {
        self.run_ok.store(ok, Ordering::Release);
    }

    /// Whether the worker ended cooperatively
    pub fn run_ok(&self) -> bool {
        self.run_ok.load(Ordering::Acquire)
    }

    /// Controller side, just before SIGKILL
    pub fn mark_force_killed(&self) {
        self.force_killed.set();
    }

    /// Whether the controller had to SIGKILL the worker
    pub fn force_killed(&self) -> bool {
        self.force_killed.is_set()
    }

    /// Record the worker pid
    pub fn set_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::Relaxed);
    }

    /// Worker pid, 0 before the worker started
    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Relaxed)
    }

    /// Record the wall-clock start time (seconds since the epoch)
    pub fn set_start_time(&self, secs: f64) {
        self.start_time_bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    /// Wall-clock start time, 0.0 if never set
    pub fn start_time(&self) -> f64 {
        f64::from_bits(self.start_time_bits.load(Ordering::Relaxed))
    }

    /// Record the wall-clock finish time (seconds since the epoch)
    pub fn set_finish_time(&self, secs: f64) {
        self.finish_time_bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    /// Wall-clock finish time, 0.0 if never set
    pub fn finish_time(&self) -> f64 {
        f64::from_bits(self.finish_time_bits.load(Ordering::Relaxed))
    }

    /// CPU time snapshot, microseconds of user and system time
    pub fn set_cpu_times(&self, usr_us: u64, sys_us: u64) {
        self.usr_time_us.store(usr_us, Ordering::Relaxed);
        self.sys_time_us.store(sys_us, Ordering::Relaxed);
    }

    /// User and system time in microseconds
    pub fn cpu_times(&self) -> (u64, u64) {
        (
            self.usr_time_us.load(Ordering::Relaxed),
            self.sys_time_us.load(Ordering::Relaxed),
        )
    }

    /// Thermal-zone snapshot in millidegrees Celsius
    pub fn set_thermal(&self, millicelsius: i64) {
        self.thermal_mc.store(millicelsius, Ordering::Relaxed);
        self.thermal_valid.store(true, Ordering::Release);
    }

    /// Thermal snapshot in millidegrees, if one was taken
    pub fn thermal(&self) -> Option<i64> {
        self.thermal_valid
            .load(Ordering::Acquire)
            .then(|| self.thermal_mc.load(Ordering::Relaxed))
    }

    /// Arm (or clear) the capability a fault-prone attempt is about to exercise.
    pub fn arm_capability(&self, capability: Option<u32>) {
        let stored = capability.map_or(0, |c| c.wrapping_add(1));
        self.armed_capability.store(stored, Ordering::Release);
    }

    /// Record a fault. Async-signal-safe: plain atomic stores, no locks.
    #[inline]
    pub fn record_fault(&self, signal: i32) {
        self.fault_signal.store(signal, Ordering::Relaxed);
        self.fault_count.fetch_add(1, Ordering::Release);
    }

    /// Last recorded fault, if any
    pub fn fault(&self) -> Option<FaultRecord> {
        let count = self.fault_count.load(Ordering::Acquire);
        if count == 0 {
            return None;
        }
        let armed = self.armed_capability.load(Ordering::Acquire);
        let capability = match armed.wrapping_sub(1) {
            NO_CAPABILITY => None,
            c => Some(c),
        };
        Some(FaultRecord {
            signal: self.fault_signal.load(Ordering::Relaxed),
            capability,
            count,
        })
    }
}
