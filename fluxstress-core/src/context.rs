//! Stressor Context
//!
//! What a stressor body sees of the world: its counter block, its instance
//! index, its limits and its metric slots. Every body reports progress with
//! the `bogo_*` calls and uses [`StressContext::should_continue`] as its only
//! loop guard.
//!
//! [`StressContext::should_continue`] also refreshes the worker's checksum
//! record every [`CHECKSUM_REFRESH_OPS`] bogo-ops, so the controller can
//! check it while the worker runs.
//!
//! The locked variants serve stressors that run several threads against one
//! counter block. If the block lock cannot be taken the update is skipped and
//! `should_continue_locked` answers with its last known value.

use crate::options::StressorOptions;
use crate::worker::local_stop_requested;
use crate::{CoreError, StressorDef};
use fluxstress_shm::{CounterBlock, CounterSnapshot, Region, SlotId};
use fluxstress_stats::MetricKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time a locked variant waits for the block lock
const BOGO_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Bogo-ops between two refreshes of the checksum record
pub const CHECKSUM_REFRESH_OPS: u64 = 1024;

/// Per-worker limits
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerLimits {
    /// Operation limit, 0 = unbounded
    pub ops: u64,
    /// Absolute deadline
    pub deadline: Option<Instant>,
}

/// Context handed to a stressor body
#[derive(Debug)]
pub struct StressContext<'a> {
    region: &'a Region,
    slot: SlotId,
    def: &'static StressorDef,
    instance: u32,
    instances: u32,
    page_size: usize,
    limits: WorkerLimits,
    verify: bool,
    options: &'a StressorOptions,
    last_continue: AtomicBool,
    skipped_updates: AtomicU64,
    last_refresh: AtomicU64,
    refreshing: AtomicBool,
}

impl<'a> StressContext<'a> {
    /// Context for instance `instance` of `instances`, counting into `slot`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        region: &'a Region,
        slot: SlotId,
        def: &'static StressorDef,
        instance: u32,
        instances: u32,
        limits: WorkerLimits,
        verify: bool,
        options: &'a StressorOptions,
    ) -> Self {
        Self {
            region,
            slot,
            def,
            instance,
            instances,
            page_size: crate::measure::page_size(),
            limits,
            verify,
            options,
            last_continue: AtomicBool::new(true),
            skipped_updates: AtomicU64::new(0),
            last_refresh: AtomicU64::new(0),
            refreshing: AtomicBool::new(false),
        }
    }

    fn block(&self) -> &CounterBlock {
        self.region.block(self.slot)
    }

    // ─── Bogo-op protocol ───────────────────────────────────────────────────

    /// Count `n` bogo-ops
    #[inline]
    pub fn bogo_add(&self, n: u64) {
        self.block().counter().add(n);
    }

    /// Count one bogo-op
    #[inline]
    pub fn bogo_inc(&self) {
        self.bogo_add(1);
    }

    /// Current bogo-op count
    #[inline]
    pub fn bogo_get(&self) -> u64 {
        self.block().counter().raw()
    }

    /// Overwrite the bogo-op count
    pub fn bogo_set(&self, v: u64) {
        self.block().counter().set(v);
    }

    /// Loop guard: false once a stop was requested, the deadline passed or
    /// the operation limit was reached.
    #[inline]
    pub fn should_continue(&self) -> bool {
        if local_stop_requested() || self.region.stop().is_set() {
            return false;
        }
        let ops = self.bogo_get();
        if ops.saturating_sub(self.last_refresh.load(Ordering::Relaxed)) >= CHECKSUM_REFRESH_OPS {
            self.refresh_checksum();
        }
        if self.limits.ops > 0 && ops >= self.limits.ops {
            return false;
        }
        match self.limits.deadline {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    /// Rewrite the checksum record from the live block. Skipped while another
    /// thread of this worker is already rewriting it.
    fn refresh_checksum(&self) {
        if self.refreshing.swap(true, Ordering::Acquire) {
            return;
        }
        let snapshot = CounterSnapshot::of(self.block());
        self.region.checksum(self.slot).store(&snapshot);
        self.last_refresh.store(snapshot.counter, Ordering::Relaxed);
        self.refreshing.store(false, Ordering::Release);
    }

    /// Add `n` under the block lock. Returns false if the update was skipped.
    pub fn bogo_add_locked(&self, n: u64) -> bool {
        match self.block().lock().lock_timeout(BOGO_LOCK_TIMEOUT) {
            Ok(_guard) => {
                self.bogo_add(n);
                true
            }
            Err(_) => {
                self.skipped_updates.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// [`bogo_add_locked`](Self::bogo_add_locked) by one
    pub fn bogo_inc_locked(&self) -> bool {
        self.bogo_add_locked(1)
    }

    /// Counter read under the block lock, `None` if the lock was not taken
    pub fn bogo_get_locked(&self) -> Option<u64> {
        let _guard = self.block().lock().lock_timeout(BOGO_LOCK_TIMEOUT).ok()?;
        Some(self.bogo_get())
    }

    /// [`should_continue`](Self::should_continue) evaluated under the block
    /// lock; falls back to the last known answer when the lock is busy.
    pub fn should_continue_locked(&self) -> bool {
        match self.block().lock().lock_timeout(BOGO_LOCK_TIMEOUT) {
            Ok(_guard) => {
                let cont = self.should_continue();
                self.last_continue.store(cont, Ordering::Relaxed);
                cont
            }
            Err(_) => {
                // A stop request never needs the lock
                if local_stop_requested() || self.region.stop().is_set() {
                    return false;
                }
                self.last_continue.load(Ordering::Relaxed)
            }
        }
    }

    /// Updates dropped because the block lock could not be taken
    pub fn skipped_updates(&self) -> u64 {
        self.skipped_updates.load(Ordering::Relaxed)
    }

    // ─── Metrics ────────────────────────────────────────────────────────────

    /// Record a metric sample in slot `index`.
    ///
    /// The description is copied into the shared heap once; re-recording the
    /// same slot with the same description reuses it.
    pub fn record_metric(&self, index: usize, description: &str, value: f64, kind: MetricKind) -> Result<(), CoreError> {
        let metrics = self.region.metrics(self.slot);
        let handle = match metrics.description(index) {
            Some(h) if self.region.read_str(h).as_deref() == Some(description) => h,
            _ => self.region.alloc_str(description)?,
        };
        metrics.record(index, handle, value, kind.code())?;
        Ok(())
    }

    /// Emit a warning once per run across all workers
    pub fn warn_once(&self, id: u32, message: &str) {
        if self.region.warn_once(id) {
            tracing::warn!(stressor = self.def.name, instance = self.instance, "{}", message);
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    /// Shared region of the run
    pub fn region(&self) -> &'a Region {
        self.region
    }

    /// Slot this worker counts into
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Definition of the running stressor
    pub fn def(&self) -> &'static StressorDef {
        self.def
    }

    /// Stressor name
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    /// Instance index, 0-based
    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// Instances of this stressor in the launch group
    pub fn instances(&self) -> u32 {
        self.instances
    }

    /// System page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Operation limit and deadline
    pub fn limits(&self) -> WorkerLimits {
        self.limits
    }

    /// Whether the body should verify its results
    pub fn verify(&self) -> bool {
        self.verify
    }

    /// Resolved stressor options
    pub fn options(&self) -> &'a StressorOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::find;
    use fluxstress_shm::ChecksumVerdict;

    fn with_context<R>(ops: u64, f: impl FnOnce(&StressContext<'_>) -> R) -> R {
        let region = Region::create(1).unwrap();
        let slot = region.claim_slot().unwrap();
        let options = StressorOptions::default();
        let limits = WorkerLimits { ops, deadline: None };
        let ctx = StressContext::new(&region, slot, find("cpu").unwrap(), 0, 1, limits, false, &options);
        f(&ctx)
    }

    #[test]
    fn test_should_continue_stops_after_exact_limit() {
        for limit in [1u64, 7, 1000, 5000] {
            let count = with_context(limit, |ctx| {
                let mut n = 0;
                loop {
                    ctx.bogo_inc();
                    n += 1;
                    if !ctx.should_continue() {
                        break;
                    }
                }
                assert_eq!(ctx.bogo_get(), limit);
                n
            });
            assert_eq!(count, limit);
        }
    }

    #[test]
    fn test_checksum_record_refreshed_while_running() {
        with_context(0, |ctx| {
            let record = ctx.region().checksum(ctx.slot());
            for _ in 1..CHECKSUM_REFRESH_OPS {
                ctx.bogo_inc();
                assert!(ctx.should_continue());
            }
            assert_eq!(record.verify_record(), ChecksumVerdict::Missing);

            ctx.bogo_inc();
            assert!(ctx.should_continue());
            assert_eq!(record.load().unwrap().0.counter, CHECKSUM_REFRESH_OPS);
            assert_eq!(record.verify_record(), ChecksumVerdict::Ok);

            // not again until another full interval has been counted
            ctx.bogo_add(CHECKSUM_REFRESH_OPS - 1);
            assert!(ctx.should_continue());
            assert_eq!(record.load().unwrap().0.counter, CHECKSUM_REFRESH_OPS);
            ctx.bogo_inc();
            assert!(ctx.should_continue());
            assert_eq!(record.load().unwrap().0.counter, 2 * CHECKSUM_REFRESH_OPS);
        });
    }

    #[test]
    fn test_unbounded_stops_on_region_stop() {
        with_context(0, |ctx| {
            ctx.bogo_add(1_000_000);
            assert!(ctx.should_continue());
            ctx.region().stop().set();
            assert!(!ctx.should_continue());
            assert!(!ctx.should_continue_locked());
        });
    }

    #[test]
    fn test_deadline() {
        let region = Region::create(1).unwrap();
        let slot = region.claim_slot().unwrap();
        let options = StressorOptions::default();
        let limits = WorkerLimits {
            ops: 0,
            deadline: Some(Instant::now()),
        };
        let ctx = StressContext::new(&region, slot, find("cpu").unwrap(), 0, 1, limits, false, &options);
        assert!(!ctx.should_continue());
    }

    #[test]
    fn test_locked_increment_loses_no_updates() {
        with_context(0, |ctx| {
            ctx.bogo_set(10);
            let successes = AtomicU64::new(0);
            std::thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|| {
                        for _ in 0..500 {
                            if ctx.bogo_inc_locked() {
                                successes.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });
            let n = successes.load(Ordering::Relaxed);
            assert_eq!(ctx.bogo_get(), 10 + n);
            assert_eq!(n + ctx.skipped_updates(), 8 * 500);
            assert_eq!(ctx.bogo_get_locked(), Some(10 + n));
        });
    }

    #[test]
    fn test_locked_continue_falls_back_to_last_value() {
        with_context(5, |ctx| {
            assert!(ctx.should_continue_locked());
            let _held = ctx.region().block(ctx.slot()).lock().lock().unwrap();
            ctx.bogo_add(5);
            // Lock busy: limit reached but the last known answer is returned
            assert!(ctx.should_continue_locked());
        });
    }

    #[test]
    fn test_record_metric_reuses_description() {
        with_context(0, |ctx| {
            ctx.record_metric(0, "ops per sec", 1.0, MetricKind::HarmonicMean).unwrap();
            let used = ctx.region().read_str(ctx.region().metrics(ctx.slot()).description(0).unwrap());
            assert_eq!(used.as_deref(), Some("ops per sec"));
            let h1 = ctx.region().metrics(ctx.slot()).description(0);
            ctx.record_metric(0, "ops per sec", 2.0, MetricKind::HarmonicMean).unwrap();
            assert_eq!(ctx.region().metrics(ctx.slot()).description(0), h1);
            let samples = ctx.region().metrics(ctx.slot()).samples();
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].value, 2.0);
        });
    }
}
