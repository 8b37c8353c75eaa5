//! Start barrier shared between the controller and its workers.
//!
//! The controller arms the barrier with the number of workers it is about to
//! fork, waits for them to arrive (bounded by a grace period) and releases
//! them together. Workers arrive and then wait for the release, also bounded,
//! so a controller that died or gave up never wedges a worker.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cross-process start barrier. Zeroed memory is a disarmed barrier.
#[repr(C)]
#[derive(Debug, Default)]
pub struct StartBarrier {
    /// Incremented on every arm, so a worker never sees a stale release
    generation: AtomicU64,
    released_generation: AtomicU64,
    expected: AtomicU32,
    arrived: AtomicU32,
}

/// How a worker left the barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWait {
    /// Controller released the group
    Released,
    /// Grace period elapsed without a release
    TimedOut,
}

impl StartBarrier {
    /// Arm for a new launch group. Controller only, before forking the group.
    pub fn arm(&self, expected: u32) -> u64 {
        self.expected.store(expected, Ordering::Relaxed);
        self.arrived.store(0, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current generation (what a worker forked after `arm` waits on)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Register a worker's arrival. Returns the number arrived so far.
    pub fn arrive(&self) -> u32 {
        self.arrived.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Workers arrived in the current generation
    pub fn arrived(&self) -> u32 {
        self.arrived.load(Ordering::Acquire)
    }

    /// Workers the current generation waits for
    pub fn expected(&self) -> u32 {
        self.expected.load(Ordering::Relaxed)
    }

    /// Release every worker waiting on the current generation.
    pub fn release(&self) {
        let generation = self.generation.load(Ordering::Acquire);
        self.released_generation.store(generation, Ordering::Release);
    }

    /// Whether `generation` (or a later one) was released
    pub fn is_released(&self, generation: u64) -> bool {
        self.released_generation.load(Ordering::Acquire) >= generation
    }

    /// Worker side: wait for the release of `generation`, at most `grace`.
    pub fn wait_release(&self, generation: u64, grace: Duration) -> BarrierWait {
        let start = Instant::now();
        while !self.is_released(generation) {
            if start.elapsed() >= grace {
                return BarrierWait::TimedOut;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        BarrierWait::Released
    }

    /// Controller side: wait until `count` workers arrived, at most `grace`.
    ///
    /// Returns the number that actually arrived. `alive` is polled so the
    /// wait ends early once no further worker can arrive.
    pub fn wait_arrivals(&self, count: u32, grace: Duration, mut alive: impl FnMut() -> u32) -> u32 {
        let start = Instant::now();
        loop {
            let arrived = self.arrived();
            if arrived >= count || arrived >= alive() || start.elapsed() >= grace {
                return arrived;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_after_arrivals() {
        let barrier = StartBarrier::default();
        let generation = barrier.arm(3);
        assert_eq!(barrier.expected(), 3);

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    barrier.arrive();
                    assert_eq!(
                        barrier.wait_release(generation, Duration::from_secs(5)),
                        BarrierWait::Released
                    );
                });
            }
            let arrived = barrier.wait_arrivals(3, Duration::from_secs(5), || 3);
            assert_eq!(arrived, 3);
            barrier.release();
        });
    }

    #[test]
    fn test_worker_times_out_without_release() {
        let barrier = StartBarrier::default();
        let generation = barrier.arm(1);
        barrier.arrive();
        assert_eq!(
            barrier.wait_release(generation, Duration::from_millis(10)),
            BarrierWait::TimedOut
        );
    }

    #[test]
    fn test_rearm_invalidates_previous_release() {
        let barrier = StartBarrier::default();
        let first = barrier.arm(1);
        barrier.release();
        assert!(barrier.is_released(first));

        let second = barrier.arm(1);
        assert!(second > first);
        assert!(!barrier.is_released(second));
        assert_eq!(barrier.arrived(), 0);
    }

    #[test]
    fn test_wait_arrivals_stops_when_no_one_alive() {
        let barrier = StartBarrier::default();
        barrier.arm(4);
        barrier.arrive();
        let arrived = barrier.wait_arrivals(4, Duration::from_secs(10), || 1);
        assert_eq!(arrived, 1);
    }
}
