#![warn(missing_docs)]
//! FluxStress Shared State
//!
//! The memory every worker process shares with the controller: counter
//! blocks, checksum records, metric slots, cross-process locks, the start
//! barrier and the run-wide flags. All of it lives in one anonymous shared
//! mapping created before the first fork.
//!
//! Mutability is part of each type:
//! - [`FlaggedCounter`] for the bogo-op counter (flagged double-barrier update)
//! - [`Latch`] for single-word flags
//! - [`SharedLock`]-guarded storage for everything with more than one writer

mod barrier;
pub mod checksum;
mod counter;
mod heap;
mod lock;
mod metrics;
mod region;

pub use barrier::{BarrierWait, StartBarrier};
pub use checksum::{ChecksumRecord, ChecksumVerdict, CounterSnapshot};
pub use counter::{CounterBlock, FaultRecord, FlaggedCounter, Latch};
pub use heap::{HEAP_SIZE, HeapStr, SharedHeap};
pub use lock::{DEFAULT_LOCK_TIMEOUT, LockError, SharedLock, SharedLockGuard};
pub use metrics::{MAX_METRICS, MetricBlock, RawMetric};
pub use region::{
    CACHE_SCRATCH_SIZE, NamedLock, Region, RunTallies, SKIP_FLAG_BITS, SlotId, TallySnapshot,
    WARN_ONCE_IDS,
};

use thiserror::Error;

/// Errors from the shared state region
#[derive(Debug, Error)]
pub enum ShmError {
    /// mmap of the region failed
    #[error("Failed to map shared state region: {0}")]
    Map(#[source] std::io::Error),

    /// Every slot has been claimed
    #[error("All {capacity} worker slots are in use")]
    SlotsExhausted { capacity: usize },

    /// No room left in the shared string heap
    #[error("Shared heap exhausted: requested {requested} bytes, {available} available")]
    HeapExhausted { requested: usize, available: usize },

    /// Metric slot index past `MAX_METRICS`
    #[error("Metric index {index} out of range (max {max})")]
    MetricIndex { index: usize, max: usize },

    /// A shared lock could not be taken
    #[error(transparent)]
    Lock(#[from] LockError),
}
