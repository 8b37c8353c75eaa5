//! The Shared State Region
//!
//! One anonymous `MAP_SHARED` mapping created by the controller before the
//! first fork. Every worker inherits the mapping, so plain addresses inside
//! it are valid in all processes. Layout:
//!
//! ```text
//! +--------------------+  header: stop latch, barrier, tallies, named locks,
//! | RegionHeader       |          warn-once bits, skip flags, heap, scratch
//! +--------------------+
//! | CounterBlock[n]    |  one per slot, written by the slot's worker
//! +--------------------+
//! | ChecksumRecord[n]  |  redundant copy, separate from the blocks
//! +--------------------+
//! | MetricBlock[n]     |  metric samples per slot
//! +--------------------+
//! ```
//!
//! The kernel zero-fills the mapping and every type stored here treats
//! all-zero bytes as its initial state, so no constructor runs in place.

use crate::ShmError;
use crate::barrier::StartBarrier;
use crate::checksum::ChecksumRecord;
use crate::counter::{CounterBlock, Latch};
use crate::heap::{HeapStr, SharedHeap};
use crate::lock::SharedLock;
use crate::metrics::MetricBlock;
use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const REGION_MAGIC: u64 = 0x666c_7578_7374_7273;

/// Size of the scratch buffer shared by the cache stressor
pub const CACHE_SCRATCH_SIZE: usize = 4096;

/// Distinct warn-once ids
pub const WARN_ONCE_IDS: u32 = 64;

/// Distinct feature skip flags
pub const SKIP_FLAG_BITS: u32 = 64;

/// Index of a worker slot, handed out by [`Region::claim_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    /// Position of the slot in the per-slot arrays
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Locks stored in the region header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedLock {
    /// Shared heap allocation
    Allocator = 0,
    /// Cache stressor scratch buffer
    CacheStress = 1,
    /// Thermal zone sampling
    ThermalZone = 2,
    /// Warn-once table
    WarnOnce = 3,
}

const NAMED_LOCKS: usize = 4;

/// Global run counters. Written only by the controller process.
#[repr(C)]
#[derive(Debug, Default)]
pub struct RunTallies {
    started: AtomicU64,
    exited: AtomicU64,
    reaped: AtomicU64,
    failed: AtomicU64,
}

/// Copy of [`RunTallies`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    /// Workers forked
    pub started: u64,
    /// Workers that exited normally
    pub exited: u64,
    /// Workers waited for
    pub reaped: u64,
    /// Instances classified as failed
    pub failed: u64,
}

impl RunTallies {
    /// Count a successful fork
    pub fn worker_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a normal exit
    pub fn worker_exited(&self) {
        self.exited.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful wait
    pub fn worker_reaped(&self) {
        self.reaped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed instance
    pub fn worker_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all four counters
    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            started: self.started.load(Ordering::Relaxed),
            exited: self.exited.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[repr(C)]
struct RegionHeader {
    magic: u64,
    slot_count: u32,
    next_slot: AtomicU32,
    stop: Latch,
    barrier: StartBarrier,
    tallies: RunTallies,
    locks: [SharedLock; NAMED_LOCKS],
    warn_once: AtomicU64,
    skip_flags: AtomicU64,
    heap: SharedHeap,
    cache_scratch: UnsafeCell<[u8; CACHE_SCRATCH_SIZE]>,
}

/// Handle to the mapped region. Cheap to share by reference; forked workers
/// use their inherited copy of the handle.
#[derive(Debug)]
pub struct Region {
    base: *mut u8,
    len: usize,
    slots: usize,
    blocks_offset: usize,
    checksums_offset: usize,
    metrics_offset: usize,
}

// SAFETY: every field reachable through the mapping is an atomic, a
// SharedLock-guarded buffer or immutable after creation.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map a region with room for `slots` workers.
    pub fn create(slots: usize) -> Result<Self, ShmError> {
        let (layout, blocks_offset, checksums_offset, metrics_offset) = Self::layout(slots)?;
        let len = layout.size().max(1);

        // SAFETY: anonymous shared mapping, no fd, kernel picks the address.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ShmError::Map(std::io::Error::last_os_error()));
        }

        let region = Self {
            base: base.cast(),
            len,
            slots,
            blocks_offset,
            checksums_offset,
            metrics_offset,
        };

        // SAFETY: the mapping is page aligned, at least header sized and not
        // yet visible to any other process.
        unsafe {
            let header = region.base.cast::<RegionHeader>();
            (*header).magic = REGION_MAGIC;
            (*header).slot_count = slots as u32;
        }

        tracing::debug!(slots, bytes = len, "mapped shared state region");
        Ok(region)
    }

    fn layout(slots: usize) -> Result<(Layout, usize, usize, usize), ShmError> {
        let too_big = |_| ShmError::SlotsExhausted { capacity: slots };
        let header = Layout::new::<RegionHeader>();
        let (layout, blocks) = header
            .extend(Layout::array::<CounterBlock>(slots).map_err(too_big)?)
            .map_err(too_big)?;
        let (layout, checksums) = layout
            .extend(Layout::array::<ChecksumRecord>(slots).map_err(too_big)?)
            .map_err(too_big)?;
        let (layout, metrics) = layout
            .extend(Layout::array::<MetricBlock>(slots).map_err(too_big)?)
            .map_err(too_big)?;
        Ok((layout.pad_to_align(), blocks, checksums, metrics))
    }

    fn header(&self) -> &RegionHeader {
        // SAFETY: base points at a live mapping that starts with a header.
        unsafe { &*self.base.cast::<RegionHeader>() }
    }

    /// Whether the header still carries the magic written at creation
    pub fn is_intact(&self) -> bool {
        self.header().magic == REGION_MAGIC && self.header().slot_count as usize == self.slots
    }

    /// Mapped size in bytes
    pub fn size(&self) -> usize {
        self.len
    }

    /// Total slot capacity
    pub fn capacity(&self) -> usize {
        self.slots
    }

    /// Slots handed out so far
    pub fn claimed(&self) -> usize {
        (self.header().next_slot.load(Ordering::Relaxed) as usize).min(self.slots)
    }

    /// Hand out the next unused slot. Controller only, before fork.
    pub fn claim_slot(&self) -> Result<SlotId, ShmError> {
        let next = self.header().next_slot.fetch_add(1, Ordering::Relaxed);
        if next as usize >= self.slots {
            return Err(ShmError::SlotsExhausted {
                capacity: self.slots,
            });
        }
        let slot = SlotId(next);
        self.block(slot).counter().mark_ready();
        Ok(slot)
    }

    fn element<T>(&self, offset: usize, slot: SlotId) -> &T {
        assert!(slot.index() < self.slots, "{} outside region of {} slots", slot, self.slots);
        // SAFETY: offset comes from the creation layout and the index is
        // bounds checked, so the element lies inside the mapping.
        unsafe { &*self.base.add(offset).cast::<T>().add(slot.index()) }
    }

    /// Counter block of `slot`
    pub fn block(&self, slot: SlotId) -> &CounterBlock {
        self.element(self.blocks_offset, slot)
    }

    /// Checksum record of `slot`
    pub fn checksum(&self, slot: SlotId) -> &ChecksumRecord {
        self.element(self.checksums_offset, slot)
    }

    /// Metric slots of `slot`
    pub fn metrics(&self, slot: SlotId) -> &MetricBlock {
        self.element(self.metrics_offset, slot)
    }

    /// Process-wide stop flag
    pub fn stop(&self) -> &Latch {
        &self.header().stop
    }

    /// Start barrier shared by a launch group
    pub fn barrier(&self) -> &StartBarrier {
        &self.header().barrier
    }

    /// Run-wide tallies
    pub fn tallies(&self) -> &RunTallies {
        &self.header().tallies
    }

    /// One of the named header locks
    pub fn lock(&self, which: NamedLock) -> &SharedLock {
        &self.header().locks[which as usize]
    }

    /// True exactly once per id across every process sharing the region.
    ///
    /// Returns false when the table lock cannot be taken, so a warning is
    /// dropped rather than repeated.
    pub fn warn_once(&self, id: u32) -> bool {
        let bit = 1u64 << (id % WARN_ONCE_IDS);
        let Ok(_guard) = self.lock(NamedLock::WarnOnce).lock() else {
            return false;
        };
        let table = &self.header().warn_once;
        let seen = table.load(Ordering::Relaxed);
        if seen & bit != 0 {
            return false;
        }
        table.store(seen | bit, Ordering::Relaxed);
        true
    }

    /// Mark a capability as faulting so sibling workers skip it.
    pub fn skip_capability(&self, bit: u32) {
        self.header()
            .skip_flags
            .fetch_or(1u64 << (bit % SKIP_FLAG_BITS), Ordering::AcqRel);
    }

    /// Whether some worker already saw `bit` fault
    pub fn capability_skipped(&self, bit: u32) -> bool {
        self.skip_flags() & (1u64 << (bit % SKIP_FLAG_BITS)) != 0
    }

    /// All capability skip flags
    pub fn skip_flags(&self) -> u64 {
        self.header().skip_flags.load(Ordering::Acquire)
    }

    /// Copy a string into the shared heap under the Allocator lock.
    ///
    /// A string that is already stored is not copied again; its existing
    /// handle is returned.
    pub fn alloc_str(&self, s: &str) -> Result<HeapStr, ShmError> {
        self.header().heap.alloc_str(self.lock(NamedLock::Allocator), s)
    }

    /// Read back a string stored with [`alloc_str`](Self::alloc_str)
    pub fn read_str(&self, handle: HeapStr) -> Option<String> {
        self.header().heap.read_str(handle)
    }

    /// Run `f` on the cache scratch buffer while holding the CacheStress lock.
    pub fn with_cache_scratch<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, ShmError> {
        let _guard = self.lock(NamedLock::CacheStress).lock()?;
        // SAFETY: the CacheStress lock grants exclusive access to the buffer.
        let scratch = unsafe { &mut *self.header().cache_scratch.get() };
        Ok(f(scratch))
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: base/len describe the mapping created in `create`.
        unsafe {
            libc::munmap(self.base.cast(), self.len);
        }
    }
}
