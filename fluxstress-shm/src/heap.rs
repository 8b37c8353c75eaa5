//! Append-only string arena inside the region.
//!
//! Metric descriptions are written here by workers and read by the
//! controller after the workers are gone, so only offsets ever cross the
//! process boundary. Allocation is serialised by the region's Allocator lock.
//!
//! Each string is stored once. Records are a 4-byte little-endian length
//! followed by the bytes; allocating a string that is already present hands
//! back the existing record, so the arena grows with the number of distinct
//! descriptions rather than with the number of workers.

use crate::ShmError;
use crate::lock::SharedLock;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bytes available for shared strings
pub const HEAP_SIZE: usize = 16 * 1024;

const LEN_PREFIX: usize = 4;

/// Offset and length of a string stored in the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStr {
    /// Offset of the first byte of the string
    pub offset: u32,
    /// Length in bytes
    pub len: u32,
}

/// The arena itself. All-zero bytes are an empty heap.
#[repr(C)]
pub struct SharedHeap {
    used: AtomicU32,
    bytes: UnsafeCell<[u8; HEAP_SIZE]>,
}

// SAFETY: writes go to bytes past `used` while holding the allocator lock;
// bytes below `used` are never written again and are published with Release.
unsafe impl Sync for SharedHeap {}

impl std::fmt::Debug for SharedHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHeap")
            .field("used", &self.used())
            .field("capacity", &HEAP_SIZE)
            .finish()
    }
}

impl SharedHeap {
    /// Bytes handed out so far, length prefixes included
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire) as usize
    }

    /// Published bytes
    fn published(&self) -> &[u8] {
        let used = self.used().min(HEAP_SIZE);
        // SAFETY: bytes below `used` are immutable once published.
        unsafe { &(&*self.bytes.get())[..used] }
    }

    /// Existing record holding exactly `s`
    fn find(&self, s: &str) -> Option<HeapStr> {
        let bytes = self.published();
        let mut pos = 0;
        while pos + LEN_PREFIX <= bytes.len() {
            let mut prefix = [0u8; LEN_PREFIX];
            prefix.copy_from_slice(&bytes[pos..pos + LEN_PREFIX]);
            let len = u32::from_le_bytes(prefix) as usize;
            let start = pos + LEN_PREFIX;
            let end = start.checked_add(len).filter(|&end| end <= bytes.len())?;
            if &bytes[start..end] == s.as_bytes() {
                return Some(HeapStr {
                    offset: start as u32,
                    len: len as u32,
                });
            }
            pos = end;
        }
        None
    }

    /// Store `s` under `lock`, or return the record already holding it.
    pub fn alloc_str(&self, lock: &SharedLock, s: &str) -> Result<HeapStr, ShmError> {
        let _guard = lock.lock()?;
        if let Some(existing) = self.find(s) {
            return Ok(existing);
        }

        let used = self.used();
        let available = HEAP_SIZE.saturating_sub(used);
        let requested = LEN_PREFIX + s.len();
        if requested > available {
            return Err(ShmError::HeapExhausted { requested, available });
        }
        // SAFETY: the allocator lock is held and [used, used + requested) has
        // never been handed out, so no other reference to these bytes exists.
        unsafe {
            let base = self.bytes.get().cast::<u8>().add(used);
            std::ptr::copy_nonoverlapping((s.len() as u32).to_le_bytes().as_ptr(), base, LEN_PREFIX);
            std::ptr::copy_nonoverlapping(s.as_ptr(), base.add(LEN_PREFIX), s.len());
        }
        self.used.store((used + requested) as u32, Ordering::Release);
        Ok(HeapStr {
            offset: (used + LEN_PREFIX) as u32,
            len: s.len() as u32,
        })
    }

    /// Read a string previously stored with [`alloc_str`](Self::alloc_str).
    ///
    /// Returns `None` for a handle outside the allocated range or with
    /// invalid UTF-8 (a corrupted handle).
    pub fn read_str(&self, handle: HeapStr) -> Option<String> {
        let start = handle.offset as usize;
        let end = start.checked_add(handle.len as usize)?;
        let bytes = self.published().get(start..end)?;
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed_heap() -> Box<SharedHeap> {
        // SAFETY: all-zero bytes are a valid empty heap.
        unsafe { Box::new(std::mem::zeroed()) }
    }

    #[test]
    fn test_alloc_and_read() {
        let heap = boxed_heap();
        let lock = SharedLock::new();
        let a = heap.alloc_str(&lock, "ops per second").unwrap();
        let b = heap.alloc_str(&lock, "nanosecs per op").unwrap();
        assert_eq!(heap.read_str(a).as_deref(), Some("ops per second"));
        assert_eq!(heap.read_str(b).as_deref(), Some("nanosecs per op"));
        assert_eq!(a.offset, 4);
        assert_eq!(b.offset, a.offset + a.len + 4);
    }

    #[test]
    fn test_identical_strings_are_stored_once() {
        let heap = boxed_heap();
        let lock = SharedLock::new();
        let first = heap.alloc_str(&lock, "folds per second").unwrap();
        let used = heap.used();
        for _ in 0..10_000 {
            assert_eq!(heap.alloc_str(&lock, "folds per second").unwrap(), first);
        }
        assert_eq!(heap.used(), used);

        // a prefix of a stored string is a different string
        let prefix = heap.alloc_str(&lock, "folds").unwrap();
        assert_ne!(prefix, first);
        assert_eq!(heap.read_str(prefix).as_deref(), Some("folds"));
    }

    #[test]
    fn test_exhaustion() {
        let heap = boxed_heap();
        let lock = SharedLock::new();
        let big = "x".repeat(HEAP_SIZE - 8);
        heap.alloc_str(&lock, &big).unwrap();
        assert_eq!(heap.used(), HEAP_SIZE - 4);
        let err = heap.alloc_str(&lock, "too long").unwrap_err();
        assert!(matches!(
            err,
            ShmError::HeapExhausted { requested: 12, available: 4 }
        ));
        // still found once the heap is full
        assert!(heap.alloc_str(&lock, &big).is_ok());
    }

    #[test]
    fn test_out_of_range_handle() {
        let heap = boxed_heap();
        assert!(heap.read_str(HeapStr { offset: 0, len: 1 }).is_none());
    }
}
