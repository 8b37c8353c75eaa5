//! Checksum Records
//!
//! A redundant copy of each counter block's outcome fields, hashed with a
//! Jenkins one-at-a-time hash over a fixed 16-byte layout. The record lives
//! in its own array so corruption of the primary block is detectable without
//! trusting the primary block itself.
//!
//! Workers refresh their record while they run and once more at exit; the
//! controller checks the record's own hash on every monitor tick. A sequence
//! word guards each refresh: odd while a store is in progress, zero before
//! the first one, so a reader never hashes a half-written record.
//!
//! Layout (little endian):
//! ```text
//! [0..8)   bogo-op counter
//! [8]      run_ok (0 or 1)
//! [9..16)  zero padding
//! ```

use crate::counter::CounterBlock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering, fence};

/// Number of bytes covered by the hash
pub const SNAPSHOT_LEN: usize = 16;

/// Fixed-layout view of the counter fields that are hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Bogo-op counter at snapshot time
    pub counter: u64,
    /// Whether the worker reported a cooperative exit
    pub run_ok: bool,
}

impl CounterSnapshot {
    /// Take a snapshot of the fields in a live counter block.
    pub fn of(block: &CounterBlock) -> Self {
        Self {
            counter: block.counter().raw(),
            run_ok: block.run_ok(),
        }
    }

    /// Serialize to the hashed layout
    pub fn to_bytes(&self) -> [u8; SNAPSHOT_LEN] {
        let mut bytes = [0u8; SNAPSHOT_LEN];
        bytes[..8].copy_from_slice(&self.counter.to_le_bytes());
        bytes[8] = self.run_ok as u8;
        bytes
    }
}

/// Jenkins one-at-a-time hash.
///
/// Every step is a bijection on the 32-bit state for a fixed input byte and
/// each byte is mixed in by addition, so two inputs differing in exactly one
/// byte always hash differently.
pub fn compute_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in bytes {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// Hash of a counter snapshot
pub fn compute(snapshot: &CounterSnapshot) -> u32 {
    compute_bytes(&snapshot.to_bytes())
}

/// Whether `stored` is the hash of `snapshot`
pub fn verify(snapshot: &CounterSnapshot, stored: u32) -> bool {
    compute(snapshot) == stored
}

/// Whether `stored` is the hash of a raw snapshot buffer
pub fn verify_bytes(bytes: &[u8], stored: u32) -> bool {
    compute_bytes(bytes) == stored
}

/// Attempts a reader makes before treating a record as busy
const READ_ATTEMPTS: usize = 4;

/// Redundant snapshot plus hash, written only by the owning worker.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ChecksumRecord {
    seq: AtomicU64,
    counter: AtomicU64,
    run_ok: AtomicBool,
    hash: AtomicU32,
}

/// Result of comparing a counter block against its checksum record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumVerdict {
    /// Record present, hash matches, primary block agrees
    Ok,
    /// No complete record: never stored, mid-store, or the worker died while storing
    Missing,
    /// The record's own hash does not match its snapshot
    HashMismatch,
    /// The primary counter differs from the recorded one
    CounterMismatch,
    /// The primary run_ok flag differs from the recorded one
    RunOkMismatch,
}

impl ChecksumVerdict {
    /// Whether the record verified
    pub fn is_ok(self) -> bool {
        self == ChecksumVerdict::Ok
    }
}

impl ChecksumRecord {
    /// Store a snapshot and its hash.
    ///
    /// Worker side: periodically while running and once at exit. Only one
    /// thread of one process may store into a record at a time.
    pub fn store(&self, snapshot: &CounterSnapshot) {
        let seq = self.seq.load(Ordering::Relaxed) | 1;
        self.seq.store(seq, Ordering::Relaxed);
        fence(Ordering::Release);
        self.counter.store(snapshot.counter, Ordering::Relaxed);
        self.run_ok.store(snapshot.run_ok, Ordering::Relaxed);
        self.hash.store(compute(snapshot), Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Release);
    }

    /// Recorded snapshot and hash.
    ///
    /// `None` if nothing was stored yet, or if a store kept overlapping the
    /// read.
    pub fn load(&self) -> Option<(CounterSnapshot, u32)> {
        for _ in 0..READ_ATTEMPTS {
            let before = self.seq.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let snapshot = CounterSnapshot {
                counter: self.counter.load(Ordering::Relaxed),
                run_ok: self.run_ok.load(Ordering::Relaxed),
            };
            let hash = self.hash.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return Some((snapshot, hash));
            }
        }
        None
    }

    /// Check the record against its own hash only.
    ///
    /// Safe to call while the worker is running.
    pub fn verify_record(&self) -> ChecksumVerdict {
        match self.load() {
            None => ChecksumVerdict::Missing,
            Some((recorded, hash)) if !verify(&recorded, hash) => ChecksumVerdict::HashMismatch,
            Some(_) => ChecksumVerdict::Ok,
        }
    }

    /// Check the record against itself and against the primary block.
    pub fn verify_block(&self, block: &CounterBlock) -> ChecksumVerdict {
        let Some((recorded, hash)) = self.load() else {
            return ChecksumVerdict::Missing;
        };
        if !verify(&recorded, hash) {
            return ChecksumVerdict::HashMismatch;
        }
        let primary = CounterSnapshot::of(block);
        if primary.counter != recorded.counter {
            ChecksumVerdict::CounterMismatch
        } else if primary.run_ok != recorded.run_ok {
            ChecksumVerdict::RunOkMismatch
        } else {
            ChecksumVerdict::Ok
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_hash(&self, xor: u32) {
        self.hash.fetch_xor(xor, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(compute_bytes(b""), 0);
        // Published one-at-a-time reference value
        assert_eq!(compute_bytes(b"a"), 0xca2e_9442);
    }

    #[test]
    fn test_any_single_byte_corruption_changes_hash() {
        let snapshots = [
            CounterSnapshot { counter: 0, run_ok: false },
            CounterSnapshot { counter: 4000, run_ok: true },
            CounterSnapshot { counter: u64::MAX, run_ok: true },
            CounterSnapshot { counter: 0x0102_0304_0506_0708, run_ok: false },
        ];

        for snapshot in snapshots {
            let bytes = snapshot.to_bytes();
            let hash = compute_bytes(&bytes);
            assert!(verify(&snapshot, hash));

            for i in 0..SNAPSHOT_LEN {
                for delta in 1..=255u8 {
                    let mut corrupted = bytes;
                    corrupted[i] = corrupted[i].wrapping_add(delta);
                    assert!(
                        !verify_bytes(&corrupted, hash),
                        "byte {} changed by {} kept hash {:#x}",
                        i,
                        delta,
                        hash
                    );
                }
            }
        }
    }

    #[test]
    fn test_record_roundtrip_and_verdicts() {
        let block = CounterBlock::default();
        let record = ChecksumRecord::default();
        assert_eq!(record.verify_block(&block), ChecksumVerdict::Missing);

        block.counter().set(1000);
        block.set_run_ok(true);
        record.store(&CounterSnapshot::of(&block));
        assert_eq!(record.verify_block(&block), ChecksumVerdict::Ok);

        block.counter().set(1001);
        assert_eq!(record.verify_block(&block), ChecksumVerdict::CounterMismatch);

        block.counter().set(1000);
        block.set_run_ok(false);
        assert_eq!(record.verify_block(&block), ChecksumVerdict::RunOkMismatch);

        block.set_run_ok(true);
        record.corrupt_hash(0x10);
        assert_eq!(record.verify_block(&block), ChecksumVerdict::HashMismatch);
        assert_eq!(record.verify_record(), ChecksumVerdict::HashMismatch);
    }

    #[test]
    fn test_record_refresh_while_reading() {
        let record = ChecksumRecord::default();
        assert_eq!(record.verify_record(), ChecksumVerdict::Missing);

        std::thread::scope(|s| {
            s.spawn(|| {
                for counter in 1..=20_000u64 {
                    record.store(&CounterSnapshot { counter, run_ok: false });
                }
            });
            for _ in 0..20_000 {
                // a store in flight reads as missing, never as corrupted
                assert_ne!(record.verify_record(), ChecksumVerdict::HashMismatch);
            }
        });

        let (snapshot, _) = record.load().unwrap();
        assert_eq!(snapshot.counter, 20_000);
        assert_eq!(record.verify_record(), ChecksumVerdict::Ok);
    }

    #[test]
    fn test_store_after_corruption_repairs_record() {
        let record = ChecksumRecord::default();
        record.store(&CounterSnapshot { counter: 10, run_ok: false });
        record.corrupt_hash(1);
        assert_eq!(record.verify_record(), ChecksumVerdict::HashMismatch);
        record.store(&CounterSnapshot { counter: 11, run_ok: false });
        assert_eq!(record.verify_record(), ChecksumVerdict::Ok);
    }
}
