//! Cross-Process Locks
//!
//! Locks that live inside the shared mapping and therefore work across `fork`.
//! A lock is a single atomic state word plus the pid of its holder.
//!
//! Acquisition never blocks forever: callers give a timeout and get a
//! [`LockError`] back when it expires, so an update can be skipped instead of
//! guessed at. A holder that died without releasing (e.g. a worker SIGKILLed
//! mid-update) is detected through its pid and the lock is reclaimed.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default time a caller waits for a named lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Busy-spin iterations before falling back to `yield_now`.
const SPIN_LIMIT: u32 = 256;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Errors from lock acquisition
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The holder kept the lock past the timeout
    #[error("Timed out after {waited:?} waiting for shared lock held by pid {holder}")]
    Timeout { waited: Duration, holder: i32 },
}

/// Lock word stored in shared memory. All-zero bytes are a valid unlocked lock.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SharedLock {
    state: AtomicU32,
    owner: AtomicI32,
}

/// RAII guard; releases the lock on drop.
#[derive(Debug)]
pub struct SharedLockGuard<'a> {
    lock: &'a SharedLock,
}

impl SharedLock {
    /// Create an unlocked lock (for use outside a mapping, e.g. in tests).
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            owner: AtomicI32::new(0),
        }
    }

    /// Try to take the lock once, without waiting.
    pub fn try_lock(&self) -> Option<SharedLockGuard<'_>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| {
                self.owner.store(current_pid(), Ordering::Relaxed);
                SharedLockGuard { lock: self }
            })
    }

    /// Take the lock, waiting at most `timeout`.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<SharedLockGuard<'_>, LockError> {
        let start = Instant::now();
        let mut spins = 0u32;

        loop {
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
                continue;
            }

            if let Some(guard) = self.reclaim_from_dead_owner() {
                return Ok(guard);
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    waited: timeout,
                    holder: self.owner.load(Ordering::Relaxed),
                });
            }
            std::thread::yield_now();
        }
    }

    /// Take the lock with [`DEFAULT_LOCK_TIMEOUT`].
    pub fn lock(&self) -> Result<SharedLockGuard<'_>, LockError> {
        self.lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Whether some process currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == LOCKED
    }

    /// Pid recorded by the current holder (0 when unlocked or mid-acquire).
    pub fn holder(&self) -> i32 {
        self.owner.load(Ordering::Relaxed)
    }

    /// Steal the lock when its recorded holder no longer exists.
    ///
    /// The owner word is swapped from the dead pid to ours with a CAS so only
    /// one waiter wins; the state word stays LOCKED throughout.
    fn reclaim_from_dead_owner(&self) -> Option<SharedLockGuard<'_>> {
        let holder = self.owner.load(Ordering::Relaxed);
        if holder <= 0 || process_alive(holder) || !self.is_locked() {
            return None;
        }
        self.owner
            .compare_exchange(holder, current_pid(), Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| {
                tracing::warn!(dead_holder = holder, "reclaimed shared lock from exited process");
                SharedLockGuard { lock: self }
            })
    }
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.owner.store(0, Ordering::Relaxed);
        self.lock.state.store(UNLOCKED, Ordering::Release);
    }
}

fn current_pid() -> i32 {
    // SAFETY: getpid has no preconditions and cannot fail.
    unsafe { libc::getpid() }
}

/// `kill(pid, 0)` liveness check. EPERM still means the process exists.
pub(crate) fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence/permission check.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_lock_and_release() {
        let lock = SharedLock::new();
        {
            let _guard = lock.lock().unwrap();
            assert!(lock.is_locked());
            assert_eq!(lock.holder(), current_pid());
        }
        assert!(!lock.is_locked());
        assert_eq!(lock.holder(), 0);
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = SharedLock::new();
        let _guard = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_none());
    }

    #[test]
    fn test_timeout_while_held_by_live_owner() {
        let lock = SharedLock::new();
        let _guard = lock.lock().unwrap();
        let err = lock.lock_timeout(Duration::from_millis(20)).unwrap_err();
        match err {
            LockError::Timeout { holder, .. } => assert_eq!(holder, current_pid()),
        }
    }

    #[test]
    fn test_reclaim_from_dead_owner() {
        // Reap a child so its pid is known not to exist any more.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0);
        if pid == 0 {
            unsafe { libc::_exit(0) };
        }
        let mut status = 0;
        unsafe { libc::waitpid(pid, &mut status, 0) };

        let lock = SharedLock::new();
        lock.state.store(LOCKED, Ordering::Relaxed);
        lock.owner.store(pid, Ordering::Relaxed);

        let guard = lock.lock_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(lock.holder(), current_pid());
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_mutual_exclusion_between_threads() {
        let lock = SharedLock::new();
        let value = AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        let _guard = lock.lock().unwrap();
                        // Non-atomic read-modify-write, only safe under the lock
                        let v = value.load(Ordering::Relaxed);
                        value.store(v + 1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(value.load(Ordering::Relaxed), 4000);
    }
}
