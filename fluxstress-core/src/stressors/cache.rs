//! Shared scratch buffer thrash.
//!
//! Several threads per instance, and every instance of the stressor, fight
//! over one scratch buffer in the shared region. Each pass walks the buffer
//! one cache line at a time under the CacheStress lock. The threads share one
//! counter block, so they report through the locked bogo variants.

use crate::context::StressContext;
use crate::{CoreError, ExitStatus};
use fluxstress_shm::Region;
use fluxstress_stats::MetricKind;
use std::sync::atomic::{AtomicU64, Ordering};

const CACHE_LINE: usize = 64;
const MAX_THREADS: u64 = 64;

pub(super) fn init(region: &Region) -> Result<(), CoreError> {
    region.with_cache_scratch(|buf| buf.fill(0))?;
    Ok(())
}

pub(super) fn deinit(region: &Region) {
    if let Err(e) = region.with_cache_scratch(|buf| buf.fill(0)) {
        tracing::debug!("cache scratch not cleared: {}", e);
    }
}

/// One pass over the scratch buffer, touching every cache line
fn thrash(buf: &mut [u8], salt: u8) -> u64 {
    let mut sum = 0u64;
    for line in buf.chunks_mut(CACHE_LINE) {
        line[0] = line[0].wrapping_add(salt);
        sum = sum.wrapping_add(line[line.len() - 1] as u64);
    }
    sum
}

pub(super) fn run(ctx: &StressContext<'_>) -> ExitStatus {
    let threads = ctx.options().count("cache-threads").clamp(1, MAX_THREADS);
    let lock_misses = AtomicU64::new(0);

    std::thread::scope(|s| {
        for t in 0..threads {
            let lock_misses = &lock_misses;
            s.spawn(move || {
                let salt = (t as u8).wrapping_add(1);
                loop {
                    match ctx.region().with_cache_scratch(|buf| thrash(buf, salt)) {
                        Ok(sum) => {
                            std::hint::black_box(sum);
                            ctx.bogo_inc_locked();
                        }
                        Err(_) => {
                            lock_misses.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    if !ctx.should_continue_locked() {
                        break;
                    }
                }
            });
        }
    });

    let misses = lock_misses.load(Ordering::Relaxed) + ctx.skipped_updates();
    if misses > 0 {
        ctx.warn_once(
            super::WARN_CACHE_LOCK,
            &format!("{} cache passes skipped on lock timeouts", misses),
        );
    }
    if let Err(e) = ctx.record_metric(0, "lock timeouts", misses as f64, MetricKind::Total) {
        ctx.warn_once(super::WARN_METRIC, &format!("cannot record cache metric: {}", e));
    }
    ExitStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxstress_shm::CACHE_SCRATCH_SIZE;

    #[test]
    fn test_thrash_touches_every_line() {
        let mut buf = vec![0u8; 256];
        thrash(&mut buf, 3);
        let touched = buf.iter().filter(|&&b| b == 3).count();
        assert_eq!(touched, 256 / CACHE_LINE);
    }

    #[test]
    fn test_init_clears_scratch() {
        let region = Region::create(0).unwrap();
        region.with_cache_scratch(|buf| buf.fill(9)).unwrap();
        init(&region).unwrap();
        let sum: usize = region
            .with_cache_scratch(|buf| buf.iter().map(|&b| b as usize).sum())
            .unwrap();
        assert_eq!(sum, 0);
        assert_eq!(CACHE_SCRATCH_SIZE % CACHE_LINE, 0);
    }
}
