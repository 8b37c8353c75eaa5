//! Writes to an inaccessible page.
//!
//! Every attempt counts a bogo-op and then faults, so consecutive faults are
//! never identical and the worker keeps resuming until it is told to stop.
//! A stopped fault loop has nothing to report, so the instance is skipped.

use crate::ExitStatus;
use crate::context::StressContext;
use crate::fault::{Attempt, FaultGuard};
use fluxstress_stats::MetricKind;

/// A `PROT_NONE` anonymous page, unmapped on drop
struct GuardPage {
    addr: *mut libc::c_void,
    len: usize,
}

impl GuardPage {
    fn map(len: usize) -> Option<Self> {
        // SAFETY: anonymous private mapping, no fd.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        (addr != libc::MAP_FAILED).then_some(Self { addr, len })
    }
}

impl Drop for GuardPage {
    fn drop(&mut self) {
        // SAFETY: addr/len describe the mapping created in `map`.
        unsafe {
            libc::munmap(self.addr, self.len);
        }
    }
}

pub(super) fn run(ctx: &StressContext<'_>) -> ExitStatus {
    let Some(page) = GuardPage::map(ctx.page_size()) else {
        return ExitStatus::NoResource;
    };
    let target = page.addr.cast::<u8>();
    let mut guard = FaultGuard::new(ctx, "sigsegv");

    let status = loop {
        let attempt = guard.attempt(None, |c| {
            c.bogo_inc();
            // SAFETY: deliberately faults; the page is PROT_NONE.
            unsafe { std::ptr::write_volatile(target, 1) };
            ExitStatus::Failure
        });
        match attempt {
            Ok(Attempt::Recovered { .. }) => continue,
            // The write went through: the page was not protected
            Ok(Attempt::Completed(status)) => break status,
            // stopped or faulting the same way twice: nothing meaningful left to run
            Ok(Attempt::Aborted(_)) => break ExitStatus::NoResource,
            Err(e) => {
                ctx.warn_once(super::WARN_ATTEMPT_FORK, &format!("sigsegv attempt failed: {}", e));
                break ExitStatus::NoResource;
            }
        }
    };

    if let Err(e) = ctx.record_metric(0, "segfaults handled", guard.faults() as f64, MetricKind::Total) {
        ctx.warn_once(super::WARN_METRIC, &format!("cannot record sigsegv metric: {}", e));
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkerLimits;
    use crate::find;
    use crate::options::StressorOptions;
    use fluxstress_shm::Region;

    #[test]
    fn test_resumes_until_op_limit() {
        let region = Region::create(1).unwrap();
        let slot = region.claim_slot().unwrap();
        let options = StressorOptions::default();
        let limits = WorkerLimits { ops: 5, deadline: None };
        let ctx = StressContext::new(&region, slot, find("sigsegv").unwrap(), 0, 1, limits, false, &options);

        assert_eq!(run(&ctx), ExitStatus::NoResource);
        assert_eq!(ctx.bogo_get(), 5);
        let record = region.block(slot).fault().unwrap();
        assert_eq!(record.signal, libc::SIGSEGV);
        assert_eq!(record.count, 5);
    }
}
