//! Busy loop that never polls the stop flag.
//!
//! Only the supervisor's SIGKILL escalation ends it.

use crate::ExitStatus;
use crate::context::StressContext;
use std::hint::black_box;

pub(super) fn run(ctx: &StressContext<'_>) -> ExitStatus {
    let mut x = 0u64;
    loop {
        for i in 0..4096u64 {
            x = black_box(x.rotate_left(5) ^ i);
        }
        ctx.bogo_inc();
    }
}
