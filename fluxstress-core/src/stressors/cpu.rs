//! Integer fold loop.

use crate::ExitStatus;
use crate::context::StressContext;
use fluxstress_stats::MetricKind;
use std::hint::black_box;
use std::time::Instant;

/// Sum of 1..=n folded one element at a time
#[inline(never)]
fn fold(n: u64) -> u64 {
    (1..=black_box(n)).fold(0u64, |acc, x| black_box(acc.wrapping_add(x)))
}

pub(super) fn run(ctx: &StressContext<'_>) -> ExitStatus {
    let n = ctx.options().count("cpu-fold").max(1);
    let expected = n.wrapping_mul(n + 1) / 2;
    let verify = ctx.verify();
    let start = Instant::now();
    let start_ops = ctx.bogo_get();

    loop {
        let sum = fold(n);
        if verify && sum != expected {
            tracing::error!(instance = ctx.instance(), sum, expected, "cpu fold produced a wrong sum");
            return ExitStatus::Failure;
        }
        ctx.bogo_inc();
        if !ctx.should_continue() {
            break;
        }
    }

    let secs = start.elapsed().as_secs_f64();
    if secs > 0.0 {
        let ops = (ctx.bogo_get() - start_ops) as f64;
        if let Err(e) = ctx.record_metric(0, "folds per second", ops / secs, MetricKind::HarmonicMean) {
            ctx.warn_once(super::WARN_METRIC, &format!("cannot record cpu metric: {}", e));
        }
    }
    ExitStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_matches_closed_form() {
        for n in [1u64, 2, 10, 1024] {
            assert_eq!(fold(n), n * (n + 1) / 2);
        }
    }
}
