//! Anonymous memory fill and verify.

use crate::ExitStatus;
use crate::context::StressContext;
use crate::measure::physical_memory;
use crate::options::StressorOptions;
use fluxstress_stats::MetricKind;
use std::hint::black_box;
use std::time::Instant;

const MIN_VM_BYTES: u64 = 4096;
const MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Keep the combined footprint of all instances under half of physical memory.
pub(super) fn set_limit(instances: u32, options: &mut StressorOptions) {
    let Some(phys) = physical_memory() else {
        return;
    };
    let per_instance = (phys / 2 / instances.max(1) as u64).max(MIN_VM_BYTES);
    let requested = options.bytes("vm-bytes");
    let clamped = requested.clamp(MIN_VM_BYTES, per_instance);
    if clamped != requested {
        tracing::debug!(requested, clamped, instances, "clamping vm-bytes");
        options.set("vm-bytes", clamped.to_string());
    }
}

#[inline]
fn pattern(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_mul(MIX)
}

fn fill(buf: &mut [u64], seed: u64) {
    for (i, w) in buf.iter_mut().enumerate() {
        *w = pattern(seed, i);
    }
}

/// Number of words that do not hold the expected pattern
fn count_errors(buf: &[u64], seed: u64) -> usize {
    buf.iter()
        .enumerate()
        .filter(|&(i, &w)| black_box(w) != pattern(seed, i))
        .count()
}

pub(super) fn run(ctx: &StressContext<'_>) -> ExitStatus {
    let bytes = ctx.options().bytes("vm-bytes").max(MIN_VM_BYTES) as usize;
    let words = bytes / std::mem::size_of::<u64>();

    let mut buf: Vec<u64> = Vec::new();
    if buf.try_reserve_exact(words).is_err() {
        ctx.warn_once(super::WARN_VM_ALLOC, &format!("cannot allocate {} bytes, skipping vm", bytes));
        return ExitStatus::NoResource;
    }
    buf.resize(words, 0);

    let page_words = (ctx.page_size() / std::mem::size_of::<u64>()).max(1);
    let start = Instant::now();
    let mut round = 0u64;

    loop {
        let seed = (ctx.instance() as u64) << 32 | round;
        fill(&mut buf, seed);

        if ctx.verify() {
            let errors = count_errors(&buf, seed);
            if errors > 0 {
                tracing::error!(instance = ctx.instance(), errors, round, "vm pattern mismatch");
                return ExitStatus::Failure;
            }
        } else {
            // Touch one word per page so the fill is not elided
            let mut acc = 0u64;
            for w in buf.iter().step_by(page_words) {
                acc ^= black_box(*w);
            }
            black_box(acc);
        }

        round += 1;
        ctx.bogo_inc();
        if !ctx.should_continue() {
            break;
        }
    }

    let secs = start.elapsed().as_secs_f64();
    if secs > 0.0 {
        let mb = (round as f64 * bytes as f64) / (1024.0 * 1024.0);
        if let Err(e) = ctx.record_metric(0, "MB written per second", mb / secs, MetricKind::HarmonicMean) {
            ctx.warn_once(super::WARN_METRIC, &format!("cannot record vm metric: {}", e));
        }
    }
    ExitStatus::Success
}
