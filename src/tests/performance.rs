//! Lightweight timing sanity checks, not real benchmarks (there's no
//! `criterion`/`bencher` dependency, matching the teacher's choice to keep
//! these as plain `#[test]`s with generous thresholds rather than a
//! separate `cargo bench` target). These exist to catch an accidental
//! quadratic blowup or a lock added to a hot path, not to track
//! nanosecond-level regressions.

use std::time::{Duration, Instant};

use super::helpers::test_sandbox;
use crate::context::ArchContext;
use crate::run_queue::{LocalRunQueue, RunQueue};

/// Generous upper bound: these operations touch a handful of atomics and
/// no syscalls, so even a heavily loaded CI box should clear this by a
/// wide margin.
const GENEROUS_BUDGET: Duration = Duration::from_millis(500);

#[test]
fn save_fast_throughput_is_not_accidentally_quadratic() {
    let ctx = ArchContext::new();
    let start = Instant::now();
    for i in 0..1_000_000u64 {
        ctx.mark_running();
        ctx.save_fast(i, i);
    }
    assert!(
        start.elapsed() < GENEROUS_BUDGET,
        "1M save_fast calls took {:?}, expected well under {:?}",
        start.elapsed(),
        GENEROUS_BUDGET
    );
}

#[test]
fn run_queue_push_pop_throughput_is_linear() {
    let mut queue = LocalRunQueue::new();
    let sandboxes: Vec<_> = (0..100_000).map(test_sandbox).collect();

    let start = Instant::now();
    for sandbox in &sandboxes {
        queue.push(sandbox.clone());
    }
    for _ in 0..sandboxes.len() {
        queue.pop();
    }
    assert!(
        start.elapsed() < GENEROUS_BUDGET,
        "100k push+pop took {:?}, expected well under {:?}",
        start.elapsed(),
        GENEROUS_BUDGET
    );
}

#[test]
fn signal_mask_acquire_release_overhead_stays_small() {
    use crate::signal_core::SignalMask;

    let start = Instant::now();
    for _ in 0..10_000 {
        let _guard = SignalMask::acquire();
    }
    assert!(
        start.elapsed() < GENEROUS_BUDGET,
        "10k SignalMask::acquire/drop cycles took {:?}, expected well under {:?}",
        start.elapsed(),
        GENEROUS_BUDGET
    );
}

#[test]
fn timer_arm_disarm_overhead_stays_small() {
    let start = Instant::now();
    for _ in 0..1_000 {
        crate::timer::arm(50_000, true);
        crate::timer::disarm();
    }
    assert!(
        start.elapsed() < GENEROUS_BUDGET,
        "1k arm/disarm cycles took {:?}, expected well under {:?}",
        start.elapsed(),
        GENEROUS_BUDGET
    );
}
