//! Load and concurrency stress tests. These stay within the surface that's
//! genuinely safe to hammer from a `#[test]` fn in a shared process:
//! lock-free counters, the run queue, and signal masking, all of which are
//! designed to tolerate exactly this kind of pressure. Real preemption
//! across real worker threads is exercised by `demos/broadcast_demo.rs`,
//! not here (see the module comment on [`super`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use super::helpers::test_sandbox;
use crate::run_queue::{LocalRunQueue, RunQueue};

const STRESS_SANDBOX_COUNT: u64 = 10_000;

#[test]
fn run_queue_holds_many_thousands_of_sandboxes_without_loss() {
    let mut queue = LocalRunQueue::new();
    for id in 0..STRESS_SANDBOX_COUNT {
        queue.push(test_sandbox(id));
    }
    assert_eq!(queue.len() as u64, STRESS_SANDBOX_COUNT);

    let mut seen = 0u64;
    while let Some(sandbox) = queue.pop() {
        assert_eq!(sandbox.id(), seen);
        seen += 1;
    }
    assert_eq!(seen, STRESS_SANDBOX_COUNT);
}

#[test]
fn signal_mask_guard_survives_many_nested_acquisitions() {
    use crate::signal_core::SignalMask;

    fn recurse(depth: usize) {
        if depth == 0 {
            return;
        }
        let _guard = SignalMask::acquire();
        recurse(depth - 1);
    }
    recurse(256);
}

#[test]
fn signal_mask_guard_is_safe_from_many_concurrent_threads() {
    // Each worker thread masks these signals on its own thread; nothing in
    // SignalMask::acquire touches shared state beyond the calling thread's
    // own signal mask, so concurrent acquisition across unrelated threads
    // must never corrupt another thread's mask.
    use crate::signal_core::SignalMask;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            thread::spawn(|| {
                for _ in 0..500 {
                    let _guard = SignalMask::acquire();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }
}

#[test]
#[cfg(feature = "diagnostics")]
fn diagnostics_high_water_mark_survives_concurrent_writers() {
    // spec.md §4.6: the diagnostics array is per-worker, but record_deferred
    // itself is a compare-exchange loop over a single AtomicU64 slot, so it
    // must still converge without panicking or deadlocking if (hypothetically)
    // hammered from multiple threads at once.
    let _ = std::panic::catch_unwind(|| crate::diagnostics::init(1));

    let observed_max = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let observed_max = Arc::clone(&observed_max);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    let value = t * 1000 + i;
                    observed_max.fetch_max(value, Ordering::Relaxed);
                    crate::diagnostics::record_deferred(0, value);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    // We can't read the stored value back out (diagnostics::print only
    // writes to stdout), so this asserts the writer side never panics or
    // deadlocks under contention; correctness of the max itself is covered
    // by diagnostics.rs's own single-threaded test.
    assert!(observed_max.load(Ordering::Relaxed) > 0);
}

#[test]
fn module_load_failures_do_not_leak_or_panic_under_repetition() {
    use crate::module_abi::Module;

    for i in 0..2_000 {
        let path = format!("/nonexistent/sandbox-{i}.so");
        let result = Module::load(&path);
        assert!(result.is_err());
    }
}

#[test]
fn many_sandboxes_with_randomized_preemptability_toggle_independently() {
    let sandboxes: Vec<_> = (0..STRESS_SANDBOX_COUNT).map(test_sandbox).collect();
    for (i, sandbox) in sandboxes.iter().enumerate() {
        sandbox.set_preemptable(i % 2 == 0);
    }
    for (i, sandbox) in sandboxes.iter().enumerate() {
        assert_eq!(sandbox.is_preemptable(), i % 2 == 0);
    }
}
