//! Per-worker deferred-preemption high-water marks.
//!
//! Gated behind the `diagnostics` Cargo feature, mirroring the original's
//! `#ifdef LOG_DEFERRED_SIGALRM_MAX` compile-time toggle around
//! `software_interrupt_deferred_sigalrm_max_{alloc,free,print}`. Allocated
//! once at scheduler initialization, indexed by worker, and never freed
//! early (the original's `_free` runs only at process teardown).

#![cfg(feature = "diagnostics")]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static MAX_DEFERRED: OnceLock<Vec<AtomicU64>> = OnceLock::new();

/// Allocate the per-worker high-water-mark array. Called once from
/// scheduler initialization, after the worker count is known.
pub fn init(worker_count: usize) {
    MAX_DEFERRED
        .set((0..worker_count).map(|_| AtomicU64::new(0)).collect())
        .unwrap_or_else(|_| panic!("diagnostics::init called more than once"));
}

/// Record `count` as this worker's current deferred-preemption count,
/// raising the stored high-water mark if it's a new maximum.
pub fn record_deferred(worker_index: usize, count: u64) {
    let Some(slots) = MAX_DEFERRED.get() else {
        return;
    };
    let slot = &slots[worker_index];
    let mut observed = slot.load(Ordering::Relaxed);
    while count > observed {
        match slot.compare_exchange_weak(
            observed,
            count,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => observed = actual,
        }
    }
}

/// Print each worker's high-water mark, in ascending worker-index order.
pub fn print() {
    let Some(slots) = MAX_DEFERRED.get() else {
        return;
    };
    println!("Max Deferred Timer Signals");
    for (index, slot) in slots.iter().enumerate() {
        println!("Worker {index}: {}", slot.load(Ordering::Relaxed));
    }
}
