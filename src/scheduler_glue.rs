//! Policy decisions invoked from the signal handler and from a sandbox's
//! own cooperative yield: pick the next sandbox, perform the switch, or
//! defer.
//!
//! Grounded directly on `scheduler_worker_would_preempt`,
//! `scheduler_preemptive_sched`, and `scheduler_preemptive_switch_to` in
//! the original runtime, with the run queue and priority bookkeeping
//! supplied by [`crate::worker::WorkerState`] rather than a separate
//! `scheduler.c`.

use std::sync::Arc;

use crate::arch::{Arch, DefaultArch};
use crate::context::ContextVariant;
use crate::errors::{fatal_invariant, InvariantViolation};
use crate::sandbox::{Sandbox, SandboxState};
use crate::worker::{self, WorkerState};

/// Policy hook used by Triaged fan-out: true if `worker_index` currently
/// runs a lower-priority sandbox than some sandbox runnable on it.
///
/// Reads only atomics published by the peer worker (never its `RefCell`
/// fields), so this is safe to call from inside a signal handler on a
/// *different* worker than the one being queried.
pub fn would_preempt(worker_index: usize) -> bool {
    worker::peer(worker_index).has_higher_priority_runnable()
}

/// Called from the timer handler with the OS-delivered interrupted
/// context. Saves it into the current sandbox's `ArchContext` as `Slow`,
/// marks the sandbox `Preempted`, enqueues it, pops a successor, and
/// either fast-restores it directly or overwrites `interrupted_ctx` in
/// place so return-from-handler resumes the successor.
///
/// # Safety
/// Must be called from the timer signal handler, on the worker whose
/// current sandbox `interrupted_ctx` describes.
pub unsafe fn preemptive_sched(worker: &'static WorkerState, interrupted_ctx: *mut libc::ucontext_t) {
    let interrupted = worker
        .current_sandbox()
        .expect("preemptive_sched called with no current sandbox");

    if worker.run_queue_len() == 0 {
        // Tie-breaking rule (spec.md §4.4): the run queue would contain
        // only the preempted sandbox itself. Detected *before* touching
        // `interrupted` at all, so it is left completely unchanged —
        // still `Running`, still a `Running` `ArchContext` — and the
        // handler's return does the resuming via the untouched
        // `interrupted_ctx`.
        return;
    }

    unsafe {
        interrupted.arch_context().save_slow(interrupted_ctx);
    }
    interrupted.set_state(SandboxState::Preempted);
    worker.push_runnable(interrupted.clone());

    let successor = worker
        .pop_runnable()
        .expect("a non-empty queue plus the just-pushed entry always has something to pop");

    debug_assert!(
        !Arc::ptr_eq(&successor, &interrupted),
        "a non-empty queue before pushing `interrupted` guarantees a distinct successor"
    );

    unsafe { switch_in_signal_context(worker, interrupted_ctx, successor) }
}

/// Called from the resume handler. Preconditions (enforced by the caller):
/// the worker has a current sandbox, its state is `Preempted`, and its
/// `ArchContext` variant is `Slow`.
///
/// # Safety
/// Must be called from the resume signal handler, with `interrupted_ctx`
/// the OS-delivered context for that signal delivery.
pub unsafe fn preemptive_switch_to(
    worker: &'static WorkerState,
    interrupted_ctx: *mut libc::ucontext_t,
    sandbox: Arc<Sandbox>,
) {
    unsafe { switch_in_signal_context(worker, interrupted_ctx, sandbox) }
}

/// Resume `successor` while executing inside a signal handler frame:
/// either a direct fast restore (never returns) or an overwrite of the
/// OS-delivered `interrupted_ctx` so `sigreturn` does the resuming.
unsafe fn switch_in_signal_context(
    worker: &'static WorkerState,
    interrupted_ctx: *mut libc::ucontext_t,
    successor: Arc<Sandbox>,
) {
    worker.set_current_sandbox(Some(successor.clone()));
    successor.set_state(SandboxState::Running);

    match successor.arch_context().variant() {
        ContextVariant::Fast => unsafe { DefaultArch::restore_fast(successor.arch_context()) },
        ContextVariant::Slow => unsafe { successor.arch_context().overwrite_in_place(interrupted_ctx) },
        other => fatal_invariant(InvariantViolation::BadContextVariant {
            expected: "Fast or Slow",
            found: variant_name(other),
        }),
    }
}

/// The cooperative-path equivalent of [`preemptive_sched`]: called after a
/// sandbox has already saved itself as `Fast` (cooperative yield) and
/// pushed itself back onto the run queue. Picks a successor and resumes
/// it; never returns.
///
/// A `Fast` successor is resumed directly. A `Slow` successor (one
/// preempted earlier and now due for another turn) cannot be resumed
/// directly from cooperative code — only a signal handler can restore a
/// full machine context — so this jumps onto the worker's base context
/// and lets [`crate::worker::base_loop_resume`] raise the resume signal
/// from there, landing the handler's own interrupted-context on a stack
/// that is safe to discard.
pub fn schedule_next() -> ! {
    worker::with_worker(|worker| unsafe { schedule_next_on(worker) })
}

pub(crate) unsafe fn schedule_next_on(worker: &'static WorkerState) -> ! {
    loop {
        match worker.pop_runnable() {
            Some(successor) => unsafe { resume_cooperatively(worker, successor) },
            None => {
                // Nothing runnable. Hand the CPU back to the OS briefly
                // rather than spinning hot; a peer worker or the listener
                // may still be enqueueing work.
                std::thread::yield_now();
            }
        }
    }
}

unsafe fn resume_cooperatively(worker: &'static WorkerState, successor: Arc<Sandbox>) -> ! {
    match successor.arch_context().variant() {
        ContextVariant::Fast => {
            worker.set_current_sandbox(Some(successor.clone()));
            successor.set_state(SandboxState::Running);
            unsafe { DefaultArch::restore_fast(successor.arch_context()) }
        }
        ContextVariant::Slow => {
            // Park `successor` as current (without yet marking it Running
            // — `switch_in_signal_context` does that once the resume
            // signal actually lands) and jump onto the worker's base
            // stack, where `base_loop_resume` will raise the resume
            // signal against a stack nobody else depends on.
            worker.set_current_sandbox(Some(successor));
            unsafe { DefaultArch::restore_fast(&worker.base_context) }
        }
        other => fatal_invariant(InvariantViolation::BadContextVariant {
            expected: "Fast or Slow",
            found: variant_name(other),
        }),
    }
}

fn variant_name(variant: ContextVariant) -> &'static str {
    match variant {
        ContextVariant::Unused => "Unused",
        ContextVariant::Fast => "Fast",
        ContextVariant::Slow => "Slow",
        ContextVariant::Running => "Running",
    }
}
