//! The shared signal-handler entry point for [`super::SIGNAL_TIMER`] and
//! [`super::SIGNAL_RESUME`].
//!
//! A direct port of `software_interrupt_handle_signals`'s invariant
//! checks and dispatch, plus `sigalrm_propagate_workers`'s fan-out logic.
//! Everything here runs inside a signal handler frame: no allocation, no
//! locks, no reentrant I/O (spec.md §9).

use std::sync::atomic::Ordering;

use crate::config::PropagationMode;
use crate::errors::{fatal_invariant, InvariantViolation};
use crate::worker::{self, WorkerState};

use super::{SIGNAL_RESUME, SIGNAL_TIMER};

/// Installed as `sa_sigaction` for both signals.
pub(super) extern "C" fn dispatch(
    signal: libc::c_int,
    info: *mut libc::siginfo_t,
    interrupted_ctx_raw: *mut libc::c_void,
) {
    // Invariant 1: only a worker thread ever receives these signals.
    if worker::listener_thread_is_running() {
        fatal_invariant(InvariantViolation::ListenerThreadReceivedSignal);
    }

    // Invariant 2: preemption must be globally enabled for a signal to be
    // legitimately in flight at all.
    if !worker::config().preemption_enabled() {
        fatal_invariant(InvariantViolation::PreemptionGloballyDisabled);
    }

    let worker = worker::with_worker(|w| w);

    // Invariant 3: signals do not nest.
    let depth = worker.signal_depth.fetch_add(1, Ordering::AcqRel) + 1;
    if depth != 1 {
        fatal_invariant(InvariantViolation::NestedSignalDelivery { depth });
    }

    let interrupted_ctx = interrupted_ctx_raw as *mut libc::ucontext_t;
    let si_code = unsafe { (*info).si_code };

    match signal {
        _ if signal == SIGNAL_TIMER => handle_timer(worker, si_code, interrupted_ctx),
        _ if signal == SIGNAL_RESUME => handle_resume(worker, interrupted_ctx),
        _ => fatal_invariant(InvariantViolation::UnexpectedSignalOrigin { signal, si_code }),
    }

    worker.signal_depth.fetch_sub(1, Ordering::AcqRel);
}

fn handle_timer(worker: &'static WorkerState, si_code: libc::c_int, interrupted_ctx: *mut libc::ucontext_t) {
    propagate_to_peers(worker, si_code);

    let Some(current) = worker.current_sandbox() else {
        // No sandbox running yet (e.g. the base scheduler loop itself was
        // interrupted) — nothing to preempt.
        return;
    };

    if !current.is_preemptable() {
        worker
            .deferred_preemption_count
            .fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "diagnostics")]
        crate::diagnostics::record_deferred(
            worker.index,
            worker.deferred_preemption_count.load(Ordering::Relaxed),
        );
        return;
    }

    unsafe {
        crate::scheduler_glue::preemptive_sched(worker, interrupted_ctx);
    }
}

fn handle_resume(worker: &'static WorkerState, interrupted_ctx: *mut libc::ucontext_t) {
    worker.resume_count.fetch_add(1, Ordering::Relaxed);

    let current = worker
        .current_sandbox()
        .expect("resume signal delivered with no current sandbox");

    if current.state() != crate::sandbox::SandboxState::Preempted {
        fatal_invariant(InvariantViolation::BadContextVariant {
            expected: "sandbox state Preempted",
            found: "other",
        });
    }
    if current.arch_context().variant() != crate::context::ContextVariant::Slow {
        fatal_invariant(InvariantViolation::BadContextVariant {
            expected: "Slow",
            found: "other",
        });
    }

    unsafe {
        crate::scheduler_glue::preemptive_switch_to(worker, interrupted_ctx, current);
    }
}

/// Fan the timer signal out to sibling workers, discriminating
/// kernel-originated delivery (`SI_KERNEL`) from a sibling's forwarded
/// copy (`SI_TKILL`) exactly as `sigalrm_propagate_workers` does.
fn propagate_to_peers(worker: &'static WorkerState, si_code: libc::c_int) {
    if si_code == libc::SI_KERNEL {
        worker
            .kernel_delivered_count
            .fetch_add(1, Ordering::Relaxed);

        let table = worker::worker_table();
        let self_thread = unsafe { libc::pthread_self() };

        for index in 0..table.len() {
            let Some(peer_thread) = table.get(index) else {
                continue;
            };
            if unsafe { libc::pthread_equal(peer_thread, self_thread) != 0 } {
                continue;
            }

            let should_notify = match worker::config().propagation_mode() {
                PropagationMode::Broadcast => true,
                PropagationMode::Triaged => crate::scheduler_glue::would_preempt(index),
            };
            if should_notify {
                unsafe {
                    libc::pthread_kill(peer_thread, SIGNAL_TIMER);
                }
            }
        }
    } else {
        worker
            .thread_delivered_count
            .fetch_add(1, Ordering::Relaxed);
        debug_assert_eq!(
            si_code,
            libc::SI_TKILL,
            "timer signal delivered from neither the kernel nor a forwarding thread"
        );
    }
}
