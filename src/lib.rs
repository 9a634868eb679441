#![deny(unsafe_op_in_unsafe_fn)]

//! A worker-local, user-mode scheduler for short-lived sandboxed compute
//! tasks that execute precompiled WebAssembly modules loaded as native
//! shared objects.
//!
//! Each worker thread multiplexes many sandboxes onto a single OS thread
//! via cooperative yield points ([`yield_now`]) and periodic preemption
//! driven by a timer signal. The hard part — and the part this crate
//! spends most of its code on — is the preemption and context-switching
//! subsystem: arming a periodic timer, propagating its signal to sibling
//! workers, saving an interrupted sandbox's execution context, and
//! resuming a successor via one of two switch paths depending on whether
//! the switch originates from a cooperative yield or from inside a signal
//! handler.
//!
//! # Feature flags
//!
//! - `diagnostics` — track per-worker deferred-preemption high-water
//!   marks ([`diagnostics`]).
//! - `full-fpu` — preserve the full floating-point register file across a
//!   slow-path context switch. Off by default, since a signal handler's
//!   `ucontext_t` already links the FPU state implicitly on the
//!   architectures this crate targets; enabling it additionally dumps and
//!   restores the extended register state explicitly for host platforms
//!   where `sigreturn` does not cover it.
//!
//! # Example
//!
//! ```no_run
//! use preemptive_sandbox::config::ProcessConfig;
//!
//! let config = ProcessConfig::from_env().expect("invalid configuration");
//! preemptive_sandbox::worker::initialize(config, |worker_index| {
//!     log::info!("worker {worker_index} ready for sandboxes");
//! });
//! ```

pub mod arch;
pub mod config;
pub mod context;
pub mod errors;
pub mod module_abi;
pub mod run_queue;
pub mod sandbox;
pub mod scheduler_glue;
pub mod signal_core;
pub mod timer;
pub mod worker;

#[cfg(feature = "diagnostics")]
pub mod diagnostics;

#[cfg(test)]
mod tests;

pub use context::{ArchContext, ContextVariant};
pub use errors::{ConfigError, InvariantViolation, ModuleError};
pub use sandbox::{Sandbox, SandboxState};
pub use signal_core::{mask_signal, unmask_signal, SignalMask};
pub use worker::{arm_timer, disarm_timer, preemption_checkpoint, set_interval_duration};

/// Cooperatively yield the current sandbox's turn, saving its resume
/// point as a `Fast` context and handing control back to the worker's
/// scheduler loop.
///
/// # Panics
/// Panics if called from a thread that is not a worker thread, or from a
/// worker thread with no current sandbox.
#[inline]
pub fn yield_now() {
    worker::yield_now();
}
