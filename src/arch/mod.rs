//! Architecture abstraction for the fast-path context switch.
//!
//! Only the *fast* path needs hand-written assembly: a cooperative yield
//! saves just the stack pointer and instruction pointer, because the
//! calling convention already obliges the caller to have preserved
//! everything else. The *slow* path never touches assembly directly — it
//! works by mutating the `ucontext_t` the kernel hands to a signal handler
//! and letting the OS's own `sigreturn` restore the full machine state (see
//! [`crate::signal_core`]).

use crate::context::ArchContext;

/// Called from the fast-path trampoline once the caller's resume point has
/// been captured, with the sandbox's [`ArchContext`], the captured stack
/// pointer, and the captured instruction pointer.
///
/// Implementations are expected to call [`ArchContext::save_fast`] and then
/// hand control to the scheduler; they must not return normally (the
/// trampoline jumps to this function via `call`, and the *logical* return
/// happens later, when some other fiber's `restore_fast` jumps back to the
/// captured instruction pointer).
pub type YieldCallback = unsafe extern "C" fn(ctx: *const ArchContext, sp: u64, ip: u64);

/// Architecture-specific fast-path primitives.
///
/// # Safety
/// Every method here manipulates the raw stack pointer and/or jumps to an
/// arbitrary instruction pointer. Callers must uphold the preconditions
/// documented on each method.
pub trait Arch {
    /// Capture the caller's current stack pointer and an instruction
    /// pointer that, when jumped back to, resumes the caller as if this
    /// function had returned normally. Invokes `callback(ctx, sp, ip)`.
    ///
    /// # Safety
    /// Must be called with the timer and resume signals masked (fast saves
    /// are not themselves async-signal-safe with respect to concurrent
    /// mutation of `ctx`).
    unsafe fn capture_and_yield(ctx: *const ArchContext, callback: YieldCallback);

    /// Resume a `Fast` context by switching to its saved stack pointer and
    /// jumping to its saved instruction pointer.
    ///
    /// # Safety
    /// `ctx.variant()` must be `Fast`. This is a direct switch performed
    /// outside signal context; it must not be called from within a signal
    /// handler frame.
    unsafe fn restore_fast(ctx: &ArchContext) -> !;
}

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::X86_64Arch as DefaultArch;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::Aarch64Arch as DefaultArch;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod unsupported;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub use unsupported::UnsupportedArch as DefaultArch;
