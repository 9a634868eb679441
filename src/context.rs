//! The Arch Context: the saved execution state of a suspended sandbox.
//!
//! A context is always in exactly one of four variants, and the variant tag
//! is compared by integer value from the hand-written fast-path assembly, so
//! the numeric assignments below are part of the contract:
//!
//! ```text
//! Unused  = 0
//! Fast    = 1
//! Slow    = 2
//! Running = 3
//! ```
//!
//! Transitions respect the lattice `Unused -> Fast|Slow -> Running -> Fast|Slow -> ...`.
//! A `Running` context is never the target of a save; a non-`Running` context
//! is never the target of a direct restore into the CPU.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI32, Ordering};

/// Index into [`ArchContext::regs`] for the saved stack pointer.
pub const UREG_SP: usize = 0;
/// Index into [`ArchContext::regs`] for the saved instruction pointer.
pub const UREG_IP: usize = 1;
/// Number of registers the fast path saves.
pub const UREG_COUNT: usize = 2;

/// The state a sandbox's [`ArchContext`] can be in.
///
/// The enum is compared directly from assembly, so the discriminants must
/// never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ContextVariant {
    Unused = 0,
    Fast = 1,
    Slow = 2,
    Running = 3,
}

impl ContextVariant {
    fn from_i32(v: i32) -> Self {
        match v {
            0 => ContextVariant::Unused,
            1 => ContextVariant::Fast,
            2 => ContextVariant::Slow,
            3 => ContextVariant::Running,
            other => panic!("invalid arch context variant: {other}"),
        }
    }
}

/// The saved execution state of one sandbox.
///
/// Mirrors `struct arch_context` from the original C runtime: a variant tag,
/// a two-register fast path (stack pointer / instruction pointer), and an
/// opaque machine-context blob for the slow path. The machine-context blob
/// is a real `ucontext_t` (not a placeholder) because the slow restore path
/// works by mutating the exact structure the kernel's `sigreturn` consumes.
///
/// `#[repr(C)]` and the field order are load-bearing: the hand-written
/// assembly in `arch::x86_64`/`arch::aarch64` indexes `regs` directly and the
/// offsets are asserted at compile time below.
#[repr(C)]
pub struct ArchContext {
    variant: AtomicI32,
    regs: [u64; UREG_COUNT],
    machine_context: MaybeUninit<libc::ucontext_t>,
    /// Explicit floating-point environment capture, on top of whatever the
    /// embedded `ucontext_t` already carries. Gated behind `full-fpu`: on
    /// every target this crate ships assembly for, `mcontext_t` already
    /// links its FPU state and `sigreturn` restores it along with the
    /// general registers, making this field redundant there. On hosts
    /// where `sigreturn` does not restore extended state, `save_slow` and
    /// `overwrite_in_place` additionally capture/restore it explicitly via
    /// `fegetenv`/`fesetenv`. Appended after `regs` so it never perturbs
    /// the assembly-visible offsets asserted below.
    #[cfg(feature = "full-fpu")]
    fpu_env: std::cell::UnsafeCell<MaybeUninit<libc::fenv_t>>,
}

// Compile-time assertions publishing the assembly-visible layout. Any
// implementer of the hand-written switch routines must use these offsets
// rather than recomputing them.
pub const OFFSET_VARIANT: usize = std::mem::offset_of!(ArchContext, variant);
pub const OFFSET_REGS: usize = std::mem::offset_of!(ArchContext, regs);
const _: () = assert!(OFFSET_VARIANT == 0, "variant must be the first field");
const _: () = assert!(
    OFFSET_REGS == std::mem::size_of::<AtomicI32>().next_multiple_of(8),
    "regs must immediately follow variant, naturally aligned"
);

impl Default for ArchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchContext {
    /// A fresh, never-started context.
    pub const fn new() -> Self {
        Self {
            variant: AtomicI32::new(ContextVariant::Unused as i32),
            regs: [0; UREG_COUNT],
            machine_context: MaybeUninit::uninit(),
            #[cfg(feature = "full-fpu")]
            fpu_env: std::cell::UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    pub fn variant(&self) -> ContextVariant {
        ContextVariant::from_i32(self.variant.load(Ordering::Acquire))
    }

    fn set_variant(&self, variant: ContextVariant) {
        self.variant.store(variant as i32, Ordering::Release);
    }

    /// Record a cooperative suspension.
    ///
    /// # Preconditions
    /// `self.variant()` is `Unused` or `Running`.
    ///
    /// # Postconditions
    /// `self.variant() == Fast` and `(sp, ip)` are recorded verbatim.
    pub fn save_fast(&self, sp: u64, ip: u64) {
        let variant = self.variant();
        assert!(
            matches!(variant, ContextVariant::Unused | ContextVariant::Running),
            "save_fast on a context in variant {variant:?}"
        );
        // SAFETY: regs is only mutated by the owning worker, never from a
        // signal handler concurrently with this call (fast saves happen at
        // cooperative yield points, outside signal context).
        let regs = &self.regs as *const _ as *mut [u64; UREG_COUNT];
        unsafe {
            (*regs)[UREG_SP] = sp;
            (*regs)[UREG_IP] = ip;
        }
        self.set_variant(ContextVariant::Fast);
    }

    /// Record a signal-time suspension, copying the machine context verbatim.
    ///
    /// # Preconditions
    /// `self.variant()` is `Unused` or `Running`.
    ///
    /// # Postconditions
    /// `self.variant() == Slow` and the machine context is a byte-for-byte
    /// copy of `*mctx`.
    ///
    /// # Safety
    /// `mctx` must point to a valid `ucontext_t` as delivered by the OS to a
    /// signal handler (i.e. the third argument of a `SA_SIGINFO` handler,
    /// cast from `*mut c_void`).
    pub unsafe fn save_slow(&self, mctx: *const libc::ucontext_t) {
        let variant = self.variant();
        assert!(
            matches!(variant, ContextVariant::Unused | ContextVariant::Running),
            "save_slow on a context in variant {variant:?}"
        );
        let dst = &self.machine_context as *const _ as *mut libc::ucontext_t;
        unsafe {
            std::ptr::copy_nonoverlapping(mctx, dst, 1);
        }
        #[cfg(feature = "full-fpu")]
        unsafe {
            libc::fegetenv(self.fpu_env.get() as *mut libc::fenv_t);
        }
        self.set_variant(ContextVariant::Slow);
    }

    /// Overwrite a live, OS-delivered machine context in place with this
    /// context's saved machine context, so that returning from the signal
    /// handler that owns `dst` resumes this context instead of whatever was
    /// interrupted.
    ///
    /// # Preconditions
    /// `self.variant() == Slow`.
    ///
    /// # Postconditions
    /// `self.variant() == Running`; `*dst` is overwritten.
    ///
    /// # Safety
    /// `dst` must point to the `ucontext_t` of the signal frame currently
    /// executing on this thread.
    pub unsafe fn overwrite_in_place(&self, dst: *mut libc::ucontext_t) {
        assert_eq!(
            self.variant(),
            ContextVariant::Slow,
            "overwrite_in_place requires a Slow context"
        );
        let src = &self.machine_context as *const _ as *const libc::ucontext_t;
        unsafe {
            std::ptr::copy_nonoverlapping(src, dst, 1);
        }
        #[cfg(feature = "full-fpu")]
        unsafe {
            libc::fesetenv(self.fpu_env.get() as *const libc::fenv_t);
        }
        self.set_variant(ContextVariant::Running);
    }

    /// Saved `(sp, ip)` pair for a `Fast` context.
    pub fn fast_regs(&self) -> (u64, u64) {
        (self.regs[UREG_SP], self.regs[UREG_IP])
    }

    /// Mark a context `Running` directly (used when a sandbox is first
    /// entered from `Unused`, with no prior save to restore from).
    pub fn mark_running(&self) {
        self.set_variant(ContextVariant::Running);
    }

    /// Reset to `Unused`, e.g. when a sandbox is destroyed.
    pub fn reset(&self) {
        self.set_variant(ContextVariant::Unused);
    }

    /// Raw pointer to the embedded machine context, for the restore-slow
    /// trampoline and tests.
    pub(crate) fn machine_context_ptr(&self) -> *const libc::ucontext_t {
        &self.machine_context as *const _ as *const libc::ucontext_t
    }
}

// An ArchContext is exclusively owned by its sandbox, but the scheduler and
// signal handlers on the owning worker thread need to reach it through
// shared references (`&ArchContext`) while it is conceptually "borrowed" by
// the running sandbox; the unsafe interior mutation above is always
// single-threaded with respect to a given context (see module docs).
unsafe impl Send for ArchContext {}
unsafe impl Sync for ArchContext {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_unused() {
        let ctx = ArchContext::new();
        assert_eq!(ctx.variant(), ContextVariant::Unused);
    }

    #[test]
    fn save_fast_round_trips_registers() {
        let ctx = ArchContext::new();
        ctx.save_fast(0x7fff_0000, 0x4000_1234);
        assert_eq!(ctx.variant(), ContextVariant::Fast);
        assert_eq!(ctx.fast_regs(), (0x7fff_0000, 0x4000_1234));
    }

    #[test]
    #[should_panic(expected = "save_fast")]
    fn save_fast_rejects_running_target_twice_without_transition() {
        let ctx = ArchContext::new();
        ctx.mark_running();
        ctx.save_fast(1, 2);
        // A second save without an intervening transition back through
        // Unused/Running must panic: variant is now Fast.
        ctx.save_fast(3, 4);
    }

    #[test]
    fn mark_running_then_reset_cycles_the_lattice() {
        let ctx = ArchContext::new();
        ctx.mark_running();
        assert_eq!(ctx.variant(), ContextVariant::Running);
        ctx.save_fast(1, 2);
        assert_eq!(ctx.variant(), ContextVariant::Fast);
        ctx.reset();
        assert_eq!(ctx.variant(), ContextVariant::Unused);
    }
}
