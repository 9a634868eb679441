//! Installs handlers for the timer signal and the resume signal; enforces
//! nonreentrant signal semantics; propagates the timer signal to sibling
//! workers.
//!
//! Grounded directly on `software_interrupt_initialize` and
//! `software_interrupt_handle_signals` in the original runtime. The
//! signal numbers themselves (`SIGALRM`/`SIGUSR1`) are kept as named
//! constants rather than hardcoded, matching the original's use of the
//! symbolic macros throughout.

mod handler;

use std::mem::MaybeUninit;

use crate::errors::{fatal_config, ConfigError};

/// The timer signal: delivered by the interval timer, and fanned out to
/// peer workers on kernel-originated delivery.
pub const SIGNAL_TIMER: libc::c_int = libc::SIGALRM;

/// The resume signal: self-delivered by a worker to trampoline into a
/// `Slow`-saved successor via the kernel's own `sigreturn`.
pub const SIGNAL_RESUME: libc::c_int = libc::SIGUSR1;

/// Install the shared handler for both [`SIGNAL_TIMER`] and
/// [`SIGNAL_RESUME`] on the calling thread, masking each signal against
/// the other during handler execution.
///
/// # Aborts
/// A failing `sigaction` is a fatal configuration error (spec.md §7).
pub fn install() {
    let mut mask = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        libc::sigemptyset(mask.as_mut_ptr());
        libc::sigaddset(mask.as_mut_ptr(), SIGNAL_TIMER);
        libc::sigaddset(mask.as_mut_ptr(), SIGNAL_RESUME);
    }
    let mask = unsafe { mask.assume_init() };

    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler::dispatch as usize;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    action.sa_mask = mask;

    for signal in [SIGNAL_TIMER, SIGNAL_RESUME] {
        let rc = unsafe { libc::sigaction(signal, &action, std::ptr::null_mut()) };
        if rc != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            fatal_config(ConfigError::Syscall {
                call: "sigaction",
                errno,
            });
        }
    }
}

/// Block `signum` on the calling thread, returning the sigset_t to pass to
/// a later [`unmask_signal`] to undo exactly this change (spec.md §6's
/// `mask_signal(signum)`). Most callers want the scoped [`SignalMask`]
/// guard below instead of pairing these by hand.
pub fn mask_signal(signum: libc::c_int) -> libc::sigset_t {
    let mut to_block = MaybeUninit::<libc::sigset_t>::uninit();
    let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        libc::sigemptyset(to_block.as_mut_ptr());
        libc::sigaddset(to_block.as_mut_ptr(), signum);
        libc::pthread_sigmask(libc::SIG_BLOCK, to_block.as_ptr(), previous.as_mut_ptr());
        previous.assume_init()
    }
}

/// Restore the signal mask `mask_signal` reported as the thread's previous
/// mask (spec.md §6's `unmask_signal(signum)`).
pub fn unmask_signal(previous: &libc::sigset_t) {
    unsafe {
        libc::pthread_sigmask(libc::SIG_SETMASK, previous, std::ptr::null_mut());
    }
}

fn mask_both(signum_a: libc::c_int, signum_b: libc::c_int) -> libc::sigset_t {
    let mut to_block = MaybeUninit::<libc::sigset_t>::uninit();
    let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        libc::sigemptyset(to_block.as_mut_ptr());
        libc::sigaddset(to_block.as_mut_ptr(), signum_a);
        libc::sigaddset(to_block.as_mut_ptr(), signum_b);
        libc::pthread_sigmask(libc::SIG_BLOCK, to_block.as_ptr(), previous.as_mut_ptr());
        previous.assume_init()
    }
}

/// RAII guard masking [`SIGNAL_TIMER`] and [`SIGNAL_RESUME`] on the
/// calling thread for the duration of the scope, for critical sections
/// outside the handler that mutate scheduler structures (spec.md §4.3's
/// "mask discipline"). A thin wrapper around [`mask_signal`]/
/// [`unmask_signal`] that masks both signals at once and can't forget to
/// restore the previous mask.
pub struct SignalMask {
    previous: libc::sigset_t,
}

impl SignalMask {
    /// Mask both signals on the calling thread, returning a guard that
    /// restores the previous mask on drop.
    pub fn acquire() -> SignalMask {
        SignalMask {
            previous: mask_both(SIGNAL_TIMER, SIGNAL_RESUME),
        }
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        unmask_signal(&self.previous);
    }
}
