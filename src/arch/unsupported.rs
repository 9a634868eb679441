//! Fallback for architectures without a hand-written fast-path switch.
//!
//! Keeps the crate compiling on any `target_arch` rather than failing the
//! build outright; any attempt to actually use the fast path panics at
//! runtime instead.

use super::{Arch, YieldCallback};
use crate::context::ArchContext;

pub struct UnsupportedArch;

impl Arch for UnsupportedArch {
    unsafe fn capture_and_yield(_ctx: *const ArchContext, _callback: YieldCallback) {
        panic!("preemptive-sandbox: no fast-path context switch on this architecture");
    }

    unsafe fn restore_fast(_ctx: &ArchContext) -> ! {
        panic!("preemptive-sandbox: no fast-path context switch on this architecture");
    }
}
