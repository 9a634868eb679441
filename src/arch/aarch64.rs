//! AArch64 fast-path context switch (AAPCS64 calling convention).

use super::{Arch, YieldCallback};
use crate::context::ArchContext;

pub struct Aarch64Arch;

impl Arch for Aarch64Arch {
    unsafe fn capture_and_yield(ctx: *const ArchContext, callback: YieldCallback) {
        unsafe {
            capture_and_yield_asm(ctx, callback);
        }
    }

    unsafe fn restore_fast(ctx: &ArchContext) -> ! {
        debug_assert_eq!(
            ctx.variant(),
            crate::context::ContextVariant::Fast,
            "restore_fast requires a Fast context"
        );
        let (sp, ip) = ctx.fast_regs();
        unsafe { jump_to(sp, ip) }
    }
}

// `capture_and_yield_asm(ctx: x0, callback: x1)`:
//
// x30 (the link register) on entry holds the return address the `bl` that
// called us will resume at — the same resume point `restore_fast` on
// aarch64 must later land on. Unlike x86-64's stack-based `ret` (which
// reads its target from `[rsp]`, so restoring `rsp` alone is enough),
// aarch64's `ret` reads x30 *at the time it executes* — by then `blr` to
// `callback` has long since clobbered it. So x30 has to be captured here,
// before the call, and resumed later with a plain `br` rather than a
// `ret` of our own. We capture sp and this real return address, then tail
// into `callback(ctx, sp, ip)` with x0 still holding ctx. As on x86-64,
// `callback` is not expected to return normally.
std::arch::global_asm!(
    ".global preemptive_sandbox_capture_and_yield",
    "preemptive_sandbox_capture_and_yield:",
    "    mov x2, sp",
    "    mov x3, x30",
    "    mov x4, x1",
    "    mov x1, x2",
    "    mov x2, x3",
    "    blr x4",
    "    ret",
);

extern "C" {
    fn preemptive_sandbox_capture_and_yield(ctx: *const ArchContext, callback: YieldCallback);
}

unsafe fn capture_and_yield_asm(ctx: *const ArchContext, callback: YieldCallback) {
    unsafe {
        preemptive_sandbox_capture_and_yield(ctx, callback);
    }
}

/// Set `sp` to `sp` and jump to `ip`. Always a `br`, never a `ret` — `ip`
/// is a captured return address, not whatever x30 happens to hold here.
/// Never returns.
unsafe fn jump_to(sp: u64, ip: u64) -> ! {
    unsafe {
        std::arch::asm!(
            "mov sp, {sp}",
            "br {ip}",
            sp = in(reg) sp,
            ip = in(reg) ip,
            options(noreturn),
        );
    }
}
