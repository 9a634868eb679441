//! x86-64 fast-path context switch (System V AMD64 calling convention).

use super::{Arch, YieldCallback};
use crate::context::ArchContext;

pub struct X86_64Arch;

impl Arch for X86_64Arch {
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

// `capture_and_yield_asm(ctx: rdi, callback: rsi)`:
//
// On entry, [rsp] holds the return address pushed by the `call` instruction
// that invoked this function — i.e. exactly the resume point we want a
// later `restore_fast` to land on. We capture that rsp and the address of
// the label immediately preceding `ret`, then tail into `callback(ctx, sp,
// ip)`. `callback` is expected never to return (it either restores a
// different context or blocks forever); the only way execution reaches
// label `1` again is via some other fiber's `restore_fast` setting rsp back
// to this exact value and jumping here, at which point `ret` pops the
// original return address and resumes the original caller transparently.
std::arch::global_asm!(
    ".global preemptive_sandbox_capture_and_yield",
    "preemptive_sandbox_capture_and_yield:",
    "    mov r8, rsi",
    "    mov rsi, rsp",
    "    lea rdx, [rip + 1f]",
    "    call r8",
    "1:",
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

/// Set `rsp` to `sp` and jump to `ip`. Never returns.
unsafe fn jump_to(sp: u64, ip: u64) -> ! {
    unsafe {
        std::arch::asm!(
            "mov rsp, {sp}",
            "jmp {ip}",
            sp = in(reg) sp,
            ip = in(reg) ip,
            options(noreturn),
        );
    }
}
