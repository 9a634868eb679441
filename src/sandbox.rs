//! The sandbox: the unit of scheduling.
//!
//! The spec treats `Sandbox` as an external collaborator, referenced only
//! through `current-sandbox-of-worker()`, `is-preemptable()`, `.state`, and
//! `.arch_context`. This module gives that collaborator the minimum
//! concrete shape the scheduler glue needs to hold and switch between —
//! the real module instantiation and entry-point invocation is
//! [`crate::module_abi::Module`]'s job, not this type's.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::context::ArchContext;
use crate::module_abi::Module;

/// A sandbox's position in its own lifecycle, independent of which of its
/// `ArchContext`'s four variants currently holds its saved registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Currently executing on some worker.
    Running,
    /// On a run queue, waiting for a worker to pick it up.
    Runnable,
    /// Suspended by a timer signal; its `ArchContext` variant is `Slow`.
    Preempted,
    /// Ran to completion; its module has been or will be unloaded.
    Finished,
}

/// A scheduling priority. Lower numeric value is higher priority, matching
/// the teacher's `sched::priority` convention.
pub type Priority = u8;

pub const DEFAULT_PRIORITY: Priority = 128;

/// An isolated execution unit: a loaded module, its suspended execution
/// state, and the bookkeeping the scheduler needs to hold it on a run
/// queue.
///
/// The `arch_context` field is conceptually part of this struct, not a
/// separately owned object linked by pointer (spec.md §9's "cyclic
/// reference" note) — a `Sandbox` owns its `ArchContext` outright.
pub struct Sandbox {
    id: u64,
    module: Module,
    arch_context: ArchContext,
    state: Mutex<SandboxState>,
    priority: Priority,
    preemptable: AtomicBool,
}

impl Sandbox {
    pub fn new(id: u64, module: Module) -> Sandbox {
        Sandbox {
            id,
            module,
            arch_context: ArchContext::new(),
            state: Mutex::new(SandboxState::Runnable),
            priority: DEFAULT_PRIORITY,
            preemptable: AtomicBool::new(true),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Sandbox {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn arch_context(&self) -> &ArchContext {
        &self.arch_context
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> SandboxState {
        *self.state.lock().expect("sandbox state mutex poisoned")
    }

    pub fn set_state(&self, state: SandboxState) {
        *self.state.lock().expect("sandbox state mutex poisoned") = state;
    }

    /// Whether a timer signal arriving right now may immediately suspend
    /// this sandbox. Toggled by the sandbox itself around regions it
    /// cannot safely be interrupted in (e.g. a syscall shim).
    pub fn is_preemptable(&self) -> bool {
        self.preemptable.load(Ordering::Acquire)
    }

    pub fn set_preemptable(&self, preemptable: bool) {
        self.preemptable.store(preemptable, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sandbox(id: u64) -> Sandbox {
        Sandbox::new(id, Module::new_for_test())
    }

    #[test]
    fn state_defaults_to_runnable_and_is_settable() {
        let sandbox = test_sandbox(1);
        assert_eq!(sandbox.state(), SandboxState::Runnable);
        sandbox.set_state(SandboxState::Running);
        assert_eq!(sandbox.state(), SandboxState::Running);
    }

    #[test]
    fn defaults_to_preemptable() {
        let sandbox = test_sandbox(2);
        assert!(sandbox.is_preemptable());
        sandbox.set_preemptable(false);
        assert!(!sandbox.is_preemptable());
    }

    #[test]
    fn priority_defaults_and_overrides() {
        let sandbox = test_sandbox(3);
        assert_eq!(sandbox.priority(), DEFAULT_PRIORITY);
        let prioritized = Sandbox::new(4, Module::new_for_test()).with_priority(10);
        assert_eq!(prioritized.priority(), 10);
    }

    #[test]
    fn fresh_arch_context_is_unused() {
        let sandbox = test_sandbox(5);
        assert_eq!(
            sandbox.arch_context().variant(),
            crate::context::ContextVariant::Unused
        );
    }
}
