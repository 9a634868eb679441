//! Shared fixtures for the rest of `src/tests/`: a hand-rolled PRNG (the
//! crate pulls in no `rand`/`proptest` dependency, matching the teacher's
//! house style) and sandbox/run-queue builders.

use std::sync::{Arc, Mutex, OnceLock};

use crate::module_abi::Module;
use crate::sandbox::{Priority, Sandbox};

/// Linear-congruential generator used by the property tests. Deterministic
/// given a seed, so a failing property test prints a reproducible seed
/// rather than a one-off flake.
pub struct SimpleRng(u64);

impl SimpleRng {
    pub fn new(seed: u64) -> SimpleRng {
        // Force the state odd; an LCG with an even seed and this multiplier
        // still has full period, but odd avoids ever parking on zero.
        SimpleRng(seed | 1)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0
    }

    pub fn next_range(&mut self, low: u64, high: u64) -> u64 {
        debug_assert!(low < high);
        low + (self.next_u64() % (high - low))
    }

    pub fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 0
    }
}

/// A sandbox wrapping a harmless test module, for tests that only care
/// about scheduling bookkeeping.
pub fn test_sandbox(id: u64) -> Arc<Sandbox> {
    Arc::new(Sandbox::new(id, Module::new_for_test()))
}

pub fn test_sandbox_with_priority(id: u64, priority: Priority) -> Arc<Sandbox> {
    Arc::new(Sandbox::new(id, Module::new_for_test()).with_priority(priority))
}

/// Guards tests that mutate `PREEMPTIVE_SANDBOX_*` environment variables.
/// `std::env` is process-global and the default test harness runs tests in
/// parallel threads, so anything calling `ProcessConfig::from_env` after
/// setting one of these must hold this lock for the duration of the
/// set-read-unset sequence.
pub fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}
