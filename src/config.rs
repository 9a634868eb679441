//! Process-wide configuration: quantum, worker count, and fan-out policy.
//!
//! Generalizes the teacher's compile-time `full-fpu`/`diagnostics`-style
//! Cargo features with the startup-time environment variables the original
//! reads as process globals (`runtime_quantum_us`, `runtime_worker_threads_count`,
//! `runtime_sigalrm_handler`, `runtime_preemption_enabled`). Built once at
//! [`crate::worker::initialize`] and treated as read-only thereafter, per
//! spec.md §9's "global mutable state" note.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{ConfigError, ConfigResult};

/// Default interval between timer signals, chosen to match the quanta
/// typical of short-lived request-handling sandboxes: small enough that a
/// misbehaving sandbox doesn't stall its peers for long, large enough that
/// signal overhead doesn't dominate.
pub const DEFAULT_QUANTUM_MICROS: u64 = 5_000;

/// How a worker that receives a kernel-originated timer signal propagates
/// it to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    /// Notify every other worker unconditionally.
    Broadcast,
    /// Notify a worker only if `would_preempt(worker_index)` returns true.
    Triaged,
}

impl PropagationMode {
    fn parse(value: &str) -> Option<PropagationMode> {
        match value.to_ascii_lowercase().as_str() {
            "broadcast" => Some(PropagationMode::Broadcast),
            "triaged" => Some(PropagationMode::Triaged),
            _ => None,
        }
    }
}

/// Process-wide, initialize-once configuration.
///
/// Every field but [`ProcessConfig::quantum_cycles`] is fixed at startup and
/// read-only thereafter (spec.md §9). The cycle-denominated quantum is the
/// one field `set-interval(cycles)` (spec.md §4.5) must still be able to
/// update once workers are already running and the config has been
/// published behind `worker::config()`'s `&'static` reference, so it lives
/// in an `AtomicU64` rather than a plain field.
#[derive(Debug)]
pub struct ProcessConfig {
    quantum_micros: u64,
    quantum_cycles: AtomicU64,
    worker_count: usize,
    propagation_mode: PropagationMode,
    preemption_enabled: bool,
}

impl Clone for ProcessConfig {
    fn clone(&self) -> ProcessConfig {
        ProcessConfig {
            quantum_micros: self.quantum_micros,
            quantum_cycles: AtomicU64::new(self.quantum_cycles.load(Ordering::Relaxed)),
            worker_count: self.worker_count,
            propagation_mode: self.propagation_mode,
            preemption_enabled: self.preemption_enabled,
        }
    }
}

impl ProcessConfig {
    /// Build a `ProcessConfig` from `PREEMPTIVE_SANDBOX_*` environment
    /// variables, falling back to sane defaults when unset.
    pub fn from_env() -> ConfigResult<ProcessConfig> {
        let quantum_micros = parse_env_or(
            "PREEMPTIVE_SANDBOX_QUANTUM_US",
            DEFAULT_QUANTUM_MICROS,
            |s| s.parse::<u64>().ok(),
        )?;
        if quantum_micros == 0 {
            return Err(ConfigError::InvalidQuantum(quantum_micros));
        }

        let worker_count = parse_env_or("PREEMPTIVE_SANDBOX_WORKERS", default_worker_count(), |s| {
            s.parse::<usize>().ok()
        })?;
        if worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount(worker_count));
        }

        let propagation_mode = parse_env_or(
            "PREEMPTIVE_SANDBOX_PROPAGATION",
            PropagationMode::Broadcast,
            PropagationMode::parse,
        )?;

        let preemption_enabled = parse_env_or(
            "PREEMPTIVE_SANDBOX_PREEMPTION_ENABLED",
            true,
            parse_bool,
        )?;

        Ok(ProcessConfig {
            quantum_micros,
            quantum_cycles: AtomicU64::new(0),
            worker_count,
            propagation_mode,
            preemption_enabled,
        })
    }

    pub fn quantum_micros(&self) -> u64 {
        self.quantum_micros
    }

    pub fn quantum_cycles(&self) -> u64 {
        self.quantum_cycles.load(Ordering::Relaxed)
    }

    /// Update the cycle-denominated quantum used by cycle-aware consumers.
    /// Independent of the wall-clock timer: this does not retune
    /// `setitimer`, and may be called at any time after the config has been
    /// published, not only before `worker::initialize`.
    pub fn set_quantum_cycles(&self, cycles: u64) {
        self.quantum_cycles.store(cycles, Ordering::Relaxed);
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn propagation_mode(&self) -> PropagationMode {
        self.propagation_mode
    }

    pub fn preemption_enabled(&self) -> bool {
        self.preemption_enabled
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env_or<T: Clone>(
    name: &'static str,
    default: T,
    parse: impl FnOnce(&str) -> Option<T>,
) -> ConfigResult<T> {
    match env::var(name) {
        Ok(value) => parse(&value).ok_or(ConfigError::InvalidEnvVar { name, value }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnvVar {
            name,
            value: "<non-unicode>".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagation_mode_parses_case_insensitively() {
        assert_eq!(
            PropagationMode::parse("Broadcast"),
            Some(PropagationMode::Broadcast)
        );
        assert_eq!(
            PropagationMode::parse("TRIAGED"),
            Some(PropagationMode::Triaged)
        );
        assert_eq!(PropagationMode::parse("nonsense"), None);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_env_or_falls_back_to_default_when_unset() {
        let result = parse_env_or("PREEMPTIVE_SANDBOX_TEST_UNSET_VAR", 42u64, |s| {
            s.parse().ok()
        })
        .unwrap();
        assert_eq!(result, 42);
    }
}
