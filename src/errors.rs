//! Error taxonomy for the scheduler (spec-mandated, see module docs below).
//!
//! Per the design, most failure kinds here are *fatal*: a config error or an
//! invariant violation means the scheduler's own correctness can no longer
//! be trusted, and every sandbox on the process depends on that
//! correctness as a liveness precondition. Those paths log at `error!` and
//! call [`fatal_invariant`]/[`fatal_config`], which abort the process. Only
//! module-load failures are recoverable — they are returned to the caller
//! and reject one sandbox without affecting any other.

use std::fmt;

/// Result type for module-loading operations, the only non-fatal failure
/// path in this crate.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Result type for configuration parsing at startup.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors resolving or opening a sandbox's native shared object.
///
/// Returned to the caller; the sandbox is rejected and no other sandbox is
/// affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// `dlopen` failed to open the shared object. Carries the `dlerror()`
    /// string.
    Load { path: String, reason: String },
    /// A required entry-point symbol was not present.
    Resolve { path: String, symbol: &'static str },
    /// `dlclose` returned non-zero.
    Close { reason: String },
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleError::Load { path, reason } => {
                write!(f, "failed to open {path} with error: {reason}")
            }
            ModuleError::Resolve { path, symbol } => {
                write!(f, "failed to resolve symbol {symbol} in {path}")
            }
            ModuleError::Close { reason } => write!(f, "failed to close module: {reason}"),
        }
    }
}

impl std::error::Error for ModuleError {}

/// Errors constructing a [`crate::config::ProcessConfig`] at startup.
///
/// Fatal: the process aborts rather than running with a malformed
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    InvalidEnvVar { name: &'static str, value: String },
    /// The interval timer quantum was zero or otherwise unusable.
    InvalidQuantum(u64),
    /// The worker count was zero.
    InvalidWorkerCount(usize),
    /// `setitimer` or `sigaction` failed.
    Syscall { call: &'static str, errno: i32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidEnvVar { name, value } => {
                write!(f, "invalid value {value:?} for environment variable {name}")
            }
            ConfigError::InvalidQuantum(us) => write!(f, "invalid quantum: {us} microseconds"),
            ConfigError::InvalidWorkerCount(n) => write!(f, "invalid worker count: {n}"),
            ConfigError::Syscall { call, errno } => {
                write!(f, "{call} failed with errno {errno}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// A violated scheduler invariant: a signal delivered to the listener
/// thread, nested signal delivery, an unexpected signal origin, or a
/// context in the wrong variant at save/restore time.
///
/// These always indicate a scheduler bug, never a sandbox bug, and are
/// never recovered — see [`fatal_invariant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    ListenerThreadReceivedSignal,
    PreemptionGloballyDisabled,
    NestedSignalDelivery { depth: i32 },
    UnexpectedSignalOrigin { signal: i32, si_code: i32 },
    BadContextVariant { expected: &'static str, found: &'static str },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::ListenerThreadReceivedSignal => {
                write!(f, "the listener thread unexpectedly received a signal")
            }
            InvariantViolation::PreemptionGloballyDisabled => {
                write!(f, "signal delivered while preemption is globally disabled")
            }
            InvariantViolation::NestedSignalDelivery { depth } => {
                write!(f, "signal handler re-entered at depth {depth}")
            }
            InvariantViolation::UnexpectedSignalOrigin { signal, si_code } => {
                write!(f, "signal {signal} delivered with unexpected si_code {si_code}")
            }
            InvariantViolation::BadContextVariant { expected, found } => {
                write!(f, "expected context variant {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Log `violation` at `error!` and abort the process.
///
/// Scheduler-internal errors are never recovered: the scheduler's
/// correctness is a liveness precondition for every sandbox on the worker.
#[cold]
pub fn fatal_invariant(violation: InvariantViolation) -> ! {
    log::error!("fatal scheduler invariant violation: {violation}");
    std::process::abort();
}

/// Log a fatal configuration error and abort the process.
#[cold]
pub fn fatal_config(err: ConfigError) -> ! {
    log::error!("fatal configuration error: {err}");
    std::process::abort();
}
