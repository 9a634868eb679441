//! Cross-module test suite, split the way the teacher splits its own
//! `src/tests/` directory: fixtures in `helpers`, single-component checks in
//! `unit`, randomized invariant checks in `property`, multi-component
//! scenarios grounded in the spec's end-to-end walkthroughs in
//! `integration`, load/concurrency checks in `stress`, and timing
//! regressions in `performance`.
//!
//! What these modules deliberately do *not* cover: anything that requires a
//! live worker thread (`crate::worker::initialize` never returns — it hands
//! its calling thread to `run_base_loop` for the process's lifetime — and
//! its signal handlers assume real preemption is actually armed against
//! real sandboxes). That end of the system is exercised by
//! `demos/broadcast_demo.rs` instead, run by hand rather than under `cargo
//! test`. What's covered here is everything reachable through the crate's
//! public surface without spinning up that runtime: `ArchContext`'s
//! lattice, `Sandbox`/`RunQueue` bookkeeping, module loading, configuration
//! parsing, and the signal-masking and timer primitives.

mod helpers;
mod performance;
mod property;
mod stress;
