//! Demonstrates timer-signal fan-out across a handful of worker threads.
//!
//! This deliberately does not load a real sandboxed WebAssembly-as-shared-
//! object module (none ships with this crate): every worker's "current
//! sandbox" slot stays empty, so each delivery of the timer signal takes
//! the early-return branch in `handle_timer` — there's nothing to
//! preempt — and the only visible effect is the fan-out itself. That's
//! enough to watch `PREEMPTIVE_SANDBOX_PROPAGATION=broadcast` notify every
//! peer worker on every kernel tick while
//! `PREEMPTIVE_SANDBOX_PROPAGATION=triaged` (with no runnable sandboxes
//! anywhere, so `would_preempt` is always false) notifies none.
//!
//! Run with, e.g.:
//!
//! ```text
//! PREEMPTIVE_SANDBOX_WORKERS=4 PREEMPTIVE_SANDBOX_PROPAGATION=broadcast \
//!     RUST_LOG=info cargo run --example broadcast_demo
//! ```
//!
//! `worker::initialize` never returns on the thread that calls it (its
//! worker threads multiplex sandboxes for the process's lifetime), so this
//! demo runs it on a background thread and polls the published per-worker
//! counters from `main` until a fixed observation window elapses.

use std::thread;
use std::time::Duration;

use preemptive_sandbox::config::ProcessConfig;
use preemptive_sandbox::worker;

const OBSERVATION_WINDOW: Duration = Duration::from_secs(3);
const STARTUP_GRACE: Duration = Duration::from_millis(200);

fn main() {
    env_logger::init();

    let config = ProcessConfig::from_env().expect("invalid PREEMPTIVE_SANDBOX_* configuration");
    let worker_count = config.worker_count();
    let propagation = config.propagation_mode();
    log::info!(
        "starting {worker_count} workers, quantum={}us, propagation={propagation:?}",
        config.quantum_micros()
    );

    thread::spawn(move || {
        worker::initialize(config, |index| {
            log::info!("worker {index} ready (no sandboxes loaded in this demo)");
        });
    });

    // Give initialize() time to publish the process singleton before we
    // start reading per-worker counters through it.
    thread::sleep(STARTUP_GRACE);

    thread::sleep(OBSERVATION_WINDOW);

    println!("--- fan-out counters after {OBSERVATION_WINDOW:?} ---");
    for index in 0..worker_count {
        let peer = worker::peer(index);
        println!(
            "worker {index}: kernel={} thread={} resume={} deferred={}",
            peer.kernel_delivered_count.load(std::sync::atomic::Ordering::Relaxed),
            peer.thread_delivered_count.load(std::sync::atomic::Ordering::Relaxed),
            peer.resume_count.load(std::sync::atomic::Ordering::Relaxed),
            peer.deferred_preemption_count.load(std::sync::atomic::Ordering::Relaxed),
        );
    }

    // Worker threads never exit on their own (see the module docs on
    // `worker::initialize`); exiting the process is how this demo stops
    // them rather than trying to join anything.
    std::process::exit(0);
}
