//! Per-worker thread-local state and process-wide worker bookkeeping.
//!
//! Generalizes the teacher's `Kernel<A, S>` (a single global, lazily
//! initialized scheduler object reached through a static) to a
//! one-thread-per-worker model: each worker OS thread owns a
//! [`WorkerState`] reachable only from that thread (plus its own signal
//! handler, which always runs on the same thread), and the process as a
//! whole owns one [`ProcessState`] singleton, mirroring spec.md §9's
//! "treat them as initialize-once at startup, read-only thereafter" note
//! for the worker-thread table, quantum, and propagation mode.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::ProcessConfig;
use crate::context::ArchContext;
use crate::run_queue::{LocalRunQueue, RunQueue};
use crate::sandbox::{Priority, Sandbox};

/// Sentinel meaning "no sandbox queued/running": lower than any real
/// priority comparison should ever need to fire on.
const NO_PRIORITY: Priority = Priority::MAX;

/// Process-wide table of worker thread identifiers, written once at
/// startup and read-only thereafter.
pub struct WorkerTable {
    threads: Vec<libc::pthread_t>,
}

impl WorkerTable {
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<libc::pthread_t> {
        self.threads.get(index).copied()
    }

    pub fn index_of(&self, thread: libc::pthread_t) -> Option<usize> {
        self.threads
            .iter()
            .position(|&candidate| unsafe { libc::pthread_equal(candidate, thread) != 0 })
    }
}

struct ProcessState {
    config: ProcessConfig,
    workers: WorkerTable,
    listener_is_running: AtomicBool,
    /// One entry per worker, in worker-index order, published once at
    /// startup. Lets `would_preempt` inspect a *peer* worker's priority
    /// snapshot from a signal handler without touching that worker's
    /// thread-local storage or any lock.
    worker_states: Vec<&'static WorkerState>,
}

static PROCESS: OnceLock<ProcessState> = OnceLock::new();

fn process() -> &'static ProcessState {
    PROCESS
        .get()
        .expect("preemptive-sandbox: worker::initialize was never called")
}

pub fn config() -> &'static ProcessConfig {
    &process().config
}

pub fn worker_table() -> &'static WorkerTable {
    &process().workers
}

/// Look up a peer worker's published state by worker index. Every field
/// read cross-thread through this reference must be an atomic; the
/// `RefCell`-guarded fields (`run_queue`, `current_sandbox`) are only
/// ever touched by the owning worker thread itself.
pub fn peer(worker_index: usize) -> &'static WorkerState {
    process().worker_states[worker_index]
}

/// The "out of scope" HTTP listener thread's liveness flag (spec.md §6's
/// `listener-thread-is-running()`). The listener itself is an external
/// collaborator; this crate only needs somewhere for it to report in.
pub fn listener_thread_is_running() -> bool {
    process().listener_is_running.load(Ordering::Acquire)
}

pub fn set_listener_thread_running(running: bool) {
    process()
        .listener_is_running
        .store(running, Ordering::Release);
}

/// Per-worker state, reachable only from the worker's own OS thread (and
/// its signal handler, which runs on that same thread).
pub struct WorkerState {
    pub index: usize,
    /// The worker's own scheduler-loop context. `restore_slow` trampolines
    /// into this before self-signaling, per spec.md §4.1.
    pub base_context: ArchContext,
    pub run_queue: RefCell<Box<dyn RunQueue>>,
    pub current_sandbox: RefCell<Option<Arc<Sandbox>>>,
    pub kernel_delivered_count: AtomicU64,
    pub thread_delivered_count: AtomicU64,
    pub resume_count: AtomicU64,
    pub deferred_preemption_count: AtomicU64,
    pub signal_depth: AtomicI32,
    pub switching_context: Cell<bool>,
    /// Priority of the sandbox currently running on this worker, or
    /// [`NO_PRIORITY`]. Cross-thread readable; written only by the owning
    /// worker.
    current_priority: AtomicU8,
    /// Best (numerically lowest) priority among this worker's runnable
    /// sandboxes, or [`NO_PRIORITY`] if none are queued. Maintained
    /// incrementally by [`WorkerState::push_runnable`]/`pop_runnable` so
    /// `would_preempt` never needs to touch the `run_queue` `RefCell`.
    best_runnable_priority: AtomicU8,
}

impl WorkerState {
    fn new(index: usize) -> WorkerState {
        WorkerState {
            index,
            base_context: ArchContext::new(),
            run_queue: RefCell::new(Box::new(LocalRunQueue::new())),
            current_sandbox: RefCell::new(None),
            kernel_delivered_count: AtomicU64::new(0),
            thread_delivered_count: AtomicU64::new(0),
            resume_count: AtomicU64::new(0),
            deferred_preemption_count: AtomicU64::new(0),
            signal_depth: AtomicI32::new(0),
            switching_context: Cell::new(false),
            current_priority: AtomicU8::new(NO_PRIORITY),
            best_runnable_priority: AtomicU8::new(NO_PRIORITY),
        }
    }

    pub fn current_sandbox(&self) -> Option<Arc<Sandbox>> {
        self.current_sandbox.borrow().clone()
    }

    pub fn set_current_sandbox(&self, sandbox: Option<Arc<Sandbox>>) {
        let priority = sandbox.as_ref().map_or(NO_PRIORITY, |s| s.priority());
        self.current_priority.store(priority, Ordering::Release);
        *self.current_sandbox.borrow_mut() = sandbox;
    }

    pub fn push_runnable(&self, sandbox: Arc<Sandbox>) {
        let mut queue = self.run_queue.borrow_mut();
        let priority = sandbox.priority();
        queue.push(sandbox);
        if priority < self.best_runnable_priority.load(Ordering::Relaxed) {
            self.best_runnable_priority.store(priority, Ordering::Release);
        }
    }

    pub fn pop_runnable(&self) -> Option<Arc<Sandbox>> {
        let mut queue = self.run_queue.borrow_mut();
        let popped = queue.pop();
        let best = queue.iter().map(|s| s.priority()).min().unwrap_or(NO_PRIORITY);
        drop(queue);
        self.best_runnable_priority.store(best, Ordering::Release);
        popped
    }

    pub fn run_queue_len(&self) -> usize {
        self.run_queue.borrow().len()
    }

    /// True if some sandbox queued on this worker has strictly better
    /// (numerically lower) priority than whatever is currently running.
    /// The policy hook behind `would_preempt` in Triaged fan-out mode.
    pub fn has_higher_priority_runnable(&self) -> bool {
        let running = self.current_priority.load(Ordering::Acquire);
        let best_runnable = self.best_runnable_priority.load(Ordering::Acquire);
        best_runnable < running
    }
}

// A `WorkerState`'s `RefCell`-guarded fields (`run_queue`, `current_sandbox`)
// are touched only by the owning worker thread and the signal handlers
// delivered to it, which run on that same thread — never concurrently with
// each other, per the signal-depth invariant. Every field another thread
// may legitimately read through a `&'static WorkerState` (the priority
// snapshots, counters, signal depth) is already behind an atomic. Peer
// access is therefore sound even though `RefCell` is itself `!Sync`.
unsafe impl Sync for WorkerState {}

thread_local! {
    static WORKER: RefCell<Option<&'static WorkerState>> = const { RefCell::new(None) };
}

/// Run `f` with the calling thread's [`WorkerState`]. Panics if the
/// calling thread is not a worker thread spawned by [`initialize`].
pub fn with_worker<R>(f: impl FnOnce(&'static WorkerState) -> R) -> R {
    WORKER.with(|cell| {
        let state = cell
            .borrow()
            .expect("preemptive-sandbox: called from a non-worker thread");
        f(state)
    })
}

/// Whether the calling thread is a worker thread.
pub fn is_worker_thread() -> bool {
    WORKER.with(|cell| cell.borrow().is_some())
}

/// Spawn `config.worker_count()` OS threads, each running `body` after its
/// [`WorkerState`] has been installed and the timer and resume signal
/// handlers have been registered. Blocks until every worker thread has
/// exited.
///
/// Mirrors the teacher's `Kernel::init` + per-thread `start_first_thread`
/// split: a process-wide singleton is built exactly once, then each worker
/// gets its own thread-local scheduler state.
pub fn initialize<F>(config: ProcessConfig, body: F)
where
    F: Fn(usize) + Send + Sync + Clone + 'static,
{
    let worker_count = config.worker_count();

    // Every worker's pthread_t and WorkerState must be known to every
    // other worker before any of them arms its timer, since signal fan-out
    // and `would_preempt` both read peer state. Two barriers bracket the
    // handoff: the first lets the spawning thread know every slot is
    // filled; the second holds workers back until the spawning thread has
    // published the process singleton those slots now live in.
    type Slot = (libc::pthread_t, &'static WorkerState);
    let slots: Arc<std::sync::Mutex<Vec<Option<Slot>>>> =
        Arc::new(std::sync::Mutex::new((0..worker_count).map(|_| None).collect()));
    let slots_filled = Arc::new(std::sync::Barrier::new(worker_count + 1));
    let process_published = Arc::new(std::sync::Barrier::new(worker_count + 1));

    let mut join_handles = Vec::with_capacity(worker_count);

    for index in 0..worker_count {
        let slots = Arc::clone(&slots);
        let slots_filled = Arc::clone(&slots_filled);
        let process_published = Arc::clone(&process_published);
        let body = body.clone();
        let handle = std::thread::Builder::new()
            .name(format!("preemptive-sandbox-worker-{index}"))
            .spawn(move || {
                let state: &'static WorkerState = Box::leak(Box::new(WorkerState::new(index)));
                WORKER.with(|cell| *cell.borrow_mut() = Some(state));

                slots.lock().unwrap()[index] = Some((unsafe { libc::pthread_self() }, state));
                slots_filled.wait();
                process_published.wait();

                crate::signal_core::install();
                crate::timer::arm(
                    self::config().quantum_micros(),
                    self::config().preemption_enabled(),
                );

                body(index);
                run_base_loop(state);
            })
            .expect("failed to spawn worker thread");
        join_handles.push(handle);
    }

    slots_filled.wait();

    let filled: Vec<Slot> = slots
        .lock()
        .unwrap()
        .iter()
        .map(|slot| slot.expect("worker failed to publish its state"))
        .collect();
    let threads = filled.iter().map(|(tid, _)| *tid).collect();
    let worker_states = filled.iter().map(|(_, state)| *state).collect();

    #[cfg(feature = "diagnostics")]
    crate::diagnostics::init(worker_count);

    PROCESS
        .set(ProcessState {
            config,
            workers: WorkerTable { threads },
            listener_is_running: AtomicBool::new(false),
            worker_states,
        })
        .unwrap_or_else(|_| panic!("preemptive-sandbox: initialize called more than once"));

    process_published.wait();

    for handle in join_handles {
        let _ = handle.join();
    }
}

/// Arm the calling worker's interval timer from the process-wide quantum
/// (spec.md §6's `arm_timer()`). Exposed so a worker can re-arm after a
/// matching [`disarm_timer`], e.g. around a region that must run to
/// completion without preemption.
pub fn arm_timer() {
    let cfg = config();
    crate::timer::arm(cfg.quantum_micros(), cfg.preemption_enabled());
}

/// Disarm the calling worker's interval timer (spec.md §6's
/// `disarm_timer()`).
pub fn disarm_timer() {
    crate::timer::disarm();
}

/// Update the process-wide cycle-denominated quantum (spec.md §6's
/// `set_interval_duration(cycles)`). Does not retune the wall-clock timer;
/// callers that also want the new quantum to take effect on-wire call
/// [`disarm_timer`] then [`arm_timer`] after updating it, since `setitimer`
/// has no "change the running interval" call of its own.
pub fn set_interval_duration(cycles: u64) {
    config().set_quantum_cycles(cycles);
}

/// Log this worker's fan-out and deferred-preemption counters at `trace!`,
/// from ordinary cooperative code rather than from inside the signal
/// handler. The handler itself only ever touches lock-free atomics — no
/// string formatting, no I/O — so counters are surfaced here instead,
/// mirroring the teacher's `platform_timer::preemption_checkpoint` split
/// between signal-time flag-set and normal-time handling.
pub fn preemption_checkpoint() {
    with_worker(|worker| {
        log::trace!(
            "worker {}: kernel={} thread={} resume={} deferred={}",
            worker.index,
            worker.kernel_delivered_count.load(Ordering::Relaxed),
            worker.thread_delivered_count.load(Ordering::Relaxed),
            worker.resume_count.load(Ordering::Relaxed),
            worker.deferred_preemption_count.load(Ordering::Relaxed),
        );
    });
}

/// Cooperative fast-path yield: save the caller's resume point and hand
/// control back to the worker's scheduler loop.
///
/// Mirrors the teacher's `kernel::yield_now()` convenience wrapper around
/// `Arch::capture_and_yield`. Masked per `Arch::capture_and_yield`'s safety
/// precondition: `yield_callback` sets `variant = Fast` and moves the
/// sandbox to `Runnable` on the run queue while it is still `current`, and
/// a timer signal landing mid-update would either violate `save_slow`'s
/// `Running`-only precondition or double-borrow the run queue. The guard
/// is dropped only once this exact call frame is reached again — i.e.
/// once this sandbox is itself resumed — which is exactly when it becomes
/// safe to preempt it once more.
pub fn yield_now() {
    preemption_checkpoint();
    let _mask = crate::signal_core::SignalMask::acquire();
    with_worker(|worker| {
        let current = worker
            .current_sandbox()
            .expect("yield_now called with no current sandbox");
        unsafe {
            crate::arch::DefaultArch::capture_and_yield(
                current.arch_context(),
                yield_callback,
            );
        }
    });
}

unsafe extern "C" fn yield_callback(ctx: *const ArchContext, sp: u64, ip: u64) {
    let ctx = unsafe { &*ctx };
    ctx.save_fast(sp, ip);
    with_worker(|worker| {
        let current = worker
            .current_sandbox()
            .expect("yield callback fired with no current sandbox");
        current.set_state(crate::sandbox::SandboxState::Runnable);
        worker.push_runnable(current);
    });
    crate::scheduler_glue::schedule_next();
}

/// The worker's scheduler loop, entered once and never exited. Captures
/// its own resume point into `worker.base_context` on every iteration, so
/// that a `Slow`-saved successor can be resumed by physically jumping
/// onto this stack and raising the resume signal from here (see
/// [`base_loop_resume`]) — the signal lands on a stack nothing else is
/// using, so overwriting its captured context in place is harmless.
fn run_base_loop(worker: &'static WorkerState) -> ! {
    loop {
        unsafe {
            crate::arch::DefaultArch::capture_and_yield(&worker.base_context, base_loop_resume);
        }
    }
}

unsafe extern "C" fn base_loop_resume(ctx: *const ArchContext, sp: u64, ip: u64) {
    let ctx = unsafe { &*ctx };
    ctx.save_fast(sp, ip);
    with_worker(|worker| {
        let current_is_slow = worker
            .current_sandbox()
            .is_some_and(|s| s.arch_context().variant() == crate::context::ContextVariant::Slow);
        if current_is_slow {
            let rc = unsafe {
                libc::pthread_kill(libc::pthread_self(), crate::signal_core::SIGNAL_RESUME)
            };
            if rc != 0 {
                crate::errors::fatal_config(crate::errors::ConfigError::Syscall {
                    call: "pthread_kill",
                    errno: rc,
                });
            }
        }
        // Either there was nothing to resume via the signal trampoline,
        // or `pthread_kill` returned (it should not: the handler
        // overwrites this very stack's context and `sigreturn`s straight
        // into the successor). Either way, go pick something else.
        unsafe { crate::scheduler_glue::schedule_next_on(worker) }
    })
}
