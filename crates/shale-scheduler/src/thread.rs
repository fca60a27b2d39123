//! Physical thread control.
//!
//! A `ThreadControl` owns one OS thread whose life cycle is: spawn, apply
//! affinity, run the body's `init`, signal the init barrier, park until
//! `activate()`, run the body, mark completed. The condition-variable state
//! lives behind a shared `ThreadHandle` so the body can suspend itself on
//! its own thread while callers activate and join from outside.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cfg::SchedulerConfig;

/// Default suspension timeout: effectively "until activated".
const DEFAULT_SUSPEND_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

struct SleepState {
    active: bool,
    completed: bool,
}

struct ThreadShared {
    sleep: Mutex<SleepState>,
    sleep_cv: Condvar,
    initialized: Mutex<bool>,
    init_cv: Condvar,
}

impl ThreadShared {
    fn new() -> Self {
        ThreadShared {
            sleep: Mutex::new(SleepState {
                active: false,
                completed: false,
            }),
            sleep_cv: Condvar::new(),
            initialized: Mutex::new(false),
            init_cv: Condvar::new(),
        }
    }
}

/// Cloneable handle to a thread's suspend/activate state.
///
/// The worker context stores one of these so the worker loop can suspend
/// cooperatively; submission paths use the owning `ThreadControl` (or a
/// clone of this handle) to wake it.
#[derive(Clone)]
pub struct ThreadHandle {
    shared: Arc<ThreadShared>,
}

impl ThreadHandle {
    /// Wake the thread if it is suspended. Idempotent; does nothing once
    /// the thread has completed.
    pub fn activate(&self) {
        {
            let mut state = self.shared.sleep.lock();
            if state.completed || state.active {
                return;
            }
            state.active = true;
        }
        self.shared.sleep_cv.notify_all();
    }

    /// Park the calling thread until `activate()` or the timeout elapses.
    ///
    /// Must be called from the thread this handle belongs to; clears the
    /// active flag so `activate()` can wake it.
    pub fn suspend(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SUSPEND_TIMEOUT);
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.sleep.lock();
        if state.completed {
            return;
        }
        state.active = false;
        while !state.active {
            if self.shared.sleep_cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    /// Whether the thread is currently active (not suspended).
    pub fn active(&self) -> bool {
        self.shared.sleep.lock().active
    }

    /// Whether the thread body has returned.
    pub fn completed(&self) -> bool {
        self.shared.sleep.lock().completed
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.sleep.lock();
        f.debug_struct("ThreadHandle")
            .field("active", &state.active)
            .field("completed", &state.completed)
            .finish()
    }
}

/// Thread information handed to the body's `init` step.
pub struct ThreadInitInfo {
    thread_id: usize,
    handle: ThreadHandle,
}

impl ThreadInitInfo {
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Handle to the thread control running this body.
    pub fn handle(&self) -> ThreadHandle {
        self.handle.clone()
    }
}

/// Logic object run on a controlled thread.
///
/// `init` is invoked on the new thread before the init barrier is signalled;
/// `run` is invoked after the first `activate()`.
pub trait ThreadBody: Send + 'static {
    fn init(&mut self, _info: &ThreadInitInfo) {}

    fn run(&mut self);
}

/// Owns one OS thread with cooperative suspend/wake and an init barrier.
pub struct ThreadControl {
    thread_id: usize,
    handle: ThreadHandle,
    thread: Option<JoinHandle<()>>,
}

impl ThreadControl {
    /// Thread id used for threads outside the worker ring (the watcher).
    pub const UNDEFINED_THREAD_ID: usize = usize::MAX;

    /// Spawn a new controlled thread running `body`.
    ///
    /// The thread applies the affinity profile from `cfg`, runs
    /// `body.init`, signals the init barrier, then parks until `activate()`.
    pub fn spawn<B: ThreadBody>(
        thread_id: usize,
        cfg: Option<&SchedulerConfig>,
        mut body: B,
    ) -> Self {
        let shared = Arc::new(ThreadShared::new());
        let affinity = cfg.map(AffinitySpec::from_config);
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::spawn(move || {
            apply_affinity(thread_id, affinity.as_ref());
            let info = ThreadInitInfo {
                thread_id,
                handle: ThreadHandle {
                    shared: Arc::clone(&thread_shared),
                },
            };
            body.init(&info);
            {
                *thread_shared.initialized.lock() = true;
            }
            thread_shared.init_cv.notify_all();
            {
                let mut state = thread_shared.sleep.lock();
                while !state.active {
                    thread_shared.sleep_cv.wait(&mut state);
                }
            }
            tracing::debug!(thread_id, "thread activated");
            body.run();
            let mut state = thread_shared.sleep.lock();
            state.completed = true;
            state.active = false;
        });
        ThreadControl {
            thread_id,
            handle: ThreadHandle { shared },
            thread: Some(thread),
        }
    }

    /// Block until the thread has finished its init step.
    pub fn wait_initialization(&self) {
        let shared = &self.handle.shared;
        let mut initialized = shared.initialized.lock();
        while !*initialized {
            shared.init_cv.wait(&mut initialized);
        }
    }

    /// Wake the thread if it is suspended.
    pub fn activate(&self) {
        self.handle.activate();
    }

    /// Whether the thread is currently active.
    pub fn active(&self) -> bool {
        self.handle.active()
    }

    /// Whether the thread body has returned.
    pub fn completed(&self) -> bool {
        self.handle.completed()
    }

    /// A cloneable handle to the suspend/activate state.
    pub fn handle(&self) -> ThreadHandle {
        self.handle.clone()
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Block until the thread exits.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for ThreadControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadControl")
            .field("thread_id", &self.thread_id)
            .field("handle", &self.handle)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Affinity
// ---------------------------------------------------------------------------

/// Affinity knobs copied out of the scheduler configuration.
#[derive(Debug, Clone)]
struct AffinitySpec {
    core_affinity: bool,
    initial_core: usize,
    assign_numa_nodes_uniformly: bool,
    force_numa_node: Option<usize>,
}

impl AffinitySpec {
    fn from_config(cfg: &SchedulerConfig) -> Self {
        AffinitySpec {
            core_affinity: cfg.core_affinity,
            initial_core: cfg.initial_core,
            assign_numa_nodes_uniformly: cfg.assign_numa_nodes_uniformly,
            force_numa_node: cfg.force_numa_node,
        }
    }
}

/// Resolve and apply the affinity profile for a worker thread.
///
/// Binding is best-effort: without a NUMA API in the stack the resolved
/// target is only logged, and scheduling proceeds unpinned.
fn apply_affinity(thread_id: usize, spec: Option<&AffinitySpec>) {
    let Some(spec) = spec else {
        return;
    };
    if let Some(node) = spec.force_numa_node {
        tracing::debug!(thread_id, node, "numa node binding requested; not applied");
    } else if spec.assign_numa_nodes_uniformly {
        tracing::debug!(thread_id, "uniform numa assignment requested; not applied");
    } else if spec.core_affinity {
        let core = spec.initial_core + thread_id;
        tracing::debug!(thread_id, core, "core binding requested; not applied");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
