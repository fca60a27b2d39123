//! Per-worker mutable state carried into every task invocation.

use crate::cfg::Ratio;
use crate::thread::ThreadHandle;

/// Counter advanced by the `ratio_check_local_first` fraction.
///
/// `count_up()` accumulates the numerator on each call and reports true
/// whenever the accumulator rolls over the denominator, i.e. on the calls
/// that fall in the "local first" fraction.
#[derive(Debug, Clone)]
pub struct LocalFirstCounter {
    numerator: u64,
    denominator: u64,
    accumulator: u64,
}

impl LocalFirstCounter {
    pub fn new(ratio: Ratio) -> Self {
        LocalFirstCounter {
            numerator: ratio.numerator(),
            denominator: ratio.denominator(),
            accumulator: 0,
        }
    }

    /// Advance the counter. Returns true when this call should poll the
    /// local queue before the sticky queue.
    pub fn count_up(&mut self) -> bool {
        self.accumulator += self.numerator;
        if self.accumulator >= self.denominator {
            self.accumulator -= self.denominator;
            return true;
        }
        false
    }
}

/// Worker context.
///
/// Owned by the worker thread and handed mutably to every task body. Holds
/// the stealing cursor, the busy flag used for wakeup accounting, the
/// local-first fairness counter, and a handle to the thread that runs this
/// worker.
#[derive(Debug)]
pub struct Context {
    index: usize,
    last_steal_from: usize,
    task_is_stolen: bool,
    busy_working: bool,
    local_first: LocalFirstCounter,
    thread: Option<ThreadHandle>,
}

impl Context {
    /// Create a context for the worker at `index`.
    pub fn new(index: usize) -> Self {
        Context {
            index,
            last_steal_from: index,
            task_is_stolen: false,
            busy_working: false,
            local_first: LocalFirstCounter::new(Ratio::new(0, 1)),
            thread: None,
        }
    }

    /// The worker index this context belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Round-robin stealing cursor: the index last stolen from.
    pub fn last_steal_from(&self) -> usize {
        self.last_steal_from
    }

    pub fn set_last_steal_from(&mut self, index: usize) {
        self.last_steal_from = index;
    }

    /// True while the currently running task was stolen from a peer.
    pub fn task_is_stolen(&self) -> bool {
        self.task_is_stolen
    }

    pub fn set_task_is_stolen(&mut self, arg: bool) {
        self.task_is_stolen = arg;
    }

    /// Whether the worker has been running tasks since its last suspension.
    pub fn busy_working(&self) -> bool {
        self.busy_working
    }

    pub fn set_busy_working(&mut self, arg: bool) {
        self.busy_working = arg;
    }

    pub fn local_first(&mut self) -> &mut LocalFirstCounter {
        &mut self.local_first
    }

    pub fn init_local_first(&mut self, ratio: Ratio) {
        self.local_first = LocalFirstCounter::new(ratio);
    }

    /// Handle to the thread control driving this worker, set at init.
    pub fn thread(&self) -> Option<&ThreadHandle> {
        self.thread.as_ref()
    }

    pub fn set_thread(&mut self, handle: ThreadHandle) {
        self.thread = Some(handle);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
