//! Condition watcher worker.
//!
//! A single watcher thread consumes the shared conditional queue. Each scan
//! evaluates `check()` of every queued task, runs the body of the ones that
//! turned true, and re-queues the rest. When every task was satisfied the
//! watcher parks until a new submission activates it; otherwise it sleeps
//! `watcher_interval` microseconds and rescans.
//!
//! A task whose `check()` is cheap and permanently false keeps the watcher
//! cycling; `watcher_interval` is the only throttle.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::cfg::SchedulerConfig;
use crate::queue::TaskQueue;
use crate::task::ConditionalTask;
use crate::thread::{ThreadBody, ThreadHandle, ThreadInitInfo};
use crate::worker::panic_message;

/// Dynamic state of the watcher, separated from the worker logic object.
#[derive(Debug, Default)]
pub struct ConditionalWorkerContext {
    thread: Option<ThreadHandle>,
}

impl ConditionalWorkerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the thread running the watcher, set at init.
    pub fn thread(&self) -> Option<&ThreadHandle> {
        self.thread.as_ref()
    }

    pub fn set_thread(&mut self, handle: ThreadHandle) {
        self.thread = Some(handle);
    }
}

/// Watcher logic over the shared conditional queue.
pub struct ConditionalWorker<S: ConditionalTask> {
    queue: Arc<TaskQueue<S>>,
    cfg: Arc<SchedulerConfig>,
}

impl<S: ConditionalTask> ConditionalWorker<S> {
    pub(crate) fn new(queue: Arc<TaskQueue<S>>, cfg: Arc<SchedulerConfig>) -> Self {
        ConditionalWorker { queue, cfg }
    }

    /// Initialize on the watcher thread.
    pub fn init(&self, info: &ThreadInitInfo, ctx: &mut ConditionalWorkerContext) {
        self.queue.reconstruct();
        ctx.set_thread(info.handle());
    }

    /// The watcher body.
    pub fn run(&self, ctx: &mut ConditionalWorkerContext) {
        let mut negatives: VecDeque<S> = VecDeque::new();
        while self.queue.active() {
            negatives.clear();
            while let Some(mut task) = self.queue.try_pop() {
                if self.execute_task(true, &mut task) {
                    self.execute_task(false, &mut task);
                    continue;
                }
                negatives.push_back(task);
            }
            if negatives.is_empty() {
                if let Some(thread) = ctx.thread().cloned() {
                    thread.suspend(None);
                }
                continue;
            }
            for task in negatives.drain(..) {
                self.queue.push(task);
            }
            if let Some(thread) = ctx.thread().cloned() {
                thread.suspend(Some(Duration::from_micros(self.cfg.watcher_interval)));
            }
        }
    }

    /// Evaluate the check or run the body, trapping panics either way.
    ///
    /// Public so tests can drive single steps without the watcher thread.
    pub fn execute_task(&self, check_condition: bool, task: &mut S) -> bool {
        let result = catch_unwind(AssertUnwindSafe(|| {
            if check_condition {
                task.check()
            } else {
                task.run();
                false
            }
        }));
        match result {
            Ok(value) => value,
            Err(cause) => {
                tracing::error!(
                    "unhandled conditional task failure: {}",
                    panic_message(&cause)
                );
                false
            }
        }
    }
}

impl<S: ConditionalTask> Clone for ConditionalWorker<S> {
    fn clone(&self) -> Self {
        ConditionalWorker {
            queue: Arc::clone(&self.queue),
            cfg: Arc::clone(&self.cfg),
        }
    }
}

impl<S: ConditionalTask> std::fmt::Debug for ConditionalWorker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalWorker")
            .field("queue", &self.queue)
            .finish()
    }
}

/// Thread body pairing the watcher with its context.
pub(crate) struct ConditionalWorkerThread<S: ConditionalTask> {
    pub(crate) worker: ConditionalWorker<S>,
    pub(crate) ctx: ConditionalWorkerContext,
}

impl<S: ConditionalTask> ThreadBody for ConditionalWorkerThread<S> {
    fn init(&mut self, info: &ThreadInitInfo) {
        self.worker.init(info, &mut self.ctx);
    }

    fn run(&mut self) {
        self.worker.run(&mut self.ctx);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::BasicConditionalTask;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn watcher(
        cfg: SchedulerConfig,
    ) -> (
        ConditionalWorker<BasicConditionalTask>,
        Arc<TaskQueue<BasicConditionalTask>>,
    ) {
        let queue = Arc::new(TaskQueue::new());
        let worker = ConditionalWorker::new(Arc::clone(&queue), Arc::new(cfg));
        (worker, queue)
    }

    #[test]
    fn test_true_check_runs_body_once() {
        let (w, _q) = watcher(SchedulerConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let mut task = BasicConditionalTask::new(|| true, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(w.execute_task(true, &mut task));
        w.execute_task(false, &mut task);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_check_treated_as_false() {
        let (w, _q) = watcher(SchedulerConfig::default());
        let mut task = BasicConditionalTask::new(|| panic!("check exploded"), || {});
        assert!(!w.execute_task(true, &mut task));
    }

    #[test]
    fn test_false_checks_requeue_and_rescan() {
        // a task whose check flips to true on a later scan is eventually run
        let cfg = SchedulerConfig {
            watcher_interval: 10,
            ..Default::default()
        };
        let (w, q) = watcher(cfg);

        let executed = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(AtomicBool::new(false));
        let checks = Arc::new(AtomicUsize::new(0));

        let mut tc = crate::thread::ThreadControl::spawn(
            crate::thread::ThreadControl::UNDEFINED_THREAD_ID,
            None,
            ConditionalWorkerThread {
                worker: w,
                ctx: ConditionalWorkerContext::new(),
            },
        );
        tc.wait_initialization();
        // init reconstructs the queue, so submit after it
        {
            let executed = Arc::clone(&executed);
            let gate = Arc::clone(&gate);
            let checks = Arc::clone(&checks);
            q.push(BasicConditionalTask::new(
                move || {
                    checks.fetch_add(1, Ordering::SeqCst);
                    gate.load(Ordering::SeqCst)
                },
                move || {
                    executed.store(true, Ordering::SeqCst);
                },
            ));
        }
        tc.activate();

        std::thread::sleep(Duration::from_millis(50));
        assert!(!executed.load(Ordering::SeqCst));
        assert!(checks.load(Ordering::SeqCst) >= 1);

        gate.store(true, Ordering::SeqCst);
        tc.activate();
        let mut waited = 0;
        while !executed.load(Ordering::SeqCst) && waited < 1000 {
            std::thread::sleep(Duration::from_millis(1));
            tc.activate();
            waited += 1;
        }
        assert!(executed.load(Ordering::SeqCst));

        q.deactivate();
        while !tc.completed() {
            tc.activate();
            std::thread::sleep(Duration::from_millis(1));
        }
        tc.join();
    }

    #[test]
    fn test_always_false_check_cycles_forever() {
        // a permanently-false check is re-queued on every scan; the
        // watcher_interval sleep is the only thing bounding the spin
        let cfg = SchedulerConfig {
            watcher_interval: 1000,
            ..Default::default()
        };
        let (w, q) = watcher(cfg);

        let checks = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicBool::new(false));

        let mut tc = crate::thread::ThreadControl::spawn(
            crate::thread::ThreadControl::UNDEFINED_THREAD_ID,
            None,
            ConditionalWorkerThread {
                worker: w,
                ctx: ConditionalWorkerContext::new(),
            },
        );
        tc.wait_initialization();
        {
            let checks = Arc::clone(&checks);
            let executed = Arc::clone(&executed);
            q.push(BasicConditionalTask::new(
                move || {
                    checks.fetch_add(1, Ordering::SeqCst);
                    false
                },
                move || {
                    executed.store(true, Ordering::SeqCst);
                },
            ));
        }
        tc.activate();

        std::thread::sleep(Duration::from_millis(100));
        let seen = checks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected repeated rescans, saw {}", seen);
        assert!(!executed.load(Ordering::SeqCst));
        // still queued, still unsatisfied
        assert_eq!(q.size(), 1);

        q.deactivate();
        while !tc.completed() {
            tc.activate();
            std::thread::sleep(Duration::from_millis(1));
        }
        tc.join();
    }
}
