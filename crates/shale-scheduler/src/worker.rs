//! Worker logic running on each scheduler thread.
//!
//! The worker is a logic object over shared queue state; the dynamic state
//! lives in the per-worker [`Context`]. Poll order per step: sticky and
//! local queues (fairness-ordered), retries, then stealing from peers'
//! local queues.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cfg::SchedulerConfig;
use crate::context::Context;
use crate::queue::TaskQueue;
use crate::stats::WorkerStat;
use crate::task::Task;
use crate::thread::{ThreadBody, ThreadInitInfo};

/// Callback invoked on the worker thread at init, with the worker index.
pub type WorkerInitializer = Arc<dyn Fn(usize) + Send + Sync>;

/// Worker over shared scheduler state.
pub struct Worker<T: Task> {
    queues: Arc<Vec<TaskQueue<T>>>,
    sticky_queues: Arc<Vec<TaskQueue<T>>>,
    initial_tasks: Arc<Vec<Mutex<Vec<T>>>>,
    stat: Arc<WorkerStat>,
    cfg: Arc<SchedulerConfig>,
    initializer: Option<WorkerInitializer>,
}

impl<T: Task> Worker<T> {
    pub(crate) fn new(
        queues: Arc<Vec<TaskQueue<T>>>,
        sticky_queues: Arc<Vec<TaskQueue<T>>>,
        initial_tasks: Arc<Vec<Mutex<Vec<T>>>>,
        stat: Arc<WorkerStat>,
        cfg: Arc<SchedulerConfig>,
        initializer: Option<WorkerInitializer>,
    ) -> Self {
        Worker {
            queues,
            sticky_queues,
            initial_tasks,
            stat,
            cfg,
            initializer,
        }
    }

    /// Initialize the worker on its thread.
    ///
    /// Reconstructs the queues (now on this thread's NUMA node), drains the
    /// initial-task staging vector into the sticky or local queue, and runs
    /// the scheduler-supplied initializer.
    pub fn init(&self, info: &ThreadInitInfo, ctx: &mut Context) {
        ctx.set_thread(info.handle());
        let index = info.thread_id();
        self.queues[index].reconstruct();
        self.sticky_queues[index].reconstruct();
        let staged: Vec<T> = {
            let mut guard = self.initial_tasks[index].lock();
            guard.drain(..).collect()
        };
        for task in staged {
            if task.sticky() {
                self.sticky_queues[index].push(task);
            } else {
                self.queues[index].push(task);
            }
        }
        if let Some(initializer) = &self.initializer {
            initializer(index);
        }
    }

    /// The worker body: poll until both queues are deactivated.
    pub fn run(&self, ctx: &mut Context) {
        let index = ctx.index();
        ctx.set_last_steal_from(index);
        let mut empty_work_count = 0usize;
        while self.sticky_queues[index].active() || self.queues[index].active() {
            if self.process_next(ctx) {
                empty_work_count = 0;
            } else {
                std::hint::spin_loop();
                if !self.sticky_queues[index].active() && !self.queues[index].active() {
                    break;
                }
                self.suspend_worker_if_needed(&mut empty_work_count, ctx);
            }
        }
    }

    /// Proceed one step: run at most one task.
    ///
    /// Public so tests can drive a worker without spawning its thread.
    pub fn process_next(&self, ctx: &mut Context) -> bool {
        if self.try_local_and_sticky(ctx) {
            return true;
        }
        if self.cfg.stealing_enabled {
            // give the own queues more chances before stealing
            let retries = self.cfg.stealing_wait * self.cfg.thread_count;
            for _ in 0..retries {
                if self.try_local_and_sticky(ctx) {
                    return true;
                }
                std::hint::spin_loop();
            }
            if self.steal_and_execute(ctx) {
                self.stat.add_steal();
                return true;
            }
        }
        let wait = self.cfg.task_polling_wait;
        if wait > 0 {
            if wait == 1 {
                std::thread::yield_now();
            } else {
                std::thread::sleep(Duration::from_micros(wait - 2));
            }
        }
        false
    }

    fn suspend_worker_if_needed(&self, empty_work_count: &mut usize, ctx: &mut Context) {
        if self.cfg.busy_worker {
            return;
        }
        *empty_work_count += 1;
        if *empty_work_count > self.cfg.worker_try_count {
            *empty_work_count = 0;
            ctx.set_busy_working(false);
            self.stat.add_suspend();
            let timeout = Duration::from_micros(self.cfg.worker_suspend_timeout);
            if let Some(thread) = ctx.thread().cloned() {
                thread.suspend(Some(timeout));
            }
        }
    }

    fn try_local_and_sticky(&self, ctx: &mut Context) -> bool {
        let index = ctx.index();
        // sometimes check the local queue first for fairness
        if !ctx.local_first().count_up() {
            if self.try_process(ctx, QueueKind::Sticky, index) {
                self.stat.add_sticky();
                return true;
            }
            if self.try_process(ctx, QueueKind::Local, index) {
                return true;
            }
        } else {
            if self.try_process(ctx, QueueKind::Local, index) {
                return true;
            }
            if self.try_process(ctx, QueueKind::Sticky, index) {
                self.stat.add_sticky();
                return true;
            }
        }
        false
    }

    fn try_process(&self, ctx: &mut Context, kind: QueueKind, index: usize) -> bool {
        let queue = match kind {
            QueueKind::Local => &self.queues[index],
            QueueKind::Sticky => &self.sticky_queues[index],
        };
        if queue.active() {
            if let Some(task) = queue.try_pop() {
                self.execute_task(task, ctx);
                return true;
            }
        }
        false
    }

    fn steal_and_execute(&self, ctx: &mut Context) -> bool {
        let size = self.queues.len();
        let own = ctx.index();
        let last = ctx.last_steal_from();
        let end = next(last, size);
        let mut idx = next(last, size);
        loop {
            if idx != own {
                let target = &self.queues[idx];
                if target.active() {
                    if let Some(task) = target.try_pop() {
                        ctx.set_last_steal_from(idx);
                        ctx.set_task_is_stolen(true);
                        self.execute_task(task, ctx);
                        ctx.set_task_is_stolen(false);
                        return true;
                    }
                }
            }
            idx = next(idx, size);
            if idx == end {
                return false;
            }
        }
    }

    fn execute_task(&self, mut task: T, ctx: &mut Context) {
        if !ctx.busy_working() {
            self.stat.add_wakeup_run();
        }
        ctx.set_busy_working(true);
        // trap panics so a task failure never takes down the worker
        let result = catch_unwind(AssertUnwindSafe(|| task.run(ctx)));
        if let Err(cause) = result {
            tracing::error!(
                worker = ctx.index(),
                "unhandled task failure: {}",
                panic_message(&cause)
            );
        }
        self.stat.add_count();
    }
}

impl<T: Task> Clone for Worker<T> {
    fn clone(&self) -> Self {
        Worker {
            queues: Arc::clone(&self.queues),
            sticky_queues: Arc::clone(&self.sticky_queues),
            initial_tasks: Arc::clone(&self.initial_tasks),
            stat: Arc::clone(&self.stat),
            cfg: Arc::clone(&self.cfg),
            initializer: self.initializer.clone(),
        }
    }
}

impl<T: Task> std::fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("queues", &self.queues.len())
            .finish()
    }
}

enum QueueKind {
    Local,
    Sticky,
}

fn next(index: usize, size: usize) -> usize {
    if index + 1 >= size {
        0
    } else {
        index + 1
    }
}

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Thread body pairing a worker with its context.
pub(crate) struct WorkerThread<T: Task> {
    pub(crate) worker: Worker<T>,
    pub(crate) ctx: Context,
}

impl<T: Task> ThreadBody for WorkerThread<T> {
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
    use crate::cfg::Ratio;
    use crate::task::BasicTask;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        queues: Arc<Vec<TaskQueue<BasicTask>>>,
        sticky_queues: Arc<Vec<TaskQueue<BasicTask>>>,
        initial_tasks: Arc<Vec<Mutex<Vec<BasicTask>>>>,
        stats: Vec<Arc<WorkerStat>>,
        cfg: Arc<SchedulerConfig>,
    }

    fn fixture(cfg: SchedulerConfig) -> Fixture {
        let size = cfg.thread_count;
        Fixture {
            queues: Arc::new((0..size).map(|_| TaskQueue::new()).collect()),
            sticky_queues: Arc::new((0..size).map(|_| TaskQueue::new()).collect()),
            initial_tasks: Arc::new((0..size).map(|_| Mutex::new(Vec::new())).collect()),
            stats: (0..size).map(|_| Arc::new(WorkerStat::default())).collect(),
            cfg: Arc::new(cfg),
        }
    }

    fn worker(f: &Fixture, index: usize) -> Worker<BasicTask> {
        Worker::new(
            Arc::clone(&f.queues),
            Arc::clone(&f.sticky_queues),
            Arc::clone(&f.initial_tasks),
            Arc::clone(&f.stats[index]),
            Arc::clone(&f.cfg),
            None,
        )
    }

    fn context(f: &Fixture, index: usize) -> Context {
        let mut ctx = Context::new(index);
        ctx.init_local_first(f.cfg.ratio_check_local_first);
        ctx
    }

    fn record(order: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> BasicTask {
        let order = Arc::clone(order);
        BasicTask::new(move |_| order.lock().push(tag))
    }

    fn record_sticky(order: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> BasicTask {
        let order = Arc::clone(order);
        BasicTask::sticky(move |_| order.lock().push(tag))
    }

    #[test]
    fn test_sticky_and_local_alternate() {
        // ratio 1/2 makes sticky and local tasks run alternately, sticky
        // first
        let cfg = SchedulerConfig {
            thread_count: 1,
            ratio_check_local_first: Ratio::new(1, 2),
            ..Default::default()
        };
        let f = fixture(cfg);
        let w = worker(&f, 0);
        let mut ctx = context(&f, 0);

        let order = Arc::new(Mutex::new(Vec::new()));
        f.queues[0].push(record(&order, "B"));
        f.queues[0].push(record(&order, "D"));
        f.sticky_queues[0].push(record_sticky(&order, "A"));
        f.sticky_queues[0].push(record_sticky(&order, "C"));

        for _ in 0..4 {
            assert!(w.process_next(&mut ctx));
        }
        assert_eq!(*order.lock(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_local_only_when_ratio_zero() {
        let cfg = SchedulerConfig {
            thread_count: 1,
            ratio_check_local_first: Ratio::new(0, 1),
            ..Default::default()
        };
        let f = fixture(cfg);
        let w = worker(&f, 0);
        let mut ctx = context(&f, 0);

        let order = Arc::new(Mutex::new(Vec::new()));
        f.queues[0].push(record(&order, "local"));
        f.sticky_queues[0].push(record_sticky(&order, "sticky1"));
        f.sticky_queues[0].push(record_sticky(&order, "sticky2"));

        for _ in 0..3 {
            assert!(w.process_next(&mut ctx));
        }
        assert_eq!(*order.lock(), vec!["sticky1", "sticky2", "local"]);
    }

    #[test]
    fn test_stealing_from_peer_local_queue() {
        let cfg = SchedulerConfig {
            thread_count: 2,
            stealing_enabled: true,
            ..Default::default()
        };
        let f = fixture(cfg);
        let w0 = worker(&f, 0);
        let w1 = worker(&f, 1);
        let mut ctx0 = context(&f, 0);
        let mut ctx1 = context(&f, 1);

        let order = Arc::new(Mutex::new(Vec::new()));
        f.queues[0].push(record(&order, "Z"));
        f.queues[1].push(record(&order, "Y"));
        f.sticky_queues[1].push(record_sticky(&order, "X"));

        // worker 0 runs its own local task, then steals Y from worker 1
        assert!(w0.process_next(&mut ctx0));
        assert!(w0.process_next(&mut ctx0));
        assert_eq!(ctx0.last_steal_from(), 1);
        assert_eq!(f.stats[0].snapshot().steal, 1);

        // worker 1 still runs its sticky task: never stolen
        assert!(w1.process_next(&mut ctx1));
        assert_eq!(f.stats[1].snapshot().sticky, 1);

        let got = order.lock().clone();
        assert_eq!(got, vec!["Z", "Y", "X"]);
    }

    #[test]
    fn test_sticky_never_stolen_when_only_sticky_remains() {
        let cfg = SchedulerConfig {
            thread_count: 2,
            stealing_enabled: true,
            stealing_wait: 0,
            ..Default::default()
        };
        let f = fixture(cfg);
        let w0 = worker(&f, 0);
        let mut ctx0 = context(&f, 0);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        f.sticky_queues[1].push(BasicTask::sticky(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!w0.process_next(&mut ctx0));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(f.sticky_queues[1].size(), 1);
    }

    #[test]
    fn test_init_drains_staged_tasks() {
        let cfg = SchedulerConfig {
            thread_count: 1,
            ..Default::default()
        };
        let f = fixture(cfg);
        let w = worker(&f, 0);

        let order = Arc::new(Mutex::new(Vec::new()));
        f.initial_tasks[0].lock().push(record(&order, "local"));
        f.initial_tasks[0].lock().push(record_sticky(&order, "sticky"));

        // drive init by hand through a spawned control thread
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let w2 = Worker::new(
            Arc::clone(&f.queues),
            Arc::clone(&f.sticky_queues),
            Arc::clone(&f.initial_tasks),
            Arc::clone(&f.stats[0]),
            Arc::clone(&f.cfg),
            Some(Arc::new(move |index| {
                s.store(index + 1, Ordering::SeqCst);
            })),
        );
        let staged_ctx = context(&f, 0);
        let mut tc = crate::thread::ThreadControl::spawn(
            0,
            None,
            InitOnly {
                worker: w2,
                ctx: Some(staged_ctx),
            },
        );
        tc.wait_initialization();
        tc.activate();
        while !tc.completed() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        tc.join();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(f.initial_tasks[0].lock().is_empty());
        assert_eq!(f.queues[0].size(), 1);
        assert_eq!(f.sticky_queues[0].size(), 1);

        // the staged tasks are runnable afterwards
        let mut ctx = context(&f, 0);
        assert!(w.process_next(&mut ctx));
        assert!(w.process_next(&mut ctx));
        assert_eq!(order.lock().len(), 2);
    }

    struct InitOnly {
        worker: Worker<BasicTask>,
        ctx: Option<Context>,
    }

    impl ThreadBody for InitOnly {
        fn init(&mut self, info: &ThreadInitInfo) {
            let ctx = self.ctx.as_mut().unwrap();
            self.worker.init(info, ctx);
        }

        fn run(&mut self) {}
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let cfg = SchedulerConfig {
            thread_count: 1,
            ..Default::default()
        };
        let f = fixture(cfg);
        let w = worker(&f, 0);
        let mut ctx = context(&f, 0);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        f.queues[0].push(BasicTask::new(|_| panic!("task exploded")));
        f.queues[0].push(BasicTask::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(w.process_next(&mut ctx));
        assert!(w.process_next(&mut ctx));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(f.stats[0].snapshot().count, 2);
    }
}
