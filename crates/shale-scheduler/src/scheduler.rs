//! Stealing-based task scheduler.
//!
//! Owns the queues, workers, statistics, and thread controls. Construction
//! prepares `thread_count` local/sticky queue pairs plus the shared
//! conditional queue, and (outside test mode) spawns the worker threads
//! paused at their activation gate and the watcher thread. `start()`
//! releases them; `stop()` deactivates every queue and joins every thread.

use std::cell::Cell;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::cfg::SchedulerConfig;
use crate::conditional::{ConditionalWorker, ConditionalWorkerContext, ConditionalWorkerThread};
use crate::context::Context;
use crate::queue::TaskQueue;
use crate::stats::{WorkerStat, WorkerStatSnapshot};
use crate::task::{BasicConditionalTask, ConditionalTask, Task};
use crate::thread::ThreadControl;
use crate::worker::{Worker, WorkerThread};

thread_local! {
    /// Preferred worker index cached per submitting thread.
    static PREFERRED_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Worker selection policy for a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Use the default selection (preferred worker or round-robin).
    #[default]
    Undefined,
    /// Prefer a worker whose thread is currently suspended.
    SuspendedWorker,
}

/// Options attached to a submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleOption {
    pub policy: SchedulePolicy,
}

impl ScheduleOption {
    pub fn new(policy: SchedulePolicy) -> Self {
        ScheduleOption { policy }
    }
}

/// Stealing based task scheduler.
///
/// `T` is the task type; heterogeneous task kinds go through one queue as an
/// enum. `S` is the conditional task type.
pub struct TaskScheduler<T: Task, S: ConditionalTask = BasicConditionalTask> {
    cfg: Arc<SchedulerConfig>,
    size: usize,
    queues: Arc<Vec<TaskQueue<T>>>,
    sticky_queues: Arc<Vec<TaskQueue<T>>>,
    initial_tasks: Arc<Vec<Mutex<Vec<T>>>>,
    stats: Vec<Arc<WorkerStat>>,
    threads: Vec<ThreadControl>,
    watcher_thread: Option<ThreadControl>,
    conditional_queue: Arc<TaskQueue<S>>,
    next_worker_index: AtomicUsize,
    started: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    // populated only in test mode, where no threads are spawned
    test_workers: Vec<Worker<T>>,
    test_contexts: Vec<Context>,
}

impl<T: Task, S: ConditionalTask> TaskScheduler<T, S> {
    /// Create a scheduler and spawn its threads, paused until `start()`.
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self::build(cfg, false)
    }

    /// Create a scheduler without threads; tests drive the workers by hand
    /// through `workers()` / `contexts_mut()`.
    pub fn new_for_test(cfg: SchedulerConfig) -> Self {
        Self::build(cfg, true)
    }

    fn build(cfg: SchedulerConfig, test_mode: bool) -> Self {
        assert!(cfg.thread_count > 0, "scheduler requires at least one worker");
        let size = cfg.thread_count;
        let cfg = Arc::new(cfg);
        let queues: Arc<Vec<TaskQueue<T>>> =
            Arc::new((0..size).map(|_| TaskQueue::new()).collect());
        let sticky_queues: Arc<Vec<TaskQueue<T>>> =
            Arc::new((0..size).map(|_| TaskQueue::new()).collect());
        let initial_tasks: Arc<Vec<Mutex<Vec<T>>>> =
            Arc::new((0..size).map(|_| Mutex::new(Vec::new())).collect());
        let stats: Vec<Arc<WorkerStat>> =
            (0..size).map(|_| Arc::new(WorkerStat::default())).collect();
        let conditional_queue: Arc<TaskQueue<S>> = Arc::new(TaskQueue::new());

        let mut scheduler = TaskScheduler {
            cfg: Arc::clone(&cfg),
            size,
            queues,
            sticky_queues,
            initial_tasks,
            stats,
            threads: Vec::new(),
            watcher_thread: None,
            conditional_queue,
            next_worker_index: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            started_at: Mutex::new(None),
            test_workers: Vec::new(),
            test_contexts: Vec::new(),
        };

        let initializer: crate::worker::WorkerInitializer = Arc::new(|index| {
            PREFERRED_WORKER.with(|cell| cell.set(Some(index)));
        });

        for index in 0..size {
            let worker = Worker::new(
                Arc::clone(&scheduler.queues),
                Arc::clone(&scheduler.sticky_queues),
                Arc::clone(&scheduler.initial_tasks),
                Arc::clone(&scheduler.stats[index]),
                Arc::clone(&cfg),
                Some(Arc::clone(&initializer)),
            );
            let mut ctx = Context::new(index);
            ctx.init_local_first(cfg.ratio_check_local_first);
            if test_mode {
                scheduler.test_workers.push(worker);
                scheduler.test_contexts.push(ctx);
            } else {
                scheduler
                    .threads
                    .push(ThreadControl::spawn(index, Some(&cfg), WorkerThread {
                        worker,
                        ctx,
                    }));
            }
        }

        if !test_mode {
            let watcher = ConditionalWorker::new(
                Arc::clone(&scheduler.conditional_queue),
                Arc::clone(&cfg),
            );
            scheduler.watcher_thread = Some(ThreadControl::spawn(
                ThreadControl::UNDEFINED_THREAD_ID,
                Some(&cfg),
                ConditionalWorkerThread {
                    worker: watcher,
                    ctx: ConditionalWorkerContext::new(),
                },
            ));
        }
        scheduler
    }

    /// Schedule a task, resolving the worker by the selection policy.
    pub fn schedule(&self, task: T, opt: ScheduleOption) {
        let index = self.select_worker(&opt);
        self.schedule_at(task, index);
    }

    /// Schedule a task on the specified worker.
    ///
    /// Before `start()` the task is staged and drained into the proper
    /// queue on the worker's init step. Stealing may still move a
    /// non-sticky task to another worker.
    pub fn schedule_at(&self, task: T, index: usize) {
        assert!(index < self.size, "worker index out of range");
        if !self.started.load(Ordering::Acquire) {
            self.initial_tasks[index].lock().push(task);
            return;
        }
        if task.sticky() {
            self.sticky_queues[index].push(task);
        } else {
            self.queues[index].push(task);
        }
        if !self.cfg.busy_worker {
            if let Some(thread) = self.threads.get(index) {
                thread.activate();
            }
        }
    }

    /// Schedule a conditional task onto the watcher.
    pub fn schedule_conditional(&self, task: S) {
        self.conditional_queue.push(task);
        if let Some(watcher) = &self.watcher_thread {
            watcher.activate();
        }
    }

    /// Start the scheduler: wait for every worker's init barrier, then
    /// release the workers and the watcher. Not thread-safe.
    pub fn start(&self) {
        for thread in &self.threads {
            thread.wait_initialization();
        }
        if let Some(watcher) = &self.watcher_thread {
            watcher.wait_initialization();
        }
        for thread in &self.threads {
            thread.activate();
        }
        if let Some(watcher) = &self.watcher_thread {
            watcher.activate();
        }
        *self.started_at.lock() = Some(Instant::now());
        self.started.store(true, Ordering::Release);
    }

    /// Stop the scheduler and join the worker threads. Tasks still queued
    /// when the queues deactivate are dropped. Not thread-safe.
    pub fn stop(&mut self) {
        for queue in self.queues.iter() {
            queue.deactivate();
        }
        for queue in self.sticky_queues.iter() {
            queue.deactivate();
        }
        self.conditional_queue.deactivate();
        if let Some(watcher) = &mut self.watcher_thread {
            ensure_stopping_thread(watcher);
        }
        for thread in &mut self.threads {
            ensure_stopping_thread(thread);
        }
        self.started.store(false, Ordering::Release);
    }

    /// The number of workers (threads and queue pairs).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Snapshot of every worker's statistics.
    pub fn worker_stats(&self) -> Vec<WorkerStatSnapshot> {
        self.stats.iter().map(|stat| stat.snapshot()).collect()
    }

    /// Select the worker for a submission.
    pub fn select_worker(&self, opt: &ScheduleOption) -> usize {
        let index = if self.cfg.use_preferred_worker_for_current_thread {
            self.preferred_worker_for_current_thread()
        } else {
            self.next_worker()
        };
        if opt.policy == SchedulePolicy::Undefined {
            return index;
        }

        // the candidate is likely busy, so search from its neighbour for a
        // suspended worker
        let base = next(index, self.size);
        let mut current = base;
        loop {
            match self.threads.get(current) {
                Some(thread) if !thread.active() => return current,
                _ => {}
            }
            current = next(current, self.size);
            if current == base {
                return index;
            }
        }
    }

    /// Round-robin candidate index, atomically advanced.
    pub fn next_worker(&self) -> usize {
        self.next_worker_index.fetch_add(1, Ordering::Relaxed) % self.size
    }

    /// The preferred worker for the calling thread, assigned on first use.
    pub fn preferred_worker_for_current_thread(&self) -> usize {
        PREFERRED_WORKER.with(|cell| match cell.get() {
            Some(index) => index,
            None => {
                let index = self.next_worker();
                cell.set(Some(index));
                tracing::debug!(index, "worker assigned for submitting thread");
                index
            }
        })
    }

    /// Accessor to the local queues for testing purposes.
    pub fn queues(&self) -> &[TaskQueue<T>] {
        &self.queues
    }

    /// Accessor to the sticky queues for testing purposes.
    pub fn sticky_queues(&self) -> &[TaskQueue<T>] {
        &self.sticky_queues
    }

    /// Accessor to the conditional queue for testing purposes.
    pub fn conditional_queue(&self) -> &TaskQueue<S> {
        &self.conditional_queue
    }

    /// Accessor to the workers for testing purposes (test mode only).
    pub fn workers(&self) -> &[Worker<T>] {
        &self.test_workers
    }

    /// Accessor to the worker contexts for testing purposes (test mode
    /// only).
    pub fn contexts_mut(&mut self) -> &mut [Context] {
        &mut self.test_contexts
    }

    /// Drive one poll step of a test-mode worker.
    pub fn process_next_for_test(&mut self, index: usize) -> bool {
        let worker = self.test_workers[index].clone();
        worker.process_next(&mut self.test_contexts[index])
    }

    /// Print worker indices, thread states, queue sizes, and an itemized
    /// dump of queued tasks.
    pub fn print_diagnostic(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        if !self.started.load(Ordering::Acquire) {
            // print nothing if not started yet
            return Ok(());
        }
        writeln!(out, "worker_count: {}", self.size)?;
        writeln!(out, "workers:")?;
        for index in 0..self.size {
            writeln!(out, "  - worker_index: {}", index)?;
            if let Some(thread) = self.threads.get(index) {
                writeln!(
                    out,
                    "    thread: active={} completed={}",
                    thread.active(),
                    thread.completed()
                )?;
            }
            writeln!(out, "    queues:")?;
            writeln!(out, "      local:")?;
            print_queue_diagnostic(&self.queues[index], out)?;
            writeln!(out, "      sticky:")?;
            print_queue_diagnostic(&self.sticky_queues[index], out)?;
        }
        writeln!(out, "conditional_worker:")?;
        if let Some(watcher) = &self.watcher_thread {
            writeln!(
                out,
                "  thread: active={} completed={}",
                watcher.active(),
                watcher.completed()
            )?;
        }
        writeln!(out, "  queue:")?;
        print_queue_diagnostic(&self.conditional_queue, out)?;
        Ok(())
    }

    /// Emit the worker statistics as a JSON object.
    pub fn print_worker_stats(&self, out: &mut dyn std::fmt::Write) -> std::fmt::Result {
        #[derive(Serialize)]
        struct WorkerEntry {
            worker_index: usize,
            #[serde(flatten)]
            stat: WorkerStatSnapshot,
        }
        #[derive(Serialize)]
        struct Report {
            duration_us: u128,
            worker_count: usize,
            workers: Vec<WorkerEntry>,
        }
        let started_at = *self.started_at.lock();
        let duration_us = started_at.map(|at| at.elapsed().as_micros()).unwrap_or(0);
        let report = Report {
            duration_us,
            worker_count: self.size,
            workers: self
                .stats
                .iter()
                .enumerate()
                .map(|(worker_index, stat)| WorkerEntry {
                    worker_index,
                    stat: stat.snapshot(),
                })
                .collect(),
        };
        let json = serde_json::to_string(&report).map_err(|_| std::fmt::Error)?;
        out.write_str(&json)
    }
}

fn ensure_stopping_thread(thread: &mut ThreadControl) {
    while !thread.completed() {
        // in case the thread suspends on its cv, wake it until completion
        thread.activate();
        std::thread::sleep(Duration::from_millis(1));
    }
    thread.join();
}

fn next(index: usize, size: usize) -> usize {
    if index + 1 >= size {
        0
    } else {
        index + 1
    }
}

fn print_queue_diagnostic<Q: std::fmt::Debug>(
    queue: &TaskQueue<Q>,
    out: &mut dyn std::fmt::Write,
) -> std::fmt::Result {
    writeln!(out, "        task_count: {}", queue.size())?;
    if queue.empty() {
        return Ok(());
    }
    writeln!(out, "        tasks:")?;
    let backup: TaskQueue<Q> = TaskQueue::new();
    while let Some(task) = queue.try_pop() {
        writeln!(out, "          - {:?}", task)?;
        backup.push(task);
    }
    while let Some(task) = backup.try_pop() {
        queue.push(task);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Ratio;
    use crate::task::{BasicConditionalTask, BasicTask};
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    type Scheduler = TaskScheduler<BasicTask, BasicConditionalTask>;

    fn small_cfg(threads: usize) -> SchedulerConfig {
        SchedulerConfig {
            thread_count: threads,
            // keep tests snappy: short suspension, no polling sleep
            worker_try_count: 10,
            worker_suspend_timeout: 10_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_basic_dispatch() {
        let mut sched = Scheduler::new(small_cfg(1));
        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);
        sched.start();
        sched.schedule(
            BasicTask::new(move |_| flag.store(true, Ordering::SeqCst)),
            ScheduleOption::default(),
        );
        std::thread::sleep(Duration::from_millis(100));
        sched.stop();
        assert!(executed.load(Ordering::SeqCst));
        let stats = sched.worker_stats();
        assert_eq!(stats[0].count, 1);
        assert_eq!(stats[0].steal, 0);
    }

    #[test]
    fn test_submission_before_start_is_staged_then_run() {
        let mut sched = Scheduler::new(small_cfg(2));
        let hits = Arc::new(AtomicUsize::new(0));
        for index in 0..2 {
            let h = Arc::clone(&hits);
            sched.schedule_at(
                BasicTask::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
                index,
            );
            let h = Arc::clone(&hits);
            sched.schedule_at(
                BasicTask::sticky(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
                index,
            );
        }
        sched.start();
        let mut waited = 0;
        while hits.load(Ordering::SeqCst) < 4 && waited < 2000 {
            std::thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        sched.stop();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_executions_equal_submissions() {
        let mut sched = Scheduler::new(small_cfg(4));
        sched.start();
        let hits = Arc::new(AtomicUsize::new(0));
        let submissions = 200;
        for _ in 0..submissions {
            let h = Arc::clone(&hits);
            sched.schedule(
                BasicTask::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
                ScheduleOption::default(),
            );
        }
        let mut waited = 0;
        while hits.load(Ordering::SeqCst) < submissions && waited < 5000 {
            std::thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        sched.stop();
        assert_eq!(hits.load(Ordering::SeqCst), submissions);
        let total: u64 = sched.worker_stats().iter().map(|s| s.count).sum();
        assert_eq!(total, submissions as u64);
    }

    #[test]
    fn test_conditional_task_runs_when_check_turns_true() {
        let mut sched = Scheduler::new(small_cfg(1));
        sched.start();
        let gate = Arc::new(AtomicBool::new(false));
        let executed = Arc::new(AtomicBool::new(false));
        {
            let gate = Arc::clone(&gate);
            let executed = Arc::clone(&executed);
            sched.schedule_conditional(BasicConditionalTask::new(
                move || gate.load(Ordering::SeqCst),
                move || executed.store(true, Ordering::SeqCst),
            ));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(!executed.load(Ordering::SeqCst));
        gate.store(true, Ordering::SeqCst);
        let mut waited = 0;
        while !executed.load(Ordering::SeqCst) && waited < 2000 {
            std::thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        sched.stop();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sticky_ordering_in_test_mode() {
        // sticky and local tasks submitted to one worker run alternately
        // under ratio 1/2, sticky first
        let cfg = SchedulerConfig {
            thread_count: 1,
            ratio_check_local_first: Ratio::new(1, 2),
            ..Default::default()
        };
        let mut sched = Scheduler::new_for_test(cfg);
        // test mode: queues are live immediately, no staging
        sched.started.store(true, Ordering::Release);

        let order = Arc::new(Mutex::new(Vec::new()));
        for (tag, sticky) in [("A", true), ("B", false), ("C", true), ("D", false)] {
            let order = Arc::clone(&order);
            let task = if sticky {
                BasicTask::sticky(move |_| order.lock().push(tag))
            } else {
                BasicTask::new(move |_| order.lock().push(tag))
            };
            sched.schedule_at(task, 0);
        }
        for _ in 0..4 {
            assert!(sched.process_next_for_test(0));
        }
        assert_eq!(*order.lock(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_heterogeneous_task_kinds_through_one_queue() {
        // distinct task kinds flow through one queue as an enum; dispatch
        // within each kind stays static
        #[derive(Debug)]
        enum ServerTask {
            Flag(Arc<AtomicBool>),
            Count(Arc<AtomicUsize>),
        }
        impl crate::task::Task for ServerTask {
            fn run(&mut self, _ctx: &mut Context) {
                match self {
                    ServerTask::Flag(flag) => flag.store(true, Ordering::SeqCst),
                    ServerTask::Count(count) => {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }

        let mut sched: TaskScheduler<ServerTask, BasicConditionalTask> =
            TaskScheduler::new(small_cfg(1));
        sched.start();
        let flag = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));
        sched.schedule(ServerTask::Flag(Arc::clone(&flag)), ScheduleOption::default());
        sched.schedule(
            ServerTask::Count(Arc::clone(&count)),
            ScheduleOption::default(),
        );
        let mut waited = 0;
        while (!flag.load(Ordering::SeqCst) || count.load(Ordering::SeqCst) < 1) && waited < 2000
        {
            std::thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        sched.stop();
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_round_robin_next_worker() {
        let sched = Scheduler::new_for_test(small_cfg(3));
        assert_eq!(sched.next_worker(), 0);
        assert_eq!(sched.next_worker(), 1);
        assert_eq!(sched.next_worker(), 2);
        assert_eq!(sched.next_worker(), 0);
    }

    #[test]
    fn test_select_worker_suspended_policy_falls_back() {
        // test mode has no threads, so the ring walk finds none suspended
        // and falls back to the default index
        let sched = Scheduler::new_for_test(small_cfg(3));
        let opt = ScheduleOption::new(SchedulePolicy::SuspendedWorker);
        let index = sched.select_worker(&opt);
        assert!(index < 3);
    }

    #[test]
    fn test_stop_drops_queued_tasks() {
        let mut sched = Scheduler::new(SchedulerConfig {
            thread_count: 1,
            busy_worker: true,
            ..Default::default()
        });
        sched.start();
        sched.stop();
        // queues are inactive now; a late submission is silently dropped
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        sched.schedule_at(
            BasicTask::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
            0,
        );
        assert_eq!(sched.queues()[0].size(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_worker_stats_json() {
        let mut sched = Scheduler::new(small_cfg(2));
        sched.start();
        let mut out = String::new();
        sched.print_worker_stats(&mut out).unwrap();
        assert!(out.contains("\"worker_count\":2"));
        assert!(out.contains("\"wakeup_run\""));
        sched.stop();
    }

    #[test]
    fn test_print_diagnostic_requeues_tasks() {
        let mut sched = Scheduler::new_for_test(small_cfg(1));
        sched.started.store(true, Ordering::Release);
        sched.schedule_at(BasicTask::new(|_| {}), 0);
        let mut out = String::new();
        sched.print_diagnostic(&mut out).unwrap();
        assert!(out.contains("worker_count: 1"));
        assert!(out.contains("task_count: 1"));
        // the dump consumed and re-queued the task
        assert_eq!(sched.queues()[0].size(), 1);
    }

    #[test]
    fn test_suspended_workers_wake_on_submission() {
        let mut sched = Scheduler::new(SchedulerConfig {
            thread_count: 2,
            worker_try_count: 1,
            worker_suspend_timeout: 60_000_000,
            ..Default::default()
        });
        sched.start();
        // give the workers time to run out of polls and suspend
        std::thread::sleep(Duration::from_millis(100));
        let hits = Arc::new(AtomicUsize::new(0));
        for index in 0..2 {
            let h = Arc::clone(&hits);
            sched.schedule_at(
                BasicTask::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
                index,
            );
        }
        let mut waited = 0;
        while hits.load(Ordering::SeqCst) < 2 && waited < 2000 {
            std::thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        sched.stop();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let stats = sched.worker_stats();
        assert!(stats.iter().any(|s| s.suspend > 0));
        assert!(stats.iter().any(|s| s.wakeup_run > 0));
    }
}
