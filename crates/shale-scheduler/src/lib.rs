//! Work-stealing task scheduler for the shale server runtime.
//!
//! The scheduler multiplexes movable task values across a fixed pool of OS
//! worker threads. Each worker owns a local queue and a sticky queue; a
//! single shared conditional queue feeds a watcher thread that defers tasks
//! until their predicate first turns true.
//!
//! ## Design
//!
//! 1. **Submission** resolves a worker index (round-robin, caller-preferred,
//!    or suspended-worker policy) and pushes onto that worker's local or
//!    sticky queue. Tasks submitted before `start()` are staged and drained
//!    on each worker's init step.
//! 2. **Workers** poll sticky and local queues (order governed by the
//!    `ratio_check_local_first` fairness knob), then steal from peers'
//!    local queues. Sticky tasks are never stolen.
//! 3. **Suspension** is cooperative: an idle worker parks on its thread's
//!    condition variable and every submission path wakes it.
//!
//! Task bodies run to completion on the worker that picks them up. A panic
//! inside a task is trapped at the worker boundary, logged, and never
//! terminates the process.

pub mod cfg;
pub mod conditional;
pub mod context;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod task;
pub mod thread;
pub mod worker;

pub use cfg::{Ratio, SchedulerConfig};
pub use conditional::{ConditionalWorker, ConditionalWorkerContext};
pub use context::Context;
pub use queue::TaskQueue;
pub use scheduler::{SchedulePolicy, ScheduleOption, TaskScheduler};
pub use stats::{WorkerStat, WorkerStatSnapshot};
pub use task::{BasicConditionalTask, BasicTask, ConditionalTask, Task};
pub use thread::{ThreadControl, ThreadHandle, ThreadInitInfo};
pub use worker::Worker;
