//! Multi-producer multi-consumer task queue.
//!
//! One local and one sticky queue exist per worker, plus one shared queue
//! for conditional tasks. Any thread may push; the owning worker pops, and
//! peers pop from local queues when stealing. Ordering within a single
//! producer is preserved; ordering across producers is unspecified.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::RwLock;

/// An unbounded FIFO of movable tasks with an active flag.
///
/// Workers treat "inactive and empty" as their exit condition; deactivation
/// is how `stop()` signals the worker pool to drain and exit. A push onto a
/// deactivated queue silently drops the task.
pub struct TaskQueue<T> {
    inner: RwLock<SegQueue<T>>,
    active: AtomicBool,
}

impl<T> TaskQueue<T> {
    /// Create an empty, active queue.
    pub fn new() -> Self {
        TaskQueue {
            inner: RwLock::new(SegQueue::new()),
            active: AtomicBool::new(true),
        }
    }

    /// Enqueue a task. Never blocks. Dropped silently if the queue has been
    /// deactivated.
    pub fn push(&self, task: T) {
        if !self.active() {
            return;
        }
        self.inner.read().push(task);
    }

    /// Dequeue the oldest task, if any. Never blocks.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.read().pop()
    }

    /// Approximate number of queued tasks.
    pub fn size(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the queue is currently empty.
    pub fn empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drop all queued tasks.
    pub fn clear(&self) {
        let guard = self.inner.read();
        while guard.pop().is_some() {}
    }

    /// Tear down and re-create the backing storage in place.
    ///
    /// Called on the worker thread after it has bound to its NUMA node so
    /// segment allocation happens locally. Any tasks still queued are
    /// discarded; the queue is expected to be out of service at this point.
    pub fn reconstruct(&self) {
        *self.inner.write() = SegQueue::new();
    }

    /// Read the active flag.
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clear the active flag, signalling workers to exit once drained.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("size", &self.size())
            .field("active", &self.active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_pop_fifo() {
        let q = TaskQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_size_and_empty() {
        let q = TaskQueue::new();
        assert!(q.empty());
        q.push("a");
        q.push("b");
        assert_eq!(q.size(), 2);
        assert!(!q.empty());
        q.clear();
        assert!(q.empty());
    }

    #[test]
    fn test_deactivate_drops_pushes() {
        let q = TaskQueue::new();
        assert!(q.active());
        q.push(1);
        q.deactivate();
        assert!(!q.active());
        q.push(2);
        // the pre-deactivation element is still poppable, the dropped one is
        // not
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_reconstruct_discards_contents() {
        let q = TaskQueue::new();
        q.push(1);
        q.reconstruct();
        assert!(q.empty());
        assert!(q.active());
        q.push(2);
        assert_eq!(q.try_pop(), Some(2));
    }

    #[test]
    fn test_concurrent_producers_and_stealers() {
        let q = Arc::new(TaskQueue::new());
        let producers = 4;
        let per_producer = 500;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..per_producer {
                        q.push(p * per_producer + i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    let mut popped = 0usize;
                    for _ in 0..(producers * per_producer) {
                        if q.try_pop().is_some() {
                            popped += 1;
                        }
                    }
                    popped
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        let mut total: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();
        while q.try_pop().is_some() {
            total += 1;
        }
        assert_eq!(total, producers * per_producer);
    }

    #[test]
    fn test_single_producer_order_preserved() {
        let q = Arc::new(TaskQueue::new());
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for i in 0i64..1000 {
                    q.push(i);
                }
            })
        };
        producer.join().unwrap();
        let mut last = -1i64;
        while let Some(v) = q.try_pop() {
            assert!(v > last);
            last = v;
        }
        assert_eq!(last, 999);
    }
}
