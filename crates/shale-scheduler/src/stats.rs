//! Per-worker execution statistics.
//!
//! Each stat block is written only by its worker and read from diagnostics
//! threads; stale reads are acceptable, so counters use relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters maintained by one worker.
#[derive(Debug, Default)]
pub struct WorkerStat {
    /// Total tasks executed (normal, sticky, and stolen).
    count: AtomicU64,
    /// Sticky tasks executed.
    sticky: AtomicU64,
    /// Tasks stolen from peers and executed here.
    steal: AtomicU64,
    /// Times the worker woke from suspension and ran at least one task.
    wakeup_run: AtomicU64,
    /// Times the worker suspended.
    suspend: AtomicU64,
}

impl WorkerStat {
    pub(crate) fn add_count(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_sticky(&self) {
        self.sticky.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_steal(&self) {
        self.steal.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_wakeup_run(&self) {
        self.wakeup_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_suspend(&self) {
        self.suspend.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a consistent-enough copy of the counters.
    pub fn snapshot(&self) -> WorkerStatSnapshot {
        WorkerStatSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sticky: self.sticky.load(Ordering::Relaxed),
            steal: self.steal.load(Ordering::Relaxed),
            wakeup_run: self.wakeup_run.load(Ordering::Relaxed),
            suspend: self.suspend.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a worker's counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct WorkerStatSnapshot {
    pub count: u64,
    pub sticky: u64,
    pub steal: u64,
    pub wakeup_run: u64,
    pub suspend: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stat = WorkerStat::default();
        stat.add_count();
        stat.add_count();
        stat.add_sticky();
        stat.add_steal();
        stat.add_wakeup_run();
        stat.add_suspend();
        let snap = stat.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.sticky, 1);
        assert_eq!(snap.steal, 1);
        assert_eq!(snap.wakeup_run, 1);
        assert_eq!(snap.suspend, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = WorkerStatSnapshot {
            count: 3,
            sticky: 1,
            steal: 0,
            wakeup_run: 2,
            suspend: 2,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"count\":3"));
        assert!(json.contains("\"wakeup_run\":2"));
    }
}
