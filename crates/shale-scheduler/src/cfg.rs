//! Scheduler configuration.
//!
//! All settings are immutable once the scheduler is constructed; the
//! scheduler copies the configuration value at creation time.

use std::fmt;

/// A non-negative rational number in `[0, 1)`.
///
/// Used for the `ratio_check_local_first` fairness knob: out of every
/// `denominator` polls, `numerator` of them check the local queue before the
/// sticky queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    numerator: u64,
    denominator: u64,
}

impl Ratio {
    /// Create a new ratio.
    ///
    /// Panics if `denominator` is zero or the ratio is not below one.
    pub fn new(numerator: u64, denominator: u64) -> Self {
        assert!(denominator != 0, "ratio denominator must be non-zero");
        assert!(numerator < denominator, "ratio must be in [0, 1)");
        Ratio {
            numerator,
            denominator,
        }
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Task scheduler configuration.
///
/// The defaults match a mid-sized database server host; tests typically
/// shrink `thread_count` and disable suspension-related knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads (and local/sticky queue pairs).
    pub thread_count: usize,

    /// Bind worker N to CPU core `initial_core + N` when no NUMA option
    /// applies.
    pub core_affinity: bool,

    /// First CPU core used for core affinity binding.
    pub initial_core: usize,

    /// Spread workers over NUMA nodes round-robin.
    pub assign_numa_nodes_uniformly: bool,

    /// Bind every worker to this NUMA node, overriding the other affinity
    /// options.
    pub force_numa_node: Option<usize>,

    /// Allow workers to steal from peers' local queues.
    pub stealing_enabled: bool,

    /// Cache a preferred worker index per submitting thread instead of
    /// round-robin selection.
    pub use_preferred_worker_for_current_thread: bool,

    /// How often, out of M polls, the local queue is checked before the
    /// sticky queue. Sticky has priority otherwise.
    pub ratio_check_local_first: Ratio,

    /// The worker retries its own queues `stealing_wait * thread_count`
    /// times before attempting to steal.
    pub stealing_wait: usize,

    /// Microseconds spent after an unsuccessful poll: 0 = none, 1 =
    /// cooperative yield, otherwise sleep `value - 2` microseconds.
    pub task_polling_wait: u64,

    /// When true, workers never suspend.
    pub busy_worker: bool,

    /// Microseconds the conditional watcher sleeps between scans while some
    /// conditions are still false.
    pub watcher_interval: u64,

    /// Number of empty polls before a worker suspends.
    pub worker_try_count: usize,

    /// Microseconds a suspended worker waits before re-polling on its own.
    pub worker_suspend_timeout: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            thread_count: 5,
            core_affinity: true,
            initial_core: 1,
            assign_numa_nodes_uniformly: true,
            force_numa_node: None,
            stealing_enabled: true,
            use_preferred_worker_for_current_thread: false,
            ratio_check_local_first: Ratio::new(1, 10),
            stealing_wait: 1,
            task_polling_wait: 0,
            busy_worker: false,
            watcher_interval: 1000,
            worker_try_count: 1000,
            worker_suspend_timeout: 1_000_000,
        }
    }
}

impl fmt::Display for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "thread_count:{} core_affinity:{} initial_core:{} \
             assign_numa_nodes_uniformly:{} force_numa_node:{} \
             stealing_enabled:{} use_preferred_worker_for_current_thread:{} \
             ratio_check_local_first:{} stealing_wait:{} task_polling_wait:{} \
             busy_worker:{} watcher_interval:{} worker_try_count:{} \
             worker_suspend_timeout:{}",
            self.thread_count,
            self.core_affinity,
            self.initial_core,
            self.assign_numa_nodes_uniformly,
            self.force_numa_node
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unspecified".to_string()),
            self.stealing_enabled,
            self.use_preferred_worker_for_current_thread,
            self.ratio_check_local_first,
            self.stealing_wait,
            self.task_polling_wait,
            self.busy_worker,
            self.watcher_interval,
            self.worker_try_count,
            self.worker_suspend_timeout,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_accessors() {
        let r = Ratio::new(1, 2);
        assert_eq!(r.numerator(), 1);
        assert_eq!(r.denominator(), 2);
        assert_eq!(r.to_string(), "1/2");
    }

    #[test]
    fn test_ratio_zero_is_valid() {
        let r = Ratio::new(0, 10);
        assert_eq!(r.numerator(), 0);
    }

    #[test]
    #[should_panic]
    fn test_ratio_one_rejected() {
        let _ = Ratio::new(2, 2);
    }

    #[test]
    #[should_panic]
    fn test_ratio_zero_denominator_rejected() {
        let _ = Ratio::new(0, 0);
    }

    #[test]
    fn test_default_config() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.thread_count, 5);
        assert!(cfg.stealing_enabled);
        assert!(!cfg.busy_worker);
        assert_eq!(cfg.ratio_check_local_first, Ratio::new(1, 10));
        assert_eq!(cfg.worker_suspend_timeout, 1_000_000);
    }

    #[test]
    fn test_config_display_mentions_every_knob() {
        let cfg = SchedulerConfig::default();
        let s = cfg.to_string();
        assert!(s.contains("thread_count:5"));
        assert!(s.contains("force_numa_node:unspecified"));
        assert!(s.contains("ratio_check_local_first:1/10"));
    }
}
