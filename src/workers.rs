//! Background workers (spec §4.11: periodic placement re-evaluation, trash
//! cleanup, metadata-dump triggering, load statistics) plus the generic
//! task manager that breaks long operations (recursive remove, snapshot,
//! recursive setgoal/settrashtime) into bounded-per-tick units.
//!
//! The incremental-batch shape for long tasks is generalized from a
//! resumable cursor over a subtree, doing bounded units per tick (spec
//! §C.8); [`crate::snapshot`] reuses the same [`TaskManager`].

use std::collections::VecDeque;

use crate::namespace::Namespace;

/// One incrementally-executed long operation. `step` must do at most
/// `budget` units of work and return whether it has finished.
pub trait Task {
    fn step(&mut self, budget: usize) -> bool;
    fn name(&self) -> &str;
}

/// Round-robins registered [`Task`]s, running each one tick's worth of
/// work per call to [`TaskManager::tick`] rather than draining one task to
/// completion before starting the next — this is what keeps a huge
/// recursive remove from starving the event loop (spec §4.11 "Long
/// tasks").
#[derive(Default)]
pub struct TaskManager {
    queue: VecDeque<Box<dyn Task>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    pub fn submit(&mut self, task: Box<dyn Task>) {
        self.queue.push_back(task);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Advances the task at the front of the queue by `budget` units;
    /// requeues it at the back if still incomplete, otherwise reports its
    /// name as completed.
    pub fn tick(&mut self, budget: usize) -> Option<String> {
        let mut task = self.queue.pop_front()?;
        if task.step(budget) {
            Some(task.name().to_owned())
        } else {
            self.queue.push_back(task);
            None
        }
    }
}

/// Fixed-size ring of periodic load samples feeding placement's load
/// penalty (spec §4.8), a narrow slice of a periodic-sampling idea (spec
/// §C.9), not the full charts/RRD subsystem.
#[derive(Debug)]
pub struct LoadStats {
    samples: VecDeque<u32>,
    capacity: usize,
}

impl LoadStats {
    pub fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    pub fn sample(&mut self, value: u32) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn average(&self) -> u32 {
        if self.samples.is_empty() {
            return 0;
        }
        (self.samples.iter().map(|&v| v as u64).sum::<u64>() / self.samples.len() as u64) as u32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Periodic maintenance driven from [`crate::eventloop::EventLoop`]'s
/// second timers.
pub struct Workers {
    pub load_stats: LoadStats,
    pub task_manager: TaskManager,
    last_dump_request: Option<i64>,
    min_dump_period_secs: i64,
}

impl Workers {
    pub fn new(min_dump_period_secs: i64) -> Self {
        Self {
            load_stats: LoadStats::new(60),
            task_manager: TaskManager::new(),
            last_dump_request: None,
            min_dump_period_secs,
        }
    }

    /// Trash sweep (spec §4.10/§4.11): purges every expired trash entry.
    pub fn run_trash_gc(&mut self, namespace: &mut Namespace, now: i64) -> Vec<u32> {
        namespace.purge_expired_trash(now)
    }

    /// Rate-limited trigger for [`crate::dumper`]'s metadata save, honoring
    /// `METADATA_SAVE_REQUEST_MIN_PERIOD` (spec §4.12) so repeated
    /// shadow-initiated save requests don't thrash the dumper.
    pub fn request_dump(&mut self, now: i64) -> bool {
        if let Some(last) = self.last_dump_request {
            if now - last < self.min_dump_period_secs {
                return false;
            }
        }
        self.last_dump_request = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingTask {
        remaining: usize,
        name: String,
    }

    impl Task for CountingTask {
        fn step(&mut self, budget: usize) -> bool {
            self.remaining = self.remaining.saturating_sub(budget);
            self.remaining == 0
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn task_manager_round_robins_and_requeues_unfinished_tasks() {
        let mut tm = TaskManager::new();
        tm.submit(Box::new(CountingTask { remaining: 3, name: "a".into() }));
        tm.submit(Box::new(CountingTask { remaining: 1, name: "b".into() }));

        assert_eq!(tm.tick(1), None); // "a" still has 2 left
        assert_eq!(tm.tick(1), Some("b".to_owned())); // "b" finishes in one unit
        assert_eq!(tm.tick(1), None); // "a" has 1 left
        assert_eq!(tm.tick(1), Some("a".to_owned()));
        assert_eq!(tm.pending(), 0);
    }

    #[test]
    fn load_stats_ring_drops_oldest_sample_past_capacity() {
        let mut stats = LoadStats::new(2);
        stats.sample(10);
        stats.sample(20);
        stats.sample(30);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.average(), 25);
    }

    #[test]
    fn dump_requests_are_rate_limited() {
        let mut workers = Workers::new(10);
        assert!(workers.request_dump(0));
        assert!(!workers.request_dump(5));
        assert!(workers.request_dump(11));
    }
}
