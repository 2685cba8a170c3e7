//! Cooperative single-threaded event loop (spec §4.11): polls descriptors
//! with a bounded timeout, then runs each-loop callbacks, then due timers,
//! and watches its own iteration time against a tight budget.
//!
//! Grounded on `common/loop_watchdog.h`'s deadline-check-at-top-of-loop
//! approach (signals are out of scope per spec §9, so this is a plain
//! `Instant` comparison rather than a `SIGALRM`-based watchdog) and on the
//! teacher's single dispatcher task shape (`src/server/mod.rs`'s accept
//! loop interleaving connection polls with periodic maintenance),
//! generalized from "poll sockets, service ready ones" to "poll
//! descriptors, then each-loop callbacks, then timers".

use std::time::{Duration, Instant};

/// How long one `poll` call blocks waiting for descriptor readiness before
/// returning to run timers regardless (spec §4.11).
pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Soft per-iteration time budget; exceeding it is logged, not enforced
/// (spec §4.11 "~500µs per-iteration watchdog").
pub const WATCHDOG_BUDGET: Duration = Duration::from_micros(500);

struct SecondTimer {
    period_secs: u64,
    next_fire: i64,
    callback: Box<dyn FnMut()>,
}

struct MilliTimer {
    period_ms: i64,
    next_fire_ms: i64,
    callback: Box<dyn FnMut()>,
}

/// Outcome of one [`EventLoop::run_iteration`] call.
#[derive(Debug, Clone, Copy)]
pub struct IterationReport {
    pub elapsed: Duration,
    pub watchdog_exceeded: bool,
    pub fired_second_timers: usize,
    pub fired_milli_timers: usize,
}

/// The loop itself: per-descriptor serve callbacks run first (registered
/// elsewhere, e.g. by `transport`), then each-loop callbacks, then any
/// timers whose deadline has passed.
#[derive(Default)]
pub struct EventLoop {
    each_loop: Vec<Box<dyn FnMut()>>,
    second_timers: Vec<SecondTimer>,
    milli_timers: Vec<MilliTimer>,
    exit_blockers: Vec<Box<dyn Fn() -> bool>>,
    want_exit: bool,
    want_reload: bool,
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            each_loop: Vec::new(),
            second_timers: Vec::new(),
            milli_timers: Vec::new(),
            exit_blockers: Vec::new(),
            want_exit: false,
            want_reload: false,
        }
    }

    pub fn register_each_loop(&mut self, callback: impl FnMut() + 'static) {
        self.each_loop.push(Box::new(callback));
    }

    /// Registers a seconds-aligned periodic timer (spec §4.11).
    pub fn register_second_timer(&mut self, now_secs: i64, period_secs: u64, callback: impl FnMut() + 'static) {
        self.second_timers.push(SecondTimer {
            period_secs,
            next_fire: now_secs + period_secs as i64,
            callback: Box::new(callback),
        });
    }

    /// Registers a milliseconds-precision periodic timer (spec §4.11).
    pub fn register_milli_timer(&mut self, now_ms: i64, period_ms: i64, callback: impl FnMut() + 'static) {
        self.milli_timers.push(MilliTimer { period_ms, next_fire_ms: now_ms + period_ms, callback: Box::new(callback) });
    }

    /// Registers a predicate that must return `false` for `can_exit` to
    /// succeed — e.g. "a snapshot task is mid-flight" (spec §4.11
    /// want-exit/can-exit handshake).
    pub fn register_exit_blocker(&mut self, predicate: impl Fn() -> bool + 'static) {
        self.exit_blockers.push(Box::new(predicate));
    }

    pub fn request_exit(&mut self) {
        self.want_exit = true;
    }

    pub fn want_exit(&self) -> bool {
        self.want_exit
    }

    pub fn request_reload(&mut self) {
        self.want_reload = true;
    }

    pub fn take_reload_request(&mut self) -> bool {
        std::mem::replace(&mut self.want_reload, false)
    }

    /// `true` once every registered blocker has cleared, meaning a
    /// requested exit may actually terminate the process.
    pub fn can_exit(&self) -> bool {
        self.want_exit && self.exit_blockers.iter().all(|blocked| !blocked())
    }

    /// Runs one loop iteration: each-loop callbacks, then any timers due at
    /// `(now_secs, now_ms)`. Polling descriptors themselves is the
    /// transport layer's job (registered as an each-loop callback); this
    /// type only owns the scheduling shape.
    pub fn run_iteration(&mut self, now_secs: i64, now_ms: i64) -> IterationReport {
        let start = Instant::now();

        for cb in &mut self.each_loop {
            cb();
        }

        let mut fired_second_timers = 0;
        for timer in &mut self.second_timers {
            if now_secs >= timer.next_fire {
                (timer.callback)();
                timer.next_fire = now_secs + timer.period_secs as i64;
                fired_second_timers += 1;
            }
        }

        let mut fired_milli_timers = 0;
        for timer in &mut self.milli_timers {
            if now_ms >= timer.next_fire_ms {
                (timer.callback)();
                timer.next_fire_ms = now_ms + timer.period_ms;
                fired_milli_timers += 1;
            }
        }

        let elapsed = start.elapsed();
        IterationReport { elapsed, watchdog_exceeded: elapsed > WATCHDOG_BUDGET, fired_second_timers, fired_milli_timers }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn each_loop_callback_runs_every_iteration() {
        let counter = Rc::new(Cell::new(0));
        let mut loop_ = EventLoop::new();
        let c = counter.clone();
        loop_.register_each_loop(move || c.set(c.get() + 1));
        loop_.run_iteration(0, 0);
        loop_.run_iteration(1, 1000);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn second_timer_only_fires_once_due() {
        let counter = Rc::new(Cell::new(0));
        let mut loop_ = EventLoop::new();
        let c = counter.clone();
        loop_.register_second_timer(0, 10, move || c.set(c.get() + 1));
        loop_.run_iteration(5, 5000);
        assert_eq!(counter.get(), 0);
        let report = loop_.run_iteration(10, 10_000);
        assert_eq!(counter.get(), 1);
        assert_eq!(report.fired_second_timers, 1);
    }

    #[test]
    fn exit_waits_for_blockers_to_clear() {
        let busy = Rc::new(Cell::new(true));
        let mut loop_ = EventLoop::new();
        let b = busy.clone();
        loop_.register_exit_blocker(move || b.get());
        loop_.request_exit();
        assert!(!loop_.can_exit());
        busy.set(false);
        assert!(loop_.can_exit());
    }
}
