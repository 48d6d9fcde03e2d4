//! Per-timing runner.
//!
//! Holds the active operations of one timing and advances each once per
//! tick. Items added during a run are deferred to the next run, and removal
//! keeps the order of the survivors.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::api::error::{Fault, TaskError};
use crate::api::timing::LoopTiming;
use crate::api::unobserved::FaultReporter;
use crate::sync::atomics::{AtomicCounter, AtomicGauge};
use crate::sync::mutex::Mutex;
use crate::ft_emit_detail;

type Items = Vec<Arc<dyn LoopItem>>;

/// An operation driven by a runner.
pub trait LoopItem: Send + Sync {
    /// Advance once. Return false when done; the runner then unlinks it.
    fn move_next(&self) -> bool;

    /// Receives the runner's reference after the item left the runner.
    ///
    /// Called after the run that removed it has finished, also for items
    /// removed by a panic or by [`LoopRunner::clear`].
    fn unlinked(self: Arc<Self>) {}
}

/// Active operations for one timing.
pub struct LoopRunner {
    /// The timing this runner advances.
    timing: LoopTiming,

    /// Items advanced on the next run, in scheduling order.
    active: Mutex<Items>,

    /// Items added since the last run started.
    incoming: Mutex<Items>,

    /// Length of the active list, including while a run has it checked out.
    linked: AtomicUsize,

    /// Re-entrancy guard for `run`.
    running: AtomicBool,

    /// Where panicking items are reported.
    reporter: Arc<FaultReporter>,

    /// Items currently held (active plus incoming).
    count: AtomicGauge,

    /// Completed runs.
    runs: AtomicCounter,
}

/// State of one run. Dropping it puts the unvisited items back and
/// releases the re-entrancy guard, so a panic escaping a run leaves the
/// runner usable.
struct RunState<'a> {
    runner: &'a LoopRunner,
    pending: std::vec::IntoIter<Arc<dyn LoopItem>>,
    survivors: Items,
    removed: Items,
}

impl Drop for RunState<'_> {
    fn drop(&mut self) {
        let runner = self.runner;
        let mut items = std::mem::take(&mut self.survivors);
        items.extend(self.pending.by_ref());
        let survivors = items.len();
        *runner.active.lock() = items;
        runner.linked.store(survivors, Ordering::Relaxed);
        let pending = runner.incoming.lock().len();
        runner.count.set(survivors + pending);
        runner.runs.increment();
        runner.running.store(false, Ordering::Release);
    }
}

impl LoopRunner {
    /// Create a runner for `timing`.
    pub fn new(timing: LoopTiming, capacity: usize, reporter: Arc<FaultReporter>) -> Self {
        Self {
            timing,
            active: Mutex::new(Vec::with_capacity(capacity)),
            incoming: Mutex::new(Vec::new()),
            linked: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            reporter,
            count: AtomicGauge::new(0),
            runs: AtomicCounter::new(0),
        }
    }

    /// The timing this runner advances.
    pub fn timing(&self) -> LoopTiming {
        self.timing
    }

    /// Schedule `item`; it is first advanced on the next run.
    pub fn add_action(&self, item: Arc<dyn LoopItem>) {
        let mut incoming = self.incoming.lock();
        incoming.push(item);
        let pending = incoming.len();
        drop(incoming);
        self.count.set(self.linked.load(Ordering::Relaxed) + pending);
    }

    /// Advance every scheduled item once.
    ///
    /// A panicking item is removed and reported. If reporting itself
    /// panics, the panic propagates, but the items not yet advanced stay
    /// scheduled and the next run proceeds normally.
    pub fn run(&self) {
        if self.running.swap(true, Ordering::Acquire) {
            ft_emit_detail!(FT202, "runner {}", self.timing);
            return;
        }

        let mut items = std::mem::take(&mut *self.active.lock());
        items.append(&mut self.incoming.lock());
        self.linked.store(items.len(), Ordering::Relaxed);

        let mut state = RunState {
            runner: self,
            survivors: Vec::with_capacity(items.len()),
            pending: items.into_iter(),
            removed: Vec::new(),
        };

        while let Some(item) = state.pending.next() {
            match catch_unwind(AssertUnwindSafe(|| item.move_next())) {
                Ok(true) => state.survivors.push(item),
                Ok(false) => state.removed.push(item),
                Err(payload) => {
                    state.removed.push(item);
                    let fault = Fault::from_panic(payload);
                    ft_emit_detail!(FT203, "{}: {}", self.timing, fault);
                    self.reporter.publish(TaskError::Faulted(fault));
                }
            }
        }

        let removed = std::mem::take(&mut state.removed);
        drop(state);
        for item in removed {
            item.unlinked();
        }
    }

    /// Items held (active plus incoming).
    pub fn count(&self) -> usize {
        self.count.get()
    }

    /// Most items ever held at once.
    pub fn peak_count(&self) -> usize {
        self.count.peak()
    }

    /// Completed runs.
    pub fn runs(&self) -> u64 {
        self.runs.get()
    }

    /// Unlink every item without advancing it.
    pub fn clear(&self) {
        let active = std::mem::take(&mut *self.active.lock());
        let incoming = std::mem::take(&mut *self.incoming.lock());
        self.linked.store(0, Ordering::Relaxed);
        self.count.set(0);
        for item in active.into_iter().chain(incoming) {
            item.unlinked();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Countdown {
        name: &'static str,
        remaining: AtomicUsize,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl LoopItem for Countdown {
        fn move_next(&self) -> bool {
            self.log.lock().push(self.name);
            self.remaining.fetch_sub(1, Ordering::SeqCst) > 1
        }
    }

    fn countdown(name: &'static str, n: usize, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Countdown> {
        Arc::new(Countdown {
            name,
            remaining: AtomicUsize::new(n),
            log: log.clone(),
        })
    }

    fn runner() -> LoopRunner {
        LoopRunner::new(LoopTiming::Update, 8, Arc::new(FaultReporter::new()))
    }

    #[test]
    fn test_order_and_removal() {
        let runner = runner();
        let log = Arc::new(Mutex::new(Vec::new()));
        runner.add_action(countdown("a", 1, &log));
        runner.add_action(countdown("b", 2, &log));
        runner.add_action(countdown("c", 3, &log));

        runner.run();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(runner.count(), 2);

        runner.run();
        assert_eq!(runner.count(), 1);
        runner.run();
        assert_eq!(runner.count(), 0);
        assert_eq!(*log.lock(), vec!["a", "b", "c", "b", "c", "c"]);
        assert_eq!(runner.peak_count(), 3);
    }

    struct Spawner {
        runner: Arc<LoopRunner>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl LoopItem for Spawner {
        fn move_next(&self) -> bool {
            self.log.lock().push("spawner");
            self.runner.add_action(countdown("child", 1, &self.log));
            false
        }
    }

    #[test]
    fn test_added_during_run_deferred() {
        let runner = Arc::new(runner());
        let log = Arc::new(Mutex::new(Vec::new()));
        runner.add_action(Arc::new(Spawner {
            runner: runner.clone(),
            log: log.clone(),
        }));

        runner.run();
        assert_eq!(*log.lock(), vec!["spawner"]);
        assert_eq!(runner.count(), 1);

        runner.run();
        assert_eq!(*log.lock(), vec!["spawner", "child"]);
    }

    struct Panics;

    impl LoopItem for Panics {
        fn move_next(&self) -> bool {
            panic!("advance failed")
        }
    }

    #[test]
    fn test_panicking_item_removed_and_reported() {
        let reporter = Arc::new(FaultReporter::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        reporter.set_handler(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let runner = LoopRunner::new(LoopTiming::Update, 0, reporter);
        let log = Arc::new(Mutex::new(Vec::new()));
        runner.add_action(Arc::new(Panics));
        runner.add_action(countdown("after", 2, &log));

        runner.run();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock(), vec!["after"]);
        assert_eq!(runner.count(), 1);
    }

    #[test]
    fn test_panicking_handler_leaves_runner_usable() {
        let reporter = Arc::new(FaultReporter::new());
        reporter.set_handler(|_| panic!("handler blew up"));

        let runner = LoopRunner::new(LoopTiming::Update, 0, reporter.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        runner.add_action(Arc::new(Panics));
        runner.add_action(countdown("after", 3, &log));

        assert!(catch_unwind(AssertUnwindSafe(|| runner.run())).is_err());
        assert!(log.lock().is_empty());
        assert_eq!(runner.count(), 1);

        reporter.clear_handler();
        runner.run();
        runner.run();
        assert_eq!(*log.lock(), vec!["after", "after"]);
        assert_eq!(runner.count(), 1);
        assert_eq!(runner.runs(), 3);
    }

    struct Observer {
        runner: Arc<LoopRunner>,
        seen: Arc<AtomicUsize>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl LoopItem for Observer {
        fn move_next(&self) -> bool {
            self.runner.add_action(countdown("child", 1, &self.log));
            self.seen.store(self.runner.count(), Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_count_during_run_includes_active() {
        let runner = Arc::new(runner());
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(AtomicUsize::new(0));
        runner.add_action(countdown("a", 5, &log));
        runner.add_action(countdown("b", 5, &log));
        runner.add_action(Arc::new(Observer {
            runner: runner.clone(),
            seen: seen.clone(),
            log: log.clone(),
        }));

        runner.run();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(runner.count(), 4);
        runner.clear();
    }

    struct Tracked {
        steps: AtomicUsize,
        unlinked: Arc<AtomicUsize>,
    }

    impl LoopItem for Tracked {
        fn move_next(&self) -> bool {
            self.steps.fetch_sub(1, Ordering::SeqCst) > 1
        }

        fn unlinked(self: Arc<Self>) {
            assert_eq!(Arc::strong_count(&self), 1);
            self.unlinked.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unlinked_receives_last_reference() {
        let runner = runner();
        let unlinked = Arc::new(AtomicUsize::new(0));
        for steps in [1, 2] {
            runner.add_action(Arc::new(Tracked {
                steps: AtomicUsize::new(steps),
                unlinked: unlinked.clone(),
            }));
        }

        runner.run();
        assert_eq!(unlinked.load(Ordering::SeqCst), 1);
        runner.add_action(Arc::new(Tracked {
            steps: AtomicUsize::new(9),
            unlinked: unlinked.clone(),
        }));
        runner.clear();
        assert_eq!(unlinked.load(Ordering::SeqCst), 3);
        assert_eq!(runner.count(), 0);
    }
}
