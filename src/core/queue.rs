//! Cross-thread continuation queue.
//!
//! Any thread may enqueue. The owning thread drains once per tick: it runs
//! every entry enqueued before the drain started, in FIFO order. Entries
//! enqueued while draining wait for the next drain.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::api::error::{Fault, TaskError};
use crate::api::timing::LoopTiming;
use crate::api::unobserved::FaultReporter;
use crate::core::completion::Continuation;
use crate::sync::atomics::AtomicCounter;
use crate::{ft_emit, ft_emit_detail};

/// Releases the drain flag, also when a drain unwinds.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A thread-safe one-shot continuation queue.
pub struct ContinuationQueue {
    /// Timing this queue drains in, if it belongs to one.
    timing: Option<LoopTiming>,

    /// Pending continuations.
    queue: SegQueue<Continuation>,

    /// Re-entrancy guard for `run`.
    draining: AtomicBool,

    /// Where panicking continuations are reported.
    reporter: Arc<FaultReporter>,

    /// Continuations executed.
    executed: AtomicCounter,
}

impl ContinuationQueue {
    /// Create a queue that is not tied to a timing.
    pub fn new(reporter: Arc<FaultReporter>) -> Self {
        Self {
            timing: None,
            queue: SegQueue::new(),
            draining: AtomicBool::new(false),
            reporter,
            executed: AtomicCounter::new(0),
        }
    }

    /// Create the yield queue for `timing`.
    pub fn for_timing(timing: LoopTiming, reporter: Arc<FaultReporter>) -> Self {
        Self {
            timing: Some(timing),
            ..Self::new(reporter)
        }
    }

    /// The timing this queue drains in.
    pub fn timing(&self) -> Option<LoopTiming> {
        self.timing
    }

    /// Enqueue from any thread.
    pub fn enqueue(&self, continuation: Continuation) {
        self.queue.push(continuation);
    }

    /// Enqueue a closure.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Continuation::new(f));
    }

    /// Entries waiting for the next drain.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Continuations executed so far.
    pub fn executed(&self) -> u64 {
        self.executed.get()
    }

    /// Drain and run everything enqueued before this call.
    ///
    /// A panicking continuation is reported and the drain continues. If
    /// reporting itself panics, the panic propagates and the entries not yet
    /// run stay queued for the next drain.
    pub fn run(&self) {
        if self.draining.swap(true, Ordering::Acquire) {
            ft_emit_detail!(FT202, "continuation queue {:?}", self.timing);
            return;
        }
        let _drain = DrainGuard(&self.draining);

        // Entries pushed from here on belong to the next drain.
        let count = self.queue.len();
        for _ in 0..count {
            let Some(continuation) = self.queue.pop() else {
                break;
            };
            self.executed.increment();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| continuation.invoke())) {
                ft_emit!(FT203);
                self.reporter
                    .publish(TaskError::Faulted(Fault::from_panic(payload)));
            }
        }
    }

    /// Drop every pending entry without running it.
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::mutex::Mutex;

    fn queue() -> Arc<ContinuationQueue> {
        Arc::new(ContinuationQueue::new(Arc::new(FaultReporter::new())))
    }

    #[test]
    fn test_fifo_and_deferral() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            let requeue = queue.clone();
            queue.post(move || {
                log.lock().push(i);
                if i == 1 {
                    let log = log.clone();
                    requeue.post(move || log.lock().push(99));
                }
            });
        }

        queue.run();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(queue.len(), 1);

        queue.run();
        assert_eq!(*log.lock(), vec![0, 1, 2, 99]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_panicking_entry_does_not_stop_drain() {
        let reporter = Arc::new(FaultReporter::new());
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        reporter.set_handler(move |err| sink.lock().push(err.to_string()));

        let queue = ContinuationQueue::new(reporter);
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        queue.post(|| panic!("continuation blew up"));
        queue.post(move || *flag.lock() = true);

        queue.run();
        assert!(*ran.lock());
        assert_eq!(faults.lock().len(), 1);
        assert!(faults.lock()[0].contains("continuation blew up"));
    }

    #[test]
    fn test_panicking_handler_leaves_queue_usable() {
        let reporter = Arc::new(FaultReporter::new());
        reporter.set_handler(|_| panic!("handler blew up"));

        let queue = ContinuationQueue::new(reporter.clone());
        let ran = Arc::new(Mutex::new(0));
        let count = ran.clone();
        queue.post(|| panic!("continuation blew up"));
        queue.post(move || *count.lock() += 1);

        assert!(catch_unwind(AssertUnwindSafe(|| queue.run())).is_err());
        assert_eq!(*ran.lock(), 0);
        assert_eq!(queue.len(), 1);

        reporter.clear_handler();
        queue.run();
        assert_eq!(*ran.lock(), 1);
        assert!(queue.is_empty());
    }
}
