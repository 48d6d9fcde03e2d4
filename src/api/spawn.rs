//! Driving futures on the frame loop.
//!
//! A spawned future is polled from a timing's continuation queue: once when
//! spawned, then once per wake. Its output, or a panic, completes a task.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::api::error::Fault;
use crate::api::source::CompletionSource;
use crate::api::task::Task;
use crate::core::queue::ContinuationQueue;
use crate::sync::mutex::Mutex;

struct SpawnState<F: Future> {
    future: Pin<Box<F>>,
    completion: CompletionSource<F::Output>,
}

/// A future plus the queue it is polled from.
pub(crate) struct Spawned<F: Future> {
    /// `None` once the future finished.
    state: Mutex<Option<SpawnState<F>>>,

    /// Queue that runs polls.
    queue: Arc<ContinuationQueue>,

    /// A poll is already queued.
    scheduled: AtomicBool,
}

impl<F> Spawned<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    /// Queue the first poll and return the task for the output.
    pub(crate) fn spawn(
        queue: Arc<ContinuationQueue>,
        future: F,
        completion: CompletionSource<F::Output>,
    ) -> Task<F::Output> {
        let task = completion.task();
        let spawned = Arc::new(Spawned {
            state: Mutex::new(Some(SpawnState {
                future: Box::pin(future),
                completion,
            })),
            queue,
            scheduled: AtomicBool::new(false),
        });
        spawned.schedule();
        task
    }

    fn schedule(self: &Arc<Self>) {
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            let this = self.clone();
            self.queue.post(move || this.poll_once());
        }
    }

    fn poll_once(self: Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.state.lock();
        let Some(state) = slot.as_mut() else {
            return;
        };
        let polled = catch_unwind(AssertUnwindSafe(|| state.future.as_mut().poll(&mut cx)));
        let finished = match polled {
            Ok(Poll::Pending) => return,
            Ok(Poll::Ready(output)) => Ok(output),
            Err(payload) => Err(Fault::from_panic(payload)),
        };
        let Some(state) = slot.take() else {
            return;
        };
        drop(slot);

        match finished {
            Ok(output) => state.completion.try_set_result(output),
            Err(fault) => state.completion.try_set_error(fault),
        };
    }
}

impl<F> Wake for Spawned<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::TaskError;
    use crate::api::unobserved::FaultReporter;

    /// Pending on the first poll, ready on the second.
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = u32;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u32> {
            if self.0 {
                Poll::Ready(42)
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    #[test]
    fn test_polled_from_queue() {
        let queue = Arc::new(ContinuationQueue::new(Arc::new(FaultReporter::new())));
        let task = Spawned::spawn(queue.clone(), YieldOnce(false), CompletionSource::new());
        assert!(!task.is_completed());

        queue.run();
        assert!(!task.is_completed());
        assert_eq!(queue.len(), 1);

        queue.run();
        assert_eq!(task.get_result().unwrap(), 42);
    }

    #[test]
    fn test_panicking_future_faults_task() {
        let queue = Arc::new(ContinuationQueue::new(Arc::new(FaultReporter::new())));
        let task = Spawned::spawn(
            queue.clone(),
            async { panic!("future failed") },
            CompletionSource::<()>::new(),
        );

        queue.run();
        assert!(matches!(task.get_result(), Err(TaskError::Faulted(_))));
    }
}
