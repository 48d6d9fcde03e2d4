//! Lazily started, shareable tasks.
//!
//! An [`AsyncLazy`] holds a factory that is run at most once, on the first
//! call to [`AsyncLazy::task`]. Every call hands out its own [`Task`]: later
//! callers get a task that completes with a clone of the same outcome, so
//! one result can be awaited from many places even though a `Task` is read
//! once.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::api::error::{Fault, TaskError};
use crate::api::source::CompletionSource;
use crate::api::task::Task;
use crate::sync::mutex::Mutex;

type Factory<T> = Box<dyn FnOnce() -> Task<T> + Send>;

enum LazyState<T> {
    /// Factory not run yet.
    Idle(Factory<T>),
    /// Started; waiters complete when the underlying task does.
    Running(Vec<CompletionSource<T>>),
    /// Finished with this outcome.
    Done(Result<T, TaskError>),
}

/// A task started on first use and shared by every caller.
///
/// Cloning shares the same state.
pub struct AsyncLazy<T> {
    state: Arc<Mutex<LazyState<T>>>,
}

impl<T: Clone + Send + 'static> AsyncLazy<T> {
    /// Defer `factory` until the first [`task`](Self::task) call.
    ///
    /// A panicking factory faults every task handed out.
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> Task<T> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(LazyState::Idle(Box::new(factory)))),
        }
    }

    /// Share an already running task.
    pub fn from_task(task: Task<T>) -> Self {
        let lazy = Self {
            state: Arc::new(Mutex::new(LazyState::Running(Vec::new()))),
        };
        lazy.attach(task);
        lazy
    }

    /// A task for the shared outcome, starting the factory if needed.
    pub fn task(&self) -> Task<T> {
        let mut state = self.state.lock();
        let (factory, task) = match &mut *state {
            LazyState::Done(result) => return ready(result.clone()),
            LazyState::Running(waiters) => return waiter(waiters),
            LazyState::Idle(_) => {
                let mut waiters = Vec::with_capacity(1);
                let task = waiter(&mut waiters);
                match std::mem::replace(&mut *state, LazyState::Running(waiters)) {
                    LazyState::Idle(factory) => (factory, task),
                    _ => return task,
                }
            }
        };
        // The factory may call back into this lazy.
        drop(state);

        let started = catch_unwind(AssertUnwindSafe(factory))
            .unwrap_or_else(|payload| Task::from_error(Fault::from_panic(payload)));
        self.attach(started);
        task
    }

    /// Whether the factory has run.
    pub fn is_started(&self) -> bool {
        !matches!(&*self.state.lock(), LazyState::Idle(_))
    }

    /// Whether the shared outcome is known.
    pub fn is_completed(&self) -> bool {
        matches!(&*self.state.lock(), LazyState::Done(_))
    }

    fn attach(&self, task: Task<T>) {
        let shared = self.state.clone();
        if let Err(err) = task.on_completed(move |result| settle(&shared, result)) {
            settle(&self.state, Err(err));
        }
    }
}

fn waiter<T: Send + 'static>(waiters: &mut Vec<CompletionSource<T>>) -> Task<T> {
    let source = CompletionSource::new();
    let task = source.task();
    waiters.push(source);
    task
}

fn settle<T: Clone + Send + 'static>(state: &Mutex<LazyState<T>>, result: Result<T, TaskError>) {
    let previous = std::mem::replace(&mut *state.lock(), LazyState::Done(result.clone()));
    if let LazyState::Running(waiters) = previous {
        for source in waiters {
            complete(&source, result.clone());
        }
    }
}

fn complete<T: Send + 'static>(source: &CompletionSource<T>, result: Result<T, TaskError>) {
    match result {
        Ok(value) => source.try_set_result(value),
        Err(TaskError::Canceled) => source.try_set_canceled(),
        Err(TaskError::Faulted(fault)) => source.try_set_error(fault),
        Err(err) => source.try_set_error(Fault::new(err)),
    };
}

fn ready<T>(result: Result<T, TaskError>) -> Task<T> {
    match result {
        Ok(value) => Task::from_result(value),
        Err(TaskError::Canceled) => Task::canceled(),
        Err(TaskError::Faulted(fault)) => Task::from_error(fault),
        Err(err) => Task::from_error(Fault::new(err)),
    }
}

impl<T> Clone for AsyncLazy<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for AsyncLazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            LazyState::Idle(_) => "idle",
            LazyState::Running(_) => "running",
            LazyState::Done(_) => "done",
        };
        f.debug_struct("AsyncLazy").field("state", &state).finish()
    }
}
