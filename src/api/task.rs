//! Task handles.
//!
//! A [`Task`] is a source plus the token it was issued with. It is consumed by
//! reading its result, either with [`Task::get_result`], a continuation, or
//! `.await`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::api::error::{Fault, TaskError};
use crate::core::completion::Continuation;
use crate::sync::mutex::Mutex;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    /// Not yet completed.
    #[default]
    Pending,
    /// Completed with a value.
    Succeeded,
    /// Completed with a fault.
    Faulted,
    /// Completed by cancellation.
    Canceled,
}

impl TaskStatus {
    /// Any terminal status.
    #[inline]
    pub const fn is_completed(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    /// Completed with a value.
    #[inline]
    pub const fn is_succeeded(self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }

    /// Completed with a fault.
    #[inline]
    pub const fn is_faulted(self) -> bool {
        matches!(self, TaskStatus::Faulted)
    }

    /// Completed by cancellation.
    #[inline]
    pub const fn is_canceled(self) -> bool {
        matches!(self, TaskStatus::Canceled)
    }
}

/// Something a [`Task`] can wait on.
///
/// Every call takes the token the task was issued with; a token that does
/// not match the source's current version fails with `StaleToken`.
pub trait TaskSource<T>: Send + Sync {
    /// Non-consuming status read.
    fn status(&self, token: u16) -> Result<TaskStatus, TaskError>;

    /// Status without token validation.
    fn unsafe_status(&self) -> TaskStatus;

    /// Register the single continuation for `token`.
    fn on_completed(&self, continuation: Continuation, token: u16) -> Result<(), TaskError>;

    /// Read the result. Pooled sources recycle themselves here.
    fn get_result(self: Arc<Self>, token: u16) -> Result<T, TaskError>;
}

enum TaskInner<T> {
    /// Completed without a source.
    Ready(Result<T, TaskError>),
    /// Backed by a source.
    Source {
        source: Arc<dyn TaskSource<T>>,
        token: u16,
        /// Waker shared with the registered continuation once polled.
        waker: Option<Arc<Mutex<Option<Waker>>>>,
    },
    /// Result already handed out.
    Consumed(u16),
}

/// A handle to the result of a cooperative operation.
pub struct Task<T> {
    inner: TaskInner<T>,
}

impl<T> Task<T> {
    /// A task backed by `source` at version `token`.
    pub fn new(source: Arc<dyn TaskSource<T>>, token: u16) -> Self {
        Self {
            inner: TaskInner::Source {
                source,
                token,
                waker: None,
            },
        }
    }

    /// An already-succeeded task.
    pub fn from_result(value: T) -> Self {
        Self {
            inner: TaskInner::Ready(Ok(value)),
        }
    }

    /// An already-faulted task.
    pub fn from_error(fault: Fault) -> Self {
        Self {
            inner: TaskInner::Ready(Err(TaskError::Faulted(fault))),
        }
    }

    /// An already-canceled task.
    pub fn canceled() -> Self {
        Self {
            inner: TaskInner::Ready(Err(TaskError::Canceled)),
        }
    }

    /// The token this task was issued with. Zero for sourceless tasks.
    pub fn token(&self) -> u16 {
        match &self.inner {
            TaskInner::Source { token, .. } => *token,
            TaskInner::Consumed(token) => *token,
            TaskInner::Ready(_) => 0,
        }
    }

    /// Current status. Fails once the source has moved past this task's token.
    pub fn status(&self) -> Result<TaskStatus, TaskError> {
        match &self.inner {
            TaskInner::Ready(Ok(_)) => Ok(TaskStatus::Succeeded),
            TaskInner::Ready(Err(TaskError::Canceled)) => Ok(TaskStatus::Canceled),
            TaskInner::Ready(Err(_)) => Ok(TaskStatus::Faulted),
            TaskInner::Source { source, token, .. } => source.status(*token),
            TaskInner::Consumed(token) => Err(TaskError::AlreadyConsumed { token: *token }),
        }
    }

    /// Whether the task reached a terminal status (or was already consumed).
    pub fn is_completed(&self) -> bool {
        self.status().map_or(true, TaskStatus::is_completed)
    }

    /// Read the result now.
    ///
    /// Fails with [`TaskError::NotCompleted`] while pending.
    pub fn get_result(self) -> Result<T, TaskError> {
        match self.inner {
            TaskInner::Ready(result) => result,
            TaskInner::Source { source, token, .. } => source.get_result(token),
            TaskInner::Consumed(token) => Err(TaskError::AlreadyConsumed { token }),
        }
    }

    /// Run `f` with the result once the task completes.
    ///
    /// Runs inline if the task is already complete. Otherwise `f` runs on
    /// whichever thread completes the source.
    pub fn on_completed<F>(self, f: F) -> Result<(), TaskError>
    where
        T: 'static,
        F: FnOnce(Result<T, TaskError>) + Send + 'static,
    {
        match self.inner {
            TaskInner::Ready(result) => {
                f(result);
                Ok(())
            }
            TaskInner::Source { source, token, waker: None } => {
                let reader = source.clone();
                source.on_completed(
                    Continuation::new(move || f(reader.get_result(token))),
                    token,
                )
            }
            TaskInner::Source { .. } => Err(TaskError::ContinuationAlreadyRegistered),
            TaskInner::Consumed(token) => Err(TaskError::AlreadyConsumed { token }),
        }
    }

    fn take_result(&mut self) -> Result<T, TaskError> {
        let token = self.token();
        match std::mem::replace(&mut self.inner, TaskInner::Consumed(token)) {
            TaskInner::Ready(result) => result,
            TaskInner::Source { source, token, .. } => source.get_result(token),
            TaskInner::Consumed(token) => Err(TaskError::AlreadyConsumed { token }),
        }
    }
}

impl Task<()> {
    /// An already-succeeded unit task.
    pub fn completed() -> Self {
        Self::from_result(())
    }
}

impl<T> Unpin for Task<T> {}

impl<T> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let (source, token, waker) = match &mut this.inner {
            TaskInner::Source { source, token, waker } => (source, *token, waker),
            _ => return Poll::Ready(this.take_result()),
        };

        match source.status(token) {
            Ok(status) if status.is_completed() => return Poll::Ready(this.take_result()),
            Ok(_) => {}
            Err(err) => return Poll::Ready(Err(err)),
        }

        match waker {
            Some(slot) => *slot.lock() = Some(cx.waker().clone()),
            None => {
                let slot = Arc::new(Mutex::new(Some(cx.waker().clone())));
                let fired = slot.clone();
                let registered = source.on_completed(
                    Continuation::new(move || {
                        let waker = fired.lock().take();
                        if let Some(waker) = waker {
                            waker.wake();
                        }
                    }),
                    token,
                );
                if let Err(err) = registered {
                    return Poll::Ready(Err(err));
                }
                *waker = Some(slot);
            }
        }

        // Completion may have landed between the status read and the waker store.
        match source.status(token) {
            Ok(status) if status.is_completed() => Poll::Ready(this.take_result()),
            Ok(_) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("token", &self.token())
            .field("status", &self.status().ok())
            .finish()
    }
}
