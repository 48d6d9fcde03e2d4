//! Manually completed tasks.

use std::sync::{Arc, Weak};

use crate::api::error::{Fault, TaskError};
use crate::api::task::{Task, TaskSource, TaskStatus};
use crate::api::unobserved::FaultReporter;
use crate::core::cell::Outcome;
use crate::core::completion::{CompletionCore, Continuation};
use crate::core::pool::{PoolItem, TaskPool};

/// Pooled source behind [`CompletionSource`].
pub struct PromiseSource<T> {
    core: CompletionCore<T>,
    pool: Weak<TaskPool<PromiseSource<T>>>,
}

impl<T: Send + 'static> PromiseSource<T> {
    /// Rent from `pool`, or build a fresh one bound to it.
    pub(crate) fn rent(pool: &Arc<TaskPool<Self>>, reporter: &Arc<FaultReporter>) -> Arc<Self> {
        pool.try_rent().unwrap_or_else(|| {
            Arc::new(Self {
                core: CompletionCore::with_reporter(reporter.clone()),
                pool: Arc::downgrade(pool),
            })
        })
    }
}

impl<T: Send + 'static> TaskSource<T> for PromiseSource<T> {
    fn status(&self, token: u16) -> Result<TaskStatus, TaskError> {
        self.core.status(token)
    }

    fn unsafe_status(&self) -> TaskStatus {
        self.core.unsafe_status()
    }

    fn on_completed(&self, continuation: Continuation, token: u16) -> Result<(), TaskError> {
        self.core.on_completed(continuation, token)
    }

    fn get_result(self: Arc<Self>, token: u16) -> Result<T, TaskError> {
        let result = self.core.get_result(token);
        let misuse = matches!(&result, Err(err) if err.is_usage_error());
        if !misuse {
            if let Some(pool) = self.pool.upgrade() {
                pool.try_return(self);
            }
        }
        result
    }
}

impl<T: Send + 'static> PoolItem for PromiseSource<T> {
    fn reset(&self) {
        self.core.reset();
    }
}

/// Producer handle for a manually completed task.
///
/// Bound to the version it was created for; once the task's result has been
/// read and the source recycled, this handle can no longer complete it.
pub struct CompletionSource<T> {
    source: Arc<PromiseSource<T>>,
    token: u16,
}

impl<T: Send + 'static> CompletionSource<T> {
    /// A standalone source, not pooled.
    pub fn new() -> Self {
        Self::from_source(Arc::new(PromiseSource {
            core: CompletionCore::new(),
            pool: Weak::new(),
        }))
    }

    pub(crate) fn from_source(source: Arc<PromiseSource<T>>) -> Self {
        let token = source.core.version();
        Self { source, token }
    }

    /// The version this handle completes.
    pub fn token(&self) -> u16 {
        self.token
    }

    /// The consumer side.
    pub fn task(&self) -> Task<T> {
        let source: Arc<dyn TaskSource<T>> = self.source.clone();
        Task::new(source, self.token)
    }

    /// Current status for this handle's version.
    pub fn status(&self) -> Result<TaskStatus, TaskError> {
        self.source.core.status(self.token)
    }

    /// Complete with a value. False if already completed or recycled.
    pub fn try_set_result(&self, value: T) -> bool {
        self.source
            .core
            .try_set_outcome_at(self.token, Outcome::Succeeded(value))
    }

    /// Complete with a fault.
    pub fn try_set_error(&self, fault: Fault) -> bool {
        self.source
            .core
            .try_set_outcome_at(self.token, Outcome::Faulted(fault))
    }

    /// Complete by cancellation.
    pub fn try_set_canceled(&self) -> bool {
        self.source.core.try_set_canceled_at(self.token)
    }
}

impl<T: Send + 'static> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CompletionSource<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            token: self.token,
        }
    }
}
