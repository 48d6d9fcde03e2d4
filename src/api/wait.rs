//! Pooled wait operations.
//!
//! Each operation embeds a [`CompletionCore`], is rented from its type's pool,
//! linked into one runner, and advanced once per tick until terminal. It goes
//! back to the pool once its result was read and its runner has let go of it,
//! in whichever order those happen.
//!
//! User code (predicates, monitors, target liveness checks) always runs with
//! the operation's state unlocked, since completing may recycle the operation
//! from inside the continuation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::api::cancel::{CancelRegistration, CancelToken};
use crate::api::error::{Fault, TaskError};
use crate::api::target::TargetRef;
use crate::api::task::{Task, TaskSource, TaskStatus};
use crate::api::timing::LoopTiming;
use crate::api::unobserved::FaultReporter;
use crate::core::cell::Outcome;
use crate::core::completion::{CompletionCore, Continuation};
use crate::core::pool::{PoolItem, PoolRegistry, TaskPool};
use crate::core::runner::{LoopItem, LoopRunner};
use crate::sync::mutex::Mutex;

/// Scheduling options shared by the wait operations.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Timing whose runner advances the wait.
    pub timing: LoopTiming,
    /// Cancellation for the wait.
    pub cancel: CancelToken,
    /// Cancel as soon as the token fires instead of on the next advance.
    ///
    /// The callback may run on any thread and races the normal completion;
    /// whichever sets the outcome first wins.
    pub cancel_immediately: bool,
}

impl WaitOptions {
    /// Defaults: `Update`, no cancellation, lazy cancel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run on `timing`.
    pub fn with_timing(mut self, timing: LoopTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Observe `cancel`.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancel immediately when the token fires.
    pub fn cancel_immediately(mut self, immediately: bool) -> Self {
        self.cancel_immediately = immediately;
        self
    }
}

impl From<LoopTiming> for WaitOptions {
    fn from(timing: LoopTiming) -> Self {
        Self::new().with_timing(timing)
    }
}

/// Everything a factory needs to rent, configure and link an operation.
pub(crate) struct Schedule<'a> {
    pub pools: &'a PoolRegistry,
    pub reporter: &'a Arc<FaultReporter>,
    pub runner: &'a LoopRunner,
}

fn recycle<P: PoolItem>(pool: &Weak<TaskPool<P>>, item: Arc<P>) {
    if let Some(pool) = pool.upgrade() {
        pool.try_return(item);
    }
}

/// Held by the runner.
const LINKED: u8 = 1;
/// Result consumed.
const READ: u8 = 2;

/// Decides which of the reader and the runner returns an operation.
///
/// The reader may consume the result from inside `move_next` (a continuation
/// fired by completion) while the runner still holds its reference. The
/// second of the two events recycles.
struct PoolLink(AtomicU8);

impl PoolLink {
    fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    fn link(&self) {
        self.0.store(LINKED, Ordering::Release);
    }

    /// Mark the result read. True if the runner already let go.
    fn read(&self) -> bool {
        self.0.fetch_or(READ, Ordering::AcqRel) & LINKED == 0
    }

    /// Mark the runner gone. True if the result was already read.
    fn unlink(&self) -> bool {
        self.0.fetch_and(!LINKED, Ordering::AcqRel) & READ != 0
    }

    fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Register a version-scoped cancel callback that cancels `core` at `token`.
fn cancel_on_signal<P, F>(item: &Arc<P>, cancel: &CancelToken, token: u16, complete: F) -> CancelRegistration
where
    P: Send + Sync + 'static,
    F: Fn(&P, u16) + Send + 'static,
{
    let weak = Arc::downgrade(item);
    cancel.register(move || {
        if let Some(item) = weak.upgrade() {
            complete(&item, token);
        }
    })
}

// =============================================================================
// wait_until / wait_while
// =============================================================================

type Predicate = Box<dyn FnMut() -> bool + Send>;

#[derive(Default)]
struct PredicateState {
    predicate: Option<Predicate>,
    /// Complete when the predicate returns this.
    until: bool,
    cancel: CancelToken,
    registration: Option<CancelRegistration>,
}

/// Completes when a predicate reaches a target value.
pub struct PredicatePromise {
    core: CompletionCore<()>,
    state: Mutex<PredicateState>,
    link: PoolLink,
    pool: Weak<TaskPool<PredicatePromise>>,
}

impl PredicatePromise {
    pub(crate) fn create(
        schedule: Schedule<'_>,
        predicate: Predicate,
        until: bool,
        options: WaitOptions,
    ) -> Task<()> {
        if options.cancel.is_cancellation_requested() {
            return Task::canceled();
        }

        let pool = schedule.pools.pool::<PredicatePromise>();
        let promise = pool.try_rent().unwrap_or_else(|| {
            Arc::new(PredicatePromise {
                core: CompletionCore::with_reporter(schedule.reporter.clone()),
                state: Mutex::new(PredicateState::default()),
                link: PoolLink::new(),
                pool: Arc::downgrade(&pool),
            })
        });
        let token = promise.core.version();

        let registration = (options.cancel_immediately && options.cancel.can_be_canceled())
            .then(|| {
                cancel_on_signal(&promise, &options.cancel, token, |p: &PredicatePromise, token| {
                    p.core.try_set_canceled_at(token);
                })
            });

        {
            let mut state = promise.state.lock();
            state.predicate = Some(predicate);
            state.until = until;
            state.cancel = options.cancel;
            state.registration = registration;
        }

        promise.link.link();
        schedule.runner.add_action(promise.clone());
        Task::new(promise, token)
    }

    fn release_registration(&self) {
        let registration = self.state.lock().registration.take();
        drop(registration);
    }

    fn finish(&self, token: u16, outcome: Outcome<()>) -> bool {
        self.core.try_set_outcome_at(token, outcome);
        self.release_registration();
        false
    }
}

impl LoopItem for PredicatePromise {
    fn move_next(&self) -> bool {
        if self.core.is_completed() {
            self.release_registration();
            return false;
        }
        let token = self.core.version();

        let (mut predicate, until) = {
            let mut state = self.state.lock();
            if state.cancel.is_cancellation_requested() {
                drop(state);
                return self.finish(token, Outcome::Canceled);
            }
            match state.predicate.take() {
                Some(predicate) => (predicate, state.until),
                None => return false,
            }
        };

        match catch_unwind(AssertUnwindSafe(|| predicate())) {
            Ok(value) if value == until => {
                drop(predicate);
                self.finish(token, Outcome::Succeeded(()))
            }
            Ok(_) => {
                let mut state = self.state.lock();
                if self.core.version() == token && state.predicate.is_none() {
                    state.predicate = Some(predicate);
                }
                true
            }
            Err(payload) => self.finish(token, Outcome::Faulted(Fault::from_panic(payload))),
        }
    }

    fn unlinked(self: Arc<Self>) {
        if self.link.unlink() {
            recycle(&self.pool.clone(), self);
        }
    }
}

impl TaskSource<()> for PredicatePromise {
    fn status(&self, token: u16) -> Result<TaskStatus, TaskError> {
        self.core.status(token)
    }

    fn unsafe_status(&self) -> TaskStatus {
        self.core.unsafe_status()
    }

    fn on_completed(&self, continuation: Continuation, token: u16) -> Result<(), TaskError> {
        self.core.on_completed(continuation, token)
    }

    fn get_result(self: Arc<Self>, token: u16) -> Result<(), TaskError> {
        let result = self.core.get_result(token);
        if !matches!(&result, Err(err) if err.is_usage_error()) && self.link.read() {
            recycle(&self.pool.clone(), self);
        }
        result
    }
}

impl PoolItem for PredicatePromise {
    fn reset(&self) {
        let (predicate, registration) = {
            let mut state = self.state.lock();
            let predicate = state.predicate.take();
            let registration = state.registration.take();
            state.until = false;
            state.cancel = CancelToken::none();
            (predicate, registration)
        };
        drop(predicate);
        drop(registration);
        self.link.clear();
        self.core.reset();
    }
}

// =============================================================================
// wait_until_canceled
// =============================================================================

#[derive(Default)]
struct CanceledState {
    cancel: CancelToken,
    registration: Option<CancelRegistration>,
}

/// Completes successfully once a cancel token fires.
pub struct CanceledPromise {
    core: CompletionCore<()>,
    state: Mutex<CanceledState>,
    link: PoolLink,
    pool: Weak<TaskPool<CanceledPromise>>,
}

impl CanceledPromise {
    pub(crate) fn create(
        schedule: Schedule<'_>,
        cancel: CancelToken,
        complete_immediately: bool,
    ) -> Task<()> {
        if cancel.is_cancellation_requested() {
            return Task::completed();
        }

        let pool = schedule.pools.pool::<CanceledPromise>();
        let promise = pool.try_rent().unwrap_or_else(|| {
            Arc::new(CanceledPromise {
                core: CompletionCore::with_reporter(schedule.reporter.clone()),
                state: Mutex::new(CanceledState::default()),
                link: PoolLink::new(),
                pool: Arc::downgrade(&pool),
            })
        });
        let token = promise.core.version();

        let registration = (complete_immediately && cancel.can_be_canceled()).then(|| {
            cancel_on_signal(&promise, &cancel, token, |p: &CanceledPromise, token| {
                p.core.try_set_outcome_at(token, Outcome::Succeeded(()));
            })
        });

        {
            let mut state = promise.state.lock();
            state.cancel = cancel;
            state.registration = registration;
        }

        promise.link.link();
        schedule.runner.add_action(promise.clone());
        Task::new(promise, token)
    }
}

impl LoopItem for CanceledPromise {
    fn move_next(&self) -> bool {
        if self.core.is_completed() {
            let registration = self.state.lock().registration.take();
            drop(registration);
            return false;
        }
        let token = self.core.version();
        let requested = self.state.lock().cancel.is_cancellation_requested();
        if requested {
            self.core.try_set_outcome_at(token, Outcome::Succeeded(()));
            let registration = self.state.lock().registration.take();
            drop(registration);
            return false;
        }
        true
    }

    fn unlinked(self: Arc<Self>) {
        if self.link.unlink() {
            recycle(&self.pool.clone(), self);
        }
    }
}

impl TaskSource<()> for CanceledPromise {
    fn status(&self, token: u16) -> Result<TaskStatus, TaskError> {
        self.core.status(token)
    }

    fn unsafe_status(&self) -> TaskStatus {
        self.core.unsafe_status()
    }

    fn on_completed(&self, continuation: Continuation, token: u16) -> Result<(), TaskError> {
        self.core.on_completed(continuation, token)
    }

    fn get_result(self: Arc<Self>, token: u16) -> Result<(), TaskError> {
        let result = self.core.get_result(token);
        if !matches!(&result, Err(err) if err.is_usage_error()) && self.link.read() {
            recycle(&self.pool.clone(), self);
        }
        result
    }
}

impl PoolItem for CanceledPromise {
    fn reset(&self) {
        let registration = {
            let mut state = self.state.lock();
            state.cancel = CancelToken::none();
            state.registration.take()
        };
        drop(registration);
        self.link.clear();
        self.core.reset();
    }
}

// =============================================================================
// wait_until_value_changed
// =============================================================================

type Monitor<T, U> = Box<dyn FnMut(&T) -> U + Send>;
type Equality<U> = Box<dyn Fn(&U, &U) -> bool + Send>;

struct Watch<T: ?Sized, U> {
    target: Box<dyn TargetRef<T>>,
    monitor: Monitor<T, U>,
    current: U,
    equals: Equality<U>,
}

struct ValueChangedState<T: ?Sized, U> {
    watch: Option<Watch<T, U>>,
    cancel: CancelToken,
    registration: Option<CancelRegistration>,
}

impl<T: ?Sized, U> Default for ValueChangedState<T, U> {
    fn default() -> Self {
        Self {
            watch: None,
            cancel: CancelToken::none(),
            registration: None,
        }
    }
}

/// Completes with the first monitored value that differs from the initial one.
pub struct ValueChangedPromise<T: ?Sized + 'static, U: 'static> {
    core: CompletionCore<U>,
    state: Mutex<ValueChangedState<T, U>>,
    link: PoolLink,
    pool: Weak<TaskPool<ValueChangedPromise<T, U>>>,
}

impl<T, U> ValueChangedPromise<T, U>
where
    T: ?Sized + Send + Sync + 'static,
    U: Send + 'static,
{
    pub(crate) fn create(
        schedule: Schedule<'_>,
        target: Box<dyn TargetRef<T>>,
        mut monitor: Monitor<T, U>,
        equals: Equality<U>,
        options: WaitOptions,
    ) -> Task<U> {
        if options.cancel.is_cancellation_requested() {
            return Task::canceled();
        }
        let Some(object) = target.get() else {
            return Task::canceled();
        };
        let current = match catch_unwind(AssertUnwindSafe(|| monitor(&*object))) {
            Ok(value) => value,
            Err(payload) => return Task::from_error(Fault::from_panic(payload)),
        };
        drop(object);

        let pool = schedule.pools.pool::<ValueChangedPromise<T, U>>();
        let promise = pool.try_rent().unwrap_or_else(|| {
            Arc::new(ValueChangedPromise {
                core: CompletionCore::with_reporter(schedule.reporter.clone()),
                state: Mutex::new(ValueChangedState::default()),
                link: PoolLink::new(),
                pool: Arc::downgrade(&pool),
            })
        });
        let token = promise.core.version();

        let registration = (options.cancel_immediately && options.cancel.can_be_canceled())
            .then(|| {
                cancel_on_signal(&promise, &options.cancel, token, |p: &Self, token| {
                    p.core.try_set_canceled_at(token);
                })
            });

        {
            let mut state = promise.state.lock();
            state.watch = Some(Watch {
                target,
                monitor,
                current,
                equals,
            });
            state.cancel = options.cancel;
            state.registration = registration;
        }

        promise.link.link();
        schedule.runner.add_action(promise.clone());
        Task::new(promise, token)
    }

    fn finish(&self, token: u16, outcome: Outcome<U>) -> bool {
        self.core.try_set_outcome_at(token, outcome);
        let registration = self.state.lock().registration.take();
        drop(registration);
        false
    }
}

impl<T, U> LoopItem for ValueChangedPromise<T, U>
where
    T: ?Sized + Send + Sync + 'static,
    U: Send + 'static,
{
    fn move_next(&self) -> bool {
        if self.core.is_completed() {
            let registration = self.state.lock().registration.take();
            drop(registration);
            return false;
        }
        let token = self.core.version();

        let mut watch = {
            let mut state = self.state.lock();
            if state.cancel.is_cancellation_requested() {
                drop(state);
                return self.finish(token, Outcome::Canceled);
            }
            match state.watch.take() {
                Some(watch) => watch,
                None => return false,
            }
        };

        let sampled = catch_unwind(AssertUnwindSafe(|| {
            let object = watch.target.get()?;
            let next = (watch.monitor)(&*object);
            let changed = !(watch.equals)(&watch.current, &next);
            Some((next, changed))
        }));

        match sampled {
            // Target is gone.
            Ok(None) => self.finish(token, Outcome::Canceled),
            Ok(Some((next, true))) => {
                drop(watch);
                self.finish(token, Outcome::Succeeded(next))
            }
            Ok(Some((_, false))) => {
                let mut state = self.state.lock();
                if self.core.version() == token && state.watch.is_none() {
                    state.watch = Some(watch);
                }
                true
            }
            Err(payload) => self.finish(token, Outcome::Faulted(Fault::from_panic(payload))),
        }
    }

    fn unlinked(self: Arc<Self>) {
        if self.link.unlink() {
            recycle(&self.pool.clone(), self);
        }
    }
}

impl<T, U> TaskSource<U> for ValueChangedPromise<T, U>
where
    T: ?Sized + Send + Sync + 'static,
    U: Send + 'static,
{
    fn status(&self, token: u16) -> Result<TaskStatus, TaskError> {
        self.core.status(token)
    }

    fn unsafe_status(&self) -> TaskStatus {
        self.core.unsafe_status()
    }

    fn on_completed(&self, continuation: Continuation, token: u16) -> Result<(), TaskError> {
        self.core.on_completed(continuation, token)
    }

    fn get_result(self: Arc<Self>, token: u16) -> Result<U, TaskError> {
        let result = self.core.get_result(token);
        if !matches!(&result, Err(err) if err.is_usage_error()) && self.link.read() {
            recycle(&self.pool.clone(), self);
        }
        result
    }
}

impl<T, U> PoolItem for ValueChangedPromise<T, U>
where
    T: ?Sized + Send + Sync + 'static,
    U: Send + 'static,
{
    fn reset(&self) {
        let (watch, registration) = {
            let mut state = self.state.lock();
            state.cancel = CancelToken::none();
            (state.watch.take(), state.registration.take())
        };
        drop(watch);
        drop(registration);
        self.link.clear();
        self.core.reset();
    }
}
