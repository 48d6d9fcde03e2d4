//! The runtime context.
//!
//! [`TaskRuntime`] owns one runner and one continuation queue per injected
//! timing, the operation pools, the main-thread post queue and the fault
//! reporter. It is cheap to clone; all clones share the same state.
//!
//! A host drives it either by calling [`TaskRuntime::tick`] once per frame or
//! by handing its phase list to [`TaskRuntime::install`].

use std::future::Future;
use std::sync::Arc;
use std::thread::ThreadId;

use crate::api::cancel::CancelToken;
use crate::api::config::RuntimeConfig;
use crate::api::error::RuntimeError;
use crate::api::source::{CompletionSource, PromiseSource};
use crate::api::spawn::Spawned;
use crate::api::stats::{RuntimeStats, TimingStats};
use crate::api::target::TargetRef;
use crate::api::task::Task;
use crate::api::timing::{LoopTiming, TIMING_COUNT};
use crate::api::unobserved::FaultReporter;
use crate::api::wait::{
    CanceledPromise, PredicatePromise, Schedule, ValueChangedPromise, WaitOptions,
};
use crate::core::completion::Continuation;
use crate::core::pool::PoolRegistry;
use crate::core::queue::ContinuationQueue;
use crate::core::runner::{LoopItem, LoopRunner};
use crate::sync::atomics::AtomicCounter;
use crate::ft_emit_detail;

/// A callback a host runs inside one of its phases.
pub type PhaseCallback = Box<dyn FnMut() + Send>;

/// Where a timing's callbacks go inside the host's phase group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectPosition {
    /// Before the group's own systems.
    First,
    /// After the group's own systems.
    Last,
}

/// The two steps a host runs for one timing, in this order.
pub struct PhaseCallbacks {
    /// Drain the timing's continuation queue.
    pub drain: PhaseCallback,
    /// Advance the timing's runner.
    pub advance: PhaseCallback,
}

impl std::fmt::Debug for PhaseCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseCallbacks").finish_non_exhaustive()
    }
}

/// A host frame loop the runtime can install itself into.
pub trait HostLoop {
    /// Whether the host has the phase group `group` (a non-`Last*` timing).
    fn has_phase(&self, group: LoopTiming) -> bool {
        let _ = group;
        true
    }

    /// Add `callbacks` to the phase group of `timing` at `position`.
    fn inject(&mut self, timing: LoopTiming, position: InjectPosition, callbacks: PhaseCallbacks);

    /// Add the main-thread queue drain to the Update group.
    fn inject_dispatch(&mut self, drain: PhaseCallback);
}

struct RuntimeShared {
    config: RuntimeConfig,
    runners: [Option<LoopRunner>; TIMING_COUNT],
    yielders: [Option<Arc<ContinuationQueue>>; TIMING_COUNT],
    post_queue: Arc<ContinuationQueue>,
    pools: PoolRegistry,
    reporter: Arc<FaultReporter>,
    main_thread: ThreadId,
    frames: AtomicCounter,
}

impl Drop for RuntimeShared {
    fn drop(&mut self) {
        self.reporter.clear_main_thread();
    }
}

/// Shared runtime context.
#[derive(Clone)]
pub struct TaskRuntime {
    inner: Arc<RuntimeShared>,
}

impl TaskRuntime {
    /// Create a runtime. The calling thread becomes its main thread.
    pub fn new(config: RuntimeConfig) -> Self {
        let reporter = Arc::new(FaultReporter::new());
        reporter.set_propagate_cancellation(config.propagate_cancellation);
        reporter.set_level(config.unobserved_level);
        reporter.set_dispatch_to_main_thread(config.dispatch_to_main_thread);

        let runners = std::array::from_fn(|i| {
            let timing = LoopTiming::ALL[i];
            config
                .inject_timings
                .includes(timing)
                .then(|| LoopRunner::new(timing, config.runner_capacity, reporter.clone()))
        });
        let yielders = std::array::from_fn(|i| {
            let timing = LoopTiming::ALL[i];
            config
                .inject_timings
                .includes(timing)
                .then(|| Arc::new(ContinuationQueue::for_timing(timing, reporter.clone())))
        });

        let post_queue = Arc::new(ContinuationQueue::new(reporter.clone()));
        let main_thread = std::thread::current().id();
        reporter.set_main_thread(main_thread, &post_queue);

        #[cfg(feature = "log")]
        log::debug!(
            "frametask runtime created with timings {:?}",
            config.inject_timings
        );

        Self {
            inner: Arc::new(RuntimeShared {
                pools: PoolRegistry::new(config.max_pool_size),
                config,
                runners,
                yielders,
                post_queue,
                reporter,
                main_thread,
                frames: AtomicCounter::new(0),
            }),
        }
    }

    /// Create a runtime with the default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RuntimeConfig::default())
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether the caller is on the runtime's main thread.
    pub fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.inner.main_thread
    }

    /// The thread that created the runtime.
    pub fn main_thread_id(&self) -> ThreadId {
        self.inner.main_thread
    }

    /// Whether `timing` has a runner and a queue.
    pub fn is_injected(&self, timing: LoopTiming) -> bool {
        self.inner.runners[timing.index()].is_some()
    }

    /// The per-type operation pools.
    pub fn pools(&self) -> &PoolRegistry {
        &self.inner.pools
    }

    /// The unobserved-fault reporter for operations created here.
    pub fn reporter(&self) -> &Arc<FaultReporter> {
        &self.inner.reporter
    }

    /// Frames completed by [`tick`](Self::tick).
    pub fn frame_count(&self) -> u64 {
        self.inner.frames.get()
    }

    fn runner(&self, timing: LoopTiming) -> Result<&LoopRunner, RuntimeError> {
        self.inner.runners[timing.index()].as_ref().ok_or_else(|| {
            ft_emit_detail!(FT201, "{}", timing);
            RuntimeError::TimingNotInjected(timing)
        })
    }

    fn yielder(&self, timing: LoopTiming) -> Result<&Arc<ContinuationQueue>, RuntimeError> {
        self.inner.yielders[timing.index()].as_ref().ok_or_else(|| {
            ft_emit_detail!(FT201, "{}", timing);
            RuntimeError::TimingNotInjected(timing)
        })
    }

    fn schedule(&self, timing: LoopTiming) -> Result<Schedule<'_>, RuntimeError> {
        Ok(Schedule {
            pools: &self.inner.pools,
            reporter: &self.inner.reporter,
            runner: self.runner(timing)?,
        })
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Link `item` into the runner of `timing`.
    pub fn add_action(&self, timing: LoopTiming, item: Arc<dyn LoopItem>) -> Result<(), RuntimeError> {
        self.runner(timing)?.add_action(item);
        Ok(())
    }

    /// Queue `continuation` for the next drain of `timing`. Callable from any thread.
    pub fn add_continuation(
        &self,
        timing: LoopTiming,
        continuation: Continuation,
    ) -> Result<(), RuntimeError> {
        self.yielder(timing)?.enqueue(continuation);
        Ok(())
    }

    /// Run `f` on the main thread after the next Update phase.
    pub fn post_to_main_thread<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post_queue.post(f);
    }

    // =========================================================================
    // Driving
    // =========================================================================

    fn check_thread(&self, timing: LoopTiming) {
        if !self.is_main_thread() {
            ft_emit_detail!(FT301, "{}", timing);
        }
    }

    /// Drain the continuation queue of `timing`. No-op if not injected.
    pub fn drain_phase(&self, timing: LoopTiming) {
        self.check_thread(timing);
        if let Some(queue) = &self.inner.yielders[timing.index()] {
            queue.run();
        }
    }

    /// Advance the runner of `timing` once. No-op if not injected.
    pub fn advance_phase(&self, timing: LoopTiming) {
        self.check_thread(timing);
        if let Some(runner) = &self.inner.runners[timing.index()] {
            runner.run();
        }
    }

    /// Drain then advance `timing`, as a host phase does.
    pub fn run_phase(&self, timing: LoopTiming) {
        self.check_thread(timing);
        let index = timing.index();
        if let Some(queue) = &self.inner.yielders[index] {
            queue.run();
        }
        if let Some(runner) = &self.inner.runners[index] {
            runner.run();
        }
    }

    /// Drain the main-thread post queue.
    pub fn drain_main_thread_queue(&self) {
        self.inner.post_queue.run();
    }

    /// Run one frame: every injected timing in frame order, with the
    /// main-thread queue drained right after Update.
    pub fn tick(&self) {
        for timing in LoopTiming::FRAME_ORDER {
            if self.is_injected(timing) {
                self.run_phase(timing);
            }
            if timing == LoopTiming::Update {
                self.drain_main_thread_queue();
            }
        }
        self.inner.frames.increment();
    }

    /// Hand the host one callback pair per injected timing plus the
    /// main-thread drain.
    ///
    /// Every phase group is checked before anything is injected, so a
    /// missing phase leaves the host untouched.
    pub fn install<H>(&self, host: &mut H) -> Result<(), RuntimeError>
    where
        H: HostLoop + ?Sized,
    {
        let timings: Vec<LoopTiming> = self.inner.config.inject_timings.in_frame_order().collect();

        if let Some(missing) = timings.iter().map(|t| t.group()).find(|g| !host.has_phase(*g)) {
            ft_emit_detail!(FT204, "{}", missing);
            return Err(RuntimeError::PhaseNotFound(missing));
        }

        for timing in timings {
            let position = if timing.is_last() {
                InjectPosition::Last
            } else {
                InjectPosition::First
            };
            let drainer = self.clone();
            let advancer = self.clone();
            host.inject(
                timing,
                position,
                PhaseCallbacks {
                    drain: Box::new(move || drainer.drain_phase(timing)),
                    advance: Box::new(move || advancer.advance_phase(timing)),
                },
            );
        }

        let dispatcher = self.clone();
        host.inject_dispatch(Box::new(move || dispatcher.drain_main_thread_queue()));

        #[cfg(feature = "log")]
        log::debug!("frametask runtime installed into host loop");
        Ok(())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Complete once `predicate` returns true. Checked once per advance.
    pub fn wait_until<F>(&self, predicate: F, options: WaitOptions) -> Result<Task<()>, RuntimeError>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let schedule = self.schedule(options.timing)?;
        Ok(PredicatePromise::create(schedule, Box::new(predicate), true, options))
    }

    /// Complete once `predicate` returns false.
    pub fn wait_while<F>(&self, predicate: F, options: WaitOptions) -> Result<Task<()>, RuntimeError>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let schedule = self.schedule(options.timing)?;
        Ok(PredicatePromise::create(schedule, Box::new(predicate), false, options))
    }

    /// Complete successfully once `cancel` fires.
    ///
    /// With `complete_immediately` the task completes inside the cancel
    /// callback instead of on the next advance.
    pub fn wait_until_canceled(
        &self,
        cancel: CancelToken,
        timing: LoopTiming,
        complete_immediately: bool,
    ) -> Result<Task<()>, RuntimeError> {
        let schedule = self.schedule(timing)?;
        Ok(CanceledPromise::create(schedule, cancel, complete_immediately))
    }

    /// Complete with the first value of `monitor(target)` that differs from
    /// the value sampled now. Cancels if the target stops being alive.
    pub fn wait_until_value_changed<T, U, R, M>(
        &self,
        target: R,
        monitor: M,
        options: WaitOptions,
    ) -> Result<Task<U>, RuntimeError>
    where
        T: ?Sized + Send + Sync + 'static,
        U: PartialEq + Send + 'static,
        R: TargetRef<T> + 'static,
        M: FnMut(&T) -> U + Send + 'static,
    {
        self.wait_until_value_changed_with(target, monitor, |a: &U, b: &U| a == b, options)
    }

    /// [`wait_until_value_changed`](Self::wait_until_value_changed) with a
    /// custom equality.
    pub fn wait_until_value_changed_with<T, U, R, M, E>(
        &self,
        target: R,
        monitor: M,
        equals: E,
        options: WaitOptions,
    ) -> Result<Task<U>, RuntimeError>
    where
        T: ?Sized + Send + Sync + 'static,
        U: Send + 'static,
        R: TargetRef<T> + 'static,
        M: FnMut(&T) -> U + Send + 'static,
        E: Fn(&U, &U) -> bool + Send + 'static,
    {
        let schedule = self.schedule(options.timing)?;
        Ok(ValueChangedPromise::<T, U>::create(
            schedule,
            Box::new(target),
            Box::new(monitor),
            Box::new(equals),
            options,
        ))
    }

    /// A pooled, manually completed source.
    pub fn completion_source<T: Send + 'static>(&self) -> CompletionSource<T> {
        let pool = self.inner.pools.pool::<PromiseSource<T>>();
        CompletionSource::from_source(PromiseSource::rent(&pool, &self.inner.reporter))
    }

    /// A task completed by the next drain of `timing`'s continuation queue.
    pub fn yield_now(&self, timing: LoopTiming) -> Result<Task<()>, RuntimeError> {
        let queue = self.yielder(timing)?;
        let source = self.completion_source::<()>();
        let task = source.task();
        queue.post(move || {
            source.try_set_result(());
        });
        Ok(task)
    }

    /// Drive `future` on `timing`'s continuation queue.
    ///
    /// The first poll happens on the next drain; every wake queues another.
    pub fn spawn<F>(&self, timing: LoopTiming, future: F) -> Result<Task<F::Output>, RuntimeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let queue = self.yielder(timing)?.clone();
        Ok(Spawned::spawn(queue, future, self.completion_source()))
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Snapshot of runner, queue and pool counts.
    pub fn stats(&self) -> RuntimeStats {
        let timings = LoopTiming::FRAME_ORDER
            .into_iter()
            .filter_map(|timing| {
                let runner = self.inner.runners[timing.index()].as_ref()?;
                let pending = self.inner.yielders[timing.index()]
                    .as_ref()
                    .map_or(0, |queue| queue.len());
                Some(TimingStats {
                    timing,
                    active: runner.count(),
                    peak_active: runner.peak_count(),
                    pending_continuations: pending,
                })
            })
            .collect();

        RuntimeStats {
            frame_count: self.frame_count(),
            timings,
            main_thread_pending: self.inner.post_queue.len(),
            pools: self.inner.pools.sizes(),
            unobserved_faults: self.inner.reporter.reported_count(),
        }
    }
}

impl Default for TaskRuntime {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for TaskRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRuntime")
            .field("inject_timings", &self.inner.config.inject_timings)
            .field("main_thread", &self.inner.main_thread)
            .field("frames", &self.frame_count())
            .finish()
    }
}
