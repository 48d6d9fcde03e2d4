//! Integration tests for frametask.

use frametask::{
    CancelSource, CompletionCore, Continuation, Fault, FaultReporter, HostLoop, HostObject,
    HostTarget, InjectPosition, InjectTimings, LoopItem, LoopTiming, PhaseCallback,
    PhaseCallbacks, RuntimeConfig, RuntimeError, TaskError, TaskRuntime, TaskStatus, WaitOptions,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

// =============================================================================
// Versioned tokens
// =============================================================================

#[test]
fn test_stale_token_after_reset() {
    let core = CompletionCore::<u32>::with_reporter(Arc::new(FaultReporter::new()));
    let mut previous = Vec::new();

    for cycle in 0..5u32 {
        let token = core.version();
        for old in &previous {
            assert!(core.status(*old).unwrap_err().is_stale());
        }
        assert!(core.try_set_result(cycle));
        previous.push(token);
        core.reset();
    }

    for old in previous {
        match core.get_result(old) {
            Err(TaskError::StaleToken { presented, current }) => {
                assert_eq!(presented, old);
                assert_eq!(current, 5);
            }
            other => panic!("expected stale token, got {:?}", other),
        }
    }
}

#[test]
fn test_double_read_is_rejected() {
    let runtime = TaskRuntime::with_defaults();
    let source = runtime.completion_source::<u32>();
    let task = source.task();
    let again = source.task();
    source.try_set_result(9);
    drop(source);

    // `again` still shares the instance, so it is not recycled.
    assert_eq!(task.get_result().unwrap(), 9);
    assert!(again.get_result().unwrap_err().is_stale());
}

// =============================================================================
// Exactly-once continuation dispatch
// =============================================================================

fn race_once(register_first: bool) -> usize {
    let core = Arc::new(CompletionCore::<u32>::with_reporter(Arc::new(
        FaultReporter::new(),
    )));
    let fired = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));

    let producer = {
        let core = core.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            core.try_set_result(1);
        })
    };
    let registrant = {
        let core = core.clone();
        let fired = fired.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            if register_first {
                barrier.wait();
            }
            let continuation = Continuation::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            if !register_first {
                barrier.wait();
            }
            core.on_completed(continuation, 0).unwrap();
        })
    };

    producer.join().unwrap();
    registrant.join().unwrap();
    fired.load(Ordering::SeqCst)
}

#[test]
fn test_continuation_fires_exactly_once_under_races() {
    for i in 0..500 {
        assert_eq!(race_once(i % 2 == 0), 1);
    }
}

#[test]
fn test_second_registration_is_rejected() {
    let core = CompletionCore::<u32>::with_reporter(Arc::new(FaultReporter::new()));
    core.on_completed(Continuation::new(|| {}), 0).unwrap();
    assert!(matches!(
        core.on_completed(Continuation::new(|| {}), 0),
        Err(TaskError::ContinuationAlreadyRegistered)
    ));
}

// =============================================================================
// Pooling
// =============================================================================

#[test]
fn test_pool_reuse_does_not_leak_fields() {
    const N: usize = 8;
    let runtime = TaskRuntime::with_defaults();
    let marker = Arc::new(());

    let tasks: Vec<_> = (0..N)
        .map(|_| {
            let held = marker.clone();
            runtime
                .wait_until(move || Arc::strong_count(&held) > 0, WaitOptions::new())
                .unwrap()
        })
        .collect();

    runtime.tick();
    for task in tasks {
        task.get_result().unwrap();
    }
    assert_eq!(Arc::strong_count(&marker), 1);
    assert_eq!(runtime.stats().pooled_instances(), N);

    let calls = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..N)
        .map(|_| {
            let calls = calls.clone();
            runtime
                .wait_until(
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        false
                    },
                    WaitOptions::new(),
                )
                .unwrap()
        })
        .collect();
    assert_eq!(runtime.stats().pooled_instances(), 0);

    runtime.tick();
    assert_eq!(calls.load(Ordering::SeqCst), N);
    for task in &tasks {
        assert_eq!(task.status().unwrap(), TaskStatus::Pending);
    }
}

#[test]
fn test_max_pool_size_caps_retained_instances() {
    let runtime = TaskRuntime::new(RuntimeConfig::default().with_max_pool_size(2));
    let tasks: Vec<_> = (0..5)
        .map(|_| runtime.wait_until(|| true, WaitOptions::new()).unwrap())
        .collect();
    runtime.tick();
    for task in tasks {
        task.get_result().unwrap();
    }
    assert_eq!(runtime.stats().pooled_instances(), 2);
}

#[test]
fn test_wait_read_by_continuation_returns_to_pool() {
    let runtime = TaskRuntime::with_defaults();
    let results = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let sink = results.clone();
        runtime
            .wait_until(|| true, WaitOptions::new())
            .unwrap()
            .on_completed(move |result| sink.lock().unwrap().push(result.is_ok()))
            .unwrap();
        runtime.tick();
    }

    assert_eq!(*results.lock().unwrap(), vec![true, true, true]);
    let sizes = runtime.pools().sizes();
    let pool = sizes
        .iter()
        .find(|size| size.type_name.contains("PredicatePromise"))
        .unwrap();
    assert_eq!(pool.returned, 3);
    assert_eq!(pool.discarded, 0);
    assert_eq!(pool.hits, 2);
    assert_eq!(pool.size, 1);
}

#[test]
fn test_read_before_runner_lets_go_returns_to_pool() {
    let runtime = TaskRuntime::with_defaults();
    let source = CancelSource::new();
    let task = runtime
        .wait_until(
            || false,
            WaitOptions::new()
                .with_cancel(source.token())
                .cancel_immediately(true),
        )
        .unwrap();

    source.cancel();
    assert!(matches!(task.get_result(), Err(TaskError::Canceled)));
    assert_eq!(runtime.stats().pooled_instances(), 0);

    runtime.tick();
    assert_eq!(runtime.stats().active_operations(), 0);
    assert_eq!(runtime.stats().pooled_instances(), 1);
}

// =============================================================================
// Runner
// =============================================================================

struct Countdown {
    remaining: AtomicU32,
    done: AtomicBool,
}

impl Countdown {
    fn new(advances: u32) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicU32::new(advances),
            done: AtomicBool::new(false),
        })
    }
}

impl LoopItem for Countdown {
    fn move_next(&self) -> bool {
        // u32::MAX never reaches zero within the test.
        let left = self.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
        if left == 0 {
            self.done.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }
}

#[test]
fn test_runner_removes_completed_items() {
    let runtime = TaskRuntime::with_defaults();
    let a = Countdown::new(1);
    let b = Countdown::new(3);
    let c = Countdown::new(u32::MAX);
    for item in [&a, &b, &c] {
        runtime.add_action(LoopTiming::Update, item.clone()).unwrap();
    }

    runtime.tick();
    assert!(a.done.load(Ordering::SeqCst));
    assert!(!b.done.load(Ordering::SeqCst));
    assert_eq!(runtime.stats().active_operations(), 2);

    runtime.tick();
    assert!(!b.done.load(Ordering::SeqCst));
    assert_eq!(runtime.stats().active_operations(), 2);

    runtime.tick();
    assert!(b.done.load(Ordering::SeqCst));
    assert_eq!(runtime.stats().active_operations(), 1);

    for _ in 0..10 {
        runtime.tick();
    }
    assert!(!c.done.load(Ordering::SeqCst));
    assert_eq!(runtime.stats().active_operations(), 1);
}

// =============================================================================
// Wait operations
// =============================================================================

#[test]
fn test_wait_until_completes_on_third_advance() {
    let runtime = TaskRuntime::with_defaults();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let task = runtime
        .wait_until(
            move || counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3,
            WaitOptions::new(),
        )
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        runtime.tick();
        seen.push(task.status().unwrap());
    }
    assert_eq!(
        seen,
        vec![TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Succeeded]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    task.get_result().unwrap();
}

#[test]
fn test_cancel_immediately_skips_predicate() {
    let runtime = TaskRuntime::with_defaults();
    let source = CancelSource::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let task = runtime
        .wait_until(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            },
            WaitOptions::new()
                .with_cancel(source.token())
                .cancel_immediately(true),
        )
        .unwrap();

    source.cancel();
    assert_eq!(task.status().unwrap(), TaskStatus::Canceled);

    runtime.tick();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(task.get_result(), Err(TaskError::Canceled)));
}

#[test]
fn test_wait_while_on_fixed_update() {
    let runtime = TaskRuntime::with_defaults();
    let loading = Arc::new(AtomicBool::new(true));
    let flag = loading.clone();
    let task = runtime
        .wait_while(
            move || flag.load(Ordering::SeqCst),
            WaitOptions::from(LoopTiming::FixedUpdate),
        )
        .unwrap();

    runtime.tick();
    assert!(!task.is_completed());
    loading.store(false, Ordering::SeqCst);
    runtime.advance_phase(LoopTiming::FixedUpdate);
    assert!(task.get_result().is_ok());
}

#[test]
fn test_wait_until_canceled_on_next_advance() {
    let runtime = TaskRuntime::with_defaults();
    let source = CancelSource::new();
    let task = runtime
        .wait_until_canceled(source.token(), LoopTiming::Update, false)
        .unwrap();

    source.cancel();
    assert_eq!(task.status().unwrap(), TaskStatus::Pending);
    runtime.tick();
    assert!(task.get_result().is_ok());
}

struct Actor {
    alive: AtomicBool,
    x: AtomicU32,
}

impl HostObject for Actor {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[test]
fn test_value_changed_on_host_object() {
    let runtime = TaskRuntime::with_defaults();
    let actor = Arc::new(Actor {
        alive: AtomicBool::new(true),
        x: AtomicU32::new(10),
    });

    let moved = runtime
        .wait_until_value_changed(
            HostTarget::new(actor.clone()),
            |a: &Actor| a.x.load(Ordering::SeqCst),
            WaitOptions::new(),
        )
        .unwrap();
    runtime.tick();
    assert!(!moved.is_completed());
    actor.x.store(12, Ordering::SeqCst);
    runtime.tick();
    assert_eq!(moved.get_result().unwrap(), 12);

    let destroyed = runtime
        .wait_until_value_changed(
            HostTarget::new(actor.clone()),
            |a: &Actor| a.x.load(Ordering::SeqCst),
            WaitOptions::new(),
        )
        .unwrap();
    actor.alive.store(false, Ordering::SeqCst);
    runtime.tick();
    assert!(matches!(destroyed.get_result(), Err(TaskError::Canceled)));
}

#[test]
fn test_value_changed_with_tolerance() {
    let runtime = TaskRuntime::with_defaults();
    let value = Arc::new(AtomicU32::new(100));
    let task = runtime
        .wait_until_value_changed_with(
            Arc::downgrade(&value),
            |v: &AtomicU32| v.load(Ordering::SeqCst),
            |a: &u32, b: &u32| a.abs_diff(*b) < 5,
            WaitOptions::new(),
        )
        .unwrap();

    value.store(103, Ordering::SeqCst);
    runtime.tick();
    assert!(!task.is_completed());
    value.store(110, Ordering::SeqCst);
    runtime.tick();
    assert_eq!(task.get_result().unwrap(), 110);
}

// =============================================================================
// Cross-thread queue
// =============================================================================

#[test]
fn test_cross_thread_enqueue_runs_each_once() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;
    let runtime = TaskRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let runtime = runtime.clone();
            let log = log.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let log = log.clone();
                    runtime
                        .add_continuation(
                            LoopTiming::Update,
                            Continuation::new(move || log.lock().unwrap().push((t, i))),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    runtime.drain_phase(LoopTiming::Update);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), THREADS * PER_THREAD);
    for t in 0..THREADS {
        let order: Vec<usize> = log.iter().filter(|(o, _)| *o == t).map(|(_, i)| *i).collect();
        assert_eq!(order, (0..PER_THREAD).collect::<Vec<_>>());
    }
}

#[test]
fn test_completion_from_worker_thread() {
    let runtime = TaskRuntime::with_defaults();
    let source = runtime.completion_source::<String>();
    let task = source.task();

    let worker = thread::spawn(move || {
        source.try_set_result("loaded".to_string());
    });
    worker.join().unwrap();

    assert_eq!(task.get_result().unwrap(), "loaded");
}

// =============================================================================
// Yield and async
// =============================================================================

#[test]
fn test_spawned_future_awaits_yield() {
    let runtime = TaskRuntime::with_defaults();
    let inner = runtime.clone();
    let task = runtime
        .spawn(LoopTiming::Update, async move {
            match inner.yield_now(LoopTiming::Update) {
                Ok(yielded) => yielded.await.map(|()| 7u32).unwrap_or(0),
                Err(_) => 0,
            }
        })
        .unwrap();

    for _ in 0..5 {
        if task.is_completed() {
            break;
        }
        runtime.tick();
    }
    assert_eq!(task.get_result().unwrap(), 7);
}

#[test]
fn test_timing_not_injected_is_reported() {
    let runtime = TaskRuntime::new(
        RuntimeConfig::default().with_inject_timings(InjectTimings::MINIMUM),
    );
    assert!(matches!(
        runtime.spawn(LoopTiming::PreUpdate, async {}),
        Err(RuntimeError::TimingNotInjected(LoopTiming::PreUpdate))
    ));
    assert!(runtime.wait_until(|| true, WaitOptions::new()).is_ok());
}

// =============================================================================
// Unobserved faults
// =============================================================================

#[test]
fn test_unobserved_fault_is_reported_once() {
    let runtime = TaskRuntime::with_defaults();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    runtime
        .reporter()
        .set_handler(move |err| sink.lock().unwrap().push(err.to_string()));

    let task = runtime
        .wait_until(|| -> bool { panic!("bad predicate") }, WaitOptions::new())
        .unwrap();
    runtime.tick();
    drop(task);

    let canceled = runtime.completion_source::<()>();
    canceled.try_set_canceled();
    drop(canceled);

    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("bad predicate"));
}

#[test]
fn test_off_thread_fault_dispatched_to_main_thread() {
    let runtime = TaskRuntime::with_defaults();
    let reported = Arc::new(AtomicUsize::new(0));
    let count = reported.clone();
    runtime.reporter().set_handler(move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    let worker = runtime.clone();
    thread::spawn(move || {
        let source = worker.completion_source::<u32>();
        source.try_set_error(Fault::msg("asset missing"));
    })
    .join()
    .unwrap();

    assert_eq!(reported.load(Ordering::SeqCst), 0);
    runtime.tick();
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Host installation
// =============================================================================

#[derive(Default)]
struct MockHost {
    phases: Vec<(LoopTiming, InjectPosition, PhaseCallbacks)>,
    dispatch: Vec<PhaseCallback>,
    missing: Option<LoopTiming>,
}

impl HostLoop for MockHost {
    fn has_phase(&self, group: LoopTiming) -> bool {
        self.missing != Some(group)
    }

    fn inject(&mut self, timing: LoopTiming, position: InjectPosition, callbacks: PhaseCallbacks) {
        self.phases.push((timing, position, callbacks));
    }

    fn inject_dispatch(&mut self, drain: PhaseCallback) {
        self.dispatch.push(drain);
    }
}

impl MockHost {
    fn run_frame(&mut self) {
        for (timing, _, callbacks) in &mut self.phases {
            (callbacks.drain)();
            (callbacks.advance)();
            if *timing == LoopTiming::Update {
                for drain in &mut self.dispatch {
                    drain();
                }
            }
        }
    }
}

#[test]
fn test_install_into_host_loop() {
    let runtime = TaskRuntime::with_defaults();
    let mut host = MockHost::default();
    runtime.install(&mut host).unwrap();

    assert_eq!(host.phases.len(), 16);
    assert_eq!(host.dispatch.len(), 1);
    let position = |timing| {
        host.phases
            .iter()
            .find(|(t, _, _)| *t == timing)
            .map(|(_, p, _)| *p)
    };
    assert_eq!(position(LoopTiming::Update), Some(InjectPosition::First));
    assert_eq!(position(LoopTiming::LastUpdate), Some(InjectPosition::Last));

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    runtime.post_to_main_thread(move || flag.store(true, Ordering::SeqCst));
    let task = runtime.yield_now(LoopTiming::PreLateUpdate).unwrap();

    host.run_frame();
    assert!(ran.load(Ordering::SeqCst));
    assert!(task.get_result().is_ok());
}

#[test]
fn test_install_fails_on_missing_phase() {
    let runtime = TaskRuntime::new(
        RuntimeConfig::default().with_inject_timings(InjectTimings::MINIMUM),
    );
    let mut host = MockHost {
        missing: Some(LoopTiming::FixedUpdate),
        ..MockHost::default()
    };

    assert_eq!(
        runtime.install(&mut host).unwrap_err(),
        RuntimeError::PhaseNotFound(LoopTiming::FixedUpdate)
    );
    assert!(host.phases.is_empty());
    assert!(host.dispatch.is_empty());
}
