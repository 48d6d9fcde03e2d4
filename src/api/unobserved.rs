//! Unobserved-failure reporting.
//!
//! A task whose outcome is Faulted but whose result is never read surfaces
//! here exactly once, when its source is reset or dropped. Loop items that
//! panic inside a runner surface here too.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

use crate::api::error::TaskError;
use crate::core::completion::Continuation;
use crate::core::queue::ContinuationQueue;
use crate::diagnostics::{emit_with_detail, DiagnosticKind, FT302};
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;

/// How unobserved faults are logged when no handler is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ReportLevel {
    /// Error diagnostic with the full debug form of the fault.
    #[default]
    Exception = 0,
    /// Error diagnostic with the display form.
    Error = 1,
    /// Warning diagnostic.
    Warning = 2,
    /// Informational note.
    Log = 3,
    /// Not logged.
    Off = 4,
}

impl From<u8> for ReportLevel {
    fn from(val: u8) -> Self {
        match val {
            0 => ReportLevel::Exception,
            1 => ReportLevel::Error,
            2 => ReportLevel::Warning,
            3 => ReportLevel::Log,
            _ => ReportLevel::Off,
        }
    }
}

/// User hook for unobserved faults.
pub type FaultHandler = Arc<dyn Fn(&TaskError) + Send + Sync>;

struct MainThread {
    id: ThreadId,
    queue: Weak<ContinuationQueue>,
}

/// Process-wide or per-runtime sink for unobserved faults.
pub struct FaultReporter {
    /// Installed handler.
    handler: Mutex<Option<FaultHandler>>,

    /// Report cancellations too.
    propagate_cancellation: AtomicBool,

    /// Log level used without a handler.
    level: AtomicU8,

    /// Re-dispatch the handler onto the main thread.
    dispatch_to_main_thread: AtomicBool,

    /// Main thread and its dispatch queue, set by the runtime.
    main: Mutex<Option<MainThread>>,

    /// Faults reported so far.
    reported: AtomicCounter,
}

impl FaultReporter {
    /// Create a reporter with default policy: cancellations swallowed,
    /// `Exception` level, main-thread dispatch on.
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
            propagate_cancellation: AtomicBool::new(false),
            level: AtomicU8::new(ReportLevel::Exception as u8),
            dispatch_to_main_thread: AtomicBool::new(true),
            main: Mutex::new(None),
            reported: AtomicCounter::new(0),
        }
    }

    /// The reporter used by sources created outside a runtime.
    pub fn global() -> Arc<FaultReporter> {
        static GLOBAL: OnceLock<Arc<FaultReporter>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(FaultReporter::new())).clone()
    }

    /// Install a handler, replacing logging.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&TaskError) + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Remove the handler and go back to logging.
    pub fn clear_handler(&self) {
        *self.handler.lock() = None;
    }

    /// Report cancellations as well as faults.
    pub fn set_propagate_cancellation(&self, propagate: bool) {
        self.propagate_cancellation.store(propagate, Ordering::Relaxed);
    }

    /// Whether cancellations are reported.
    pub fn propagate_cancellation(&self) -> bool {
        self.propagate_cancellation.load(Ordering::Relaxed)
    }

    /// Set the log level used without a handler.
    pub fn set_level(&self, level: ReportLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Current log level.
    pub fn level(&self) -> ReportLevel {
        ReportLevel::from(self.level.load(Ordering::Relaxed))
    }

    /// Re-dispatch the handler onto the main thread when a fault surfaces elsewhere.
    pub fn set_dispatch_to_main_thread(&self, dispatch: bool) {
        self.dispatch_to_main_thread.store(dispatch, Ordering::Relaxed);
    }

    /// Bind the main thread and the queue drained on it.
    pub fn set_main_thread(&self, id: ThreadId, queue: &Arc<ContinuationQueue>) {
        *self.main.lock() = Some(MainThread {
            id,
            queue: Arc::downgrade(queue),
        });
    }

    /// Unbind the main thread.
    pub fn clear_main_thread(&self) {
        *self.main.lock() = None;
    }

    /// Number of faults that reached the handler or the log.
    pub fn reported_count(&self) -> u64 {
        self.reported.get()
    }

    /// Report an unobserved error.
    pub fn publish(&self, error: TaskError) {
        if error.is_canceled() && !self.propagate_cancellation() {
            return;
        }
        self.reported.increment();

        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => match self.off_main_queue() {
                Some(queue) => queue.enqueue(Continuation::new(move || handler(&error))),
                None => handler(&error),
            },
            None => self.log(&error),
        }
    }

    /// The main queue, when the caller is off the main thread and dispatch is on.
    fn off_main_queue(&self) -> Option<Arc<ContinuationQueue>> {
        if !self.dispatch_to_main_thread.load(Ordering::Relaxed) {
            return None;
        }
        let main = self.main.lock();
        let main = main.as_ref()?;
        if main.id == std::thread::current().id() {
            return None;
        }
        main.queue.upgrade()
    }

    fn log(&self, error: &TaskError) {
        match self.level() {
            ReportLevel::Off => {}
            ReportLevel::Exception => emit_with_detail(&FT302, &format!("{:?}", error)),
            ReportLevel::Error => emit_with_detail(&FT302, &error.to_string()),
            ReportLevel::Warning => emit_with_detail(
                &FT302.with_kind(DiagnosticKind::Warning),
                &error.to_string(),
            ),
            ReportLevel::Log => {
                emit_with_detail(&FT302.with_kind(DiagnosticKind::Note), &error.to_string())
            }
        }
    }
}

impl Default for FaultReporter {
    fn default() -> Self {
        Self::new()
    }
}
