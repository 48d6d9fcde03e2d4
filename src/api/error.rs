//! Error types for tasks and the runtime.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::api::timing::LoopTiming;

/// A captured failure from an operation body.
///
/// Cheap to clone; the underlying error is shared.
#[derive(Clone)]
pub struct Fault(Arc<dyn Error + Send + Sync>);

impl Fault {
    /// Wrap any error.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// A fault carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(MessageFault(message.into())))
    }

    /// Convert a payload caught by `std::panic::catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self(Arc::new(PanicFault { message }))
    }

    /// Whether this fault came from a caught panic.
    pub fn is_panic(&self) -> bool {
        self.0.downcast_ref::<PanicFault>().is_some()
    }

    /// Downcast to the concrete error type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// The underlying error.
    pub fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

#[derive(Debug)]
struct MessageFault(String);

impl fmt::Display for MessageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for MessageFault {}

/// A panic caught inside a predicate, monitor, continuation or spawned future.
#[derive(Debug, Clone)]
pub struct PanicFault {
    /// The panic message, when the payload was a string.
    pub message: String,
}

impl fmt::Display for PanicFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation panicked: {}", self.message)
    }
}

impl Error for PanicFault {}

/// Errors observed through a [`Task`](crate::Task).
#[derive(Debug, Clone)]
pub enum TaskError {
    /// The token does not match the source's current version.
    StaleToken {
        /// Token held by the caller.
        presented: u16,
        /// Version of the source right now.
        current: u16,
    },
    /// The result for this token was already read.
    AlreadyConsumed {
        /// The consumed token.
        token: u16,
    },
    /// The result was requested while the task is still pending.
    NotCompleted,
    /// A second continuation was registered on the same task.
    ContinuationAlreadyRegistered,
    /// The operation failed.
    Faulted(Fault),
    /// The operation was canceled.
    Canceled,
}

impl TaskError {
    /// True for errors that indicate misuse of the task protocol.
    ///
    /// These are never retried.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            TaskError::StaleToken { .. }
                | TaskError::AlreadyConsumed { .. }
                | TaskError::NotCompleted
                | TaskError::ContinuationAlreadyRegistered
        )
    }

    /// True when the token no longer identifies a live result.
    pub fn is_stale(&self) -> bool {
        matches!(self, TaskError::StaleToken { .. } | TaskError::AlreadyConsumed { .. })
    }

    /// True for the `Canceled` outcome.
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }

    /// The fault, if this is a `Faulted` outcome.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            TaskError::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::StaleToken { presented, current } => write!(
                f,
                "stale task token {} (source is at version {}); the source was consumed and reused",
                presented, current
            ),
            TaskError::AlreadyConsumed { token } => {
                write!(f, "result for task token {} was already consumed", token)
            }
            TaskError::NotCompleted => write!(f, "task has not completed"),
            TaskError::ContinuationAlreadyRegistered => {
                write!(f, "a continuation is already registered on this task")
            }
            TaskError::Faulted(fault) => write!(f, "task faulted: {}", fault),
            TaskError::Canceled => write!(f, "task was canceled"),
        }
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TaskError::Faulted(fault) => Some(fault.as_error()),
            _ => None,
        }
    }
}

impl From<Fault> for TaskError {
    fn from(fault: Fault) -> Self {
        TaskError::Faulted(fault)
    }
}

/// Runtime misconfiguration. Fatal; not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// The timing was not enabled in the runtime's inject mask.
    TimingNotInjected(LoopTiming),
    /// The host loop has no phase for this timing.
    PhaseNotFound(LoopTiming),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TimingNotInjected(timing) => write!(
                f,
                "loop timing {} is not injected; enable it in RuntimeConfig::inject_timings",
                timing
            ),
            RuntimeError::PhaseNotFound(timing) => {
                write!(f, "host loop has no phase for timing {}", timing)
            }
        }
    }
}

impl Error for RuntimeError {}
