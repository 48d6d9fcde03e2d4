//! # frametask
//!
//! Allocation-minimizing cooperative tasks driven by a game engine's
//! per-frame update loop.
//!
//! ## Features
//!
//! - Versioned, pooled operations: a task handle carries a `u16` token, so a
//!   recycled operation rejects stale readers
//! - Sixteen loop timings, each with a runner and a continuation queue
//! - Exactly-once continuation dispatch under producer/registrant races
//! - Wait operations: predicate, cancellation, value change
//! - Manual completion sources, frame yields, and `Future` integration
//! - Lazily started tasks shared by many callers
//! - Cross-thread completion queue drained on the owning thread
//! - Unobserved-fault reporting with a configurable level
//! - Coded diagnostics with an optional strict mode
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frametask::{LoopTiming, TaskRuntime, WaitOptions};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! let runtime = TaskRuntime::with_defaults();
//! let hp = Arc::new(AtomicU32::new(3));
//!
//! let watched = hp.clone();
//! let dead = runtime
//!     .wait_until(move || watched.load(Ordering::Relaxed) == 0, WaitOptions::new())
//!     .unwrap();
//!
//! // Game loop
//! while !dead.is_completed() {
//!     hp.fetch_sub(1, Ordering::Relaxed);
//!     runtime.tick();
//! }
//! dead.get_result().unwrap();
//! ```

pub mod api;
pub mod core;
pub mod diagnostics;

mod sync;

// Runtime
pub use api::config::{RuntimeConfig, DEFAULT_MAX_POOL_SIZE, DEFAULT_RUNNER_CAPACITY};
pub use api::runtime::{HostLoop, InjectPosition, PhaseCallback, PhaseCallbacks, TaskRuntime};
pub use api::stats::{RuntimeStats, TimingStats};
pub use api::timing::{InjectTimings, LoopTiming, TIMING_COUNT};

// Tasks
pub use api::error::{Fault, PanicFault, RuntimeError, TaskError};
pub use api::lazy::AsyncLazy;
pub use api::source::{CompletionSource, PromiseSource};
pub use api::task::{Task, TaskSource, TaskStatus};

// Operations
pub use api::cancel::{CancelRegistration, CancelSignal, CancelSource, CancelToken};
pub use api::target::{HostObject, HostTarget, TargetRef};
pub use api::wait::{CanceledPromise, PredicatePromise, ValueChangedPromise, WaitOptions};

// Unobserved faults
pub use api::unobserved::{FaultHandler, FaultReporter, ReportLevel};

// Building blocks
pub use crate::core::cell::{Outcome, ResultCell};
pub use crate::core::completion::{CompletionCore, Continuation};
pub use crate::core::pool::{PoolItem, PoolRegistry, PoolSize, TaskPool};
pub use crate::core::queue::ContinuationQueue;
pub use crate::core::runner::{LoopItem, LoopRunner};

// Diagnostics
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{set_strict_mode, StrictMode, StrictModeGuard};
pub use diagnostics::{FT001, FT002, FT101, FT201, FT202, FT203, FT204, FT301, FT302, FT901};
