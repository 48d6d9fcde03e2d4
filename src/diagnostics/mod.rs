//! Runtime diagnostics.
//!
//! Task-protocol misuse and runtime faults are reported as coded diagnostics
//! on stderr (or through `log` with the `log` feature). An optional strict
//! mode turns errors into panics for CI.
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                                   |
//! |-------|-------------------------------------------|
//! | FT0xx | Task protocol (tokens, continuations)     |
//! | FT1xx | Pooling                                   |
//! | FT2xx | Runners and loop timings                  |
//! | FT3xx | Threading and unobserved faults           |
//! | FT9xx | Internal errors                           |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use frametask::diagnostics::{self, CollectingSink};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(CollectingSink::new());
//! diagnostics::set_sink(Some(sink.clone()));
//! // ... drive the runtime ...
//! assert!(!sink.has_errors());
//! ```

pub mod emit;
pub mod kind;
pub mod macros;
pub mod strict;

pub use emit::{
    emit, emit_with_detail, is_suppressed, is_verbose, set_sink, set_verbose, suppress_diagnostics,
    CollectingSink, DiagnosticSink,
};
pub use kind::{Diagnostic, DiagnosticKind};
pub use strict::{init_from_env, set_strict_mode, strict_mode, StrictMode, StrictModeGuard};

pub use kind::{FT001, FT002, FT101, FT201, FT202, FT203, FT204, FT301, FT302, FT901};
