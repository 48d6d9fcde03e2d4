//! Public API for frametask.
//!
//! Most users only need [`runtime::TaskRuntime`], [`task::Task`] and the
//! option and cancellation types next to them.

pub mod cancel;
pub mod config;
pub mod error;
pub mod lazy;
pub mod runtime;
pub mod source;
pub mod stats;
pub mod target;
pub mod task;
pub mod timing;
pub mod unobserved;
pub mod wait;

pub(crate) mod spawn;
