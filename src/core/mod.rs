//! Runtime internals: the result cell, the completion core, pools, runners
//! and the cross-thread queue.
//!
//! These are public so custom operations can be built on the same pieces the
//! built-in waits use.

pub mod cell;
pub mod completion;
pub mod pool;
pub mod queue;
pub mod runner;
