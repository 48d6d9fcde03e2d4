//! Synchronization primitives.
//!
//! Provides thin wrappers over std or parking_lot mutexes, plus relaxed
//! atomics for statistics.

pub(crate) mod atomics;
pub(crate) mod mutex;
