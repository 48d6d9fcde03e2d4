//! Atomic helpers for runtime statistics.
//!
//! All counters use relaxed ordering: they feed diagnostics and `RuntimeStats`
//! and never synchronize task state.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A monotonically increasing event counter.
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a new counter.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Increment the counter, returning the new value.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A gauge that tracks a current value plus its high-water mark.
pub struct AtomicGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl AtomicGauge {
    /// Create a new gauge.
    pub const fn new(initial: usize) -> Self {
        Self {
            current: AtomicUsize::new(initial),
            peak: AtomicUsize::new(initial),
        }
    }

    /// Set the value, updating the peak.
    pub fn set(&self, value: usize) {
        self.current.store(value, Ordering::Relaxed);
        self.peak.fetch_max(value, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Get the highest value ever set.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

impl Default for AtomicGauge {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = AtomicCounter::default();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge_peak() {
        let gauge = AtomicGauge::default();
        gauge.set(8);
        gauge.set(3);
        assert_eq!(gauge.get(), 3);
        assert_eq!(gauge.peak(), 8);
    }
}
