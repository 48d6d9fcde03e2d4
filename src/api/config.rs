//! Runtime configuration.

use crate::api::timing::InjectTimings;
use crate::api::unobserved::ReportLevel;

/// Default bound on idle instances retained per operation type.
pub const DEFAULT_MAX_POOL_SIZE: usize = 1024;

/// Default initial capacity of each runner's active list.
pub const DEFAULT_RUNNER_CAPACITY: usize = 16;

/// Configuration for a [`TaskRuntime`](crate::TaskRuntime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Timings that get a runner and a continuation queue (default: all)
    pub inject_timings: InjectTimings,

    /// Idle instances retained per operation type (default: 1024)
    pub max_pool_size: usize,

    /// Initial capacity of each runner's active list (default: 16)
    pub runner_capacity: usize,

    /// Report unobserved cancellations as well as faults (default: false)
    pub propagate_cancellation: bool,

    /// Log level for unobserved faults without a handler (default: Exception)
    pub unobserved_level: ReportLevel,

    /// Run the unobserved-fault handler on the main thread (default: true)
    pub dispatch_to_main_thread: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inject_timings: InjectTimings::ALL,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            runner_capacity: DEFAULT_RUNNER_CAPACITY,
            propagate_cancellation: false,
            unobserved_level: ReportLevel::Exception,
            dispatch_to_main_thread: true,
        }
    }
}

impl RuntimeConfig {
    /// The plain timing of every phase group plus the end of frame.
    pub fn standard() -> Self {
        Self {
            inject_timings: InjectTimings::STANDARD,
            ..Self::default()
        }
    }

    /// Update, fixed update and end of frame only, with small pools.
    pub fn minimum() -> Self {
        Self {
            inject_timings: InjectTimings::MINIMUM,
            max_pool_size: 64,
            runner_capacity: 4,
            ..Self::default()
        }
    }

    /// Builder pattern: set injected timings.
    pub fn with_inject_timings(mut self, timings: InjectTimings) -> Self {
        self.inject_timings = timings;
        self
    }

    /// Builder pattern: set per-type pool bound.
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Builder pattern: set runner capacity.
    pub fn with_runner_capacity(mut self, capacity: usize) -> Self {
        self.runner_capacity = capacity;
        self
    }

    /// Builder pattern: report cancellations.
    pub fn with_propagate_cancellation(mut self, propagate: bool) -> Self {
        self.propagate_cancellation = propagate;
        self
    }

    /// Builder pattern: set unobserved-fault log level.
    pub fn with_unobserved_level(mut self, level: ReportLevel) -> Self {
        self.unobserved_level = level;
        self
    }

    /// Builder pattern: dispatch the fault handler to the main thread.
    pub fn with_dispatch_to_main_thread(mut self, dispatch: bool) -> Self {
        self.dispatch_to_main_thread = dispatch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::timing::LoopTiming;

    #[test]
    fn test_presets() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_pool_size, 1024);
        assert!(!config.propagate_cancellation);
        assert!(config.inject_timings.includes(LoopTiming::LastTimeUpdate));

        let minimum = RuntimeConfig::minimum();
        assert!(!minimum.inject_timings.includes(LoopTiming::PreUpdate));
        assert_eq!(minimum.unobserved_level, ReportLevel::Exception);
    }

    #[test]
    fn test_builders() {
        let config = RuntimeConfig::standard()
            .with_max_pool_size(8)
            .with_unobserved_level(ReportLevel::Off)
            .with_dispatch_to_main_thread(false);
        assert_eq!(config.max_pool_size, 8);
        assert_eq!(config.unobserved_level, ReportLevel::Off);
        assert!(!config.dispatch_to_main_thread);
    }
}
