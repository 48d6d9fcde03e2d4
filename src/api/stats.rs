//! Runtime statistics.

use crate::api::timing::LoopTiming;
use crate::core::pool::PoolSize;

/// Per-timing counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingStats {
    /// The timing.
    pub timing: LoopTiming,
    /// Operations held by the runner.
    pub active: usize,
    /// Most operations the runner held at once.
    pub peak_active: usize,
    /// Continuations waiting in the timing's queue.
    pub pending_continuations: usize,
}

/// Aggregated runtime statistics.
#[derive(Debug, Clone, Default)]
pub struct RuntimeStats {
    /// Frames completed by `tick`.
    pub frame_count: u64,

    /// Injected timings, in frame order.
    pub timings: Vec<TimingStats>,

    /// Entries waiting in the main-thread post queue.
    pub main_thread_pending: usize,

    /// Idle pooled instances per operation type.
    pub pools: Vec<PoolSize>,

    /// Unobserved faults reported so far.
    pub unobserved_faults: u64,
}

impl RuntimeStats {
    /// Operations held across all runners.
    pub fn active_operations(&self) -> usize {
        self.timings.iter().map(|t| t.active).sum()
    }

    /// Continuations waiting across all queues, including the main-thread queue.
    pub fn pending_continuations(&self) -> usize {
        self.timings
            .iter()
            .map(|t| t.pending_continuations)
            .sum::<usize>()
            + self.main_thread_pending
    }

    /// Idle pooled instances across all types.
    pub fn pooled_instances(&self) -> usize {
        self.pools.iter().map(|p| p.size).sum()
    }
}

impl std::fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Task Runtime Statistics:")?;
        writeln!(f, "  Frames:            {}", self.frame_count)?;
        writeln!(f, "  Active operations: {}", self.active_operations())?;
        writeln!(f, "  Pending:           {}", self.pending_continuations())?;
        writeln!(f, "  Pooled instances:  {}", self.pooled_instances())?;
        writeln!(f, "  Unobserved faults: {}", self.unobserved_faults)?;
        for timing in self.timings.iter().filter(|t| t.active > 0 || t.pending_continuations > 0) {
            writeln!(
                f,
                "  {:<20} active {:>5} (peak {:>5}) queued {:>5}",
                timing.timing.name(),
                timing.active,
                timing.peak_active,
                timing.pending_continuations
            )?;
        }
        for pool in &self.pools {
            writeln!(f, "  pool {}: {}/{}", pool.type_name, pool.size, pool.max_size)?;
        }
        Ok(())
    }
}
