//! Engine-wide tunables.

use std::time::Duration;

/// Configuration for a [`crate::engine::DiagEngine`] instance.
///
/// Cloned into every component that needs a tunable at construction
/// time; all fields have conservative defaults matching the original
/// system's compiled-in constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period, in milliseconds, routed to the fast scheduler queue.
    pub fast_period_ms: u64,
    /// Period, in milliseconds, routed to the normal scheduler queue.
    pub normal_period_ms: u64,
    /// Period, in milliseconds, routed to the slow scheduler queue.
    pub slow_period_ms: u64,
    /// How often the reclaimer wakes to drain the delete queue.
    pub reclaim_interval: Duration,
    /// Minimum number of deleted nodes freed per reclaimer wake, when
    /// the queue is non-empty (`max(ceil(queue / 3), 30)` is applied
    /// on top of this floor at drain time).
    pub reclaim_min_batch: usize,
    /// Pause inserted after a reclaimer wake that found no work.
    pub reclaim_idle_backoff: Duration,
    /// Idle time-to-live for CLI snapshot handles before the sweep
    /// reclaims them.
    pub cli_handle_ttl: Duration,
    /// Maximum serial rule chain depth.
    pub max_serial_rules: u32,
    /// Maximum component nesting depth.
    pub max_comp_nesting: u32,
    /// Consecutive-abort tolerance before a `Candidate` root cause is
    /// treated as passed and released.
    pub abort_tolerance: u32,
    /// Bounded worker pool size for callback dispatch.
    pub worker_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast_period_ms: crate::types::period::FAST_MS,
            normal_period_ms: crate::types::period::NORMAL_MS,
            slow_period_ms: crate::types::period::SLOW_MS,
            reclaim_interval: Duration::from_secs(12),
            reclaim_min_batch: 30,
            reclaim_idle_backoff: Duration::from_secs(5),
            cli_handle_ttl: Duration::from_secs(12 * 60 * 60),
            max_serial_rules: crate::types::MAX_SERIAL_RULES,
            max_comp_nesting: crate::types::MAX_COMP_NESTING,
            abort_tolerance: 3,
            worker_pool_size: 8,
        }
    }
}

impl EngineConfig {
    /// Override the fast-tier period.
    pub fn with_fast_period(mut self, ms: u64) -> Self {
        self.fast_period_ms = ms;
        self
    }

    /// Override the normal-tier period.
    pub fn with_normal_period(mut self, ms: u64) -> Self {
        self.normal_period_ms = ms;
        self
    }

    /// Override the slow-tier period.
    pub fn with_slow_period(mut self, ms: u64) -> Self {
        self.slow_period_ms = ms;
        self
    }

    /// Override the reclaimer's wake interval.
    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Override the CLI handle idle TTL.
    pub fn with_cli_handle_ttl(mut self, ttl: Duration) -> Self {
        self.cli_handle_ttl = ttl;
        self
    }

    /// Override the worker pool size.
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Resolve a raw millisecond period to the scheduler queue it
    /// belongs in.
    pub fn queue_for_period(&self, period_ms: u64) -> crate::scheduler::QueueKind {
        use crate::scheduler::QueueKind;
        if period_ms == self.fast_period_ms {
            QueueKind::Fast
        } else if period_ms == self.normal_period_ms {
            QueueKind::Normal
        } else if period_ms == self.slow_period_ms {
            QueueKind::Slow
        } else {
            QueueKind::User
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tiered_periods() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.fast_period_ms, 5_000);
        assert_eq!(cfg.normal_period_ms, 60_000);
        assert_eq!(cfg.slow_period_ms, 3_600_000);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = EngineConfig::default()
            .with_fast_period(1_000)
            .with_worker_pool_size(4);
        assert_eq!(cfg.fast_period_ms, 1_000);
        assert_eq!(cfg.worker_pool_size, 4);
    }
}
