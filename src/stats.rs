use std::time::Duration;

use crate::sync::{AtomicU64, AtomicUsize, Ordering};

/// Cumulative counters the agent exposes for observability, separate from
/// the hot-path queue state in [`crate::queue::NodeQueue`] (`spec.md` §4.4).
#[derive(Default)]
pub struct Stats {
    batches_evaluated: AtomicU64,
    positions_evaluated: AtomicU64,
    backprop_updates: AtomicU64,
    dropped_batches: AtomicU64,
    tb_hits: AtomicUsize,
    last_batch_latency_nanos: AtomicU64,
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed batch of `batch_size` positions that took
    /// `latency` wall-clock time from dispatch to the predictor returning
    /// (`SPEC_FULL.md` §4.4 "Observability hook").
    pub fn record_batch(&self, batch_size: usize, latency: Duration) {
        self.batches_evaluated.fetch_add(1, Ordering::Relaxed);
        self.positions_evaluated.fetch_add(batch_size as u64, Ordering::Relaxed);
        self.last_batch_latency_nanos.store(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_dropped_batch(&self) {
        self.dropped_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backprop_updates(&self, count: usize) {
        self.backprop_updates.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_tablebase_hit(&self) {
        self.tb_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batches_evaluated(&self) -> u64 {
        self.batches_evaluated.load(Ordering::Relaxed)
    }

    pub fn positions_evaluated(&self) -> u64 {
        self.positions_evaluated.load(Ordering::Relaxed)
    }

    pub fn backprop_updates(&self) -> u64 {
        self.backprop_updates.load(Ordering::Relaxed)
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }

    pub fn tb_hits(&self) -> usize {
        self.tb_hits.load(Ordering::Relaxed)
    }

    /// Wall-clock latency of the most recently completed batch, or
    /// `Duration::ZERO` if no batch has completed yet.
    pub fn last_batch_latency(&self) -> Duration {
        Duration::from_nanos(self.last_batch_latency_nanos.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = Stats::new();
        stats.record_batch(64, Duration::from_millis(5));
        stats.record_batch(32, Duration::from_millis(2));
        stats.record_dropped_batch();
        stats.record_backprop_updates(10);
        stats.record_tablebase_hit();

        assert_eq!(stats.batches_evaluated(), 2);
        assert_eq!(stats.positions_evaluated(), 96);
        assert_eq!(stats.dropped_batches(), 1);
        assert_eq!(stats.backprop_updates(), 10);
        assert_eq!(stats.tb_hits(), 1);
        assert_eq!(stats.last_batch_latency(), Duration::from_millis(2));
    }

    #[test]
    fn latency_defaults_to_zero_before_any_batch() {
        let stats = Stats::new();
        assert_eq!(stats.last_batch_latency(), Duration::ZERO);
    }
}
