use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::CacheMetricsSnapshot;

/// Engine-level runtime counters. All counters are wait-free atomics so the
/// hot path never takes a lock to account an event.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub(crate) events_total: AtomicU64,
    pub(crate) matches_total: AtomicU64,
    pub(crate) predicates_evaluated_total: AtomicU64,
    pub(crate) encoding_misses_total: AtomicU64,
    pub(crate) regex_errors_total: AtomicU64,
    pub(crate) base_filter_computed_total: AtomicU64,
    pub(crate) eligible_set_rebuilds_total: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn snapshot(&self, cache: CacheMetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            events_total: self.events_total.load(Ordering::Relaxed),
            matches_total: self.matches_total.load(Ordering::Relaxed),
            predicates_evaluated_total: self.predicates_evaluated_total.load(Ordering::Relaxed),
            encoding_misses_total: self.encoding_misses_total.load(Ordering::Relaxed),
            regex_errors_total: self.regex_errors_total.load(Ordering::Relaxed),
            base_filter_computed_total: self.base_filter_computed_total.load(Ordering::Relaxed),
            eligible_set_rebuilds_total: self.eligible_set_rebuilds_total.load(Ordering::Relaxed),
            cache,
        }
    }
}

/// Point-in-time view of the engine counters, serializable for the CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub events_total: u64,
    pub matches_total: u64,
    pub predicates_evaluated_total: u64,
    pub encoding_misses_total: u64,
    pub regex_errors_total: u64,
    pub base_filter_computed_total: u64,
    pub eligible_set_rebuilds_total: u64,
    pub cache: CacheMetricsSnapshot,
}
