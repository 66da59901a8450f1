use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Trait for tracking ingest and query activity of a trace database.
///
/// Implementations are injected through `TraceDb::with_metrics` and called
/// from the ingest pipeline and the condition evaluator.
pub trait StorageMetrics: Send + Sync {
    /// Records an event appended to the event log.
    fn event_appended(&self, bytes: usize);

    /// Records `count` tuples written to indexes for one event.
    fn tuples_indexed(&self, count: usize);

    /// Records an event the reordering buffer had to drop.
    fn event_dropped(&self);

    /// Records a condition evaluation.
    fn query_evaluated(&self);

    /// Records a count lookup.
    ///
    /// # Parameters
    /// * `cached` - Whether the result was served from the count cache.
    fn count_query(&self, cached: bool);
}

/// A no-op implementation of [`StorageMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn event_appended(&self, _bytes: usize) {}
    fn tuples_indexed(&self, _count: usize) {}
    fn event_dropped(&self) {}
    fn query_evaluated(&self) {}
    fn count_query(&self, _cached: bool) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Events appended.
    pub events_appended: AtomicU64,

    /// Record bytes appended, length prefixes included.
    pub bytes_appended: AtomicU64,

    /// Index tuples written.
    pub tuples_indexed: AtomicU64,

    /// Events dropped by the reordering buffer.
    pub events_dropped: AtomicU64,

    /// Conditions evaluated.
    pub queries_evaluated: AtomicU64,

    /// Count lookups served from the cache.
    pub count_cache_hits: AtomicU64,

    /// Count lookups that walked an index.
    pub count_cache_misses: AtomicU64,
}

/// Plain copy of [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Events appended.
    pub events_appended: u64,
    /// Record bytes appended.
    pub bytes_appended: u64,
    /// Index tuples written.
    pub tuples_indexed: u64,
    /// Events dropped.
    pub events_dropped: u64,
    /// Conditions evaluated.
    pub queries_evaluated: u64,
    /// Count cache hits.
    pub count_cache_hits: u64,
    /// Count cache misses.
    pub count_cache_misses: u64,
}

impl CounterMetrics {
    /// Reads every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_appended: self.events_appended.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            tuples_indexed: self.tuples_indexed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            queries_evaluated: self.queries_evaluated.load(Ordering::Relaxed),
            count_cache_hits: self.count_cache_hits.load(Ordering::Relaxed),
            count_cache_misses: self.count_cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl StorageMetrics for CounterMetrics {
    fn event_appended(&self, bytes: usize) {
        self.events_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn tuples_indexed(&self, count: usize) {
        self.tuples_indexed.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn query_evaluated(&self) {
        self.queries_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    fn count_query(&self, cached: bool) {
        if cached {
            self.count_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.count_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_metrics_accumulate() {
        let metrics = CounterMetrics::default();
        metrics.event_appended(40);
        metrics.event_appended(2);
        metrics.tuples_indexed(6);
        metrics.count_query(true);
        metrics.count_query(false);
        metrics.count_query(false);
        let snap = metrics.snapshot();
        assert_eq!(snap.events_appended, 2);
        assert_eq!(snap.bytes_appended, 42);
        assert_eq!(snap.tuples_indexed, 6);
        assert_eq!(snap.count_cache_hits, 1);
        assert_eq!(snap.count_cache_misses, 2);
    }
}
