//! Resolver metrics collection.

use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use storage::Namespace;

#[derive(Debug, Default)]
struct NamespaceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    store_failures: AtomicU64,
    corrupt: AtomicU64,
}

impl NamespaceCounters {
    fn snapshot(&self) -> NamespaceSnapshot {
        NamespaceSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.store_failures.store(0, Ordering::Relaxed);
        self.corrupt.store(0, Ordering::Relaxed);
    }
}

/// Cache effectiveness counters for the resolver chain.
///
/// Every event is also forwarded to the `metrics` facade so a binary can
/// install an exporter.
#[derive(Debug)]
pub struct ResolverMetrics {
    datasets: NamespaceCounters,
    layers: NamespaceCounters,
    series: NamespaceCounters,
    explorations: AtomicU64,
    start_time: Instant,
}

impl ResolverMetrics {
    pub fn new() -> Self {
        Self {
            datasets: NamespaceCounters::default(),
            layers: NamespaceCounters::default(),
            series: NamespaceCounters::default(),
            explorations: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn counters(&self, ns: Namespace) -> &NamespaceCounters {
        match ns {
            Namespace::Datasets => &self.datasets,
            Namespace::Layers => &self.layers,
            Namespace::Series => &self.series,
        }
    }

    pub fn record_hit(&self, ns: Namespace) {
        self.counters(ns).hits.fetch_add(1, Ordering::Relaxed);
        counter!("explorer_cache_hits_total", "namespace" => ns.dir_name()).increment(1);
    }

    pub fn record_miss(&self, ns: Namespace) {
        self.counters(ns).misses.fetch_add(1, Ordering::Relaxed);
        counter!("explorer_cache_misses_total", "namespace" => ns.dir_name()).increment(1);
    }

    pub fn record_store_failure(&self, ns: Namespace) {
        self.counters(ns).store_failures.fetch_add(1, Ordering::Relaxed);
        counter!("explorer_cache_store_failures_total", "namespace" => ns.dir_name()).increment(1);
    }

    /// A cached artifact that could not be decoded and was recomputed.
    pub fn record_corrupt(&self, ns: Namespace) {
        self.counters(ns).corrupt.fetch_add(1, Ordering::Relaxed);
        counter!("explorer_cache_corrupt_total", "namespace" => ns.dir_name()).increment(1);
    }

    pub fn record_exploration(&self) {
        self.explorations.fetch_add(1, Ordering::Relaxed);
        counter!("explorer_explorations_total").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            explorations: self.explorations.load(Ordering::Relaxed),
            datasets: self.datasets.snapshot(),
            layers: self.layers.snapshot(),
            series: self.series.snapshot(),
        }
    }

    /// Reset all counters (useful for testing)
    pub fn reset(&self) {
        self.datasets.reset();
        self.layers.reset();
        self.series.reset();
        self.explorations.store(0, Ordering::Relaxed);
    }
}

impl Default for ResolverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub store_failures: u64,
    pub corrupt: u64,
}

impl NamespaceSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Snapshot of current metrics for JSON serialization.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub explorations: u64,
    pub datasets: NamespaceSnapshot,
    pub layers: NamespaceSnapshot,
    pub series: NamespaceSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_namespace() {
        let metrics = ResolverMetrics::new();
        metrics.record_miss(Namespace::Layers);
        metrics.record_hit(Namespace::Layers);
        metrics.record_hit(Namespace::Layers);
        metrics.record_store_failure(Namespace::Series);

        let snap = metrics.snapshot();
        assert_eq!(snap.layers.hits, 2);
        assert_eq!(snap.layers.misses, 1);
        assert!((snap.layers.hit_rate() - 66.666).abs() < 0.01);
        assert_eq!(snap.series.store_failures, 1);
        assert_eq!(snap.datasets, NamespaceSnapshot::default());

        metrics.reset();
        assert_eq!(metrics.snapshot().layers.hits, 0);
    }
}
