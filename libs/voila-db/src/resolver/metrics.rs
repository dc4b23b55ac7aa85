//! Resolver metrics: atomic counters plus a point-in-time snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Counters updated on the resolve path. Increments are atomic; the rolling
/// average is approximate by design.
#[derive(Debug, Default)]
pub(crate) struct ResolverMetrics {
    pub total_resolves: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub resolver_successes: AtomicU64,
    pub resolver_failures: AtomicU64,
    pub circuit_breaker_trips: AtomicU64,
    avg_resolve_ms: Mutex<f64>,
}

impl ResolverMetrics {
    /// Fold one elapsed resolve time into the rolling average:
    /// `avg = 0.9 * avg + 0.1 * elapsed`.
    pub fn record_resolve_time(&self, elapsed_ms: f64) {
        let mut avg = self.avg_resolve_ms.lock();
        *avg = if *avg == 0.0 {
            elapsed_ms
        } else {
            0.9 * *avg + 0.1 * elapsed_ms
        };
    }

    pub fn average_resolve_ms(&self) -> f64 {
        *self.avg_resolve_ms.lock()
    }
}

/// Point-in-time view of the resolver, safe to serialize into health
/// endpoints.
#[derive(Clone, Debug)]
pub struct ResolverMetricsSnapshot {
    pub total_resolves: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub resolver_successes: u64,
    pub resolver_failures: u64,
    pub circuit_breaker_trips: u64,
    /// Rolling average resolve time in milliseconds.
    pub average_resolve_ms: f64,
    /// Current number of cached org URLs.
    pub cache_size: usize,
    /// Hits over hits+misses, 0.0 when nothing resolved yet.
    pub hit_rate: f64,
    /// Most-accessed orgs, most first.
    pub top_orgs: Vec<(String, u64)>,
    /// Orgs whose circuit is currently open.
    pub open_circuits: Vec<String>,
}

impl ResolverMetricsSnapshot {
    pub(crate) fn from_counters(
        metrics: &ResolverMetrics,
        cache_size: usize,
        top_orgs: Vec<(String, u64)>,
        open_circuits: Vec<String>,
    ) -> Self {
        let hits = metrics.cache_hits.load(Ordering::Relaxed);
        let misses = metrics.cache_misses.load(Ordering::Relaxed);
        let probes = hits + misses;
        Self {
            total_resolves: metrics.total_resolves.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            resolver_successes: metrics.resolver_successes.load(Ordering::Relaxed),
            resolver_failures: metrics.resolver_failures.load(Ordering::Relaxed),
            circuit_breaker_trips: metrics.circuit_breaker_trips.load(Ordering::Relaxed),
            average_resolve_ms: metrics.average_resolve_ms(),
            cache_size,
            #[allow(clippy::cast_precision_loss)]
            hit_rate: if probes == 0 {
                0.0
            } else {
                hits as f64 / probes as f64
            },
            top_orgs,
            open_circuits,
        }
    }
}
