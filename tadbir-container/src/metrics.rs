//! Resolution counters and read-only snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::weak::HandleCounts;

/// Counters owned by a coordinator. Updated lock-free on every resolve.
#[derive(Debug, Default)]
pub(crate) struct ResolutionMetrics {
    total: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    latency_nanos: AtomicU64,
}

impl ResolutionMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the end of one `resolve` call.
    pub fn record_resolution(&self, elapsed: Duration, failed: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.latency_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self, handles: HandleCounts) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let latency = self.latency_nanos.load(Ordering::Relaxed);
        let average_latency = match total {
            0 => Duration::ZERO,
            n => Duration::from_nanos(latency / n),
        };

        MetricsSnapshot {
            total_resolutions: total,
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            average_latency,
            weak_alive: handles.alive,
            weak_dead: handles.dead,
            weak_total: handles.total(),
        }
    }
}

/// Point-in-time view of a container's resolution activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_resolutions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failures: u64,
    pub average_latency: Duration,
    pub weak_alive: usize,
    pub weak_dead: usize,
    pub weak_total: usize,
}

impl MetricsSnapshot {
    /// Share of lookups served from a cache, in `[0, 1]`.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_averages_latency() {
        let metrics = ResolutionMetrics::default();
        metrics.record_miss();
        metrics.record_resolution(Duration::from_millis(4), false);
        metrics.record_hit();
        metrics.record_resolution(Duration::from_millis(2), true);

        let snapshot = metrics.snapshot(HandleCounts { alive: 2, dead: 1 });
        assert_eq!(snapshot.total_resolutions, 2);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.average_latency, Duration::from_millis(3));
        assert_eq!(snapshot.weak_total, 3);
        assert!((snapshot.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let snapshot = ResolutionMetrics::default().snapshot(HandleCounts::default());
        assert_eq!(snapshot.total_resolutions, 0);
        assert_eq!(snapshot.average_latency, Duration::ZERO);
        assert_eq!(snapshot.hit_ratio(), 0.0);
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = ResolutionMetrics::default().snapshot(HandleCounts::default());
        let json = serde_json::to_value(snapshot).expect("serialize snapshot");
        assert_eq!(json["total_resolutions"], 0);
        assert!(json.get("average_latency").is_some());
    }
}
