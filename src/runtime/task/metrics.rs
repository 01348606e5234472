use std::cmp::max;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide compiler counters.
#[derive(Debug, Default)]
pub struct CompilerMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    persistent_hits: AtomicU64,
    corrupt_evictions: AtomicU64,
    variants_compiled: AtomicU64,
    variants_failed: AtomicU64,
    parts_compiled: AtomicU64,
    jobs_queued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_dropped: AtomicU64,
    jobs_waiting: AtomicI64,
}

impl CompilerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_cache_hit(&self, persistent: bool) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        if persistent {
            self.persistent_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_eviction(&self) {
        self.corrupt_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_variant(&self, failed: bool) {
        if failed {
            self.variants_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.variants_compiled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_part(&self) {
        self.parts_compiled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue(&self) {
        self.jobs_queued.fetch_add(1, Ordering::Relaxed);
        self.jobs_waiting.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.jobs_waiting.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
        self.jobs_waiting.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            corrupt_evictions: self.corrupt_evictions.load(Ordering::Relaxed),
            variants_compiled: self.variants_compiled.load(Ordering::Relaxed),
            variants_failed: self.variants_failed.load(Ordering::Relaxed),
            parts_compiled: self.parts_compiled.load(Ordering::Relaxed),
            jobs_queued: self.jobs_queued.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            jobs_waiting: max(self.jobs_waiting.load(Ordering::Relaxed), 0) as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub persistent_hits: u64,
    pub corrupt_evictions: u64,
    pub variants_compiled: u64,
    pub variants_failed: u64,
    pub parts_compiled: u64,
    pub jobs_queued: u64,
    pub jobs_completed: u64,
    pub jobs_dropped: u64,
    pub jobs_waiting: u64,
}
