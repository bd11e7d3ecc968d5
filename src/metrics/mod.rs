//! Cache Metrics System
//!
//! Provides counters for the checkpoint cache engine and a reporting trait that
//! exposes them as a `BTreeMap<String, f64>`.
//!
//! # Why BTreeMap over HashMap?
//!
//! BTreeMap keeps metric names in a deterministic order, so reports, logs and test
//! assertions see the same layout on every run. With roughly fifteen keys the
//! lookup cost is irrelevant.

use std::collections::BTreeMap;

/// Counters tracked by every [`TimeQueueCache`](crate::TimeQueueCache).
#[derive(Debug, Default, Clone)]
pub struct CoreCacheMetrics {
    /// Total number of fetches made against the cache
    pub requests: u64,

    /// Number of fetches that found an entry
    pub cache_hits: u64,

    /// Total bytes served from entries found by fetches
    pub bytes_served_from_cache: u64,

    /// Number of entries admitted
    pub insertions: u64,

    /// Total bytes admitted
    pub bytes_written_to_cache: u64,

    /// Number of entries removed by the checkpoint sweep (size pressure or forced)
    pub evictions: u64,

    /// Number of entries removed explicitly by callers
    pub removals: u64,

    /// Number of removal attempts refused by the removal hook
    pub removal_failures: u64,

    /// Number of completed checkpoint sweeps
    pub checkpoints: u64,

    /// Current size of data stored in the cache
    pub cache_size_bytes: u64,

    /// Configured size budget
    pub max_cache_size_bytes: u64,
}

impl CoreCacheMetrics {
    /// Creates a new CoreCacheMetrics instance with the specified maximum cache size
    ///
    /// # Arguments
    /// * `max_cache_size_bytes` - The size budget of the cache
    pub fn new(max_cache_size_bytes: u64) -> Self {
        Self {
            max_cache_size_bytes,
            ..Default::default()
        }
    }

    /// Records a fetch that found an entry of `object_size`.
    pub fn record_hit(&mut self, object_size: u64) {
        self.requests += 1;
        self.cache_hits += 1;
        self.bytes_served_from_cache += object_size;
    }

    /// Records a fetch that found nothing.
    pub fn record_miss(&mut self) {
        self.requests += 1;
    }

    /// Records an admitted entry.
    pub fn record_insertion(&mut self, object_size: u64) {
        self.insertions += 1;
        self.bytes_written_to_cache += object_size;
    }

    /// Records an entry removed by the checkpoint sweep.
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Records an entry removed at a caller's request.
    pub fn record_removal(&mut self) {
        self.removals += 1;
    }

    /// Records a removal refused by the removal hook.
    pub fn record_removal_failure(&mut self) {
        self.removal_failures += 1;
    }

    /// Records a completed checkpoint sweep.
    pub fn record_checkpoint(&mut self) {
        self.checkpoints += 1;
    }

    /// Calculates the hit rate
    ///
    /// # Returns
    /// A value between 0.0 and 1.0, or 0.0 if no requests have been made
    pub fn hit_rate(&self) -> f64 {
        if self.requests > 0 {
            self.cache_hits as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Calculates the miss rate
    ///
    /// # Returns
    /// A value between 0.0 and 1.0, or 0.0 if no requests have been made
    pub fn miss_rate(&self) -> f64 {
        if self.requests > 0 {
            (self.requests - self.cache_hits) as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Calculates cache utilization relative to the size budget.
    ///
    /// Can exceed 1.0: the sweep never evicts entries that are in active use.
    pub fn cache_utilization(&self) -> f64 {
        if self.max_cache_size_bytes > 0 {
            self.cache_size_bytes as f64 / self.max_cache_size_bytes as f64
        } else {
            0.0
        }
    }

    /// Convert metrics to BTreeMap for reporting
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("cache_hits".to_string(), self.cache_hits as f64);
        metrics.insert(
            "cache_misses".to_string(),
            (self.requests - self.cache_hits) as f64,
        );
        metrics.insert("requests".to_string(), self.requests as f64);
        metrics.insert("insertions".to_string(), self.insertions as f64);
        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("removals".to_string(), self.removals as f64);
        metrics.insert("removal_failures".to_string(), self.removal_failures as f64);
        metrics.insert("checkpoints".to_string(), self.checkpoints as f64);

        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("miss_rate".to_string(), self.miss_rate());

        metrics.insert(
            "bytes_served_from_cache".to_string(),
            self.bytes_served_from_cache as f64,
        );
        metrics.insert(
            "bytes_written_to_cache".to_string(),
            self.bytes_written_to_cache as f64,
        );

        metrics.insert("cache_size_bytes".to_string(), self.cache_size_bytes as f64);
        metrics.insert(
            "max_cache_size_bytes".to_string(),
            self.max_cache_size_bytes as f64,
        );
        metrics.insert("cache_utilization".to_string(), self.cache_utilization());

        metrics
    }
}

/// Trait for uniform metrics reporting across caches
///
/// Uses BTreeMap so that metric names always come back in the same order.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name identifying the cache (e.g. "DiskCache", "ViewCache")
    fn algorithm_name(&self) -> &'static str;
}
