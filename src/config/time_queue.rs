//! Configuration for the generic checkpoint cache engine.

use core::fmt;

/// Configuration for a [`TimeQueueCache`](crate::TimeQueueCache).
///
/// # Fields
///
/// - `max_size`: Size budget enforced by [`checkpoint`](crate::TimeQueueCache::checkpoint).
///   Can be changed later with [`set_max_size`](crate::TimeQueueCache::set_max_size).
///
/// # Examples
///
/// ```
/// use checkpoint_cache::config::TimeQueueCacheConfig;
///
/// let config = TimeQueueCacheConfig { max_size: 100 };
/// assert_eq!(config.max_size, 100);
/// ```
#[derive(Clone, Copy)]
pub struct TimeQueueCacheConfig {
    /// Maximum total size of cached content before the sweep starts evicting.
    pub max_size: u64,
}

impl fmt::Debug for TimeQueueCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeQueueCacheConfig")
            .field("max_size", &self.max_size)
            .finish()
    }
}
