//! Configuration for the view-object cache.

use core::fmt;

/// Default budget of a view cache: 256 MiB.
pub const DEFAULT_VIEW_CACHE_SIZE: u64 = 256 * 1024 * 1024;

/// Configuration for a [`ViewCache`](crate::ViewCache).
///
/// `max_size` is compared against the summed
/// [`estimated_size`](crate::view::ViewResource::estimated_size) of the cached objects.
#[derive(Clone, Copy)]
pub struct ViewCacheConfig {
    /// Maximum estimated memory footprint of the cached objects.
    pub max_size: u64,
}

impl Default for ViewCacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_VIEW_CACHE_SIZE,
        }
    }
}

impl fmt::Debug for ViewCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCacheConfig")
            .field("max_size", &self.max_size)
            .finish()
    }
}
