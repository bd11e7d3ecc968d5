//! Configuration for the disk-backed blob cache.
//!
//! # Sizing Guidelines
//!
//! Entries are sized by file length, so `max_size` is the disk space the cache may
//! occupy once the sweep has caught up. Size it from the target cache size:
//!
//! ```text
//! max_size = target_disk_budget
//! expected entries ≈ max_size / average_blob_size
//! ```
//!
//! **Example**: a 1GB cache of 64KB texture tiles holds about 16,000 files.

use core::fmt;
use std::path::PathBuf;

/// Default budget of a disk cache: 1 GiB.
pub const DEFAULT_DISK_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Configuration for a [`DiskCache`](crate::DiskCache).
///
/// # Fields
///
/// - `root`: Directory holding the cached files. Created if absent.
/// - `max_size`: Disk budget in bytes.
///
/// # Examples
///
/// ```
/// use checkpoint_cache::config::DiskCacheConfig;
///
/// let config = DiskCacheConfig {
///     root: "/var/cache/tiles".into(),
///     max_size: 512 * 1024 * 1024,
/// };
/// assert_eq!(config.max_size, 512 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct DiskCacheConfig {
    /// Root directory of the cache.
    pub root: PathBuf,
    /// Maximum total size in bytes of the cached files.
    pub max_size: u64,
}

impl DiskCacheConfig {
    /// Creates a configuration rooted at `root` with the default 1 GiB budget.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_size: DEFAULT_DISK_CACHE_SIZE,
        }
    }
}

impl fmt::Debug for DiskCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCacheConfig")
            .field("root", &self.root)
            .field("max_size", &self.max_size)
            .finish()
    }
}
