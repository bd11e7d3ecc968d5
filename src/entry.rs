//! Cache Entry Type
//!
//! This module provides the `CacheEntry<K, V>` structure stored by
//! [`TimeQueueCache`](crate::TimeQueueCache). An entry wraps one cached value together
//! with the bookkeeping the checkpoint sweep needs.
//!
//! # Fields
//!
//! - `key: K` - immutable identity of the entry
//! - `value: V` - the cached value (or a handle to external storage such as a file)
//! - `size` - size estimate in bytes or any abstract unit, summed into the cache total
//! - `last_accessed` - nanoseconds since UNIX epoch, refreshed on every fetch
//! - `generation` - checkpoint generation in which the entry was last used
//! - `sequence` - insertion order, used to break ties between equal timestamps
//!
//! # Concurrency
//!
//! The engine shares entries as `Arc<CacheEntry<K, V>>` so a fetch can run the
//! (possibly blocking) fetch hook without holding the map lock. Every field that
//! changes after insertion is therefore atomic and can be updated through `&self`.
//!
//! # Usage Examples
//!
//! ```
//! use checkpoint_cache::entry::CacheEntry;
//!
//! let entry = CacheEntry::new("tile-1".to_string(), vec![0u8; 1024], 1024);
//! assert_eq!(entry.key(), "tile-1");
//! assert_eq!(entry.size(), 1024);
//! assert!(!entry.is_disposed());
//! ```

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A cached value plus the metadata used by the checkpoint sweep.
///
/// The key never changes. `size`, `last_accessed` and the checkpoint generation are
/// mutated by the engine; callers observe them through the accessor methods.
///
/// Disposal is tracked by a flag so that [`dispose`](Self::dispose) is idempotent:
/// only the first call reports `true`, and the engine relies on that to release
/// backing resources exactly once.
pub struct CacheEntry<K, V> {
    key: K,

    value: V,

    /// Size of the content this entry represents (bytes or abstract unit).
    size: AtomicU64,

    /// Last access timestamp (nanos since epoch).
    last_accessed: AtomicU64,

    /// Creation timestamp (nanos since epoch).
    create_time: u64,

    /// Checkpoint generation of the most recent use (insertion counts as use).
    generation: AtomicU64,

    /// Insertion order, assigned by the engine when the entry is admitted.
    sequence: u64,

    /// Set while a removal is in progress so two removers cannot both run the hook.
    removing: AtomicBool,

    disposed: AtomicBool,
}

impl<K, V> CacheEntry<K, V> {
    /// Creates a new entry stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The cached value
    /// * `size` - Size of the content this entry represents
    #[inline]
    pub fn new(key: K, value: V, size: u64) -> Self {
        let now = now_nanos();
        Self {
            key,
            value,
            size: AtomicU64::new(size),
            last_accessed: AtomicU64::new(now),
            create_time: now,
            generation: AtomicU64::new(0),
            sequence: 0,
            removing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Creates a new entry whose last access time comes from elsewhere, e.g. the
    /// modification time of a file discovered on disk.
    ///
    /// # Examples
    ///
    /// ```
    /// use checkpoint_cache::entry::CacheEntry;
    /// use std::time::{Duration, UNIX_EPOCH};
    ///
    /// let mtime = UNIX_EPOCH + Duration::from_secs(1_000);
    /// let entry = CacheEntry::with_last_accessed("a.bin", (), 10, mtime);
    /// assert_eq!(entry.last_accessed(), 1_000 * 1_000_000_000);
    /// ```
    pub fn with_last_accessed(key: K, value: V, size: u64, last_accessed: SystemTime) -> Self {
        let entry = Self::new(key, value, size);
        entry
            .last_accessed
            .store(system_time_nanos(last_accessed), Ordering::Relaxed);
        entry
    }

    /// Returns the key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the cached value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the size of the content this entry represents.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Gets the last access timestamp in nanoseconds since UNIX epoch.
    #[inline]
    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Acquire)
    }

    /// Gets the last access time as a [`SystemTime`].
    pub fn last_accessed_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.last_accessed())
    }

    /// Gets the creation timestamp in nanoseconds since UNIX epoch.
    #[inline]
    pub fn create_time(&self) -> u64 {
        self.create_time
    }

    /// Gets the time since last access in nanoseconds.
    #[inline]
    pub fn idle_nanos(&self) -> u64 {
        now_nanos().saturating_sub(self.last_accessed())
    }

    /// Returns the checkpoint generation in which this entry was last used.
    #[inline]
    pub fn last_used_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the insertion sequence assigned when the entry was admitted.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the entry disposed.
    ///
    /// Returns `true` only for the first call; later calls are no-ops that return
    /// `false`, so callers can gate resource release on the result.
    pub fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// Records a use in checkpoint window `generation`.
    pub(crate) fn touch(&self, generation: u64) {
        self.last_accessed.store(now_nanos(), Ordering::Release);
        self.generation.fetch_max(generation, Ordering::AcqRel);
    }

    pub(crate) fn admit(&mut self, sequence: u64, generation: u64) {
        self.sequence = sequence;
        *self.generation.get_mut() = generation;
    }

    pub(crate) fn set_size(&self, size: u64) -> u64 {
        self.size.swap(size, Ordering::AcqRel)
    }

    /// Claims the entry for removal. Returns `false` if another remover holds it.
    pub(crate) fn begin_removal(&self) -> bool {
        !self.removing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn abandon_removal(&self) {
        self.removing.store(false, Ordering::Release);
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("size", &self.size())
            .field("last_accessed", &self.last_accessed())
            .field("create_time", &self.create_time)
            .field("generation", &self.last_used_generation())
            .field("sequence", &self.sequence)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Returns the current time in nanoseconds since UNIX epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
    system_time_nanos(SystemTime::now())
}

fn system_time_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
