//! View-Object Cache
//!
//! [`ViewCache`] holds render-ready objects built from some source resource under a
//! named variant (for example a tile image under a given transform). Objects report
//! an estimated memory footprint, and the checkpoint sweep keeps the summed
//! footprint near the configured budget.
//!
//! # Releasing GPU-side state
//!
//! Evicted objects are not released on the thread running the sweep. They are
//! parked in a [`ReleaseQueue`] and released when the owner calls
//! [`drain_releases`](ViewCache::drain_releases) at a point where that is safe,
//! typically at the start of a frame. Objects leaving through teardown
//! (dropping the cache or [`clear`](ViewCache::clear)) are released directly.
//!
//! # In-flight loads
//!
//! A [`ViewSlot`] may carry one background load (texture upload, mesh decode).
//! If the slot goes unused for a whole checkpoint window while its load is still
//! running, the load is aborted and the slot is removed right away instead of
//! waiting for size pressure.
//!
//! # Construction errors
//!
//! Unlike the disk cache, construction failures are not swallowed:
//! [`fetch_or_construct`](ViewCache::fetch_or_construct) returns the factory's error
//! to the caller and caches nothing.

use core::fmt;
use core::future::Future;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::config::ViewCacheConfig;
use crate::entry::CacheEntry;
use crate::hooks::{CacheHooks, CheckpointAction};
use crate::metrics::CacheMetrics;
use crate::time_queue::{CheckpointReport, TimeQueueCache};

/// An object that can live in a [`ViewCache`].
pub trait ViewResource: Send + Sync + 'static {
    /// Estimated memory footprint in bytes.
    fn estimated_size(&self) -> u64;

    /// Frees GPU-side or other unmanaged state. May be called more than once;
    /// calls after the first must do nothing.
    fn release(&self);
}

/// Identity of a cached view: the source resource plus the variant it was built for.
///
/// ```
/// use checkpoint_cache::view::ViewKey;
///
/// let key = ViewKey::new("section-12/tile-3-4.png", "grid");
/// assert_eq!(key.to_string(), "section-12/tile-3-4.png-grid");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    /// Identifier of the source resource.
    pub source: String,
    /// Named variant, e.g. the transform the view was built under.
    pub variant: String,
}

impl ViewKey {
    /// Creates a key.
    pub fn new(source: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            variant: variant.into(),
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.variant)
    }
}

/// Handle on at most one background load.
#[derive(Debug, Default)]
pub struct LoadHandle {
    task: Mutex<Option<AbortHandle>>,
}

impl LoadHandle {
    /// Creates a handle with no load attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a running task, aborting any load attached before it.
    pub fn attach(&self, task: AbortHandle) {
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Returns `true` while an attached load has not finished.
    pub fn is_loading(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Aborts the attached load, if any.
    ///
    /// Idempotent, and harmless after the load completed.
    pub fn abort_request(&self) {
        if let Some(task) = self.task.lock().take() {
            if !task.is_finished() {
                trace!("aborting in-flight load");
            }
            task.abort();
        }
    }
}

/// A cached view object together with its optional background load.
pub struct ViewSlot<T> {
    object: Arc<T>,
    load: LoadHandle,
    released: AtomicBool,
}

impl<T: ViewResource> ViewSlot<T> {
    /// Wraps `object` with no load attached.
    pub fn new(object: T) -> Self {
        Self {
            object: Arc::new(object),
            load: LoadHandle::new(),
            released: AtomicBool::new(false),
        }
    }

    /// The cached object.
    pub fn object(&self) -> &Arc<T> {
        &self.object
    }

    /// The slot's load handle.
    pub fn load(&self) -> &LoadHandle {
        &self.load
    }

    /// Spawns `load` on the current tokio runtime and attaches it to this slot.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn_load<F, Fut>(&self, load: F)
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(load(Arc::clone(&self.object)));
        self.load.attach(task.abort_handle());
    }

    /// Returns `true` once [`release`](Self::release) ran.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Aborts any load and releases the object. Returns `true` only the first time.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.load.abort_request();
        self.object.release();
        true
    }
}

impl<T> fmt::Debug for ViewSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSlot")
            .field("load", &self.load)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

/// Slots waiting to be released at a safe point.
pub struct ReleaseQueue<T> {
    pending: Mutex<Vec<Arc<ViewSlot<T>>>>,
}

impl<T: ViewResource> ReleaseQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queues `slot` for release.
    pub fn push(&self, slot: Arc<ViewSlot<T>>) {
        self.pending.lock().push(slot);
    }

    /// Number of queued slots.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Releases every queued slot. Returns how many were released by this call.
    pub fn drain(&self) -> usize {
        let pending = core::mem::take(&mut *self.pending.lock());
        pending.iter().filter(|slot| slot.release()).count()
    }
}

impl<T: ViewResource> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ReleaseQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseQueue")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

/// Hooks keeping [`ViewSlot`]s in memory.
pub struct ViewHooks<T> {
    releases: ReleaseQueue<T>,
}

impl<T: ViewResource> ViewHooks<T> {
    fn new() -> Self {
        Self {
            releases: ReleaseQueue::new(),
        }
    }

    /// Slots removed by the cache and not yet released.
    pub fn releases(&self) -> &ReleaseQueue<T> {
        &self.releases
    }
}

impl<T> fmt::Debug for ViewHooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHooks")
            .field("releases", &self.releases)
            .finish()
    }
}

fn slot_entry<T: ViewResource>(key: ViewKey, object: T) -> CacheEntry<ViewKey, Arc<ViewSlot<T>>> {
    let size = object.estimated_size();
    CacheEntry::new(key, Arc::new(ViewSlot::new(object)), size)
}

impl<T: ViewResource> CacheHooks<ViewKey> for ViewHooks<T> {
    type Value = Arc<ViewSlot<T>>;
    type Raw = T;
    type Output = Arc<ViewSlot<T>>;

    fn fetch(&self, entry: &CacheEntry<ViewKey, Self::Value>) -> Option<Self::Output> {
        Some(Arc::clone(entry.value()))
    }

    fn create_entry(&self, key: &ViewKey, raw: T) -> Option<CacheEntry<ViewKey, Self::Value>> {
        Some(slot_entry(key.clone(), raw))
    }

    fn on_remove_entry(&self, entry: &CacheEntry<ViewKey, Self::Value>) -> bool {
        entry.value().load().abort_request();
        self.releases.push(Arc::clone(entry.value()));
        true
    }

    fn on_checkpoint_failed(&self, entry: &CacheEntry<ViewKey, Self::Value>) -> CheckpointAction {
        if entry.value().load().is_loading() {
            debug!(key = %entry.key(), "unused view still loading, aborting");
            entry.value().load().abort_request();
            CheckpointAction::RemoveNow
        } else {
            CheckpointAction::Keep
        }
    }

    fn on_discard(&self, entry: &CacheEntry<ViewKey, Self::Value>) {
        entry.value().release();
    }
}

/// A checkpoint cache of render-ready view objects.
///
/// # Example
///
/// ```
/// use checkpoint_cache::config::ViewCacheConfig;
/// use checkpoint_cache::view::{ViewCache, ViewKey, ViewResource};
///
/// struct Mesh(u64);
///
/// impl ViewResource for Mesh {
///     fn estimated_size(&self) -> u64 { self.0 }
///     fn release(&self) {}
/// }
///
/// let cache: ViewCache<Mesh> = ViewCache::new(ViewCacheConfig { max_size: 1000 });
/// let key = ViewKey::new("tile-1", "identity");
/// let slot = cache.fetch_or_construct(key.clone(), |_| Ok::<_, String>(Mesh(400))).unwrap();
/// assert_eq!(slot.object().estimated_size(), 400);
///
/// let failed = cache.fetch_or_construct(ViewKey::new("tile-2", "identity"), |_| {
///     Err::<Mesh, _>("decode failed".to_string())
/// });
/// assert!(failed.is_err());
/// assert_eq!(cache.len(), 1);
/// ```
pub struct ViewCache<T: ViewResource> {
    engine: TimeQueueCache<ViewKey, ViewHooks<T>>,
}

impl<T: ViewResource> ViewCache<T> {
    /// Creates an empty cache.
    pub fn new(config: ViewCacheConfig) -> Self {
        Self {
            engine: TimeQueueCache::with_max_size(config.max_size, ViewHooks::new()),
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &TimeQueueCache<ViewKey, ViewHooks<T>> {
        &self.engine
    }

    /// Returns the slot cached under `key`, marking it used.
    pub fn fetch(&self, key: &ViewKey) -> Option<Arc<ViewSlot<T>>> {
        self.engine.fetch(key)
    }

    /// Caches `object` under `key`. Returns `false` if `key` is already cached; the
    /// object is then released.
    pub fn add(&self, key: ViewKey, object: T) -> bool {
        self.engine.add_entry(slot_entry(key, object))
    }

    /// Returns the slot for `key`, building its object with `factory` on a miss.
    ///
    /// The factory runs at most once per key at a time. Its error is returned as is
    /// and nothing is cached.
    pub fn fetch_or_construct<F, E>(&self, key: ViewKey, factory: F) -> Result<Arc<ViewSlot<T>>, E>
    where
        F: FnOnce(&ViewKey) -> Result<T, E>,
    {
        let entry = self
            .engine
            .fetch_or_construct_entry(key, |key| {
                factory(key).map(|object| slot_entry(key.clone(), object))
            })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Asynchronous counterpart of [`fetch_or_construct`](Self::fetch_or_construct).
    pub async fn fetch_or_construct_async<F, Fut, E>(
        &self,
        key: ViewKey,
        factory: F,
    ) -> Result<Arc<ViewSlot<T>>, E>
    where
        F: FnOnce(ViewKey) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let entry = self
            .engine
            .fetch_or_construct_entry_async(key, |key| async move {
                factory(key.clone())
                    .await
                    .map(|object| slot_entry(key, object))
            })
            .await?;
        Ok(Arc::clone(entry.value()))
    }

    /// Re-reads the estimated size of the object under `key`, e.g. after its load
    /// completed. Returns `false` if `key` is not cached.
    pub fn refresh_size(&self, key: &ViewKey) -> bool {
        match self.engine.entry(key) {
            Some(entry) => self
                .engine
                .update_size(key, entry.value().object().estimated_size()),
            None => false,
        }
    }

    /// Removes `key`. Its object is released at the next
    /// [`drain_releases`](Self::drain_releases).
    pub fn remove(&self, key: &ViewKey) -> bool {
        self.engine.remove(key)
    }

    /// Runs a checkpoint sweep.
    pub fn checkpoint(&self) -> CheckpointReport {
        self.engine.checkpoint()
    }

    /// Releases every object removed since the last call. Returns how many.
    pub fn drain_releases(&self) -> usize {
        let released = self.engine.hooks().releases().drain();
        if released > 0 {
            trace!(released, "released evicted views");
        }
        released
    }

    /// Number of removed objects awaiting [`drain_releases`](Self::drain_releases).
    pub fn pending_releases(&self) -> usize {
        self.engine.hooks().releases().len()
    }

    /// Drops every cached object, releasing it immediately.
    pub fn clear(&self) {
        self.engine.clear();
    }

    /// Returns `true` if `key` is cached.
    pub fn contains(&self, key: &ViewKey) -> bool {
        self.engine.contains_key(key)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    /// Summed estimated size of the cached objects.
    pub fn total_size(&self) -> u64 {
        self.engine.total_size()
    }

    /// Size budget.
    pub fn max_size(&self) -> u64 {
        self.engine.max_size()
    }

    /// Changes the size budget. Takes effect at the next checkpoint.
    pub fn set_max_size(&self, max_size: u64) {
        self.engine.set_max_size(max_size);
    }
}

impl<T: ViewResource> Default for ViewCache<T> {
    fn default() -> Self {
        Self::new(ViewCacheConfig::default())
    }
}

impl<T: ViewResource> Drop for ViewCache<T> {
    fn drop(&mut self) {
        self.drain_releases();
    }
}

impl<T: ViewResource> CacheMetrics for ViewCache<T> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.engine.metrics()
    }

    fn algorithm_name(&self) -> &'static str {
        "ViewCache"
    }
}

impl<T: ViewResource> fmt::Debug for ViewCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCache")
            .field("engine", &self.engine)
            .field("pending_releases", &self.pending_releases())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Sprite {
        size: u64,
        releases: Arc<AtomicUsize>,
    }

    impl ViewResource for Sprite {
        fn estimated_size(&self) -> u64 {
            self.size
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sprite(size: u64, releases: &Arc<AtomicUsize>) -> Sprite {
        Sprite {
            size,
            releases: Arc::clone(releases),
        }
    }

    #[test]
    fn test_view_key_display() {
        let key = ViewKey::new("volume/12", "mosaic");
        assert_eq!(format!("{}", key), "volume/12-mosaic");
    }

    #[test]
    fn test_release_is_idempotent() {
        let releases = Arc::new(AtomicUsize::new(0));
        let slot = ViewSlot::new(sprite(1, &releases));
        assert!(slot.release());
        assert!(!slot.release());
        assert!(slot.is_released());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abort_without_load_is_noop() {
        let handle = LoadHandle::new();
        assert!(!handle.is_loading());
        handle.abort_request();
        handle.abort_request();
    }

    #[test]
    fn test_eviction_defers_release() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = ViewCache::new(ViewCacheConfig { max_size: 100 });
        cache.add(ViewKey::new("a", "v"), sprite(60, &releases));
        cache.add(ViewKey::new("b", "v"), sprite(60, &releases));
        cache.checkpoint();
        let report = cache.checkpoint();

        assert_eq!(report.evicted, 1);
        assert!(!cache.contains(&ViewKey::new("a", "v")));
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert_eq!(cache.pending_releases(), 1);

        assert_eq!(cache.drain_releases(), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(cache.pending_releases(), 0);
    }

    #[test]
    fn test_duplicate_add_releases_newcomer() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = ViewCache::new(ViewCacheConfig::default());
        assert!(cache.add(ViewKey::new("a", "v"), sprite(1, &releases)));
        assert!(!cache.add(ViewKey::new("a", "v"), sprite(1, &releases)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_drop_releases_everything() {
        let releases = Arc::new(AtomicUsize::new(0));
        {
            let cache = ViewCache::new(ViewCacheConfig::default());
            cache.add(ViewKey::new("a", "v"), sprite(1, &releases));
            cache.add(ViewKey::new("b", "v"), sprite(1, &releases));
            assert!(cache.remove(&ViewKey::new("b", "v")));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_size() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = ViewCache::new(ViewCacheConfig::default());
        let key = ViewKey::new("a", "v");
        cache.add(key.clone(), sprite(10, &releases));
        assert!(cache.refresh_size(&key));
        assert_eq!(cache.total_size(), 10);
        assert!(!cache.refresh_size(&ViewKey::new("missing", "v")));
    }

    #[tokio::test]
    async fn test_unused_loading_slot_is_removed_immediately() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = ViewCache::new(ViewCacheConfig::default());
        let key = ViewKey::new("a", "v");
        let slot = cache
            .fetch_or_construct(key.clone(), |_| Ok::<_, ()>(sprite(1, &releases)))
            .unwrap();
        slot.spawn_load(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(slot.load().is_loading());

        cache.checkpoint();
        let report = cache.checkpoint();

        assert_eq!(report.forced, 1);
        assert!(!cache.contains(&key));
        assert!(!slot.load().is_loading());
        assert_eq!(cache.drain_releases(), 1);
    }

    #[tokio::test]
    async fn test_fetch_or_construct_async_propagates_error() {
        let cache: ViewCache<Sprite> = ViewCache::new(ViewCacheConfig::default());
        let key = ViewKey::new("a", "v");
        let result = cache
            .fetch_or_construct_async(key.clone(), |_| async { Err::<Sprite, _>("no source") })
            .await;
        assert_eq!(result.err(), Some("no source"));
        assert!(!cache.contains(&key));
    }
}
