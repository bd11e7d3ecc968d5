//! Checkpoint-Driven Cache Engine
//!
//! This module provides [`TimeQueueCache`], a size-bounded cache whose eviction is
//! driven by explicit checkpoints rather than by insertions. It is the engine behind
//! [`DiskCache`](crate::DiskCache) and [`ViewCache`](crate::ViewCache); everything
//! resource-specific is delegated to a [`CacheHooks`] strategy.
//!
//! # Algorithm
//!
//! Time is divided into checkpoint windows numbered by a generation counter. Every
//! fetch (and every insertion) stamps the entry with the current generation.
//! [`checkpoint`](TimeQueueCache::checkpoint) closes the current window and runs a
//! two-phase sweep:
//!
//! 1. **Mark**: every entry whose stamp is older than the closing window was unused.
//!    The hooks' [`on_checkpoint_failed`](CacheHooks::on_checkpoint_failed) decides
//!    whether it stays as an eviction candidate or is removed immediately.
//! 2. **Evict**: while the total size exceeds the budget, the least recently accessed
//!    candidate (ties broken by insertion order) is removed. A candidate that was
//!    fetched after phase 1 is skipped.
//!
//! Entries touched during a window are never evicted by the checkpoint closing it,
//! so a cache may legitimately stay above budget while everything is in use.
//!
//! ```text
//!  window g          checkpoint()           window g+1
//! ─────────────┬──────────────────────────┬─────────────
//!  fetch(a)    │ closes g                 │ fetch(b)
//!  add(c)      │ unused = {stamp < g}     │
//!              │ evict LRU unused while   │
//!              │ total_size > max_size    │
//! ```
//!
//! # Per-Key Construction
//!
//! [`fetch_or_construct`](TimeQueueCache::fetch_or_construct), its async twin, and
//! `add`/`add_async` run the expensive construction step under a per-key gate:
//! concurrent callers for the same missing key wait for the first one and then reuse
//! its entry. Different keys construct in parallel.
//!
//! # Thread Safety
//!
//! `TimeQueueCache` is `Send + Sync` and is meant to be shared through `Arc`. The map,
//! total size and insertion counter sit behind one `parking_lot::Mutex`; hooks are
//! always called without that lock held so that they may block on I/O.

use core::borrow::Borrow;
use core::fmt;
use core::future::Future;
use core::hash::Hash;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::TimeQueueCacheConfig;
use crate::entry::CacheEntry;
use crate::gate::GateMap;
use crate::hooks::{CacheHooks, CheckpointAction};
use crate::metrics::{CacheMetrics, CoreCacheMetrics};

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// Outcome of one [`checkpoint`](TimeQueueCache::checkpoint) sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Generation of the window that was closed.
    pub generation: u64,
    /// Entries found unused in the closed window.
    pub unused: usize,
    /// Entries removed immediately at the hooks' request.
    pub forced: usize,
    /// Entries evicted to bring the cache under budget.
    pub evicted: usize,
    /// Removals refused by the removal hook.
    pub failed_removals: usize,
    /// Total size after the sweep.
    pub total_size: u64,
}

struct State<K, V> {
    map: HashMap<K, Arc<CacheEntry<K, V>>>,
    total_size: u64,
    next_sequence: u64,
    metrics: CoreCacheMetrics,
}

/// Why an entry is leaving through the removal hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemovalKind {
    Explicit,
    Evicted,
}

/// A size-bounded cache evicting unused entries at explicit checkpoints.
///
/// # Type Parameters
///
/// - `K`: Key type. Must implement `Hash + Eq + Clone + Send + Sync`.
/// - `H`: Hooks supplying fetch/create/remove behaviour; see [`CacheHooks`].
///
/// # Example
///
/// ```
/// use checkpoint_cache::{CacheEntry, CacheHooks, TimeQueueCache};
/// use checkpoint_cache::config::TimeQueueCacheConfig;
///
/// struct Numbers;
///
/// impl CacheHooks<&'static str> for Numbers {
///     type Value = u32;
///     type Raw = u32;
///     type Output = u32;
///
///     fn fetch(&self, entry: &CacheEntry<&'static str, u32>) -> Option<u32> {
///         Some(*entry.value())
///     }
///
///     fn create_entry(&self, key: &&'static str, raw: u32) -> Option<CacheEntry<&'static str, u32>> {
///         Some(CacheEntry::new(*key, raw, 40))
///     }
///
///     fn on_remove_entry(&self, _entry: &CacheEntry<&'static str, u32>) -> bool {
///         true
///     }
/// }
///
/// let cache = TimeQueueCache::new(TimeQueueCacheConfig { max_size: 100 }, Numbers);
/// assert!(cache.add("a", 1));
/// assert!(cache.add("b", 2));
/// assert!(cache.add("c", 3));
/// assert_eq!(cache.total_size(), 120);
///
/// cache.checkpoint();              // everything was used in the first window
/// assert_eq!(cache.fetch(&"b"), Some(2));
/// let report = cache.checkpoint(); // "a" and "c" went unused; "a" is older
/// assert_eq!(report.evicted, 1);
/// assert!(!cache.contains_key(&"a"));
/// ```
pub struct TimeQueueCache<K, H>
where
    K: Hash + Eq + Clone + Send + Sync,
    H: CacheHooks<K>,
{
    state: Mutex<State<K, H::Value>>,
    gates: GateMap<K>,
    sweep: Mutex<()>,
    generation: AtomicU64,
    max_size: AtomicU64,
    hooks: H,
}

impl<K, H> TimeQueueCache<K, H>
where
    K: Hash + Eq + Clone + Send + Sync,
    H: CacheHooks<K>,
{
    /// Creates a cache from a configuration and a hooks value.
    pub fn new(config: TimeQueueCacheConfig, hooks: H) -> Self {
        Self {
            state: Mutex::new(State {
                map: HashMap::new(),
                total_size: 0,
                next_sequence: 0,
                metrics: CoreCacheMetrics::new(config.max_size),
            }),
            gates: GateMap::new(),
            sweep: Mutex::new(()),
            generation: AtomicU64::new(0),
            max_size: AtomicU64::new(config.max_size),
            hooks,
        }
    }

    /// Creates a cache with the given size budget.
    pub fn with_max_size(max_size: u64, hooks: H) -> Self {
        Self::new(TimeQueueCacheConfig { max_size }, hooks)
    }

    /// Returns the hooks this cache was built with.
    #[inline]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Returns the size budget.
    #[inline]
    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Acquire)
    }

    /// Changes the size budget. Takes effect at the next checkpoint.
    pub fn set_max_size(&self, max_size: u64) {
        self.max_size.store(max_size, Ordering::Release);
    }

    /// Returns the generation of the currently open checkpoint window.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the summed size of all present entries.
    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    /// Returns the number of present entries.
    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }

    /// Checks whether `key` is present without marking it used.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.state.lock().map.contains_key(key)
    }

    /// Returns the entry for `key` without marking it used.
    pub fn entry<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<K, H::Value>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.state.lock().map.get(key).cloned()
    }

    /// Returns a snapshot of the present keys in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.state.lock().map.keys().cloned().collect()
    }

    /// Looks up `key`, stamps it as used in the current window and reads it through
    /// the fetch hook.
    ///
    /// Returns `None` when the key is absent or when the hook cannot read the
    /// backing resource. Neither case is an error.
    pub fn fetch<Q>(&self, key: &Q) -> Option<H::Output>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let entry = self.lookup(key)?;
        self.hooks.fetch(&entry)
    }

    /// Inserts a ready-made entry.
    ///
    /// Returns `false` if an entry with the same key is already present. The rejected
    /// entry is handed to [`on_discard`](CacheHooks::on_discard) so its resources are
    /// not leaked.
    pub fn add_entry(&self, entry: CacheEntry<K, H::Value>) -> bool {
        self.admit(entry).is_ok()
    }

    /// Like [`add_entry`](Self::add_entry), but first waits for any construction of
    /// the same key to finish, so a ready-made entry never displaces one being built.
    pub async fn add_entry_async(&self, entry: CacheEntry<K, H::Value>) -> bool {
        let _ticket = self.gates.lock_async(entry.key()).await;
        self.add_entry(entry)
    }

    /// Creates an entry for `raw` through [`create_entry`](CacheHooks::create_entry)
    /// and inserts it.
    ///
    /// Returns `false` if the key is already present (the hook is not called) or
    /// if the hook produced no entry.
    pub fn add(&self, key: K, raw: H::Raw) -> bool {
        let _ticket = self.gates.lock(&key);
        if self.contains_key(&key) {
            trace!("add skipped: key already cached");
            return false;
        }
        match self.hooks.create_entry(&key, raw) {
            Some(entry) => self.add_entry(entry),
            None => {
                debug!("add failed: creation hook produced no entry");
                false
            }
        }
    }

    /// Asynchronous counterpart of [`add`](Self::add), using
    /// [`create_entry_async`](CacheHooks::create_entry_async).
    pub async fn add_async(&self, key: K, raw: H::Raw) -> bool {
        let _ticket = self.gates.lock_async(&key).await;
        if self.contains_key(&key) {
            trace!("add_async skipped: key already cached");
            return false;
        }
        match self.hooks.create_entry_async(&key, raw).await {
            Some(entry) => self.add_entry(entry),
            None => {
                debug!("add_async failed: creation hook produced no entry");
                false
            }
        }
    }

    /// Returns the entry for `key`, building it with `factory` on a miss.
    ///
    /// Concurrent callers for the same key serialize on a per-key gate: the factory
    /// runs at most once while the others wait and then share the resulting entry.
    /// A factory error is returned to the caller that ran it; nothing is inserted,
    /// and the next waiter will try its own factory.
    ///
    /// The factory must build an entry for `key` and must not call back into this
    /// cache for the same key.
    pub fn fetch_or_construct_entry<F, E>(
        &self,
        key: K,
        factory: F,
    ) -> Result<Arc<CacheEntry<K, H::Value>>, E>
    where
        F: FnOnce(&K) -> Result<CacheEntry<K, H::Value>, E>,
    {
        if let Some(entry) = self.lookup(&key) {
            return Ok(entry);
        }
        let _ticket = self.gates.lock(&key);
        if let Some(entry) = self.lookup_quiet(&key) {
            return Ok(entry);
        }
        let built = factory(&key)?;
        debug_assert!(built.key() == &key, "factory built an entry for another key");
        Ok(self.admit(built).unwrap_or_else(|existing| existing))
    }

    /// Like [`fetch_or_construct_entry`](Self::fetch_or_construct_entry), then reads
    /// the entry through the fetch hook.
    pub fn fetch_or_construct<F, E>(&self, key: K, factory: F) -> Result<Option<H::Output>, E>
    where
        F: FnOnce(&K) -> Result<CacheEntry<K, H::Value>, E>,
    {
        let entry = self.fetch_or_construct_entry(key, factory)?;
        Ok(self.hooks.fetch(&entry))
    }

    /// Asynchronous counterpart of
    /// [`fetch_or_construct_entry`](Self::fetch_or_construct_entry).
    ///
    /// Blocking and async constructors of the same key share one gate.
    pub async fn fetch_or_construct_entry_async<F, Fut, E>(
        &self,
        key: K,
        factory: F,
    ) -> Result<Arc<CacheEntry<K, H::Value>>, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<CacheEntry<K, H::Value>, E>>,
    {
        if let Some(entry) = self.lookup(&key) {
            return Ok(entry);
        }
        let _ticket = self.gates.lock_async(&key).await;
        if let Some(entry) = self.lookup_quiet(&key) {
            return Ok(entry);
        }
        let built = factory(key.clone()).await?;
        debug_assert!(built.key() == &key, "factory built an entry for another key");
        Ok(self.admit(built).unwrap_or_else(|existing| existing))
    }

    /// Asynchronous counterpart of [`fetch_or_construct`](Self::fetch_or_construct).
    pub async fn fetch_or_construct_async<F, Fut, E>(
        &self,
        key: K,
        factory: F,
    ) -> Result<Option<H::Output>, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<CacheEntry<K, H::Value>, E>>,
    {
        let entry = self.fetch_or_construct_entry_async(key, factory).await?;
        Ok(self.hooks.fetch(&entry))
    }

    /// Removes `entry` through [`on_remove_entry`](CacheHooks::on_remove_entry).
    ///
    /// Returns `false` if `entry` is not the entry currently cached under its key,
    /// if another removal of it is in progress, or if the hook refuses. A refused
    /// entry stays cached and fetchable; the engine does not retry on its own.
    pub fn remove_entry(&self, entry: &CacheEntry<K, H::Value>) -> bool {
        self.remove_with(entry, RemovalKind::Explicit)
    }

    /// Removes the entry cached under `key`. See [`remove_entry`](Self::remove_entry).
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.entry(key) {
            Some(entry) => self.remove_entry(&entry),
            None => false,
        }
    }

    /// Changes the recorded size of the entry under `key`, keeping the total exact.
    ///
    /// Returns `false` if the key is absent.
    pub fn update_size<Q>(&self, key: &Q, size: u64) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut state = self.state.lock();
        let Some(entry) = state.map.get(key).cloned() else {
            return false;
        };
        let old = entry.set_size(size);
        state.total_size = state.total_size - old + size;
        true
    }

    /// Closes the current checkpoint window and sweeps unused entries.
    ///
    /// Only one sweep runs at a time; a concurrent call waits for the running one.
    /// Fetches and inserts on other keys proceed during the sweep.
    pub fn checkpoint(&self) -> CheckpointReport {
        let _sweep = self.sweep.lock();
        let closing = self.generation.fetch_add(1, Ordering::AcqRel);
        let mut report = CheckpointReport {
            generation: closing,
            ..CheckpointReport::default()
        };

        let snapshot: Vec<_> = self.state.lock().map.values().cloned().collect();

        let mut candidates = Vec::new();
        for entry in snapshot {
            if entry.last_used_generation() >= closing {
                continue;
            }
            report.unused += 1;
            match self.hooks.on_checkpoint_failed(&entry) {
                CheckpointAction::Keep => candidates.push(entry),
                CheckpointAction::RemoveNow => {
                    if entry.last_used_generation() >= closing {
                        trace!("checkpoint: entry was used before forced removal, keeping it");
                        continue;
                    }
                    if self.remove_with(&entry, RemovalKind::Evicted) {
                        report.forced += 1;
                    } else {
                        report.failed_removals += 1;
                    }
                }
            }
        }

        candidates.sort_by_key(|entry| (entry.last_accessed(), entry.sequence()));
        for entry in candidates {
            if self.total_size() <= self.max_size() {
                break;
            }
            if entry.last_used_generation() >= closing {
                trace!("checkpoint: candidate was used after marking, keeping it");
                continue;
            }
            if self.remove_with(&entry, RemovalKind::Evicted) {
                report.evicted += 1;
            } else {
                report.failed_removals += 1;
            }
        }

        let mut state = self.state.lock();
        state.metrics.record_checkpoint();
        report.total_size = state.total_size;
        drop(state);

        debug!(
            generation = report.generation,
            unused = report.unused,
            forced = report.forced,
            evicted = report.evicted,
            failed = report.failed_removals,
            total_size = report.total_size,
            max_size = self.max_size(),
            "checkpoint complete"
        );
        report
    }

    /// Empties the cache without running the removal hook.
    ///
    /// Each entry is handed to [`on_discard`](CacheHooks::on_discard) instead: this is
    /// the teardown path, not eviction, so persistent backing resources stay put.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.total_size = 0;
            state.map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            self.discard(&entry);
        }
    }

    fn lookup<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<K, H::Value>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut state = self.state.lock();
        match state.map.get(key).cloned() {
            Some(entry) => {
                entry.touch(self.generation());
                state.metrics.record_hit(entry.size());
                Some(entry)
            }
            None => {
                state.metrics.record_miss();
                None
            }
        }
    }

    fn lookup_quiet(&self, key: &K) -> Option<Arc<CacheEntry<K, H::Value>>> {
        let entry = self.state.lock().map.get(key).cloned()?;
        entry.touch(self.generation());
        Some(entry)
    }

    /// Inserts `entry`, or returns the entry already cached under its key after
    /// discarding the newcomer.
    fn admit(
        &self,
        mut entry: CacheEntry<K, H::Value>,
    ) -> Result<Arc<CacheEntry<K, H::Value>>, Arc<CacheEntry<K, H::Value>>> {
        let mut state = self.state.lock();
        if let Some(existing) = state.map.get(entry.key()).cloned() {
            drop(state);
            trace!("insert rejected: key already cached");
            self.discard(&entry);
            existing.touch(self.generation());
            return Err(existing);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        entry.admit(sequence, self.generation());

        let size = entry.size();
        state.total_size += size;
        state.metrics.record_insertion(size);

        let entry = Arc::new(entry);
        state.map.insert(entry.key().clone(), Arc::clone(&entry));
        Ok(entry)
    }

    fn remove_with(&self, entry: &CacheEntry<K, H::Value>, kind: RemovalKind) -> bool {
        if !self.is_current(entry) || !entry.begin_removal() {
            return false;
        }

        if !self.hooks.on_remove_entry(entry) {
            entry.abandon_removal();
            self.state.lock().metrics.record_removal_failure();
            warn!(?kind, "removal hook refused, entry stays cached");
            return false;
        }

        let mut state = self.state.lock();
        let current = state
            .map
            .get(entry.key())
            .is_some_and(|cached| core::ptr::eq(Arc::as_ptr(cached), entry));
        if current {
            state.map.remove(entry.key());
            state.total_size -= entry.size();
            match kind {
                RemovalKind::Explicit => state.metrics.record_removal(),
                RemovalKind::Evicted => state.metrics.record_eviction(),
            }
        }
        drop(state);

        entry.dispose();
        trace!(?kind, size = entry.size(), "entry removed");
        true
    }

    fn is_current(&self, entry: &CacheEntry<K, H::Value>) -> bool {
        self.state
            .lock()
            .map
            .get(entry.key())
            .is_some_and(|cached| core::ptr::eq(Arc::as_ptr(cached), entry))
    }

    fn discard(&self, entry: &CacheEntry<K, H::Value>) {
        if entry.dispose() {
            self.hooks.on_discard(entry);
        }
    }
}

impl<K, H> CacheMetrics for TimeQueueCache<K, H>
where
    K: Hash + Eq + Clone + Send + Sync,
    H: CacheHooks<K>,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        let mut core = state.metrics.clone();
        core.cache_size_bytes = state.total_size;
        core.max_cache_size_bytes = self.max_size();
        core.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "TimeQueue"
    }
}

impl<K, H> Drop for TimeQueueCache<K, H>
where
    K: Hash + Eq + Clone + Send + Sync,
    H: CacheHooks<K>,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K, H> fmt::Debug for TimeQueueCache<K, H>
where
    K: Hash + Eq + Clone + Send + Sync,
    H: CacheHooks<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimeQueueCache")
            .field("len", &state.map.len())
            .field("total_size", &state.total_size)
            .field("max_size", &self.max_size())
            .field("generation", &self.generation())
            .finish()
    }
}
