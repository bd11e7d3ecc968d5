//! Customization points of the cache engine.
//!
//! A concrete cache is a [`TimeQueueCache`](crate::TimeQueueCache) parameterized by a
//! value implementing [`CacheHooks`]. The hooks decide how values are materialized,
//! read back, and released; the engine owns the map, the size budget, the per-key
//! construction gate and the checkpoint sweep.
//!
//! | Hook | Called when | Failure signal |
//! |------|-------------|----------------|
//! | [`fetch`](CacheHooks::fetch) | a present entry is fetched | `None` |
//! | [`create_entry`](CacheHooks::create_entry) | `add` needs a backing resource | `None` |
//! | [`create_entry_async`](CacheHooks::create_entry_async) | `add_async` needs a backing resource | `None` |
//! | [`on_remove_entry`](CacheHooks::on_remove_entry) | an entry is removed or evicted | `false` keeps the entry |
//! | [`on_checkpoint_failed`](CacheHooks::on_checkpoint_failed) | an entry went unused for a checkpoint window | returns a [`CheckpointAction`] |
//! | [`on_discard`](CacheHooks::on_discard) | an entry leaves without removal (rejected insert, teardown) | none |
//!
//! Hooks must not panic on I/O problems; they log and report absence instead.

use crate::entry::CacheEntry;
use core::future::Future;

/// What the checkpoint sweep should do with an entry that went unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointAction {
    /// Leave the entry as a candidate for size-based eviction.
    Keep,
    /// Remove the entry right away, regardless of the size budget.
    RemoveNow,
}

/// Strategy supplying the resource-specific behaviour of a cache.
///
/// # Type Parameters
///
/// - `K`: key type of the cache
///
/// # Associated Types
///
/// - `Value`: what each [`CacheEntry`] stores
/// - `Raw`: payload handed to `add`/`add_async` (e.g. bytes to write to disk)
/// - `Output`: what a successful fetch hands back to the caller (e.g. an open file)
pub trait CacheHooks<K>: Send + Sync
where
    K: Send + Sync,
{
    /// Value stored in each entry.
    type Value: Send + Sync;

    /// Payload consumed when creating an entry.
    type Raw: Send;

    /// Result of reading an entry.
    type Output;

    /// Reads an existing entry. Returns `None` if the backing resource is gone or
    /// unreadable.
    fn fetch(&self, entry: &CacheEntry<K, Self::Value>) -> Option<Self::Output>;

    /// Materializes the backing resource for `raw` and wraps it in an entry.
    /// Returns `None` on failure without leaving a partial resource behind.
    fn create_entry(&self, key: &K, raw: Self::Raw) -> Option<CacheEntry<K, Self::Value>>;

    /// Asynchronous counterpart of [`create_entry`](Self::create_entry).
    ///
    /// The default runs the synchronous hook inline.
    fn create_entry_async<'a>(
        &'a self,
        key: &'a K,
        raw: Self::Raw,
    ) -> impl Future<Output = Option<CacheEntry<K, Self::Value>>> + Send + 'a {
        async move { self.create_entry(key, raw) }
    }

    /// Releases the backing resource of an entry being removed.
    ///
    /// Returning `false` tells the engine the resource could not be released; the
    /// entry then stays in the cache and a later checkpoint may try again.
    fn on_remove_entry(&self, entry: &CacheEntry<K, Self::Value>) -> bool;

    /// Called for each entry that was not used during the checkpoint window that
    /// just closed.
    fn on_checkpoint_failed(&self, _entry: &CacheEntry<K, Self::Value>) -> CheckpointAction {
        CheckpointAction::Keep
    }

    /// Called once for an entry that leaves the cache without going through
    /// [`on_remove_entry`](Self::on_remove_entry): an insert that lost to an
    /// existing key, or an entry still present at teardown.
    fn on_discard(&self, _entry: &CacheEntry<K, Self::Value>) {}
}
