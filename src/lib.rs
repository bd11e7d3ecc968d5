#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Building Blocks
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        TimeQueueCache<K, H>                          │
//! │                                                                      │
//! │   map: K ─▶ Arc<CacheEntry>      total_size / max_size               │
//! │   gates: per-key construction    generation (checkpoint window)      │
//! │                                                                      │
//! │          fetch / create / remove / checkpoint-failed                 │
//! │                           │                                          │
//! │                           ▼                                          │
//! │                     H: CacheHooks<K>                                 │
//! │            ┌──────────────┴──────────────┐                           │
//! │       ┌──────────┐                  ┌──────────┐                     │
//! │       │DiskHooks │                  │ViewHooks │                     │
//! │       │ files    │                  │ objects  │                     │
//! │       └──────────┘                  └──────────┘                     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Keys | Values | Default budget |
//! |------|------|--------|----------------|
//! | [`TimeQueueCache`] | any `Hash + Eq + Clone` | defined by the hooks | none |
//! | [`DiskCache`] | file paths | files on disk | 1 GiB |
//! | [`ViewCache`] | [`ViewKey`](view::ViewKey) | [`ViewResource`](view::ViewResource) objects | 256 MiB |
//!
//! ## Operation Cost
//!
//! | Operation | Cost | Locks taken |
//! |-----------|------|-------------|
//! | `fetch` | O(1) plus the fetch hook | map lock, briefly |
//! | `add` / `add_async` | O(1) plus the create hook | key gate, map lock briefly |
//! | `fetch_or_construct` | O(1) on a hit | key gate only on a miss |
//! | `remove` | O(1) plus the remove hook | map lock, briefly |
//! | `checkpoint` | O(n log n) in the unused entries | sweep lock, map lock per step |
//!
//! ## Modules
//!
//! - [`entry`]: The entry type stored by every cache
//! - [`hooks`]: The strategy trait concrete caches implement
//! - [`time_queue`]: The checkpoint-driven engine
//! - [`disk`]: Disk-backed blob cache
//! - [`view`]: View-object cache with deferred release
//! - [`config`]: Configuration structures for all caches
//! - [`metrics`]: Metrics collection for cache monitoring
//! - [`cancel`]: Cooperative cancellation for population work
//! - [`error`]: Error type for storage failures

/// Cache entry type.
///
/// Provides `CacheEntry<K, V>`, which holds the key, the value, the size, the
/// last-access timestamp and the checkpoint generation of the last use.
pub mod entry;

/// Customization points of the engine.
///
/// Provides the `CacheHooks` trait and the `CheckpointAction` returned for entries
/// that went unused.
pub mod hooks;

/// Per-key construction gate shared by blocking and async callers.
pub(crate) mod gate;

/// Checkpoint-driven, size-bounded cache engine.
///
/// Evicts entries that stayed unused for a whole checkpoint window, least recently
/// accessed first, while the cache is over budget.
pub mod time_queue;

/// Disk-backed blob cache.
///
/// Stores byte buffers as files below a root directory, writes them atomically and
/// can register files left by a previous run.
pub mod disk;

/// View-object cache.
///
/// Keeps render-ready objects with an estimated footprint, aborts loads of unused
/// objects and defers their release to a safe point.
pub mod view;

/// Cooperative cancellation.
pub mod cancel;

/// Cache configuration structures.
///
/// Provides configuration structures for the engine and both concrete caches.
pub mod config;

/// Cache metrics system.
///
/// Provides counters shared by all caches and a common reporting interface.
pub mod metrics;

/// Error type for backing-storage failures.
pub mod error;

// Re-export cache types
pub use disk::DiskCache;
pub use time_queue::{CheckpointReport, TimeQueueCache};
pub use view::ViewCache;

// Re-export engine building blocks
pub use entry::CacheEntry;
pub use hooks::{CacheHooks, CheckpointAction};

pub use cancel::CancellationToken;
pub use error::CacheError;
