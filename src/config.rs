//! Cache Configuration Module
//!
//! This module provides configuration structures for the cache engine and its
//! specializations. Each cache type has its own dedicated configuration struct with
//! public fields.
//!
//! # Design Philosophy
//!
//! Configuration structs have all public fields for simple instantiation:
//!
//! - **Simple**: Just create the struct with all fields set
//! - **Type safety**: All parameters must be provided at construction
//! - **No boilerplate**: `Default` covers the common budgets
//!
//! # Sizing Guidelines
//!
//! `max_size` is the budget enforced by the checkpoint sweep, in whatever unit the
//! entries report their size in (bytes for both built-in caches). It is a soft
//! ceiling: the sweep only evicts entries that went unused for a whole checkpoint
//! window, so a cache whose entries are all in active use may stay above budget.
//!
//! | Config | Cache | Default budget |
//! |--------|-------|----------------|
//! | `TimeQueueCacheConfig` | [`TimeQueueCache`](crate::TimeQueueCache) | none (required) |
//! | `DiskCacheConfig` | [`DiskCache`](crate::DiskCache) | 1 GiB |
//! | `ViewCacheConfig` | [`ViewCache`](crate::ViewCache) | 256 MiB |
//!
//! # Examples
//!
//! ```
//! use checkpoint_cache::config::{DiskCacheConfig, ViewCacheConfig};
//!
//! let disk = DiskCacheConfig::new("/tmp/tiles");
//! assert_eq!(disk.max_size, 1024 * 1024 * 1024);
//!
//! let view = ViewCacheConfig { max_size: 64 * 1024 * 1024 };
//! assert_eq!(view.max_size, 64 * 1024 * 1024);
//! ```

pub mod disk;
pub mod time_queue;
pub mod view;

pub use disk::DiskCacheConfig;
pub use time_queue::TimeQueueCacheConfig;
pub use view::ViewCacheConfig;
