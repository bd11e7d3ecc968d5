//! Disk-Backed Blob Cache
//!
//! [`DiskCache`] keeps binary blobs (downloaded textures, tiles, any byte buffer) as
//! files below a root directory and bounds the space they occupy with the
//! checkpoint sweep of [`TimeQueueCache`]. Keys are file paths; the size of an entry
//! is the file length and its initial last-access time is the file's modification
//! time.
//!
//! # Durability
//!
//! Blobs are written to a hidden `*.partial` sibling first and renamed into place
//! once complete, so a crash or a failed write never leaves a truncated file under
//! the final name. [`populate`](DiskCache::populate) ignores `*.partial` files, and
//! [`DiskCache::new`] deletes the ones a crash left behind.
//!
//! # Failure Handling
//!
//! | Operation | On I/O failure |
//! |-----------|----------------|
//! | `add` / `add_async` | returns `false`, no file and no entry remain |
//! | `fetch` / `read` | returns `None`; a vanished file also drops its entry |
//! | `remove` / eviction | returns `false`, entry stays cached (a missing file counts as removed) |
//! | `populate` | unreadable directories and files are skipped |
//!
//! # Example
//!
//! ```no_run
//! use checkpoint_cache::config::DiskCacheConfig;
//! use checkpoint_cache::DiskCache;
//!
//! let cache = DiskCache::new(DiskCacheConfig::new("/tmp/tile-cache")).unwrap();
//! let path = cache.path_for("section-12/tile-3-4.png");
//! assert!(cache.add(path.clone(), vec![1, 2, 3]));
//! assert_eq!(cache.read(&path), Some(vec![1, 2, 3]));
//! cache.checkpoint();
//! ```

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use std::collections::BTreeMap;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::DiskCacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::hooks::CacheHooks;
use crate::metrics::CacheMetrics;
use crate::time_queue::{CheckpointReport, TimeQueueCache};

const PARTIAL_SUFFIX: &str = ".partial";

/// Hooks storing each entry as a file named by its key.
pub struct DiskHooks {
    root: PathBuf,
}

impl DiskHooks {
    /// Creates hooks for a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Async counterpart of `stage` + `commit`.
///
/// The blocking write runs on tokio's blocking pool and cannot be interrupted, so
/// an [`AbandonGuard`] cleans up after it if this future is dropped.
async fn write_async(path: &Path, bytes: Vec<u8>) -> Result<CacheEntry<PathBuf, ()>, CacheError> {
    let progress = Arc::new(Mutex::new(WriteProgress::default()));
    let mut guard = AbandonGuard {
        progress: Arc::clone(&progress),
        path: path.to_path_buf(),
        armed: true,
    };

    let target = path.to_path_buf();
    let written = tokio::task::spawn_blocking(move || {
        let partial = stage(&target, &bytes)?;
        let mut progress = progress.lock();
        if progress.abandoned {
            return Err(CacheError::Write {
                path: target,
                source: io::Error::new(io::ErrorKind::Interrupted, "write abandoned"),
            });
        }
        let entry = commit(partial, &target)?;
        progress.committed = true;
        Ok(entry)
    })
    .await;

    guard.armed = false;
    match written {
        Ok(result) => result,
        Err(e) => Err(CacheError::Write {
            path: path.to_path_buf(),
            source: io::Error::other(e),
        }),
    }
}

/// Writes `bytes` to a hidden `*.partial` sibling of `path`, creating parent
/// directories as needed. The partial file deletes itself unless committed.
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, CacheError> {
    let parent = path
        .parent()
        .ok_or_else(|| CacheError::NoParent(path.to_path_buf()))?;
    fs::create_dir_all(parent).map_err(|source| CacheError::CreateDirectory {
        path: parent.to_path_buf(),
        source,
    })?;

    let write_err = |source: io::Error| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut partial = tempfile::Builder::new()
        .prefix(".")
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(parent)
        .map_err(write_err)?;
    partial.write_all(bytes).map_err(write_err)?;
    partial.as_file().sync_all().map_err(write_err)?;
    Ok(partial)
}

/// Renames a staged file into place and describes it as an entry.
fn commit(partial: NamedTempFile, path: &Path) -> Result<CacheEntry<PathBuf, ()>, CacheError> {
    partial.persist(path).map_err(|e| CacheError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    let metadata = fs::metadata(path).map_err(|source| CacheError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(entry_from_metadata(path.to_path_buf(), &metadata))
}

/// Shared between an async write and the blocking task doing it.
#[derive(Debug, Default)]
struct WriteProgress {
    abandoned: bool,
    committed: bool,
}

/// Undoes an async write whose future was dropped before it finished.
///
/// The blocking task cannot be stopped, so the guard flags the write as abandoned:
/// a task that has not committed yet drops its partial file, and a file already
/// committed is deleted here since no entry will ever be added for it.
struct AbandonGuard {
    progress: Arc<Mutex<WriteProgress>>,
    path: PathBuf,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut progress = self.progress.lock();
        progress.abandoned = true;
        if !progress.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed file of abandoned write"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove file of abandoned write");
            }
        }
    }
}

impl CacheHooks<PathBuf> for DiskHooks {
    type Value = ();
    type Raw = Vec<u8>;
    type Output = File;

    fn fetch(&self, entry: &CacheEntry<PathBuf, ()>) -> Option<File> {
        match File::open(entry.key()) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!(path = %entry.key().display(), error = %e, "cached file could not be opened");
                None
            }
        }
    }

    fn create_entry(&self, key: &PathBuf, raw: Vec<u8>) -> Option<CacheEntry<PathBuf, ()>> {
        match stage(key, &raw).and_then(|partial| commit(partial, key)) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "failed to write cache file");
                None
            }
        }
    }

    fn create_entry_async<'a>(
        &'a self,
        key: &'a PathBuf,
        raw: Vec<u8>,
    ) -> impl Future<Output = Option<CacheEntry<PathBuf, ()>>> + Send + 'a {
        async move {
            match write_async(key, raw).await {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "failed to write cache file");
                    None
                }
            }
        }
    }

    fn on_remove_entry(&self, entry: &CacheEntry<PathBuf, ()>) -> bool {
        match fs::remove_file(entry.key()) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %entry.key().display(), error = %e, "failed to delete cache file");
                false
            }
        }
    }
}

impl fmt::Debug for DiskHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskHooks").field("root", &self.root).finish()
    }
}

/// A checkpoint cache of files below one root directory.
///
/// Share it through `Arc`; [`populate`](Self::populate) needs an `Arc` to fan the
/// directory walk out over tokio tasks.
pub struct DiskCache {
    engine: TimeQueueCache<PathBuf, DiskHooks>,
}

impl DiskCache {
    /// Creates a cache, creating the root directory if it does not exist.
    ///
    /// Leftover `*.partial` files from interrupted writes are deleted. Files already
    /// present under the root are not registered until [`populate`](Self::populate)
    /// runs. Two caches must not share a root.
    pub fn new(config: DiskCacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.root).map_err(|source| CacheError::CreateDirectory {
            path: config.root.clone(),
            source,
        })?;
        let stale = remove_stale_partials(&config.root);
        if stale > 0 {
            debug!(root = %config.root.display(), stale, "removed leftover partial files");
        }
        Ok(Self {
            engine: TimeQueueCache::with_max_size(config.max_size, DiskHooks::new(config.root)),
        })
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        self.engine.hooks().root()
    }

    /// Joins `relative` under the root, producing a key for this cache.
    pub fn path_for(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root().join(relative)
    }

    /// The underlying engine.
    pub fn engine(&self) -> &TimeQueueCache<PathBuf, DiskHooks> {
        &self.engine
    }

    /// Writes `bytes` to `path` and caches it. Returns `false` if `path` is already
    /// cached or the write failed.
    ///
    /// A running [`populate`](Self::populate) waits for this write before looking at
    /// `path`, so the two never register the same file twice.
    pub fn add(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) -> bool {
        self.engine.add(path.into(), bytes)
    }

    /// Asynchronous counterpart of [`add`](Self::add).
    ///
    /// Dropping the future before it resolves leaves neither a file nor an entry
    /// behind, although the file may outlive the drop by the time the write in
    /// flight takes to finish.
    pub async fn add_async(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) -> bool {
        self.engine.add_async(path.into(), bytes).await
    }

    /// Opens the cached file at `path`.
    ///
    /// If the file vanished behind the cache's back the entry is dropped and `None`
    /// is returned.
    pub fn fetch(&self, path: &Path) -> Option<File> {
        let file = self.engine.fetch(path);
        if file.is_none() && self.engine.contains_key(path) && !path.exists() {
            debug!(path = %path.display(), "dropping entry for vanished file");
            self.engine.remove(path);
        }
        file
    }

    /// Reads the whole cached file at `path`.
    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        let mut file = self.fetch(path)?;
        let mut bytes = Vec::new();
        match file.read_to_end(&mut bytes) {
            Ok(_) => Some(bytes),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cached file could not be read");
                None
            }
        }
    }

    /// Returns `true` if `path` is cached.
    pub fn contains(&self, path: &Path) -> bool {
        self.engine.contains_key(path)
    }

    /// Deletes the file at `path` and forgets it. Returns `false` if `path` is not
    /// cached or the file could not be deleted.
    pub fn remove(&self, path: &Path) -> bool {
        self.engine.remove(path)
    }

    /// Runs a checkpoint sweep, deleting unused files while over budget.
    pub fn checkpoint(&self) -> CheckpointReport {
        self.engine.checkpoint()
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    /// Returns `true` if no files are cached.
    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    /// Summed length of the cached files.
    pub fn total_size(&self) -> u64 {
        self.engine.total_size()
    }

    /// Disk budget in bytes.
    pub fn max_size(&self) -> u64 {
        self.engine.max_size()
    }

    /// Changes the disk budget. Takes effect at the next checkpoint.
    pub fn set_max_size(&self, max_size: u64) {
        self.engine.set_max_size(max_size);
    }

    /// Registers the files already present below the root.
    ///
    /// Each sub-directory is walked in its own tokio task; all of them are joined
    /// before this returns. `cancel` is checked before every directory and every
    /// file, and whatever was registered before cancellation stays registered.
    ///
    /// Returns the number of newly registered files.
    pub async fn populate(self: &Arc<Self>, cancel: CancellationToken) -> usize {
        let root = self.root().to_path_buf();
        let added = Arc::clone(self).populate_dir(root, cancel).await;
        debug!(added, total_size = self.total_size(), "disk cache populated");
        added
    }

    fn populate_dir(
        self: Arc<Self>,
        dir: PathBuf,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = usize> + Send>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return 0;
            }
            let mut listing = match tokio::fs::read_dir(&dir).await {
                Ok(listing) => listing,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    return 0;
                }
            };

            let mut walkers = JoinSet::new();
            let mut added = 0;
            while !cancel.is_cancelled() {
                let item = match listing.next_entry().await {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(dir = %dir.display(), error = %e, "directory listing failed");
                        break;
                    }
                };
                let Ok(file_type) = item.file_type().await else {
                    continue;
                };
                let path = item.path();
                if file_type.is_dir() {
                    walkers.spawn(Arc::clone(&self).populate_dir(path, cancel.clone()));
                } else if file_type.is_file() && !is_partial(&path) {
                    match item.metadata().await {
                        Ok(metadata) => {
                            let entry = entry_from_metadata(path, &metadata);
                            if self.engine.add_entry_async(entry).await {
                                added += 1;
                            }
                        }
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "skipping unreadable file");
                        }
                    }
                }
            }

            while let Some(joined) = walkers.join_next().await {
                match joined {
                    Ok(n) => added += n,
                    Err(e) => warn!(error = %e, "directory walker failed"),
                }
            }
            added
        })
    }
}

impl CacheMetrics for DiskCache {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.engine.metrics()
    }

    fn algorithm_name(&self) -> &'static str {
        "DiskCache"
    }
}

impl fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root())
            .field("engine", &self.engine)
            .finish()
    }
}

fn entry_from_metadata(path: PathBuf, metadata: &Metadata) -> CacheEntry<PathBuf, ()> {
    let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
    CacheEntry::with_last_accessed(path, (), metadata.len(), modified)
}

/// Deletes `*.partial` files below `dir`. Returns how many were deleted.
fn remove_stale_partials(dir: &Path) -> usize {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return 0;
        }
    };
    let mut removed = 0;
    for item in listing.flatten() {
        let path = item.path();
        match item.file_type() {
            Ok(file_type) if file_type.is_dir() => removed += remove_stale_partials(&path),
            Ok(file_type) if file_type.is_file() && is_partial(&path) => {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
                }
            }
            _ => {}
        }
    }
    removed
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(PARTIAL_SUFFIX))
}
