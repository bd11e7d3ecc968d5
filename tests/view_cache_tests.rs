//! View Cache Tests
//!
//! Drives the view cache the way a render loop does: fetch what is on screen, run a
//! checkpoint per frame, and release evicted objects at the start of the next frame.

use checkpoint_cache::config::ViewCacheConfig;
use checkpoint_cache::view::{ViewCache, ViewKey, ViewResource};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A fake GPU-backed object that counts how often it was released.
struct Texture {
    bytes: u64,
    released: AtomicBool,
    releases: Arc<AtomicUsize>,
}

impl Texture {
    fn new(bytes: u64, releases: &Arc<AtomicUsize>) -> Self {
        Self {
            bytes,
            released: AtomicBool::new(false),
            releases: Arc::clone(releases),
        }
    }
}

impl ViewResource for Texture {
    fn estimated_size(&self) -> u64 {
        self.bytes
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn tile(i: usize) -> ViewKey {
    ViewKey::new(format!("section-1/tile-{i}"), "mosaic")
}

#[test]
fn test_render_loop_keeps_visible_tiles() {
    let releases = Arc::new(AtomicUsize::new(0));
    let cache = ViewCache::new(ViewCacheConfig { max_size: 500 });

    // Frame 0: tiles 0..10 visible.
    for i in 0..10 {
        cache
            .fetch_or_construct(tile(i), |_| Ok::<_, ()>(Texture::new(100, &releases)))
            .unwrap();
    }
    cache.checkpoint();

    // Frames 1..3: only tiles 5..10 stay on screen.
    for _ in 0..3 {
        cache.drain_releases();
        for i in 5..10 {
            assert!(cache.fetch(&tile(i)).is_some());
        }
        cache.checkpoint();
    }
    cache.drain_releases();

    assert_eq!(cache.total_size(), 500);
    for i in 0..5 {
        assert!(!cache.contains(&tile(i)));
    }
    for i in 5..10 {
        assert!(cache.contains(&tile(i)));
    }
    assert_eq!(releases.load(Ordering::SeqCst), 5);
}

#[test]
fn test_construction_error_is_propagated() {
    let cache: ViewCache<Texture> = ViewCache::default();
    let result = cache.fetch_or_construct(tile(0), |key| Err(format!("cannot decode {key}")));
    assert_eq!(
        result.err().as_deref(),
        Some("cannot decode section-1/tile-0-mosaic")
    );
    assert!(cache.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_construction_builds_once() {
    let releases = Arc::new(AtomicUsize::new(0));
    let built = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(ViewCache::new(ViewCacheConfig::default()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let built = Arc::clone(&built);
            let releases = Arc::clone(&releases);
            tokio::spawn(async move {
                cache
                    .fetch_or_construct_async(tile(1), |_| async move {
                        built.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(Texture::new(64, &releases))
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut slots = Vec::new();
    for task in tasks {
        slots.push(task.await.expect("task panicked"));
    }

    assert_eq!(built.load(Ordering::SeqCst), 1);
    for slot in &slots {
        assert!(Arc::ptr_eq(slot, &slots[0]));
    }
    assert_eq!(cache.total_size(), 64);
}

#[tokio::test]
async fn test_finished_load_does_not_force_removal() {
    let releases = Arc::new(AtomicUsize::new(0));
    let cache = ViewCache::new(ViewCacheConfig::default());
    let slot = cache
        .fetch_or_construct(tile(2), |_| Ok::<_, ()>(Texture::new(1, &releases)))
        .unwrap();

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    slot.spawn_load(|_| async move {
        let _ = done_tx.send(());
    });
    done_rx.await.unwrap();
    tokio::task::yield_now().await;
    while slot.load().is_loading() {
        tokio::task::yield_now().await;
    }

    cache.checkpoint();
    let report = cache.checkpoint();

    assert_eq!(report.forced, 0);
    assert!(cache.contains(&tile(2)));
    // Aborting after completion is harmless.
    slot.load().abort_request();
    slot.load().abort_request();
}

#[test]
fn test_removed_object_released_once_on_drain() {
    let releases = Arc::new(AtomicUsize::new(0));
    let cache = ViewCache::new(ViewCacheConfig::default());
    cache.add(tile(3), Texture::new(10, &releases));
    let slot = cache.fetch(&tile(3)).unwrap();

    assert!(cache.remove(&tile(3)));
    assert_eq!(releases.load(Ordering::SeqCst), 0);
    assert!(!slot.is_released());

    assert_eq!(cache.drain_releases(), 1);
    assert_eq!(cache.drain_releases(), 0);
    assert!(slot.is_released());
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    drop(cache);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
