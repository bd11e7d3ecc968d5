use checkpoint_cache::config::{TimeQueueCacheConfig, ViewCacheConfig};
use checkpoint_cache::view::{ViewCache, ViewKey, ViewResource};
use checkpoint_cache::{CacheEntry, CacheHooks, TimeQueueCache};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

struct Numbers;

impl CacheHooks<usize> for Numbers {
    type Value = usize;
    type Raw = usize;
    type Output = usize;

    fn fetch(&self, entry: &CacheEntry<usize, usize>) -> Option<usize> {
        Some(*entry.value())
    }

    fn create_entry(&self, key: &usize, raw: usize) -> Option<CacheEntry<usize, usize>> {
        Some(CacheEntry::new(*key, raw, 1))
    }

    fn on_remove_entry(&self, _entry: &CacheEntry<usize, usize>) -> bool {
        true
    }
}

struct Blob(u64);

impl ViewResource for Blob {
    fn estimated_size(&self) -> u64 {
        self.0
    }

    fn release(&self) {}
}

// Helper to create a filled engine
fn make_engine(entries: usize, max_size: u64) -> TimeQueueCache<usize, Numbers> {
    let cache = TimeQueueCache::new(TimeQueueCacheConfig { max_size }, Numbers);
    for i in 0..entries {
        cache.add(i, i);
    }
    cache
}

pub fn criterion_benchmark(c: &mut Criterion) {
    const CACHE_SIZE: usize = 1000;
    let mut group = c.benchmark_group("Cache Operations");

    // Engine benchmarks
    {
        let cache = make_engine(CACHE_SIZE, u64::MAX);

        group.bench_function("TimeQueue fetch hit", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.fetch(&(i % CACHE_SIZE)));
                }
            });
        });

        group.bench_function("TimeQueue fetch miss", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.fetch(&(i + CACHE_SIZE)));
                }
            });
        });

        group.bench_function("TimeQueue add existing", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.add(i % CACHE_SIZE, i));
                }
            });
        });

        group.bench_function("TimeQueue fetch_or_construct hit", |b| {
            b.iter(|| {
                for i in 0..100 {
                    let key = i % CACHE_SIZE;
                    let _ = black_box(
                        cache.fetch_or_construct(key, |k| Ok::<_, ()>(CacheEntry::new(*k, 0, 1))),
                    );
                }
            });
        });

        group.bench_function("TimeQueue checkpoint under budget", |b| {
            b.iter(|| black_box(cache.checkpoint()));
        });
    }

    // Checkpoint under budget pressure
    group.bench_function("TimeQueue checkpoint evict half", |b| {
        b.iter_batched(
            || {
                let cache = make_engine(CACHE_SIZE, (CACHE_SIZE / 2) as u64);
                cache.checkpoint();
                cache
            },
            |cache| black_box(cache.checkpoint()),
            BatchSize::SmallInput,
        );
    });

    // View cache benchmarks
    {
        let cache: ViewCache<Blob> = ViewCache::new(ViewCacheConfig::default());
        let keys: Vec<ViewKey> = (0..CACHE_SIZE)
            .map(|i| ViewKey::new(format!("tile-{i}"), "identity"))
            .collect();
        for key in &keys {
            cache.add(key.clone(), Blob(1024));
        }

        group.bench_function("ViewCache fetch hit", |b| {
            b.iter(|| {
                for key in keys.iter().take(100) {
                    black_box(cache.fetch(key));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
