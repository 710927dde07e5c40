use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stampede_cache::{LoadResult, MemoryStore, ReadThroughCache};

#[tokio::main]
async fn main() {
    simple_logger::init().unwrap();

    // A store bounded to 1,000 entries, backing a read-through cache.
    let store: Arc<MemoryStore<String, _>> = Arc::new(MemoryStore::new(1_000));

    // Don't forget to drive the background sweep on whatever runtime you're
    // using, or expired entries are only reclaimed lazily on `get`.
    let sweep_store = store.clone();
    tokio::spawn(async move { sweep_store.sweep(25, 0.25, Duration::from_secs(30)).await });

    let cache: ReadThroughCache<String, String, _> = ReadThroughCache::new(store.clone());

    // Pretend this is an expensive lookup against a database or remote
    // service. `load_calls` lets us see it only ever runs once per miss.
    let load_calls = Arc::new(AtomicUsize::new(0));

    let load = {
        let load_calls = load_calls.clone();
        move || {
            let load_calls = load_calls.clone();
            async move {
                load_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(LoadResult::new(
                    "Ada Lovelace".to_string(),
                    Some(Duration::from_secs(60)),
                ))
            }
        }
    };

    // First call misses and loads synchronously.
    let value = cache.get("user:42".to_string(), load.clone()).await.unwrap();
    println!("user:42 = {value} (loads so far: {})", load_calls.load(Ordering::SeqCst));

    // Second call hits the cache; the load function does not run again.
    let value = cache.get("user:42".to_string(), load.clone()).await.unwrap();
    println!("user:42 = {value} (loads so far: {})", load_calls.load(Ordering::SeqCst));

    // Fire three concurrent misses for a brand new key: only one of them
    // actually runs the load function, the rest piggyback on it.
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let cache = cache.clone();
            let load = load.clone();
            tokio::spawn(async move { cache.get("user:7".to_string(), load).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    println!("total loads: {}", load_calls.load(Ordering::SeqCst));
}
