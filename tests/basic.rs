use std::sync::Arc;
use std::time::Duration;

use stampede_cache::{LoadResult, MemoryStore, ReadThroughCache};

#[tokio::test]
async fn test_store_size_operations() {
    let store: MemoryStore<u8, u8> = MemoryStore::new(0);

    store.set(1, 2, None).await;
    store.set(2, 2, None).await;
    store.set(3, 3, None).await;

    assert_eq!(store.len().await, 3);
    assert_eq!(store.expired_count().await, 0);
    assert_eq!(store.unexpired_count().await, 3);

    store.clear_all().await;

    assert_eq!(store.len().await, 0);
    assert_eq!(store.expired_count().await, 0);
    assert_eq!(store.unexpired_count().await, 0);
}

#[tokio::test]
async fn test_store_replace_on_set() {
    let store: MemoryStore<u8, u8> = MemoryStore::new(0);

    store.set(1, 1, None).await;
    assert_eq!(store.get(&1).await.as_deref(), Some(&1));

    store.set(1, 5, None).await;
    assert_eq!(store.get(&1).await.as_deref(), Some(&5));
}

#[tokio::test]
async fn test_read_through_cache_loads_once_per_key() {
    let cache: ReadThroughCache<&str, u32, _> = ReadThroughCache::new(MemoryStore::new(16));

    let first = cache
        .get("answer", || async {
            Ok::<_, std::convert::Infallible>(LoadResult::new(42, Some(Duration::from_secs(30))))
        })
        .await
        .unwrap();
    assert_eq!(*first, 42);

    // Second call for the same key must not invoke the load function again;
    // if it did, this would panic.
    let second = cache
        .get("answer", || async {
            panic!("load should not run again on a cache hit");
            #[allow(unreachable_code)]
            Ok::<_, std::convert::Infallible>(LoadResult::new(0, None))
        })
        .await
        .unwrap();
    assert_eq!(*second, 42);

    assert!(cache.clear(&"answer").await);
    assert!(!cache.clear(&"answer").await);
}

#[tokio::test]
async fn test_read_through_cache_reloads_after_clear() {
    let cache: ReadThroughCache<&str, u32, _> = ReadThroughCache::new(MemoryStore::new(16));
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let load = {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(LoadResult::new(n as u32, None))
            }
        }
    };

    let first = cache.get("k", load.clone()).await.unwrap();
    assert_eq!(*first, 0);

    cache.clear(&"k").await;

    let second = cache.get("k", load).await.unwrap();
    assert_eq!(*second, 1);
}
