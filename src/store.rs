//! A bounded, LRU-evicting, TTL-expiring key/value map.
//!
//! The underlying structure is an [`lru::LruCache`] (an intrusive,
//! O(1)-recency doubly-linked list indexed by a hash map) wrapped inside an
//! async mutex, so that waiting for a handle never blocks an entire event
//! loop. Expiry is enforced lazily on every read; an optional background
//! sweep samples the map on an interval and evicts anything it finds
//! expired, following the same Redis-style random-sampling approach this
//! module is modeled on, purely as a memory-pressure optimisation.
use std::cmp;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_io::Timer;
use async_lock::Mutex;
use async_trait::async_trait;
use futures_lite::stream::StreamExt;
use log::{debug, log_enabled, trace, Level};
use lru::LruCache;
use rand::Rng;

use crate::backend::CacheBackend;
use crate::clock::{Clock, SystemClock};
use crate::entry::{expires_at, Entry, RichEntry};

/// Bounded, LRU-evicting, TTL-expiring key/value store.
///
/// `MemoryStore<K, P>` is generic over whatever payload `P` a caller wants
/// to keep resident; used directly, `P` is an application value. Used as the
/// backing store for a [`crate::readthrough::ReadThroughCache`], `P` is
/// instantiated as [`RichEntry<V>`] (see the blanket [`CacheBackend`] impl
/// below), so the same O(1) LRU/TTL machinery serves both roles.
pub struct MemoryStore<K, P> {
    store: Mutex<LruCache<K, Entry<P>>>,
    label: String,
    clock: Arc<dyn Clock>,
}

impl<K, P> MemoryStore<K, P>
where
    K: Hash + Eq + Clone,
{
    /// Construct a new store. `max_items == 0` means unbounded.
    pub fn new(max_items: usize) -> Self {
        MemoryStoreBuilder::new(max_items).build()
    }

    /// Start building a store with a custom label and/or clock.
    pub fn builder(max_items: usize) -> MemoryStoreBuilder<K, P> {
        MemoryStoreBuilder::new(max_items)
    }

    /// Retrieve a value, if present and unexpired. Promotes `key` to MRU on
    /// a hit; lazily evicts and returns `None` if the entry has expired.
    pub async fn get(&self, key: &K) -> Option<Arc<P>> {
        let mut guard = self.store.lock().await;
        let now = self.clock.now();
        let outcome = guard.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value().clone())
            }
        });

        match outcome {
            None => None,
            Some(None) => {
                guard.pop(key);
                if log_enabled!(Level::Trace) {
                    trace!("{}lazily expired key on get", self.label);
                }
                None
            }
            Some(Some(value)) => Some(value),
        }
    }

    /// Insert or replace `key`, positioning it at MRU. Evicts the LRU key
    /// if this insertion pushes the store past `max_items`.
    pub async fn set(&self, key: K, value: P, ttl: Option<Duration>) {
        let now = self.clock.now();
        let entry = Entry::new(Arc::new(value), expires_at(now, ttl));
        let mut guard = self.store.lock().await;
        guard.put(key, entry);
    }

    /// Remove `key`, returning whether it was present.
    pub async fn clear(&self, key: &K) -> bool {
        self.store.lock().await.pop(key).is_some()
    }

    /// Remove every entry.
    pub async fn clear_all(&self) {
        self.store.lock().await.clear();
    }

    /// Number of resident entries, including any not-yet-evicted expired ones.
    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    /// Count entries that are expired but not yet evicted.
    ///
    /// Walks the whole structure; not for use in hot paths.
    pub async fn expired_count(&self) -> usize {
        let guard = self.store.lock().await;
        let now = self.clock.now();
        guard.iter().filter(|(_, entry)| entry.is_expired(now)).count()
    }

    /// Count entries that are not expired.
    ///
    /// Walks the whole structure; not for use in hot paths.
    pub async fn unexpired_count(&self) -> usize {
        let guard = self.store.lock().await;
        let now = self.clock.now();
        guard.iter().filter(|(_, entry)| !entry.is_expired(now)).count()
    }

    /// Drive the eager TTL sweep forever, waking every `frequency` to
    /// [`purge`](Self::purge) a `sample`-sized batch.
    ///
    /// This future must be spawned on whatever runtime the caller is using;
    /// not doing so simply means expired entries are only ever reclaimed
    /// lazily on `get`, which is still correct, just less memory-eager.
    pub async fn sweep(&self, sample: usize, threshold: f64, frequency: Duration) {
        let mut interval = Timer::interval(frequency);
        loop {
            interval.next().await;
            self.purge(sample, threshold).await;
        }
    }

    /// Cleanse the store of expired entries using Redis-style random sampling:
    ///
    /// 1. Take a sample of `sample` keys.
    /// 2. Remove any of the sample found expired.
    /// 3. If more than `threshold` fraction of the sample was expired, go to 1.
    /// 4. Otherwise stop.
    ///
    /// Because each sampled entry's expiry is re-read from the live map
    /// rather than captured ahead of time, a `set` that replaces a key's TTL
    /// before this runs is automatically reflected - there is no stale,
    /// separately-scheduled timer to cancel.
    pub async fn purge(&self, sample: usize, threshold: f64) {
        let start = Instant::now();
        let mut removed = 0usize;

        loop {
            let mut guard = self.store.lock().await;

            if guard.is_empty() {
                break;
            }

            let total = guard.len();
            let sample_size = cmp::min(sample, total);
            let now = self.clock.now();

            let mut indices: BTreeSet<usize> = BTreeSet::new();
            {
                let mut rng = rand::thread_rng();
                while indices.len() < sample_size {
                    indices.insert(rng.gen_range(0..total));
                }
            }

            let mut expired_keys = Vec::with_capacity(sample_size);
            {
                let mut prev = 0usize;
                let mut iter: Box<dyn Iterator<Item = (&K, &Entry<P>)>> = Box::new(guard.iter());
                for idx in &indices {
                    let offset = idx
                        .checked_sub(prev)
                        .and_then(|idx| idx.checked_sub(1))
                        .unwrap_or(0);
                    iter = Box::new(iter.skip(offset));
                    prev = *idx;
                    if let Some((key, entry)) = iter.next() {
                        if entry.is_expired(now) {
                            expired_keys.push(key.clone());
                        }
                    }
                }
            }

            let gone = expired_keys.len();
            for key in &expired_keys {
                guard.pop(key);
            }
            removed += gone;

            if log_enabled!(Level::Trace) {
                trace!(
                    "{}removed {} / {} ({:.2}%) of the sampled keys",
                    self.label,
                    gone,
                    sample_size,
                    (gone as f64 / sample_size as f64) * 100f64,
                );
            }

            drop(guard);

            if (gone as f64) < (sample_size as f64 * threshold) {
                break;
            }
        }

        if log_enabled!(Level::Debug) {
            debug!(
                "{}purge loop removed {} entries in {:.0?}",
                self.label,
                removed,
                start.elapsed(),
            );
        }
    }
}

/// Builder for [`MemoryStore`], for setting a label (used in log lines) and
/// an injectable [`Clock`].
pub struct MemoryStoreBuilder<K, P> {
    max_items: usize,
    label: String,
    clock: Arc<dyn Clock>,
    marker: PhantomData<fn() -> (K, P)>,
}

impl<K, P> MemoryStoreBuilder<K, P>
where
    K: Hash + Eq + Clone,
{
    fn new(max_items: usize) -> Self {
        Self {
            max_items,
            label: String::new(),
            clock: Arc::new(SystemClock),
            marker: PhantomData,
        }
    }

    /// Set a label used to disambiguate this store's log lines.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = format!("cache({}): ", label);
        self
    }

    /// Inject a custom clock, for deterministic tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Finish building the store.
    pub fn build(self) -> MemoryStore<K, P> {
        let cache = match NonZeroUsize::new(self.max_items) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        MemoryStore {
            store: Mutex::new(cache),
            label: self.label,
            clock: self.clock,
        }
    }
}

#[async_trait]
impl<K, V> CacheBackend<K, V> for MemoryStore<K, RichEntry<V>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<Arc<RichEntry<V>>> {
        MemoryStore::get(self, key).await
    }

    async fn set(&self, key: K, entry: RichEntry<V>, ttl: Option<Duration>) {
        MemoryStore::set(self, key, entry, ttl).await
    }

    async fn clear(&self, key: &K) -> bool {
        MemoryStore::clear(self, key).await
    }
}
