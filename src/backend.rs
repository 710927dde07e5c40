//! The storage boundary consumed by [`crate::readthrough::ReadThroughCache`].
//!
//! Modeling this as a trait (rather than baking `MemoryStore` directly into
//! `ReadThroughCache`) is what lets a remote, Redis-style backend sit behind
//! the same read-through/dedup/eager-refresh machinery without touching it -
//! see the delegate pattern this is grounded on in `apollo-router`'s
//! `CacheCallback`.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::entry::RichEntry;

/// A backend capable of storing [`RichEntry`] values keyed by `K`.
///
/// [`crate::store::MemoryStore`] is the only implementation in this crate; a
/// remote backend is out of scope here but would implement the same three
/// methods.
#[async_trait]
pub trait CacheBackend<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Look up `key`, returning its entry if present and unexpired.
    async fn get(&self, key: &K) -> Option<Arc<RichEntry<V>>>;

    /// Store `entry` under `key`, expiring it after `ttl` (`None` or zero
    /// meaning "never").
    async fn set(&self, key: K, entry: RichEntry<V>, ttl: Option<Duration>);

    /// Remove `key`, returning whether it was present.
    async fn clear(&self, key: &K) -> bool;
}

/// Lets an `Arc`-shared backend (e.g. one whose sweep is spawned separately
/// from the cache that owns it) be used directly as a [`CacheBackend`].
#[async_trait]
impl<K, V, T> CacheBackend<K, V> for Arc<T>
where
    T: CacheBackend<K, V> + ?Sized,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<Arc<RichEntry<V>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: K, entry: RichEntry<V>, ttl: Option<Duration>) {
        (**self).set(key, entry, ttl).await
    }

    async fn clear(&self, key: &K) -> bool {
        (**self).clear(key).await
    }
}
