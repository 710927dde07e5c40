//! Single-flight coalescing of concurrent loads for the same key.
//!
//! `DedupLoader` collapses N concurrent callers asking for the same missing
//! key into exactly one execution of their load function, fanning its
//! result (or failure) out to every one of them. It does not cache: once
//! the in-flight load resolves and every waiter has been notified, the next
//! caller for that key starts a fresh load.
//!
//! The fan-out itself is an [`async_broadcast`] channel rather than a
//! runtime-specific primitive (e.g. `tokio::sync::broadcast`), keeping this
//! crate usable on `tokio`, `async-std`, or `smol` alike - the same
//! portability goal the rest of this crate (and the host library it's
//! modeled on) holds to.
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_lock::Mutex;
use log::trace;

use crate::error::CacheError;

/// The value every waiter on a given key eventually observes.
type Promise<V> = Result<Arc<V>, CacheError>;

/// Collapses concurrent loads for the same key into a single execution.
pub struct DedupLoader<K, V> {
    in_flight: Mutex<HashMap<K, async_broadcast::Receiver<Promise<V>>>>,
    label: String,
}

impl<K, V> DedupLoader<K, V>
where
    K: Hash + Eq + Clone,
    V: Send + Sync + 'static,
{
    /// Construct an empty loader.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            label: String::new(),
        }
    }

    /// Set a label used to disambiguate this loader's log lines.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = format!("dedup({}): ", label);
        self
    }

    /// Run `load` for `key`, or await the result of an already in-flight
    /// load for the same key.
    ///
    /// At most one execution of `load` is ever active per key at a given
    /// instant: the in-flight registration is removed before any waiter -
    /// including the caller that ran `load` - observes the outcome, so a
    /// caller that arrives just as the prior load finishes either piggybacks
    /// on its (already resolved) broadcast or starts a brand new load; it
    /// never attaches to a load that will never complete.
    pub async fn load_or_await<F, Fut>(&self, key: K, load: F) -> Promise<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Promise<V>>,
    {
        let mut guard = self.in_flight.lock().await;
        if let Some(receiver) = guard.get(&key) {
            let mut receiver = receiver.clone();
            drop(guard);

            trace!("{}piggybacking on in-flight load", self.label);
            return receiver.recv().await.unwrap_or_else(|_| {
                Err(CacheError::Internal(
                    "in-flight load was dropped before completion".to_owned(),
                ))
            });
        }

        let (sender, receiver) = async_broadcast::broadcast(1);
        guard.insert(key.clone(), receiver);
        drop(guard);

        trace!("{}starting new load", self.label);
        let result = load().await;

        {
            let mut guard = self.in_flight.lock().await;
            guard.remove(&key);
        }

        // Waiters who never showed up simply mean nobody was listening;
        // the direct caller already has `result` regardless of whether the
        // broadcast found any receivers.
        let _ = sender.broadcast(result.clone()).await;
        result
    }
}

impl<K, V> Default for DedupLoader<K, V>
where
    K: Hash + Eq + Clone,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
