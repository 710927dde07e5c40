//! Small structures around entries stored in a [`crate::store::MemoryStore`].
//!
//! Each entry holds a value behind an `Arc` (so it can be handed out to any
//! number of `DedupLoader` waiters without requiring `V: Clone`) plus an
//! optional monotonic deadline. `RichEntry` additionally tracks how long the
//! load that produced it took, which is all the stampede algorithm needs.
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A value together with its expiration, as stored inside a `MemoryStore`.
#[derive(Debug)]
pub struct Entry<V> {
    pub(crate) value: Arc<V>,
    pub(crate) expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    /// Construct a new entry. `expires_at = None` means "never expires".
    pub fn new(value: Arc<V>, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    /// The stored value.
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// The absolute deadline past which this entry is stale, if any.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Whether this entry is expired as of `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl<V> Deref for Entry<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// An [`Entry`] enriched with the wall-clock cost of the load that produced
/// it, as stored by [`crate::readthrough::ReadThroughCache`] via any
/// [`crate::backend::CacheBackend`].
///
/// The load duration drives the XFetch early-refresh computation: cheap
/// loads defer their eager refresh closer to the actual deadline, expensive
/// ones start rolling the dice earlier.
#[derive(Debug)]
pub struct RichEntry<V> {
    pub(crate) entry: Entry<V>,
    pub(crate) load_duration: Duration,
}

impl<V> Clone for RichEntry<V> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            load_duration: self.load_duration,
        }
    }
}

impl<V> RichEntry<V> {
    /// Construct a new rich entry.
    pub fn new(value: Arc<V>, expires_at: Option<Instant>, load_duration: Duration) -> Self {
        Self {
            entry: Entry::new(value, expires_at),
            load_duration,
        }
    }

    /// The stored value.
    pub fn value(&self) -> &Arc<V> {
        self.entry.value()
    }

    /// The absolute deadline past which this entry is stale, if any.
    pub fn expires_at(&self) -> Option<Instant> {
        self.entry.expires_at()
    }

    /// How long the load that produced this entry took to run.
    pub fn load_duration(&self) -> Duration {
        self.load_duration
    }

    /// Whether this entry is expired as of `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.entry.is_expired(now)
    }
}

impl<V> Deref for RichEntry<V> {
    type Target = Entry<V>;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

/// Computes an absolute deadline from a "now" instant and an optional TTL.
///
/// A `None` or zero-length `ttl` means "never expires", matching the
/// `ttlMs <= 0` sentinel from the wire-level specification this crate is
/// modeled on.
pub fn expires_at(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.filter(|d| !d.is_zero()).map(|d| now + d)
}
