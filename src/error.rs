//! Error kinds recognised by the cache core.
//!
//! The failure surface is intentionally small: a load failure (propagated
//! verbatim to every waiter collapsed onto the same in-flight load) and an
//! internal error reserved for conditions the store itself is not expected
//! to hit in practice.
use std::sync::Arc;

/// Errors produced by [`crate::dedup::DedupLoader`] and
/// [`crate::readthrough::ReadThroughCache`].
///
/// Cloneable by design: a single load failure is fanned out to every waiter
/// that piggybacked on the in-flight load, so the error itself must be
/// shareable without re-running the caller's fallible code.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CacheError {
    /// The caller-supplied load function failed. Never cached: the next
    /// call for the same key retriggers a fresh load.
    #[error("load failed: {0}")]
    Load(Arc<dyn std::error::Error + Send + Sync>),

    /// An internal invariant was violated. `MemoryStore` operations are
    /// designed not to fail, so this variant exists only for truly
    /// exceptional conditions and is distinct from a load failure.
    #[error("internal cache error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wrap an arbitrary load error.
    pub fn load<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CacheError::Load(Arc::new(error))
    }
}
