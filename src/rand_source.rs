//! Injectable randomness for the XFetch early-refresh computation.
//!
//! `ReadThroughCache` needs a `U` uniform on `(0, 1)` for the XFetch formula
//! (see [`crate::readthrough`]). Sampling it through a trait, rather than
//! calling into `rand` directly, lets tests pin `U` near 0 or 1 to force (or
//! suppress) an eager refresh deterministically.
use rand::Rng;

/// A source of uniform `f64` samples on the open interval `(0, 1)`.
pub trait RandomSource: Send + Sync {
    /// Sample a fresh `U ∈ (0, 1)`.
    fn uniform_open01(&self) -> f64;
}

/// The default source, backed by `rand::thread_rng()`.
#[derive(Debug, Default)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn uniform_open01(&self) -> f64 {
        // `gen_range` on an open interval avoids the `u == 0.0` case, which
        // would make `ln(u)` diverge to negative infinity.
        rand::thread_rng().gen_range(f64::MIN_POSITIVE..1.0)
    }
}

/// A source that always returns the same sample, for deterministic tests of
/// the eager-refresh trigger.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandomSource(pub f64);

impl RandomSource for FixedRandomSource {
    fn uniform_open01(&self) -> f64 {
        self.0
    }
}
