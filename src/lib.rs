#![doc = include_str!("../README.md")]

// exposed modules
pub mod backend;
pub mod clock;
pub mod dedup;
pub mod entry;
pub mod error;
pub mod rand_source;
pub mod readthrough;
pub mod store;

// lifted types to the top level
pub use crate::backend::CacheBackend;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::dedup::DedupLoader;
pub use crate::entry::{Entry, RichEntry};
pub use crate::error::CacheError;
pub use crate::rand_source::{FixedRandomSource, RandomSource, ThreadRandomSource};
pub use crate::readthrough::{
    ErrorSink, LoadResult, LoggingErrorSink, NoopSpawner, ReadThroughCache,
    ReadThroughCacheBuilder, Spawner,
};
pub use crate::store::{MemoryStore, MemoryStoreBuilder};
