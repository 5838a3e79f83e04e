//! Process-shared object cache for multi-process servers.
//!
//! Worker processes attached to the same cache path share a fixed-capacity
//! key-to-blob index plus a set of allocator-managed data segments, all in
//! System V shared memory. Typical use is memoizing expensive compilation
//! artifacts keyed by source path, with staleness decided by time-to-live
//! and the source's modification time.

pub mod alloc;
pub mod cache;
pub mod clock;
pub mod error;
pub mod local;
pub mod registry;
pub mod rwlock;
pub mod sys;

pub use cache::{
    Cache, CacheConfig, CacheStats, EntryInfo, RetrievalMode, SegmentStats, MAX_KEY_LEN,
};
pub use clock::{Clock, QuantaClock, SystemClock};
pub use error::{Error, Result};
