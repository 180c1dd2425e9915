//! Caching tiers: in-memory TTL, conditional-HTTP with disk mirror, and
//! keyed files with caller-defined staleness.

pub mod keyed;
pub mod memory;
pub mod response;
pub mod schedule;

pub use keyed::{FileKeyedCache, KeyedCache, MemoryKeyedCache};
pub use memory::{GlobalCache, MemoryCache};
pub use response::{ResponseCache, ResponseMetadata};
pub use schedule::{ScheduleCache, ScheduleCacheEntry};
