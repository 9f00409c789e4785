//! Local response cache
//!
//! SQLite-backed, one store per resource class, versioned by generation.

pub mod key;
pub mod policy;
pub mod storage;

pub use key::{cache_key, partition_for};
pub use policy::{ExpirationPolicy, ResourceClass};
pub use storage::{CacheEntry, CacheStorage};
