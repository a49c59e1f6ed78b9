//! Named-cache layer for the offline-first request strategies.
//!
//! Two caches back the interception logic:
//! - a static cache holding the app shell, populated at install time
//! - a dynamic cache populated opportunistically from network responses
//!
//! Cache names carry a version suffix; activation sweeps stale generations.

mod manager;
mod store;

pub use manager::CacheManager;
pub use store::{CacheStore, CachedResponse, SqliteCacheStore};
