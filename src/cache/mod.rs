// Response caching with per-class TTLs and LRU eviction

pub mod config;
pub mod store;

pub use config::CachePolicy;
pub use store::{CacheStats, ResponseCache};
