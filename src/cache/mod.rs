//! Client-side caching primitives

pub mod dedup;
pub mod ttl;

pub use dedup::RequestDeduplicator;
pub use ttl::TtlCache;
