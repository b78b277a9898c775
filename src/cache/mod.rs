// src/cache/mod.rs

//! Incremental, disk-persisted tree cache.
//!
//! - [`data_cache`] holds the node arena and the diff-on-update logic.
//! - [`hierarchy`] builds grouped trees out of flat record lists.
//! - [`persist`] loads and saves the cache file.
//! - [`compare`] decides whether a payload changed.
//! - [`node`] defines nodes, incoming records and diff entries.

pub mod compare;
pub mod data_cache;
pub mod hierarchy;
pub mod node;
pub mod persist;

pub use data_cache::DataCache;
pub use hierarchy::{hierarchy_key, value_key};
pub use node::{CacheItem, CacheNode, CacheRecord, DiffEntry, DiffMode};
pub use persist::{CACHE_GENERATION, LoadOutcome};
