// src/retriever/mod.rs

//! Background access to the remote data source.
//!
//! - [`remote`] is the contract with the remote source.
//! - [`retriever`] submits queries and asset downloads as tasks.
//! - [`locations`] maps assets to files under the cache roots.
//! - [`sweep`] prunes cache files that have not been used for a while.

pub mod locations;
pub mod remote;
pub mod retriever;
pub mod sweep;

pub use locations::{AssetScope, CLEANUP_FOLDERS, CacheLocations};
pub use remote::{Query, RemoteSource};
pub use retriever::{AssetOrigin, DataRetriever, RetrieverEvent, download_asset};
pub use sweep::{CleanupHandle, DEFAULT_GRACE_PERIOD_DAYS, SweepReport, remove_old_cached_data};

/// Priority of the check for an existing local asset.
pub const ASSET_CHECK_PRIORITY: i32 = 50;
/// Priority of schema reads.
pub const SCHEMA_PRIORITY: i32 = 40;
/// Priority of remote queries.
pub const QUERY_PRIORITY: i32 = 30;
/// Priority of asset downloads; runs after every pending check.
pub const ASSET_DOWNLOAD_PRIORITY: i32 = 20;
