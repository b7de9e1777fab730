//! Local badge asset cache
//!
//! Persists fetched badge images in SQLite with a time-based expiry, and
//! hands out transient local handles to cached payloads for rendering.
//! Expired entries are deleted when read; there is no background sweep.

pub mod cache;
pub mod entry;
pub mod fetch;
pub mod handles;
pub mod resolver;
pub mod store;
pub mod view;

#[cfg(test)]
mod testing;

pub use cache::{AssetCache, Lookup};
pub use entry::{AssetCacheEntry, AssetMetadata, Payload};
pub use fetch::{BinaryFetcher, HttpFetcher, HttpMetadataSource, MetadataSource};
pub use handles::{HandleId, HandleRegistry, HandleSlot, LocalHandle};
pub use resolver::{AssetPhase, AssetResolver, Provenance, ResolvedAsset};
pub use store::AssetStore;
pub use view::AssetView;

use holdings_core::AssetId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetCacheError {
    #[error("asset fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },
    #[error("metadata fetch failed for {id}: {message}")]
    MetadataFailed { id: AssetId, message: String },
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("corrupt cache entry {id}: {message}")]
    Corrupt { id: AssetId, message: String },
    #[error("asset {0} missing right after being stored")]
    Vanished(AssetId),
}

pub type AssetResult<T> = Result<T, AssetCacheError>;
