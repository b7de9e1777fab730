//! TTL cache over the asset store
//!
//! Entries expire `cache_duration` after they were written. Expiry is checked
//! lazily on read: an expired row is deleted and reported as absent.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use holdings_core::{AssetCacheSettings, AssetId, Clock, SystemClock};

use crate::entry::{AssetCacheEntry, AssetMetadata};
use crate::fetch::BinaryFetcher;
use crate::store::AssetStore;
use crate::{AssetCacheError, AssetResult};

/// Outcome of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(AssetCacheEntry),
    /// An entry existed but had outlived the cache duration; it is gone now
    Expired,
    Miss,
}

impl Lookup {
    pub fn into_entry(self) -> Option<AssetCacheEntry> {
        match self {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired | Lookup::Miss => None,
        }
    }
}

pub struct AssetCache {
    store: AssetStore,
    fetcher: Arc<dyn BinaryFetcher>,
    clock: Arc<dyn Clock>,
    cache_duration: Duration,
}

impl AssetCache {
    pub fn new(store: AssetStore, fetcher: Arc<dyn BinaryFetcher>, cache_duration: Duration) -> Self {
        Self {
            store,
            fetcher,
            clock: Arc::new(SystemClock),
            cache_duration,
        }
    }

    /// Open the configured store
    pub fn from_settings(settings: &AssetCacheSettings, fetcher: Arc<dyn BinaryFetcher>) -> AssetResult<Self> {
        let store = AssetStore::open(&settings.database_path)?;
        Ok(Self::new(store, fetcher, settings.cache_duration()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    pub fn lookup(&self, id: &AssetId) -> AssetResult<Lookup> {
        let entry = match self.store.get(id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(Lookup::Miss),
            Err(AssetCacheError::Corrupt { id, message }) => {
                warn!("Dropping unreadable cache entry {}: {}", id, message);
                self.store.delete(&id)?;
                return Ok(Lookup::Miss);
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now_ms();
        if entry.is_expired(now, self.cache_duration) {
            debug!(
                "Asset {} expired ({:?} old), deleting",
                id,
                entry.age(now)
            );
            self.store.delete(id)?;
            return Ok(Lookup::Expired);
        }

        Ok(Lookup::Hit(entry))
    }

    /// Cached entry for `id`, if present and not expired
    pub fn get(&self, id: &AssetId) -> AssetResult<Option<AssetCacheEntry>> {
        Ok(self.lookup(id)?.into_entry())
    }

    /// Download the image behind `metadata` and store it, replacing any
    /// existing entry for the same id. Nothing is written if the download
    /// fails.
    pub async fn set(&self, metadata: AssetMetadata) -> AssetResult<AssetCacheEntry> {
        let payload = self.fetcher.fetch_binary(&metadata.image_url).await?;

        let entry = AssetCacheEntry {
            metadata,
            payload,
            cached_at_ms: self.clock.now_ms(),
        };
        self.store.put(&entry)?;

        info!("Cached asset {} ({} bytes)", entry.id(), entry.payload.len());
        Ok(entry)
    }

    /// Returns whether an entry was removed
    pub fn invalidate(&self, id: &AssetId) -> AssetResult<bool> {
        let removed = self.store.delete(id)?;
        if removed {
            debug!("Invalidated asset {}", id);
        }
        Ok(removed)
    }
}
