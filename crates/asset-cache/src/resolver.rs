//! Cache-first asset resolution
//!
//! Per asset id:
//! `Unresolved -> Checking -> Ready(hit)` when the store has a valid entry,
//! `Checking -> Expired -> Fetching` when the stored entry outlived its cache
//! duration, `Checking -> Fetching` when nothing was stored. Fetching ends in
//! `Ready(miss)` or `Failed`.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use holdings_core::AssetId;

use crate::cache::{AssetCache, Lookup};
use crate::entry::{AssetCacheEntry, AssetMetadata};
use crate::fetch::MetadataSource;
use crate::handles::{HandleRegistry, LocalHandle};
use crate::{AssetCacheError, AssetResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    CacheHit,
    CacheMiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPhase {
    Unresolved,
    Checking,
    /// Stored entry was past its cache duration and has been dropped
    Expired,
    Fetching,
    Ready(Provenance),
    Failed,
}

impl AssetPhase {
    pub fn is_loading(&self) -> bool {
        matches!(self, AssetPhase::Checking | AssetPhase::Expired | AssetPhase::Fetching)
    }
}

#[derive(Debug)]
pub struct ResolvedAsset {
    pub handle: LocalHandle,
    pub provenance: Provenance,
    pub metadata: AssetMetadata,
}

pub struct AssetResolver {
    cache: Arc<AssetCache>,
    metadata: Arc<dyn MetadataSource>,
    handles: HandleRegistry,
}

impl AssetResolver {
    pub fn new(cache: Arc<AssetCache>, metadata: Arc<dyn MetadataSource>, handles: HandleRegistry) -> Self {
        Self {
            cache,
            metadata,
            handles,
        }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub async fn resolve(&self, id: &AssetId) -> AssetResult<ResolvedAsset> {
        self.resolve_observed(id, &mut |_| {}).await
    }

    /// Resolve `id`, reporting each phase transition to `observe`
    pub async fn resolve_observed(
        &self,
        id: &AssetId,
        observe: &mut (dyn FnMut(AssetPhase) + Send),
    ) -> AssetResult<ResolvedAsset> {
        observe(AssetPhase::Checking);
        match self.run(id, observe).await {
            Ok(resolved) => {
                observe(AssetPhase::Ready(resolved.provenance));
                Ok(resolved)
            }
            Err(e) => {
                warn!("Failed to resolve asset {}: {}", id, e);
                observe(AssetPhase::Failed);
                Err(e)
            }
        }
    }

    /// Drop the cached entry for `id` and resolve it from the network
    pub async fn refresh(&self, id: &AssetId) -> AssetResult<ResolvedAsset> {
        self.cache.invalidate(id)?;
        self.resolve(id).await
    }

    async fn run(
        &self,
        id: &AssetId,
        observe: &mut (dyn FnMut(AssetPhase) + Send),
    ) -> AssetResult<ResolvedAsset> {
        match self.cache.lookup(id)? {
            Lookup::Hit(entry) => {
                debug!("Asset {} served from cache", id);
                return Ok(self.issue(entry, Provenance::CacheHit));
            }
            Lookup::Expired => observe(AssetPhase::Expired),
            Lookup::Miss => {}
        }
        observe(AssetPhase::Fetching);

        let metadata = self.metadata.fetch_metadata(id).await?;
        if &metadata.id != id {
            return Err(AssetCacheError::MetadataFailed {
                id: id.clone(),
                message: format!("metadata describes asset {}", metadata.id),
            });
        }
        self.cache.set(metadata).await?;

        let entry = self
            .cache
            .get(id)?
            .ok_or_else(|| AssetCacheError::Vanished(id.clone()))?;
        Ok(self.issue(entry, Provenance::CacheMiss))
    }

    fn issue(&self, entry: AssetCacheEntry, provenance: Provenance) -> ResolvedAsset {
        let AssetCacheEntry { metadata, payload, .. } = entry;
        ResolvedAsset {
            handle: self.handles.mint(Arc::new(payload)),
            provenance,
            metadata,
        }
    }
}
