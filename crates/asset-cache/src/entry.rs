//! Cached asset records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use holdings_core::{AssetId, ChainRef};

/// Badge metadata as served by the owning data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub id: AssetId,
    pub image_url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub chain: Option<ChainRef>,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl AssetMetadata {
    pub fn new(id: impl Into<AssetId>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image_url: image_url.into(),
            name: None,
            description: None,
            chain: None,
            contract: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Binary content of an asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Payload {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self { bytes, content_type }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetCacheEntry {
    pub metadata: AssetMetadata,
    pub payload: Payload,
    pub cached_at_ms: u64,
}

impl AssetCacheEntry {
    pub fn id(&self) -> &AssetId {
        &self.metadata.id
    }

    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.cached_at_ms))
    }

    pub fn is_expired(&self, now_ms: u64, cache_duration: Duration) -> bool {
        self.age(now_ms) > cache_duration
    }
}
