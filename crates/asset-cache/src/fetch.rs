//! Network collaborators for the asset cache

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use holdings_core::AssetId;

use crate::entry::{AssetMetadata, Payload};
use crate::{AssetCacheError, AssetResult};

/// Downloads the binary content behind an image URL
#[async_trait]
pub trait BinaryFetcher: Send + Sync {
    async fn fetch_binary(&self, url: &str) -> AssetResult<Payload>;
}

/// Looks up badge metadata (including the image URL) by asset id
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_metadata(&self, id: &AssetId) -> AssetResult<AssetMetadata>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BinaryFetcher for HttpFetcher {
    async fn fetch_binary(&self, url: &str) -> AssetResult<Payload> {
        let failed = |message: String| AssetCacheError::FetchFailed {
            url: url.to_string(),
            message,
        };

        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("status {}", status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

        Ok(Payload::new(bytes.to_vec(), content_type))
    }
}

/// `GET {base_url}/{id}` returning an `AssetMetadata` document
pub struct HttpMetadataSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, id: &AssetId) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), id.as_str())
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch_metadata(&self, id: &AssetId) -> AssetResult<AssetMetadata> {
        let failed = |message: String| AssetCacheError::MetadataFailed {
            id: id.clone(),
            message,
        };

        let url = self.url_for(id);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await.map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("status {} from {}", status.as_u16(), url)));
        }

        let metadata: AssetMetadata = response.json().await.map_err(|e| failed(e.to_string()))?;
        if &metadata.id != id {
            return Err(failed(format!("document describes asset {}", metadata.id)));
        }
        Ok(metadata)
    }
}
