//! In-memory doubles for the network collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use holdings_core::AssetId;

use crate::entry::{AssetMetadata, Payload};
use crate::fetch::{BinaryFetcher, MetadataSource};
use crate::{AssetCacheError, AssetResult};

/// Serves a fixed body per URL, or fails for URLs it doesn't know
#[derive(Default)]
pub struct CountingFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, url: &str, body: &[u8]) -> Self {
        self.bodies.lock().insert(url.to_string(), body.to_vec());
        self
    }

    pub fn replace(&self, url: &str, body: &[u8]) {
        self.bodies.lock().insert(url.to_string(), body.to_vec());
    }

    /// Fetches of `url` wait until the returned gate is notified
    pub fn gate(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(url.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BinaryFetcher for CountingFetcher {
    async fn fetch_binary(&self, url: &str) -> AssetResult<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().get(url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.bodies.lock().get(url) {
            Some(body) => Ok(Payload::new(body.clone(), Some("image/png".into()))),
            None => Err(AssetCacheError::FetchFailed {
                url: url.to_string(),
                message: "status 404".into(),
            }),
        }
    }
}

/// Metadata for `id` points at `https://img.example/{id}.png`
#[derive(Default)]
pub struct StaticMetadata {
    missing: Vec<AssetId>,
    calls: AtomicUsize,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(mut self, id: &str) -> Self {
        self.missing.push(AssetId::new(id));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn fetch_metadata(&self, id: &AssetId) -> AssetResult<AssetMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.contains(id) {
            return Err(AssetCacheError::MetadataFailed {
                id: id.clone(),
                message: "unknown asset".into(),
            });
        }
        Ok(AssetMetadata::new(id.clone(), image_url(id.as_str())))
    }
}

pub fn image_url(id: &str) -> String {
    format!("https://img.example/{}.png", id)
}
