//! Transient local handles to cached payloads
//!
//! A handle is a process-local `local-asset://<n>` reference that a renderer
//! can resolve to bytes without touching the store. Handles are never
//! persisted. `LocalHandle` revokes itself when dropped; `HandleSlot` keeps
//! at most one live handle per display slot.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::entry::Payload;

pub type HandleId = u64;

pub const HANDLE_SCHEME: &str = "local-asset";

#[derive(Default)]
struct Registry {
    live: DashMap<HandleId, Arc<Payload>>,
    next_id: AtomicU64,
    minted: AtomicU64,
    revoked: AtomicU64,
}

impl Registry {
    fn revoke(&self, id: HandleId) -> bool {
        let removed = self.live.remove(&id).is_some();
        if removed {
            self.revoked.fetch_add(1, Ordering::Relaxed);
            trace!("Revoked handle {}", id);
        }
        removed
    }
}

#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<Registry>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self, payload: Arc<Payload>) -> LocalHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("Minted handle {} ({} bytes)", id, payload.len());
        self.inner.live.insert(id, payload);
        self.inner.minted.fetch_add(1, Ordering::Relaxed);

        LocalHandle {
            id,
            registry: self.inner.clone(),
            released: false,
        }
    }

    /// Returns false if the handle was already revoked or never existed
    pub fn revoke(&self, id: HandleId) -> bool {
        self.inner.revoke(id)
    }

    pub fn resolve(&self, id: HandleId) -> Option<Arc<Payload>> {
        self.inner.live.get(&id).map(|p| p.value().clone())
    }

    pub fn resolve_url(&self, url: &str) -> Option<Arc<Payload>> {
        let id = url
            .strip_prefix(HANDLE_SCHEME)?
            .strip_prefix("://")?
            .parse::<HandleId>()
            .ok()?;
        self.resolve(id)
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    /// (minted, revoked) since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.inner.minted.load(Ordering::Relaxed),
            self.inner.revoked.load(Ordering::Relaxed),
        )
    }
}

/// Live reference to a payload; revoked on drop. The bytes are only
/// reachable through the registry, so a revoked id yields nothing.
pub struct LocalHandle {
    id: HandleId,
    registry: Arc<Registry>,
    released: bool,
}

impl LocalHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn url(&self) -> String {
        format!("{}://{}", HANDLE_SCHEME, self.id)
    }

    /// `None` once the id has been revoked
    pub fn payload(&self) -> Option<Arc<Payload>> {
        self.registry.live.get(&self.id).map(|p| p.value().clone())
    }

    pub fn is_live(&self) -> bool {
        self.registry.live.contains_key(&self.id)
    }

    /// Revoke now instead of at drop
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry.revoke(self.id)
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        if !self.released {
            self.registry.revoke(self.id);
        }
    }
}

impl fmt::Debug for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalHandle")
            .field("url", &self.url())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Holds the handle currently shown in one display slot
#[derive(Debug, Default)]
pub struct HandleSlot {
    current: Option<LocalHandle>,
}

impl HandleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle`, revoking whatever the slot held before
    pub fn replace(&mut self, handle: LocalHandle) -> Option<HandleId> {
        let previous = self.current.replace(handle)?;
        let id = previous.id();
        previous.release();
        Some(id)
    }

    pub fn clear(&mut self) -> bool {
        match self.current.take() {
            Some(handle) => handle.release(),
            None => false,
        }
    }

    pub fn current(&self) -> Option<&LocalHandle> {
        self.current.as_ref()
    }
}
