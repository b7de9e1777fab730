//! Caller-facing asset view
//!
//! Owns the display slot for one asset id. Loading a new id, or refreshing
//! the current one, revokes the handle previously shown. Phases reported by
//! the resolver are applied as they happen, so `is_loading` is observable
//! while a fetch is in flight. Each load is stamped with a generation; a load
//! that settles after the id has changed is dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use holdings_core::AssetId;

use crate::handles::HandleSlot;
use crate::resolver::{AssetPhase, AssetResolver, Provenance, ResolvedAsset};
use crate::AssetCacheError;

/// Phases kept for the current asset id
pub const HISTORY_LIMIT: usize = 32;

struct ViewState {
    generation: u64,
    id: Option<AssetId>,
    slot: HandleSlot,
    phase: AssetPhase,
    error: Option<Arc<AssetCacheError>>,
    history: Vec<AssetPhase>,
}

impl ViewState {
    fn record(&mut self, phase: AssetPhase) {
        self.phase = phase;
        if self.history.len() == HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push(phase);
    }
}

pub struct AssetView {
    resolver: Arc<AssetResolver>,
    state: Mutex<ViewState>,
}

impl AssetView {
    pub fn new(resolver: Arc<AssetResolver>) -> Self {
        Self {
            resolver,
            state: Mutex::new(ViewState {
                generation: 0,
                id: None,
                slot: HandleSlot::new(),
                phase: AssetPhase::Unresolved,
                error: None,
                history: Vec::new(),
            }),
        }
    }

    /// Point the view at `id` and load it. `None` clears the view.
    pub async fn set_asset(&self, id: Option<AssetId>) {
        {
            let mut state = self.state.lock();
            if state.id != id {
                state.generation += 1;
                state.slot.clear();
                state.error = None;
                state.phase = AssetPhase::Unresolved;
                state.history.clear();
                state.id = id;
            }
        }
        self.load().await;
    }

    pub async fn load(&self) {
        self.run(false).await
    }

    /// Drop the cached copy and fetch the asset again
    pub async fn refresh(&self) {
        self.run(true).await
    }

    async fn run(&self, refresh: bool) {
        let (id, generation) = {
            let mut state = self.state.lock();
            let Some(id) = state.id.clone() else {
                return;
            };
            state.generation += 1;
            (id, state.generation)
        };

        if refresh {
            if let Err(e) = self.resolver.cache().invalidate(&id) {
                self.settle(generation, Err(e));
                return;
            }
        }

        let outcome = self
            .resolver
            .resolve_observed(&id, &mut |phase| self.observe(generation, phase))
            .await;
        self.settle(generation, outcome);
    }

    fn observe(&self, generation: u64, phase: AssetPhase) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.record(phase);
        }
    }

    fn settle(&self, generation: u64, outcome: Result<ResolvedAsset, AssetCacheError>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(
                "Discarding superseded asset load (generation {} < {})",
                generation, state.generation
            );
            return;
        }

        match outcome {
            Ok(resolved) => {
                if let Some(previous) = state.slot.replace(resolved.handle) {
                    debug!("Asset view superseded handle {}", previous);
                }
                state.phase = AssetPhase::Ready(resolved.provenance);
                state.error = None;
            }
            Err(e) => {
                state.slot.clear();
                state.phase = AssetPhase::Failed;
                state.error = Some(Arc::new(e));
            }
        }
    }

    pub fn asset_id(&self) -> Option<AssetId> {
        self.state.lock().id.clone()
    }

    /// URL of the handle currently shown, if any
    pub fn local_handle(&self) -> Option<String> {
        self.state.lock().slot.current().map(|h| h.url())
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().phase.is_loading()
    }

    pub fn is_cache_hit(&self) -> bool {
        self.state.lock().phase == AssetPhase::Ready(Provenance::CacheHit)
    }

    pub fn error(&self) -> Option<Arc<AssetCacheError>> {
        self.state.lock().error.clone()
    }

    pub fn phase(&self) -> AssetPhase {
        self.state.lock().phase
    }

    /// Phases reported for the current asset id, most recent last
    pub fn history(&self) -> Vec<AssetPhase> {
        self.state.lock().history.clone()
    }
}
