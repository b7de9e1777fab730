//! Caller-facing balance view
//!
//! Tracks loading state for the owner currently of interest. Each load is
//! stamped with a generation; a result that settles after the owner has
//! changed is dropped instead of overwriting newer state.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use holdings_core::{OwnerId, Quantity, SourceError, SourceKey};

use crate::aggregator::BalanceAggregator;
use crate::result::AggregateResult;
use crate::source::SourceSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub owner: Option<OwnerId>,
    pub values: BTreeMap<SourceKey, Option<Quantity>>,
    pub totals: BTreeMap<String, Option<Quantity>>,
    pub errors: BTreeMap<SourceKey, Option<SourceError>>,
    /// No data yet for the current owner
    pub is_loading: bool,
    /// A request for the current owner is in flight
    pub is_fetching: bool,
}

#[derive(Default)]
struct ViewState {
    generation: u64,
    owner: Option<OwnerId>,
    sources: Option<SourceSet>,
    result: Option<AggregateResult>,
    fetching: bool,
}

impl ViewState {
    fn snapshot(&self) -> BalanceSnapshot {
        let result = self.result.clone().unwrap_or_default();
        BalanceSnapshot {
            owner: self.owner.clone(),
            values: result.values,
            totals: result.totals,
            errors: result.errors,
            is_loading: self.fetching && self.result.is_none(),
            is_fetching: self.fetching,
        }
    }
}

pub struct BalanceView {
    aggregator: Arc<BalanceAggregator>,
    state: Mutex<ViewState>,
}

impl BalanceView {
    pub fn new(aggregator: Arc<BalanceAggregator>) -> Self {
        Self {
            aggregator,
            state: Mutex::new(ViewState::default()),
        }
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        self.state.lock().snapshot()
    }

    /// Switch to `owner` and load its balances. A cached result, even a
    /// stale one, is shown while the aggregation runs.
    pub async fn load(&self, owner: Option<OwnerId>, sources: SourceSet) -> BalanceSnapshot {
        let generation = self.begin(owner.clone(), sources.clone());
        let result = self.aggregator.aggregate(owner.as_ref(), &sources).await;
        self.settle(generation, result)
    }

    /// Drop cached results for the current owner and load again
    pub async fn refetch(&self) -> BalanceSnapshot {
        let (owner, sources) = {
            let state = self.state.lock();
            (state.owner.clone(), state.sources.clone())
        };
        let (Some(owner), Some(sources)) = (owner, sources) else {
            return self.snapshot();
        };

        let generation = self.begin(Some(owner.clone()), sources.clone());
        let result = self.aggregator.refetch_for(&owner, &sources).await;
        self.settle(generation, result)
    }

    fn begin(&self, owner: Option<OwnerId>, sources: SourceSet) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;

        let owner_changed = state.owner != owner;
        if owner_changed {
            state.result = None;
        }
        if state.result.is_none() {
            if let Some(owner) = owner.as_ref() {
                state.result = self.aggregator.peek(owner, &sources).into_result();
            }
        }

        state.fetching = owner.is_some();
        state.owner = owner;
        state.sources = Some(sources);
        state.generation
    }

    fn settle(&self, generation: u64, result: AggregateResult) -> BalanceSnapshot {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(
                "Discarding superseded balance result (generation {} < {})",
                generation, state.generation
            );
            return state.snapshot();
        }

        state.result = Some(result);
        state.fetching = false;
        state.snapshot()
    }
}
