//! In-memory doubles for aggregator tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use holdings_core::{
    BadgeDescriptor, ContractRef, OwnerId, Quantity, SourceError, SourceResult,
};

use crate::badges::BadgeLister;
use crate::source::BalanceReader;

/// Replays a script of results per contract address. The last scripted
/// result repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedReader {
    scripts: Mutex<HashMap<String, VecDeque<SourceResult<Quantity>>>>,
    calls: AtomicUsize,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, address: &str, results: Vec<SourceResult<Quantity>>) -> Self {
        self.scripts.lock().insert(address.to_lowercase(), results.into());
        self
    }

    pub fn always(self, address: &str, result: SourceResult<Quantity>) -> Self {
        self.script(address, vec![result])
    }

    /// Reads for `owner` wait until the returned gate is notified
    pub fn gate_owner(&self, owner: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(OwnerId::new(owner).to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceReader for ScriptedReader {
    async fn read_quantity(&self, contract: &ContractRef, owner: &OwnerId) -> SourceResult<Quantity> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().get(owner.as_str()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut scripts = self.scripts.lock();
        let script = scripts
            .get_mut(&contract.address)
            .ok_or_else(|| SourceError::Transport(format!("no script for {}", contract)))?;
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| Err(SourceError::Transport("empty".into())))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(SourceError::Transport("empty".into())))
        }
    }
}

pub fn q(value: u64) -> SourceResult<Quantity> {
    Ok(Quantity::from(value))
}

pub fn fail(message: &str) -> SourceResult<Quantity> {
    Err(SourceError::Transport(message.to_string()))
}

/// Badge listing double
pub struct StaticLister {
    result: SourceResult<Vec<BadgeDescriptor>>,
    calls: AtomicUsize,
}

impl StaticLister {
    pub fn new(result: SourceResult<Vec<BadgeDescriptor>>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BadgeLister for StaticLister {
    async fn list_badges(&self, _owner: &OwnerId) -> SourceResult<Vec<BadgeDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub fn badge(chain: &str, contract: &str) -> BadgeDescriptor {
    BadgeDescriptor {
        chain: holdings_core::ChainRef::new(chain),
        contract: contract.to_string(),
        token_id: None,
        asset_id: None,
        name: None,
    }
}
