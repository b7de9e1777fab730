//! Badge-driven source discovery
//!
//! The set of badge contracts per chain is not known up front; it comes from
//! an upstream listing for the owner. A listing failure only degrades the
//! badge-backed sources: they are reported as blocked and every other source
//! is still aggregated.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use holdings_core::{
    retry, BadgeDescriptor, ChainRef, ContractRef, OwnerId, RetryObserver, RetryPolicy,
    SourceError, SourceKey, SourceResult,
};

use crate::source::{BalanceReader, Source};

/// Lists the badges held by an owner
#[async_trait]
pub trait BadgeLister: Send + Sync {
    async fn list_badges(&self, owner: &OwnerId) -> SourceResult<Vec<BadgeDescriptor>>;
}

/// A per-chain source whose contracts come from the listing
#[derive(Clone)]
pub struct BadgeChain {
    pub key: SourceKey,
    pub chain: ChainRef,
    pub reader: Arc<dyn BalanceReader>,
}

impl BadgeChain {
    pub fn new(key: impl Into<SourceKey>, chain: impl AsRef<str>, reader: Arc<dyn BalanceReader>) -> Self {
        Self {
            key: key.into(),
            chain: ChainRef::new(chain),
            reader,
        }
    }
}

/// Outcome of a discovery pass
#[derive(Debug, Clone)]
pub struct Discovery {
    pub sources: Vec<Source>,
    pub badges: Vec<BadgeDescriptor>,
    pub error: Option<SourceError>,
}

/// Group badge contracts per chain, deduplicated, in first-seen order
pub fn contracts_by_chain(badges: &[BadgeDescriptor]) -> BTreeMap<ChainRef, Vec<ContractRef>> {
    let mut grouped: BTreeMap<ChainRef, Vec<ContractRef>> = BTreeMap::new();
    for badge in badges {
        let contract = badge.contract_ref();
        let entry = grouped.entry(contract.chain.clone()).or_default();
        if !entry.contains(&contract) {
            entry.push(contract);
        }
    }
    grouped
}

/// List the owner's badges and build one source per configured chain
pub async fn discover_sources(
    lister: &dyn BadgeLister,
    owner: &OwnerId,
    chains: &[BadgeChain],
    policy: &RetryPolicy,
    observer: &dyn RetryObserver,
) -> Discovery {
    if chains.is_empty() {
        return Discovery {
            sources: vec![],
            badges: vec![],
            error: None,
        };
    }

    let label = format!("badges/{}", owner);
    match retry(policy, &label, observer, |_| lister.list_badges(owner)).await {
        Ok(badges) => {
            let mut grouped = contracts_by_chain(&badges);
            let sources = chains
                .iter()
                .map(|chain| {
                    let contracts = grouped.remove(&chain.chain).unwrap_or_default();
                    debug!("{} badge contracts on {} for {}", contracts.len(), chain.chain, owner);
                    Source::new(chain.key.clone(), chain.reader.clone()).with_contracts(contracts)
                })
                .collect();

            Discovery {
                sources,
                badges,
                error: None,
            }
        }
        Err(e) => {
            warn!("Badge listing failed for {}: {}", owner, e);
            let sources = chains
                .iter()
                .map(|chain| Source::new(chain.key.clone(), chain.reader.clone()).blocked_by(e.clone()))
                .collect();

            Discovery {
                sources,
                badges: vec![],
                error: Some(e),
            }
        }
    }
}
