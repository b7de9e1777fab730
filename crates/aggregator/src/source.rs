//! Sources, derived categories and source sets

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use holdings_core::{
    ConfigError, ConfigResult, ContractRef, MissingPolicy, OwnerId, Quantity, SourceError,
    SourceKey, SourceResult,
};

/// Reads one quantity for an owner from one contract. Must be idempotent,
/// since failed reads are retried.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn read_quantity(&self, contract: &ContractRef, owner: &OwnerId) -> SourceResult<Quantity>;
}

/// One independent origin of a quantity, backed by one or more contracts
#[derive(Clone)]
pub struct Source {
    key: SourceKey,
    contracts: Vec<ContractRef>,
    reader: Arc<dyn BalanceReader>,
    blocked: Option<SourceError>,
}

impl Source {
    pub fn new(key: impl Into<SourceKey>, reader: Arc<dyn BalanceReader>) -> Self {
        Self {
            key: key.into(),
            contracts: vec![],
            reader,
            blocked: None,
        }
    }

    pub fn with_contract(mut self, contract: ContractRef) -> Self {
        if !self.contracts.contains(&contract) {
            self.contracts.push(contract);
        }
        self
    }

    pub fn with_contracts(self, contracts: impl IntoIterator<Item = ContractRef>) -> Self {
        contracts.into_iter().fold(self, |source, c| source.with_contract(c))
    }

    /// Mark the source as not attemptable; `error` is reported for its key
    pub fn blocked_by(mut self, error: SourceError) -> Self {
        self.blocked = Some(error);
        self
    }

    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Contracts in issue order
    pub fn contracts(&self) -> &[ContractRef] {
        &self.contracts
    }

    pub fn reader(&self) -> &dyn BalanceReader {
        self.reader.as_ref()
    }

    pub fn blocked(&self) -> Option<&SourceError> {
        self.blocked.as_ref()
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("key", &self.key)
            .field("contracts", &self.contracts)
            .field("blocked", &self.blocked)
            .finish()
    }
}

/// A category computed from a fixed set of source keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedCategory {
    pub name: String,
    pub components: Vec<SourceKey>,
    pub policy: MissingPolicy,
}

impl DerivedCategory {
    pub fn new(
        name: impl Into<String>,
        components: impl IntoIterator<Item = SourceKey>,
        policy: MissingPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            components: components.into_iter().collect(),
            policy,
        }
    }

    /// Explicit total: missing summands count as zero
    pub fn total(name: impl Into<String>, components: impl IntoIterator<Item = SourceKey>) -> Self {
        Self::new(name, components, MissingPolicy::ZeroDefault)
    }

    pub fn evaluate(&self, values: &BTreeMap<SourceKey, Option<Quantity>>) -> Option<Quantity> {
        let mut sum = Quantity::ZERO;
        for component in &self.components {
            match values.get(component).copied().flatten() {
                Some(value) => sum = sum.saturating_add(value),
                None if self.policy == MissingPolicy::Absent => return None,
                None => {}
            }
        }
        Some(sum)
    }
}

/// The sources and derived categories of one aggregation
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    sources: Vec<Source>,
    derived: Vec<DerivedCategory>,
    fingerprint: String,
}

impl SourceSet {
    pub fn builder() -> SourceSetBuilder {
        SourceSetBuilder::default()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn derived(&self) -> &[DerivedCategory] {
        &self.derived
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Digest of every source key, its contract set and every derived
    /// category. Two sets with the same keys but different discovered
    /// contracts produce different fingerprints.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn compute_fingerprint(sources: &[Source], derived: &[DerivedCategory]) -> String {
        let mut lines: Vec<String> = sources
            .iter()
            .map(|s| {
                let mut contracts: Vec<String> = s.contracts.iter().map(|c| c.to_string()).collect();
                contracts.sort();
                let state = if s.blocked.is_some() { "blocked" } else { "open" };
                format!("source|{}|{}|{}", s.key, state, contracts.join(","))
            })
            .collect();
        lines.extend(derived.iter().map(|d| {
            let components: Vec<&str> = d.components.iter().map(|c| c.as_str()).collect();
            format!("derived|{}|{}|{}", d.name, d.policy.name(), components.join(","))
        }));
        lines.sort();

        let mut hasher = Sha256::new();
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Default)]
pub struct SourceSetBuilder {
    sources: Vec<Source>,
    derived: Vec<DerivedCategory>,
}

impl SourceSetBuilder {
    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Source>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn derived(mut self, category: DerivedCategory) -> Self {
        self.derived.push(category);
        self
    }

    pub fn derived_all(mut self, categories: impl IntoIterator<Item = DerivedCategory>) -> Self {
        self.derived.extend(categories);
        self
    }

    pub fn build(self) -> ConfigResult<SourceSet> {
        let mut keys = HashSet::new();
        for source in &self.sources {
            if !keys.insert(source.key.as_str()) {
                return Err(ConfigError::DuplicateKey(source.key.to_string()));
            }
        }

        let mut names = HashSet::new();
        for category in &self.derived {
            if keys.contains(category.name.as_str()) || !names.insert(category.name.as_str()) {
                return Err(ConfigError::DuplicateKey(category.name.clone()));
            }
            if let Some(unknown) = category.components.iter().find(|c| !keys.contains(c.as_str())) {
                return Err(ConfigError::UnknownComponent {
                    category: category.name.clone(),
                    source_key: unknown.to_string(),
                });
            }
        }

        let fingerprint = SourceSet::compute_fingerprint(&self.sources, &self.derived);
        Ok(SourceSet {
            sources: self.sources,
            derived: self.derived,
            fingerprint,
        })
    }
}
