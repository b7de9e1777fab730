//! Aggregate results and the deterministic merge

use serde::Serialize;
use std::collections::BTreeMap;

use holdings_core::{Quantity, SourceError, SourceKey};

use crate::source::SourceSet;

/// Settled outcome of one lookup task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub key: SourceKey,
    pub value: Option<Quantity>,
    pub error: Option<SourceError>,
}

impl TaskOutcome {
    pub fn resolved(key: SourceKey, value: Quantity) -> Self {
        Self { key, value: Some(value), error: None }
    }

    pub fn failed(key: SourceKey, error: SourceError) -> Self {
        Self { key, value: None, error: Some(error) }
    }

    /// Never attempted and nothing to report
    pub fn skipped(key: SourceKey) -> Self {
        Self { key, value: None, error: None }
    }
}

/// Composite balance over all sources of a [`SourceSet`].
///
/// Every declared source key has an entry in both `values` and `errors`;
/// `None` means absent in either map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    pub values: BTreeMap<SourceKey, Option<Quantity>>,
    pub totals: BTreeMap<String, Option<Quantity>>,
    pub errors: BTreeMap<SourceKey, Option<SourceError>>,
}

impl AggregateResult {
    /// All keys declared, nothing known, nothing failed
    pub fn empty_for(sources: &SourceSet) -> Self {
        Self {
            values: sources.sources().iter().map(|s| (s.key().clone(), None)).collect(),
            totals: sources.derived().iter().map(|d| (d.name.clone(), None)).collect(),
            errors: sources.sources().iter().map(|s| (s.key().clone(), None)).collect(),
        }
    }

    pub fn merge(sources: &SourceSet, outcomes: Vec<TaskOutcome>) -> Self {
        let mut result = Self::empty_for(sources);
        for outcome in outcomes {
            result.values.insert(outcome.key.clone(), outcome.value);
            result.errors.insert(outcome.key, outcome.error);
        }
        for category in sources.derived() {
            result
                .totals
                .insert(category.name.clone(), category.evaluate(&result.values));
        }
        result
    }

    pub fn value(&self, key: &str) -> Option<Quantity> {
        self.values.get(&SourceKey::new(key)).copied().flatten()
    }

    pub fn total(&self, name: &str) -> Option<Quantity> {
        self.totals.get(name).copied().flatten()
    }

    /// Look a category up among source values, then derived totals
    pub fn get(&self, name: &str) -> Option<Quantity> {
        self.value(name).or_else(|| self.total(name))
    }

    pub fn error(&self, key: &str) -> Option<&SourceError> {
        self.errors.get(&SourceKey::new(key)).and_then(|e| e.as_ref())
    }

    pub fn failed_sources(&self) -> Vec<&SourceKey> {
        self.errors
            .iter()
            .filter_map(|(key, error)| error.as_ref().map(|_| key))
            .collect()
    }

    /// Some, but not all, sources failed
    pub fn is_degraded(&self) -> bool {
        let failed = self.failed_sources().len();
        failed > 0 && failed < self.errors.len()
    }
}
