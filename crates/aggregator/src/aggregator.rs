//! Balance aggregator - fans out lookups and merges the settled outcomes

use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use holdings_core::{
    retry, Clock, HoldingsConfig, OwnerId, Quantity, RetryObserver, RetryPolicy, SourceError,
    SystemClock, TracingObserver,
};

use crate::result::{AggregateResult, TaskOutcome};
use crate::source::{Source, SourceSet};
use crate::state::{CacheKey, CacheLookup, ResultCache};

/// Aggregator configuration
#[derive(Debug, Clone, Default)]
pub struct AggregatorConfig {
    pub retry: RetryPolicy,
}

impl From<&HoldingsConfig> for AggregatorConfig {
    fn from(config: &HoldingsConfig) -> Self {
        Self {
            retry: config.retry.clone(),
        }
    }
}

/// Aggregates one owner's balances across a [`SourceSet`].
///
/// The result cache and clock are injected so several aggregators (or tests)
/// can share or isolate them.
pub struct BalanceAggregator {
    config: AggregatorConfig,
    cache: Arc<ResultCache>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn RetryObserver>,
    last_request: RwLock<Option<(OwnerId, SourceSet)>>,
}

impl BalanceAggregator {
    pub fn new(config: AggregatorConfig, cache: Arc<ResultCache>) -> Self {
        Self {
            config,
            cache,
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
            last_request: RwLock::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Get shared cache reference
    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    pub fn observer(&self) -> &dyn RetryObserver {
        self.observer.as_ref()
    }

    /// Upper bound on the time one source can spend in backoff
    pub fn latency_budget(&self) -> Duration {
        self.config.retry.worst_case_delay()
    }

    /// Aggregate `owner`'s balances. Never fails: per-source failures are
    /// reported in the result's `errors` map.
    pub async fn aggregate(&self, owner: Option<&OwnerId>, sources: &SourceSet) -> AggregateResult {
        let Some(owner) = owner else {
            *self.last_request.write() = None;
            return AggregateResult::empty_for(sources);
        };
        *self.last_request.write() = Some((owner.clone(), sources.clone()));

        if sources.is_empty() {
            return AggregateResult::default();
        }

        let key = CacheKey::new(owner, sources.fingerprint());
        if let CacheLookup::Fresh(result) = self.cache.lookup(&key, self.clock.now_ms()) {
            debug!("Serving cached balances for {}", owner);
            return result;
        }

        let result = self.collect(owner, sources).await;
        if result.is_degraded() {
            warn!(
                "Balances for {} degraded: {} of {} sources failed",
                owner,
                result.failed_sources().len(),
                result.errors.len()
            );
        }

        self.cache.insert(key, result.clone(), self.clock.now_ms());
        result
    }

    /// Invalidate the most recent owner's cache entries and aggregate again
    pub async fn refetch(&self) -> Option<AggregateResult> {
        let (owner, sources) = self.last_request.read().clone()?;
        Some(self.refetch_for(&owner, &sources).await)
    }

    pub async fn refetch_for(&self, owner: &OwnerId, sources: &SourceSet) -> AggregateResult {
        let dropped = self.cache.invalidate_owner(owner);
        info!("Refetching balances for {} ({} cached entries dropped)", owner, dropped);
        self.aggregate(Some(owner), sources).await
    }

    /// Cached result for `owner`, fresh or stale, without touching the network
    pub fn peek(&self, owner: &OwnerId, sources: &SourceSet) -> CacheLookup {
        let key = CacheKey::new(owner, sources.fingerprint());
        self.cache.lookup(&key, self.clock.now_ms())
    }

    async fn collect(&self, owner: &OwnerId, sources: &SourceSet) -> AggregateResult {
        debug!("Aggregating {} sources for {}", sources.sources().len(), owner);

        let tasks = sources.sources().iter().map(|source| self.run_task(owner, source));
        let outcomes = join_all(tasks).await;

        AggregateResult::merge(sources, outcomes)
    }

    /// One lookup task: every contract read concurrently, each with its own
    /// retry budget. Succeeds if any read succeeds.
    async fn run_task(&self, owner: &OwnerId, source: &Source) -> TaskOutcome {
        let key = source.key().clone();

        if let Some(error) = source.blocked() {
            debug!("Source {} blocked: {}", key, error);
            return TaskOutcome::failed(key, error.clone());
        }
        if source.contracts().is_empty() {
            debug!("Source {} has no contracts, skipping", key);
            return TaskOutcome::skipped(key);
        }

        let reads = source.contracts().iter().map(|contract| {
            let label = format!("{}/{}", key, contract);
            async move {
                retry(&self.config.retry, &label, self.observer.as_ref(), |_| {
                    source.reader().read_quantity(contract, owner)
                })
                .await
            }
        });

        // join_all keeps issue order, so the first error below is the first issued
        let mut total: Option<Quantity> = None;
        let mut first_error: Option<SourceError> = None;
        for read in join_all(reads).await {
            match read {
                Ok(value) => total = Some(total.unwrap_or_default().saturating_add(value)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match (total, first_error) {
            (Some(value), _) => TaskOutcome::resolved(key, value),
            (None, Some(error)) => TaskOutcome::failed(key, error),
            (None, None) => TaskOutcome::skipped(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BalanceReader, DerivedCategory};
    use crate::testing::{fail, q, ScriptedReader};
    use holdings_core::{ContractRef, ManualClock, RecordingObserver, SourceKey};
    use tokio::time::Instant;

    struct Harness {
        aggregator: BalanceAggregator,
        clock: Arc<ManualClock>,
        observer: Arc<RecordingObserver>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let observer = Arc::new(RecordingObserver::new());
        let aggregator = BalanceAggregator::new(AggregatorConfig::default(), Arc::new(ResultCache::default()))
            .with_clock(clock.clone())
            .with_observer(observer.clone());
        Harness { aggregator, clock, observer }
    }

    fn contract(address: &str) -> ContractRef {
        ContractRef::new("ethereum", address)
    }

    fn keys(names: &[&str]) -> Vec<SourceKey> {
        names.iter().map(|n| SourceKey::new(*n)).collect()
    }

    /// A=10, B always fails, C=5
    fn abc(reader: Arc<ScriptedReader>) -> SourceSet {
        let reader: Arc<dyn BalanceReader> = reader;
        SourceSet::builder()
            .source(Source::new("A", reader.clone()).with_contract(contract("0xa")))
            .source(Source::new("B", reader.clone()).with_contract(contract("0xb")))
            .source(Source::new("C", reader).with_contract(contract("0xc")))
            .derived(DerivedCategory::total("total", keys(&["A", "B", "C"])))
            .build()
            .unwrap()
    }

    fn abc_reader() -> Arc<ScriptedReader> {
        Arc::new(
            ScriptedReader::new()
                .always("0xa", q(10))
                .always("0xb", fail("rpc down"))
                .always("0xc", q(5)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_end_to_end() {
        let h = harness();
        let reader = abc_reader();
        let sources = abc(reader.clone());
        let start = Instant::now();

        let result = h.aggregator.aggregate(Some(&OwnerId::new("0xO")), &sources).await;

        assert_eq!(result.value("A"), Some(Quantity::from(10u64)));
        assert_eq!(result.value("B"), None);
        assert_eq!(result.value("C"), Some(Quantity::from(5u64)));
        assert_eq!(result.total("total"), Some(Quantity::from(15u64)));
        assert_eq!(result.error("B"), Some(&SourceError::Transport("rpc down".into())));
        assert!(result.error("A").is_none() && result.error("C").is_none());
        assert_eq!(result.failed_sources().len(), 1);
        assert!(result.is_degraded());

        // B retried three times, others once
        assert_eq!(reader.calls(), 5);
        assert_eq!(h.observer.failures_for("B/ethereum:0xb"), 3);
        // siblings ran in parallel with B's backoff
        assert!(start.elapsed() <= h.aggregator.latency_budget());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sources_back_off_concurrently() {
        let h = harness();
        let reader = Arc::new(
            ScriptedReader::new()
                .always("0xa", fail("down"))
                .always("0xb", fail("down")),
        );
        let sources = SourceSet::builder()
            .source(Source::new("A", reader.clone()).with_contract(contract("0xa")))
            .source(Source::new("B", reader.clone()).with_contract(contract("0xb")))
            .build()
            .unwrap();
        let start = Instant::now();

        let result = h.aggregator.aggregate(Some(&OwnerId::new("0xO")), &sources).await;

        // one source's backoff budget, not two
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(result.failed_sources().len(), 2);
        assert_eq!(reader.calls(), 6);
    }

    #[tokio::test]
    async fn test_missing_owner_short_circuits() {
        let h = harness();
        let reader = abc_reader();
        let sources = abc(reader.clone());

        let result = h.aggregator.aggregate(None, &sources).await;

        assert_eq!(reader.calls(), 0);
        assert_eq!(result, AggregateResult::empty_for(&sources));
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.values().all(|e| e.is_none()));
        assert!(h.aggregator.refetch().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_sources_is_default() {
        let h = harness();
        let result = h
            .aggregator
            .aggregate(Some(&OwnerId::new("0xO")), &SourceSet::default())
            .await;

        assert_eq!(result, AggregateResult::default());
        assert!(h.observer.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_within_first_two_delays() {
        let h = harness();
        let reader = Arc::new(ScriptedReader::new().script(
            "0xa",
            vec![fail("timeout"), fail("timeout"), q(42)],
        ));
        let sources = SourceSet::builder()
            .source(Source::new("A", reader.clone()).with_contract(contract("0xa")))
            .build()
            .unwrap();
        let start = Instant::now();

        let result = h.aggregator.aggregate(Some(&OwnerId::new("0xO")), &sources).await;

        assert_eq!(result.value("A"), Some(Quantity::from(42u64)));
        assert!(result.error("A").is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(reader.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_contract_source_sums_successes() {
        let h = harness();
        let reader = Arc::new(
            ScriptedReader::new()
                .always("0x1", q(3))
                .always("0x2", fail("reverted"))
                .always("0x3", q(4)),
        );
        let sources = SourceSet::builder()
            .source(
                Source::new("badges", reader)
                    .with_contracts([contract("0x1"), contract("0x2"), contract("0x3")]),
            )
            .build()
            .unwrap();

        let result = h.aggregator.aggregate(Some(&OwnerId::new("0xO")), &sources).await;

        assert_eq!(result.value("badges"), Some(Quantity::from(7u64)));
        assert!(result.error("badges").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_contract_failure_reports_first_issued_error() {
        let h = harness();
        let reader = Arc::new(
            ScriptedReader::new()
                .always("0x1", fail("first"))
                .always("0x2", fail("second")),
        );
        let sources = SourceSet::builder()
            .source(Source::new("badges", reader).with_contracts([contract("0x1"), contract("0x2")]))
            .build()
            .unwrap();

        let result = h.aggregator.aggregate(Some(&OwnerId::new("0xO")), &sources).await;

        assert_eq!(result.error("badges"), Some(&SourceError::Transport("first".into())));
        assert_eq!(result.value("badges"), None);
    }

    #[tokio::test]
    async fn test_blocked_and_empty_sources_keep_error_entries() {
        let h = harness();
        let reader: Arc<dyn BalanceReader> = Arc::new(ScriptedReader::new());
        let listing_error = SourceError::Listing("badge api down".into());
        let sources = SourceSet::builder()
            .source(Source::new("blocked", reader.clone()).blocked_by(listing_error.clone()))
            .source(Source::new("empty", reader))
            .build()
            .unwrap();

        let result = h.aggregator.aggregate(Some(&OwnerId::new("0xO")), &sources).await;

        assert_eq!(result.error("blocked"), Some(&listing_error));
        assert_eq!(result.errors.get(&SourceKey::new("empty")), Some(&None));
        assert_eq!(result.values.get(&SourceKey::new("empty")), Some(&None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_policy_preserves_unknown() {
        let h = harness();
        let reader = abc_reader();
        let reader_dyn: Arc<dyn BalanceReader> = reader;
        let sources = SourceSet::builder()
            .source(Source::new("A", reader_dyn.clone()).with_contract(contract("0xa")))
            .source(Source::new("B", reader_dyn).with_contract(contract("0xb")))
            .derived(DerivedCategory::new(
                "combined",
                keys(&["A", "B"]),
                holdings_core::MissingPolicy::Absent,
            ))
            .build()
            .unwrap();

        let result = h.aggregator.aggregate(Some(&OwnerId::new("0xO")), &sources).await;

        assert_eq!(result.totals.get("combined"), Some(&None));
    }

    #[tokio::test]
    async fn test_fresh_cache_short_circuits_network() {
        let h = harness();
        let reader = Arc::new(ScriptedReader::new().always("0xa", q(1)));
        let sources = SourceSet::builder()
            .source(Source::new("A", reader.clone()).with_contract(contract("0xa")))
            .build()
            .unwrap();
        let owner = OwnerId::new("0xO");

        h.aggregator.aggregate(Some(&owner), &sources).await;
        h.clock.advance(Duration::from_secs(299));
        h.aggregator.aggregate(Some(&owner), &sources).await;
        assert_eq!(reader.calls(), 1);

        // stale: re-aggregates on access
        h.clock.advance(Duration::from_secs(2));
        h.aggregator.aggregate(Some(&owner), &sources).await;
        assert_eq!(reader.calls(), 2);

        // explicit refetch bypasses a fresh entry
        h.aggregator.refetch().await.unwrap();
        assert_eq!(reader.calls(), 3);
    }

    #[tokio::test]
    async fn test_different_contract_sets_do_not_share_cache() {
        let h = harness();
        let reader = Arc::new(ScriptedReader::new().always("0x1", q(1)).always("0x2", q(2)));
        let one = SourceSet::builder()
            .source(Source::new("badges", reader.clone()).with_contract(contract("0x1")))
            .build()
            .unwrap();
        let two = SourceSet::builder()
            .source(
                Source::new("badges", reader.clone())
                    .with_contracts([contract("0x1"), contract("0x2")]),
            )
            .build()
            .unwrap();
        let owner = OwnerId::new("0xO");

        let first = h.aggregator.aggregate(Some(&owner), &one).await;
        let second = h.aggregator.aggregate(Some(&owner), &two).await;

        assert_eq!(first.value("badges"), Some(Quantity::from(1u64)));
        assert_eq!(second.value("badges"), Some(Quantity::from(3u64)));
        assert_eq!(reader.calls(), 3);
    }
}
