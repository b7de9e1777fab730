//! Balance aggregator - fans out to many unreliable sources
//!
//! Features:
//! - Concurrent lookups per source, join-all (never fail-fast)
//! - Bounded retry with backoff per underlying read
//! - Deterministic merge with per-source error map
//! - Derived totals with explicit zero/absent policy
//! - Short-TTL result cache keyed by owner and source fingerprint
//! - Badge-driven source discovery

pub mod aggregator;
pub mod badges;
pub mod http;
pub mod result;
pub mod source;
pub mod state;
pub mod view;

#[cfg(test)]
mod testing;

pub use aggregator::{AggregatorConfig, BalanceAggregator};
pub use badges::{contracts_by_chain, discover_sources, BadgeChain, BadgeLister, Discovery};
pub use http::{HttpBadgeLister, HttpBalanceReader};
pub use result::{AggregateResult, TaskOutcome};
pub use source::{BalanceReader, DerivedCategory, Source, SourceSet, SourceSetBuilder};
pub use state::{CacheKey, CacheLookup, ResultCache};
pub use view::{BalanceSnapshot, BalanceView};
