//! Builds aggregator and asset-cache components from `HoldingsConfig`

use anyhow::{Context, Result};
use std::sync::Arc;

use holdings_aggregator::{
    discover_sources, AggregatorConfig, BadgeChain, BalanceAggregator, BalanceReader,
    DerivedCategory, HttpBadgeLister, HttpBalanceReader, ResultCache, Source, SourceSet,
};
use holdings_asset_cache::{
    AssetCache, AssetResolver, HandleRegistry, HttpFetcher, HttpMetadataSource,
};
use holdings_core::{HoldingsConfig, OwnerId, SourceKey};

pub fn http_client(config: &HoldingsConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.request_timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build().context("building HTTP client")
}

/// Sources with a fixed contract list
pub fn configured_sources(config: &HoldingsConfig, client: &reqwest::Client) -> Vec<Source> {
    config
        .sources
        .iter()
        .map(|s| {
            let reader: Arc<dyn BalanceReader> = Arc::new(HttpBalanceReader::new(client.clone(), &s.endpoint));
            Source::new(s.key.as_str(), reader).with_contracts(s.contract_refs())
        })
        .collect()
}

pub fn badge_chains(config: &HoldingsConfig, client: &reqwest::Client) -> Vec<BadgeChain> {
    config
        .badge_chains
        .iter()
        .map(|b| {
            let reader: Arc<dyn BalanceReader> = Arc::new(HttpBalanceReader::new(client.clone(), &b.endpoint));
            BadgeChain::new(b.key.as_str(), &b.chain, reader)
        })
        .collect()
}

pub fn derived_categories(config: &HoldingsConfig) -> Vec<DerivedCategory> {
    config
        .totals
        .iter()
        .map(|t| {
            DerivedCategory::new(
                t.name.as_str(),
                t.components.iter().map(|c| SourceKey::new(c.as_str())),
                t.policy,
            )
        })
        .collect()
}

pub fn aggregator(config: &HoldingsConfig) -> BalanceAggregator {
    let cache = Arc::new(ResultCache::from_settings(&config.result_cache));
    BalanceAggregator::new(AggregatorConfig::from(config), cache)
}

/// Full source set for `owner`, discovering badge contracts when configured
pub async fn source_set_for(
    config: &HoldingsConfig,
    client: &reqwest::Client,
    aggregator: &BalanceAggregator,
    owner: &OwnerId,
) -> Result<SourceSet> {
    let mut sources = configured_sources(config, client);

    let chains = badge_chains(config, client);
    if let Some(url) = config.badge_listing_url.as_deref() {
        let lister = HttpBadgeLister::new(client.clone(), url);
        let discovery = discover_sources(
            &lister,
            owner,
            &chains,
            aggregator.retry_policy(),
            aggregator.observer(),
        )
        .await;
        sources.extend(discovery.sources);
    }

    let set = SourceSet::builder()
        .sources(sources)
        .derived_all(derived_categories(config))
        .build()?;
    Ok(set)
}

pub fn asset_resolver(config: &HoldingsConfig, client: &reqwest::Client) -> Result<AssetResolver> {
    let metadata_url = config
        .asset_cache
        .metadata_url
        .as_deref()
        .context("asset_cache.metadata_url is not configured")?;

    let cache = AssetCache::from_settings(&config.asset_cache, Arc::new(HttpFetcher::new(client.clone())))
        .with_context(|| format!("opening {}", config.asset_cache.database_path.display()))?;
    let metadata = Arc::new(HttpMetadataSource::new(client.clone(), metadata_url));

    Ok(AssetResolver::new(Arc::new(cache), metadata, HandleRegistry::new()))
}
