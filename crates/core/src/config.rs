//! Configuration types
//!
//! Loaded from an optional TOML file, then overridden by `HOLDINGS__*`
//! environment variables (`HOLDINGS__RESULT_CACHE__FRESH_FOR_SECS=60`).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Backoff, ConfigError, ConfigResult, ContractRef, MissingPolicy, RetryPolicy};

/// Short-TTL aggregation cache windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCacheSettings {
    pub fresh_for_secs: u64,
    pub evict_after_secs: u64,
}

impl Default for ResultCacheSettings {
    fn default() -> Self {
        Self {
            fresh_for_secs: 300,   // 5 minutes
            evict_after_secs: 600, // 10 minutes
        }
    }
}

impl ResultCacheSettings {
    pub fn fresh_for(&self) -> Duration {
        Duration::from_secs(self.fresh_for_secs)
    }

    pub fn evict_after(&self) -> Duration {
        Duration::from_secs(self.evict_after_secs)
    }
}

/// Local badge asset cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetCacheSettings {
    pub database_path: PathBuf,
    pub cache_duration_secs: u64,
    pub metadata_url: Option<String>,
}

impl Default for AssetCacheSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("holdings-assets.db"),
            cache_duration_secs: 24 * 60 * 60,
            metadata_url: None,
        }
    }
}

impl AssetCacheSettings {
    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSettings {
    pub chain: String,
    pub address: String,
}

/// A statically configured source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub key: String,
    pub endpoint: String,
    #[serde(default)]
    pub contracts: Vec<ContractSettings>,
}

impl SourceSettings {
    pub fn contract_refs(&self) -> Vec<ContractRef> {
        self.contracts
            .iter()
            .map(|c| ContractRef::new(&c.chain, &c.address))
            .collect()
    }
}

/// A per-chain source whose contracts come from the badge listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeChainSettings {
    pub key: String,
    pub chain: String,
    pub endpoint: String,
}

/// A derived total over source keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalSettings {
    pub name: String,
    pub components: Vec<String>,
    #[serde(default = "default_total_policy")]
    pub policy: MissingPolicy,
}

fn default_total_policy() -> MissingPolicy {
    MissingPolicy::ZeroDefault
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldingsConfig {
    pub retry: RetryPolicy,
    pub result_cache: ResultCacheSettings,
    pub asset_cache: AssetCacheSettings,
    pub request_timeout_ms: Option<u64>,
    pub badge_listing_url: Option<String>,
    pub sources: Vec<SourceSettings>,
    pub badge_chains: Vec<BadgeChainSettings>,
    pub totals: Vec<TotalSettings>,
}

impl HoldingsConfig {
    /// Load from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HOLDINGS")
                .prefix_separator("__")
                .separator("__"),
        );

        let cfg: HoldingsConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML text without touching the environment
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let cfg: HoldingsConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if let Backoff::Fixed { delays_ms } = &self.retry.backoff {
            if delays_ms.is_empty() && self.retry.max_attempts > 1 {
                return Err(ConfigError::Invalid(
                    "fixed backoff needs at least one delay when retrying".into(),
                ));
            }
        }
        if self.result_cache.evict_after_secs < self.result_cache.fresh_for_secs {
            return Err(ConfigError::Invalid(
                "result_cache.evict_after_secs must be >= fresh_for_secs".into(),
            ));
        }

        let mut keys = HashSet::new();
        let source_keys = self
            .sources
            .iter()
            .map(|s| &s.key)
            .chain(self.badge_chains.iter().map(|b| &b.key));
        for key in source_keys {
            if !keys.insert(key.as_str()) {
                return Err(ConfigError::DuplicateKey(key.clone()));
            }
        }

        let mut names = HashSet::new();
        for total in &self.totals {
            if keys.contains(total.name.as_str()) || !names.insert(total.name.as_str()) {
                return Err(ConfigError::DuplicateKey(total.name.clone()));
            }
            for component in &total.components {
                if !keys.contains(component.as_str()) {
                    return Err(ConfigError::UnknownComponent {
                        category: total.name.clone(),
                        source_key: component.clone(),
                    });
                }
            }
        }

        if !self.badge_chains.is_empty() && self.badge_listing_url.is_none() {
            return Err(ConfigError::Invalid(
                "badge_chains configured without badge_listing_url".into(),
            ));
        }

        Ok(())
    }
}
