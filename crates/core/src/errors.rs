//! Error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ContractRef;

/// Failure of a single source read. Cloneable so it can live inside a
/// cached aggregate result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("contract call failed on {contract}: {message}")]
    Contract { contract: ContractRef, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("badge listing failed: {0}")]
    Listing(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("derived category {category} references unknown source {source_key}")]
    UnknownComponent { category: String, source_key: String },
}

/// Result type alias
pub type SourceResult<T> = Result<T, SourceError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
