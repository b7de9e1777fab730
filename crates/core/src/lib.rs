//! Core types and utilities for the holdings aggregator
//!
//! This crate provides shared types used across all components:
//! - Owner, source, contract and asset identifiers
//! - The retry/backoff primitive and its observer hook
//! - Clocks for TTL bookkeeping
//! - Configuration and error types

pub mod types;
pub mod retry;
pub mod clock;
pub mod config;
pub mod errors;

pub use types::*;
pub use retry::*;
pub use clock::*;
pub use config::*;
pub use errors::*;
