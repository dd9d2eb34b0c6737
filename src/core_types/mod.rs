//! Core domain types for the enrichment cascade engine.
//!
//! ## Organization
//! - `domain` — persisted entities (Job, Contact, ledger, cache) from the
//!   data model.
//! - `provider` — the `ProviderAdapter` trait and its supporting types.
//! - `normalize` — input normalization and fingerprint hashing.

pub mod domain;
pub mod normalize;
pub mod provider;

/// Result type alias used throughout the core types module.
pub type Result<T> = std::result::Result<T, crate::error::EngineError>;
