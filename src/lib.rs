//! # captely-cascade
//!
//! Enrichment Cascade Engine: given a sparsely-populated business contact,
//! discovers and verifies an email and phone number by consulting a
//! cost-ordered cascade of external data providers, enforcing per-user
//! credit quotas atomically with consumption, and caching results across
//! users.
//!
//! ## Key Features
//!
//! - **Cost-ordered cascade**: walks providers cheapest-first with
//!   confidence-based short-circuiting.
//! - **Two-layer cache**: per-user dedup history plus a global fingerprint
//!   cache shared across users.
//! - **Atomic credit ledger**: balance/daily/monthly/per-provider quotas
//!   enforced inside a single serialized transaction.
//! - **Verification pipeline**: escalating email checks (syntax, DNS, MX,
//!   optional SMTP) and phone classification.
//! - **Resilience**: per-provider rate limiting, retry/backoff, and circuit
//!   breakers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use captely_cascade::{EngineConfig, Engine};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let engine = Engine::new(config).await?;
//! // engine.submit_job(...) / engine.get_job(...) / engine.cancel_job(...)
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_errors_doc)]

// =============================================================================
// Module declarations
// =============================================================================

pub mod cache;
pub mod cascade;
pub mod config;
pub mod core_types;
pub mod engine;
pub mod error;
pub mod events;
pub mod job_manager;
pub mod ledger;
pub mod persistence;
pub mod providers;
pub mod scoring;

pub mod internals;
pub(crate) mod logging;

// =============================================================================
// Public API re-exports
// =============================================================================

pub use cache::CacheStore;
pub use cascade::{CascadeCoordinator, CascadeOutcome};
pub use config::{CascadeConfig, EngineConfig, ProviderSettings, QuotaConfig, VerificationConfig};
pub use core_types::domain::{
    CacheEntry, Contact, CreditBalance, CreditLedgerEntry, EmailReliability, EnrichmentStatus,
    Job, JobOrigin, JobState, LeadScore, LedgerOperation, PhoneType, ProviderResult, QuotaState,
    UserContactHistory,
};
pub use core_types::provider::{
    Credits, LookupOutcome, ProviderAdapter, ProviderCapabilities, ProviderFailure, ProviderName,
    RateLimitSpec,
};
pub use engine::{Engine, EngineApi};
pub use error::{EngineError, EngineResult, FailureReason};
pub use events::{EngineEvent, EventBus};
pub use job_manager::JobManager;
pub use ledger::CreditLedger;

// Retry policy and circuit breaker (from internals, re-exported for public use)
pub use internals::retry::{CircuitBreaker, CircuitState, RetryPolicy};
