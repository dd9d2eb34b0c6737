//! The `ProviderAdapter` trait: the uniform capability every external
//! enrichment or verification service implements, generalized from the
//! per-provider struct pattern this crate's stack originally used for LLM
//! providers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-provider cost, expressed in the platform's internal credit unit.
pub type Credits = f64;

/// Stable identifier for a provider, used as the rate-limiter and circuit
/// breaker key, the ledger's `provider` column, and the cascade order list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Icypeas,
    Dropcontact,
    Hunter,
    Apollo,
    SmtpProbe,
    Hlr,
    /// Not a real external provider: used on ledger rows for cache hits.
    CacheUserDuplicate,
    /// Not a real external provider: used on ledger rows for cache hits.
    CacheGlobal,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Icypeas => "icypeas",
            ProviderName::Dropcontact => "dropcontact",
            ProviderName::Hunter => "hunter",
            ProviderName::Apollo => "apollo",
            ProviderName::SmtpProbe => "smtp_probe",
            ProviderName::Hlr => "hlr",
            ProviderName::CacheUserDuplicate => "cache_user_duplicate",
            ProviderName::CacheGlobal => "cache_global",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a provider can discover. An enrichment provider typically reports
/// both; a verification-only adapter (SMTP probe, HLR) reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub email: bool,
    pub phone: bool,
}

impl ProviderCapabilities {
    pub const fn email_only() -> Self {
        Self { email: true, phone: false }
    }

    pub const fn phone_only() -> Self {
        Self { email: false, phone: true }
    }

    pub const fn both() -> Self {
        Self { email: true, phone: true }
    }
}

/// Token-bucket parameters a provider requires of the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub max_per_minute: u32,
    pub burst: u32,
}

/// A contact after normalization, the only shape `ProviderAdapter::lookup`
/// ever sees. Adapters translate this into their wire format and translate
/// their response back into a [`LookupOutcome`].
#[derive(Debug, Clone)]
pub struct NormalizedContact {
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub company_domain: Option<String>,
    pub profile_url: Option<String>,
    pub position: Option<String>,
    pub location: Option<String>,
    /// Already-discovered phone, set by the Coordinator before calling a
    /// verification-only adapter (e.g. HLR) that needs a number to check
    /// rather than a name/company shape to search from.
    pub known_phone: Option<String>,
}

/// A successful provider response, translated to the canonical shape.
/// `raw` retains the provider's original payload opaquely for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupOutcome {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub confidence: f64,
    pub provider: ProviderName,
    pub raw: serde_json::Value,
}

/// The closed failure taxonomy surfaced by adapters (spec §4.1/§7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderFailure {
    #[error("rate limited by {provider}")]
    RateLimited {
        provider: ProviderName,
        retry_after: Option<Duration>,
    },
    #[error("unauthorized for {provider}")]
    Unauthorized { provider: ProviderName },
    #[error("not found at {provider}")]
    NotFound { provider: ProviderName },
    #[error("transient network failure at {provider}: {message}")]
    TransientNetwork {
        provider: ProviderName,
        message: String,
    },
    #[error("invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: ProviderName,
        message: String,
    },
    #[error("quota exhausted at provider {provider}")]
    QuotaExhaustedAtProvider { provider: ProviderName },
}

impl ProviderFailure {
    pub fn provider(&self) -> ProviderName {
        match self {
            ProviderFailure::RateLimited { provider, .. }
            | ProviderFailure::Unauthorized { provider }
            | ProviderFailure::NotFound { provider }
            | ProviderFailure::TransientNetwork { provider, .. }
            | ProviderFailure::InvalidResponse { provider, .. }
            | ProviderFailure::QuotaExhaustedAtProvider { provider } => *provider,
        }
    }

    /// Retryable at the adapter/rate-limiter layer (spec §4.1): only
    /// `RateLimited` and `TransientNetwork`. Everything else propagates.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderFailure::RateLimited { .. } | ProviderFailure::TransientNetwork { .. }
        )
    }

    /// Whether this failure should trip the provider's circuit breaker.
    pub fn trips_circuit(&self) -> bool {
        matches!(
            self,
            ProviderFailure::TransientNetwork { .. } | ProviderFailure::Unauthorized { .. }
        )
    }
}

/// Single-contact enrichment against one external service.
///
/// Implementors must not retry internally: retry/backoff lives in the
/// Coordinator via [`crate::internals::retry::RetryExecutor`], kept at one
/// layer rather than duplicated per adapter. Adapters are responsible only
/// for enforcing their own per-call timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider identity, used for rate limiting, circuit breaking,
    /// cascade ordering, and ledger rows.
    fn name(&self) -> ProviderName;

    /// Static per-call cost in credits.
    fn cost(&self) -> Credits;

    /// What this provider can discover.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Token bucket parameters for this provider.
    fn rate_limit(&self) -> RateLimitSpec;

    /// Look up one contact. Implementors enforce their own call timeout.
    async fn lookup(
        &self,
        contact: &NormalizedContact,
    ) -> Result<LookupOutcome, ProviderFailure>;
}
