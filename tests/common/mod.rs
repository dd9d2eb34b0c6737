//! Shared fixtures and a hand-written stub provider adapter for the
//! integration test suite.
//!
//! These tests link against `captely_cascade` compiled without
//! `cfg(test)`, so the crate's `mockall`-generated `MockProviderAdapter`
//! (only built for the crate's own unit test binary) isn't visible here.
//! `StubAdapter` plays the same role by hand, implementing the real
//! `ProviderAdapter` trait against a queue of scripted responses.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use captely_cascade::cache::CacheStore;
use captely_cascade::cascade::ProviderHandle;
use captely_cascade::config::{CacheConfig, WorkerConfig};
use captely_cascade::core_types::provider::NormalizedContact;
use captely_cascade::engine::EngineContext;
use captely_cascade::events::new_event_bus;
use captely_cascade::internals::rate_limiter::{RateLimiterRegistry, SharedRateLimiterRegistry};
use captely_cascade::persistence::Repository;
use captely_cascade::{
    CascadeConfig, Contact, CreditLedger, Credits, JobOrigin, LookupOutcome, PlanQuotas,
    ProviderAdapter, ProviderCapabilities, ProviderFailure, ProviderName, QuotaConfig,
    RateLimitSpec, VerificationConfig,
};

/// A scripted `ProviderAdapter`: pops one response off the front of its
/// queue per `lookup()` call, falling back to `NotFound` once the queue is
/// drained. Counts calls so tests can assert a provider was (or wasn't)
/// consulted.
pub struct StubAdapter {
    name: ProviderName,
    cost: Credits,
    capabilities: ProviderCapabilities,
    responses: tokio::sync::Mutex<VecDeque<Result<LookupOutcome, ProviderFailure>>>,
    calls: AtomicUsize,
}

impl StubAdapter {
    pub fn new(
        name: ProviderName,
        cost: Credits,
        capabilities: ProviderCapabilities,
        responses: Vec<Result<LookupOutcome, ProviderFailure>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            cost,
            capabilities,
            responses: tokio::sync::Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn as_adapter(self: &Arc<Self>) -> Arc<dyn ProviderAdapter> {
        self.clone() as Arc<dyn ProviderAdapter>
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn cost(&self) -> Credits {
        self.cost
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec {
            max_per_minute: 6_000,
            burst: 6_000,
        }
    }

    async fn lookup(&self, _contact: &NormalizedContact) -> Result<LookupOutcome, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.responses.lock().await;
        queue
            .pop_front()
            .unwrap_or(Err(ProviderFailure::NotFound { provider: self.name }))
    }
}

/// A phone-only success outcome. Cascade fixtures stick to phone so that
/// `post_process`'s email branch (real DNS resolution) is never entered.
pub fn phone_hit(provider: ProviderName, phone: &str, confidence: f64) -> LookupOutcome {
    LookupOutcome {
        email: None,
        phone: Some(phone.to_string()),
        confidence,
        provider,
        raw: serde_json::json!({ "stub": true }),
    }
}

pub fn not_found(provider: ProviderName) -> ProviderFailure {
    ProviderFailure::NotFound { provider }
}

pub fn transient(provider: ProviderName) -> ProviderFailure {
    ProviderFailure::TransientNetwork {
        provider,
        message: "stub transient failure".to_string(),
    }
}

/// A fresh pending contact with distinct identifying fields (and hence a
/// distinct fingerprint) for one scenario.
pub fn new_contact(job_id: Uuid, first: &str, last: &str, company: &str) -> Contact {
    Contact::new(job_id, first.to_string(), last.to_string(), company.to_string())
}

pub fn unlimited_quotas() -> PlanQuotas {
    PlanQuotas {
        daily: None,
        monthly: None,
        per_provider_month: None,
    }
}

pub fn test_cascade_config(order: Vec<ProviderName>) -> CascadeConfig {
    CascadeConfig {
        order,
        tau_min: 0.70,
        tau_stop: 0.90,
        contact_deadline_seconds: 30,
        enrichment_unit_price: 0.5,
    }
}

/// SMTP disabled so the only network-touching verification step possible
/// is DNS for a populated email — which cascade fixtures avoid entirely by
/// never giving a contact an email.
pub fn test_verification_config() -> VerificationConfig {
    VerificationConfig {
        smtp_enabled: false,
        smtp_probe_from: "verify@test.local".to_string(),
    }
}

/// A rate limiter registry generous enough that none of these scenarios
/// are throttled by it; real throttling/denial behavior is covered by
/// `internals::rate_limiter`'s own unit tests.
pub fn generous_rate_limiters(providers: &[ProviderName]) -> SharedRateLimiterRegistry {
    let specs: Vec<_> = providers
        .iter()
        .map(|p| {
            (
                *p,
                RateLimitSpec {
                    max_per_minute: 6_000,
                    burst: 6_000,
                },
            )
        })
        .collect();
    SharedRateLimiterRegistry::new(RateLimiterRegistry::new(&specs))
}

/// Insert a `credit_balance` row directly, bypassing the ledger (which only
/// ever mutates an existing row, never creates one).
pub async fn provision_balance(pool: &PgPool, user_id: &str, total_credits: f64) {
    sqlx::query(
        "INSERT INTO credit_balance (user_id, total_credits, used_credits, expired_credits, updated_at)
         VALUES ($1, $2, 0, 0, now())",
    )
    .bind(user_id)
    .bind(total_credits)
    .execute(pool)
    .await
    .expect("provisioning a test credit balance");
}

/// Build a minimal `EngineContext` wired with the given provider adapters
/// in cascade order, ready to drive `CascadeCoordinator::run` directly or a
/// `JobManager` built on top of it. No HLR refinement provider.
pub fn build_context(
    pool: PgPool,
    providers: Vec<Arc<dyn ProviderAdapter>>,
    cascade_order: Vec<ProviderName>,
) -> Arc<EngineContext> {
    let repo = Repository::new(pool.clone());
    let cache = CacheStore::new(repo.clone(), CacheConfig::default());
    let events = new_event_bus(1_024);
    let ledger = CreditLedger::new(pool, QuotaConfig::default(), events.clone());

    let provider_names: Vec<ProviderName> = providers.iter().map(|p| p.name()).collect();
    let rate_limiters = generous_rate_limiters(&provider_names);
    let handles: Vec<ProviderHandle> = providers.into_iter().map(ProviderHandle::new).collect();

    Arc::new(EngineContext {
        repo,
        cache,
        ledger,
        rate_limiters,
        providers: handles,
        hlr: None,
        cascade_config: test_cascade_config(cascade_order),
        verification_config: test_verification_config(),
        events,
    })
}

pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        pool_size: 2,
        queue_capacity: 64,
    }
}

pub const JOB_ORIGIN: JobOrigin = JobOrigin::Api;
