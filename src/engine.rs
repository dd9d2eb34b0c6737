//! The Engine: composition root and public entry point (spec §5, §7).
//!
//! Builds every long-lived component once at boot — the connection pool,
//! repository, two-tier cache, credit ledger, event bus, rate limiter
//! registry, and one [`ProviderHandle`] per configured provider — and hands
//! out a small [`EngineApi`] surface (`submit_job` / `get_job` / `list_jobs`
//! / `get_contacts` / `cancel_job` / `get_balance`) that hides all of that
//! wiring from callers, the same role the teacher's `LLMClient` plays for a
//! single provider call.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::cascade::ProviderHandle;
use crate::config::EngineConfig;
use crate::core_types::domain::{
    Contact, CreditBalance, Job, JobOrigin, PlanQuotas, QuotaState,
};
use crate::core_types::provider::ProviderName;
use crate::error::{EngineError, EngineResult};
use crate::events::{new_event_bus, EventBus};
use crate::internals::rate_limiter::{RateLimiterRegistry, SharedRateLimiterRegistry};
use crate::job_manager::JobManager;
use crate::ledger::CreditLedger;
use crate::logging::log_info;
use crate::persistence::Repository;
use crate::providers::{
    verification::HlrAdapter, ApolloAdapter, DropcontactAdapter, HunterAdapter, IcypeasAdapter,
};

const EVENT_BUS_CAPACITY: usize = 1_024;

/// The set of shared, `Arc`-wrapped state every cascade run borrows from.
/// Exists mainly so [`JobManager`] can hold one `Arc<EngineContext>` instead
/// of eight separate fields.
pub struct EngineContext {
    pub repo: Repository,
    pub cache: CacheStore,
    pub ledger: CreditLedger,
    pub rate_limiters: SharedRateLimiterRegistry,
    pub providers: Vec<ProviderHandle>,
    pub hlr: Option<ProviderHandle>,
    pub cascade_config: crate::config::CascadeConfig,
    pub verification_config: crate::config::VerificationConfig,
    pub events: EventBus,
}

/// Public surface the rest of the application drives the engine through.
/// Kept as a trait (rather than inherent methods on [`Engine`] alone) so
/// call sites and tests can depend on an abstraction instead of the
/// concrete wiring, mirroring how the teacher's provider clients sit behind
/// a trait rather than being called directly.
#[async_trait::async_trait]
pub trait EngineApi: Send + Sync {
    async fn submit_job(
        &self,
        owner: &str,
        origin: JobOrigin,
        contacts: Vec<Contact>,
        quotas: PlanQuotas,
    ) -> EngineResult<Job>;

    async fn get_job(&self, job_id: Uuid) -> EngineResult<Option<Job>>;

    async fn list_jobs(&self, owner: &str) -> EngineResult<Vec<Job>>;

    async fn get_contacts(&self, job_id: Uuid) -> EngineResult<Vec<Contact>>;

    async fn cancel_job(&self, job_id: Uuid) -> EngineResult<()>;

    async fn resume_job(&self, job_id: Uuid, owner: &str, quotas: PlanQuotas) -> EngineResult<usize>;

    async fn get_balance(&self, user_id: &str) -> EngineResult<Option<CreditBalance>>;

    /// A snapshot of a user's consumption against their quotas, for the
    /// `GetSubscription`/`GetBalance` read boundary (spec §3.2).
    async fn get_quota_state(&self, user_id: &str) -> EngineResult<QuotaState>;

    fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<crate::events::EngineEvent>;
}

/// The composition root. Construct once per process via [`Engine::new`].
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<EngineContext>,
    jobs: JobManager,
}

impl Engine {
    pub async fn new(config: EngineConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?;

        let repo = Repository::new(pool.clone());
        let cache = CacheStore::new(repo.clone(), config.cache);
        let events = new_event_bus(EVENT_BUS_CAPACITY);
        let ledger = CreditLedger::new(pool, config.quota, events.clone());

        let mut specs = Vec::with_capacity(config.providers.len() + 1);
        let mut providers = Vec::with_capacity(config.providers.len());
        for name in &config.cascade.order {
            let settings = config
                .provider(*name)
                .ok_or_else(|| EngineError::invalid_input(format!("no settings for provider {name}")))?;
            specs.push((*name, settings.rate_limit()));
            providers.push(ProviderHandle::new(Self::build_adapter(*name, settings)?));
        }

        let hlr = if let Some(hlr_config) = &config.hlr {
            specs.push((ProviderName::Hlr, hlr_config.rate_limit()));
            let adapter: Arc<dyn crate::core_types::provider::ProviderAdapter> =
                Arc::new(HlrAdapter::new(hlr_config));
            Some(ProviderHandle::new(adapter))
        } else {
            None
        };

        let rate_limiters = SharedRateLimiterRegistry::new(RateLimiterRegistry::new(&specs));

        log_info!(providers = providers.len(), hlr = hlr.is_some(), "Engine initialized");

        let ctx = Arc::new(EngineContext {
            repo,
            cache,
            ledger,
            rate_limiters,
            providers,
            hlr,
            cascade_config: config.cascade,
            verification_config: config.verification,
            events,
        });

        let jobs = JobManager::new(ctx.clone(), config.worker);

        Ok(Self { ctx, jobs })
    }

    fn build_adapter(
        name: ProviderName,
        settings: &dyn crate::config::ProviderSettings,
    ) -> EngineResult<Arc<dyn crate::core_types::provider::ProviderAdapter>> {
        Ok(match name {
            ProviderName::Icypeas => Arc::new(IcypeasAdapter::new(settings)),
            ProviderName::Dropcontact => Arc::new(DropcontactAdapter::new(settings)),
            ProviderName::Hunter => Arc::new(HunterAdapter::new(settings)),
            ProviderName::Apollo => Arc::new(ApolloAdapter::new(settings)),
            other => {
                return Err(EngineError::invalid_input(format!(
                    "{other} is not a cascade-ordered provider"
                )))
            }
        })
    }
}

#[async_trait::async_trait]
impl EngineApi for Engine {
    async fn submit_job(
        &self,
        owner: &str,
        origin: JobOrigin,
        contacts: Vec<Contact>,
        quotas: PlanQuotas,
    ) -> EngineResult<Job> {
        self.jobs.submit_job(owner, origin, contacts, quotas).await
    }

    async fn get_job(&self, job_id: Uuid) -> EngineResult<Option<Job>> {
        self.jobs.get_job(job_id).await
    }

    async fn list_jobs(&self, owner: &str) -> EngineResult<Vec<Job>> {
        self.jobs.list_jobs(owner).await
    }

    async fn get_contacts(&self, job_id: Uuid) -> EngineResult<Vec<Contact>> {
        self.jobs.get_contacts(job_id).await
    }

    async fn cancel_job(&self, job_id: Uuid) -> EngineResult<()> {
        self.jobs.cancel_job(job_id).await
    }

    async fn resume_job(&self, job_id: Uuid, owner: &str, quotas: PlanQuotas) -> EngineResult<usize> {
        self.jobs.resume_job(job_id, owner, quotas).await
    }

    async fn get_balance(&self, user_id: &str) -> EngineResult<Option<CreditBalance>> {
        self.ctx.repo.get_credit_balance(user_id).await
    }

    async fn get_quota_state(&self, user_id: &str) -> EngineResult<QuotaState> {
        self.ctx.ledger.quota_state(user_id).await
    }

    fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<crate::events::EngineEvent> {
        self.ctx.events.subscribe()
    }
}
