//! `Repository`: sqlx-backed CRUD for jobs, contacts, provider results, and
//! the two cache layers.
//!
//! `Contact` carries a `lead_score: Option<LeadScore>`, a composite type with
//! no natural column mapping; [`ContactRow`] is the `FromRow`-able shape
//! that stores it as a `jsonb` column via `sqlx::types::Json`, converted to
//! and from `Contact` at the repository boundary. Every other domain type
//! derives `sqlx::FromRow` directly since their fields are already scalar
//! or map onto a Postgres enum via `sqlx::Type`.

use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core_types::domain::{
    CacheEntry, Contact, CreditBalance, CreditLedgerEntry, EmailReliability, EnrichmentStatus,
    Job, JobState, LeadScore, PhoneType, ProviderResult, UserContactHistory,
};
use crate::error::{EngineResult, FailureReason};
use crate::logging::log_debug;

#[derive(Debug, sqlx::FromRow)]
struct ContactRow {
    id: Uuid,
    job_id: Uuid,
    first_name: String,
    last_name: String,
    position: Option<String>,
    company: String,
    company_domain: Option<String>,
    profile_url: Option<String>,
    location: Option<String>,
    industry: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    enrichment_status: EnrichmentStatus,
    enrichment_provider: Option<String>,
    enrichment_score: Option<f64>,
    failure_reason: Option<FailureReason>,
    email_verified: Option<bool>,
    email_verification_score: Option<f64>,
    email_verification_level: i16,
    is_disposable: Option<bool>,
    is_role_based: Option<bool>,
    is_catchall: Option<bool>,
    phone_type: Option<PhoneType>,
    phone_country: Option<String>,
    phone_verified: Option<bool>,
    lead_score: Option<Json<LeadScore>>,
    email_reliability: Option<EmailReliability>,
    credits_consumed: f64,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            id: row.id,
            job_id: row.job_id,
            first_name: row.first_name,
            last_name: row.last_name,
            position: row.position,
            company: row.company,
            company_domain: row.company_domain,
            profile_url: row.profile_url,
            location: row.location,
            industry: row.industry,
            email: row.email,
            phone: row.phone,
            enrichment_status: row.enrichment_status,
            enrichment_provider: row.enrichment_provider,
            enrichment_score: row.enrichment_score,
            failure_reason: row.failure_reason,
            email_verified: row.email_verified,
            email_verification_score: row.email_verification_score,
            email_verification_level: row.email_verification_level as u8,
            is_disposable: row.is_disposable,
            is_role_based: row.is_role_based,
            is_catchall: row.is_catchall,
            phone_type: row.phone_type,
            phone_country: row.phone_country,
            phone_verified: row.phone_verified,
            lead_score: row.lead_score.map(|Json(score)| score),
            email_reliability: row.email_reliability,
            credits_consumed: row.credits_consumed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Postgres-backed repository for everything the Coordinator and Job
/// Manager read and write outside the credit ledger's own transaction.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -- Jobs -----------------------------------------------------------

    pub async fn insert_job(&self, job: &Job) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, owner, state, total, completed, origin, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(job.id)
        .bind(&job.owner)
        .bind(job.state)
        .bind(job.total)
        .bind(job.completed)
        .bind(job.origin)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> EngineResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list_jobs(&self, owner: &str) -> EngineResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE owner = $1 ORDER BY created_at DESC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// Increment `completed` by one and update `state`; called once per
    /// contact as the worker pool drains the job (spec §5.2).
    pub async fn advance_job_progress(&self, id: Uuid, state: JobState) -> EngineResult<()> {
        sqlx::query(
            "UPDATE jobs SET completed = completed + 1, state = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set a job's state without touching `completed`, for transitions
    /// outside the per-contact progress loop (cancellation, resume).
    pub async fn set_job_state(&self, id: Uuid, state: JobState) -> EngineResult<()> {
        sqlx::query("UPDATE jobs SET state = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Contacts ---------------------------------------------------------

    pub async fn insert_contact(&self, contact: &Contact) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO contacts (
                id, job_id, first_name, last_name, position, company, company_domain,
                profile_url, location, industry, enrichment_status, credits_consumed,
                created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(contact.id)
        .bind(contact.job_id)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.position)
        .bind(&contact.company)
        .bind(&contact.company_domain)
        .bind(&contact.profile_url)
        .bind(&contact.location)
        .bind(&contact.industry)
        .bind(contact.enrichment_status)
        .bind(contact.credits_consumed)
        .bind(contact.created_at)
        .bind(contact.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite every mutable field of a contact. Called once at the end
    /// of a cascade run (spec §4.3 step 6); `ProviderResult` rows are
    /// append-only and never touched here.
    pub async fn update_contact(&self, contact: &Contact) -> EngineResult<()> {
        sqlx::query(
            "UPDATE contacts SET
                email = $2, phone = $3, enrichment_status = $4, enrichment_provider = $5,
                enrichment_score = $6, failure_reason = $7, email_verified = $8,
                email_verification_score = $9, email_verification_level = $10,
                is_disposable = $11, is_role_based = $12, is_catchall = $13,
                phone_type = $14, phone_country = $15, phone_verified = $16,
                lead_score = $17, email_reliability = $18, credits_consumed = $19,
                updated_at = $20
             WHERE id = $1",
        )
        .bind(contact.id)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(contact.enrichment_status)
        .bind(&contact.enrichment_provider)
        .bind(contact.enrichment_score)
        .bind(contact.failure_reason)
        .bind(contact.email_verified)
        .bind(contact.email_verification_score)
        .bind(contact.email_verification_level as i16)
        .bind(contact.is_disposable)
        .bind(contact.is_role_based)
        .bind(contact.is_catchall)
        .bind(contact.phone_type)
        .bind(&contact.phone_country)
        .bind(contact.phone_verified)
        .bind(contact.lead_score.map(Json))
        .bind(contact.email_reliability)
        .bind(contact.credits_consumed)
        .bind(contact.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_contact(&self, id: Uuid) -> EngineResult<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>("SELECT * FROM contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Contact::from))
    }

    pub async fn get_contacts_for_job(&self, job_id: Uuid) -> EngineResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT * FROM contacts WHERE job_id = $1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Contact::from).collect())
    }

    /// Contacts still pending on a job, used to resume after a restart
    /// (spec §5.2: a contact whose terminal status is already set is
    /// skipped).
    pub async fn get_pending_contacts_for_job(&self, job_id: Uuid) -> EngineResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT * FROM contacts WHERE job_id = $1 AND enrichment_status = 'pending'
             ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Contact::from).collect())
    }

    // -- Provider results (append-only) ------------------------------------

    pub async fn insert_provider_result(&self, result: &ProviderResult) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO provider_results (
                id, contact_id, provider, email, phone, confidence, email_verified,
                phone_verified, raw_payload, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(result.id)
        .bind(result.contact_id)
        .bind(&result.provider)
        .bind(&result.email)
        .bind(&result.phone)
        .bind(result.confidence)
        .bind(result.email_verified)
        .bind(result.phone_verified)
        .bind(&result.raw_payload)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_provider_results_for_contact(
        &self,
        contact_id: Uuid,
    ) -> EngineResult<Vec<ProviderResult>> {
        let rows = sqlx::query_as::<_, ProviderResult>(
            "SELECT * FROM provider_results WHERE contact_id = $1 ORDER BY created_at ASC",
        )
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Cache: per-user duplicate history ----------------------------------

    pub async fn get_user_contact_history(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> EngineResult<Option<UserContactHistory>> {
        let row = sqlx::query_as::<_, UserContactHistory>(
            "SELECT * FROM user_contact_history WHERE user_id = $1 AND fingerprint = $2",
        )
        .bind(user_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_user_contact_history(
        &self,
        row: &UserContactHistory,
    ) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO user_contact_history (user_id, fingerprint, contact_id, first_enriched_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, fingerprint) DO NOTHING",
        )
        .bind(&row.user_id)
        .bind(&row.fingerprint)
        .bind(row.contact_id)
        .bind(row.first_enriched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Cache: global fingerprint cache -------------------------------------

    pub async fn get_global_cache_entry(&self, fingerprint: &str) -> EngineResult<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheEntry>(
            "SELECT * FROM global_cache WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert or refresh a global cache row. `hit_count` increments on
    /// conflict; `confidence`/`email`/`phone`/`source_provider` are only
    /// overwritten when the new reading wins (never downgraded by a later,
    /// lower-confidence cascade run for a different user).
    pub async fn upsert_global_cache_entry(&self, entry: &CacheEntry) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO global_cache (fingerprint, email, phone, confidence, source_provider, last_refreshed, hit_count)
             VALUES ($1, $2, $3, $4, $5, $6, 1)
             ON CONFLICT (fingerprint) DO UPDATE SET
                email = CASE WHEN EXCLUDED.confidence >= global_cache.confidence THEN EXCLUDED.email ELSE global_cache.email END,
                phone = CASE WHEN EXCLUDED.confidence >= global_cache.confidence THEN EXCLUDED.phone ELSE global_cache.phone END,
                confidence = GREATEST(global_cache.confidence, EXCLUDED.confidence),
                source_provider = CASE WHEN EXCLUDED.confidence >= global_cache.confidence THEN EXCLUDED.source_provider ELSE global_cache.source_provider END,
                last_refreshed = EXCLUDED.last_refreshed,
                hit_count = global_cache.hit_count + 1",
        )
        .bind(&entry.fingerprint)
        .bind(&entry.email)
        .bind(&entry.phone)
        .bind(entry.confidence)
        .bind(&entry.source_provider)
        .bind(entry.last_refreshed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Credit balance read (no lock: UI-facing, eventually consistent) ------

    pub async fn get_credit_balance(&self, user_id: &str) -> EngineResult<Option<CreditBalance>> {
        let row = sqlx::query_as::<_, CreditBalance>(
            "SELECT total_credits, used_credits, expired_credits, updated_at
             FROM credit_balance WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_ledger_entries(&self, user_id: &str) -> EngineResult<Vec<CreditLedgerEntry>> {
        log_debug!(user_id, "Fetching ledger entries");
        let rows = sqlx::query_as::<_, CreditLedgerEntry>(
            "SELECT * FROM credit_ledger WHERE user_id = $1 ORDER BY seq ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
