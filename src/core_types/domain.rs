//! Persisted entities from the data model: jobs, contacts, provider results,
//! the credit ledger, and the two-layer cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureReason;

// ============================================================================
// Job
// ============================================================================

/// Where a job's contacts originated, as reported by the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobOrigin {
    Csv,
    Api,
    Extension,
}

/// Lifecycle state of a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

/// A batch of Contacts submitted for enrichment, owned for its whole
/// lifetime by the submitting user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub owner: String,
    pub state: JobState,
    pub total: i32,
    pub completed: i32,
    pub origin: JobOrigin,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A Job is immutable apart from observability fields once it reaches
    /// `completed`. Callers that want to mutate business fields should check
    /// this first.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed | JobState::Partial)
    }
}

// ============================================================================
// Contact
// ============================================================================

/// Terminal/non-terminal enrichment status of a Contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Pending,
    Enriched,
    NotFound,
    Failed,
}

impl EnrichmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnrichmentStatus::Enriched | EnrichmentStatus::NotFound | EnrichmentStatus::Failed
        )
    }
}

/// Classification of a discovered phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PhoneType {
    Mobile,
    Landline,
    Voip,
    Unknown,
}

/// Categorical summary of an email's verification score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EmailReliability {
    Excellent,
    Good,
    Fair,
    Poor,
    Unknown,
    NoEmail,
}

/// A single contact to be enriched, and the enrichment outcome once the
/// cascade has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub position: Option<String>,
    pub company: String,
    pub company_domain: Option<String>,
    pub profile_url: Option<String>,
    pub location: Option<String>,
    pub industry: Option<String>,

    pub email: Option<String>,
    pub phone: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub enrichment_provider: Option<String>,
    pub enrichment_score: Option<f64>,
    pub failure_reason: Option<FailureReason>,

    pub email_verified: Option<bool>,
    pub email_verification_score: Option<f64>,
    pub email_verification_level: u8,
    pub is_disposable: Option<bool>,
    pub is_role_based: Option<bool>,
    pub is_catchall: Option<bool>,

    pub phone_type: Option<PhoneType>,
    pub phone_country: Option<String>,
    pub phone_verified: Option<bool>,

    pub lead_score: Option<LeadScore>,
    pub email_reliability: Option<EmailReliability>,

    pub credits_consumed: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Create a fresh, un-enriched contact owned by `job_id`.
    pub fn new(job_id: Uuid, first_name: String, last_name: String, company: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            first_name,
            last_name,
            position: None,
            company,
            company_domain: None,
            profile_url: None,
            location: None,
            industry: None,
            email: None,
            phone: None,
            enrichment_status: EnrichmentStatus::Pending,
            enrichment_provider: None,
            enrichment_score: None,
            failure_reason: None,
            email_verified: None,
            email_verification_score: None,
            email_verification_level: 0,
            is_disposable: None,
            is_role_based: None,
            is_catchall: None,
            phone_type: None,
            phone_country: None,
            phone_verified: None,
            lead_score: None,
            email_reliability: None,
            credits_consumed: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the ingestion contract is satisfied: either a name+company
    /// triple or a profile URL must be present.
    pub fn satisfies_ingestion_contract(&self) -> bool {
        let has_name_company = !self.first_name.trim().is_empty()
            && !self.last_name.trim().is_empty()
            && !self.company.trim().is_empty();
        has_name_company || self.profile_url.is_some()
    }

    /// Transition to a terminal status, enforcing the single-terminal-
    /// transition invariant. Returns an error (never panics) if the contact
    /// has already reached a terminal status, which also gives idempotent
    /// resume for free: callers check this before charging.
    pub fn transition_to(
        &mut self,
        status: EnrichmentStatus,
        failure_reason: Option<FailureReason>,
    ) -> crate::error::EngineResult<()> {
        if self.enrichment_status.is_terminal() {
            return Err(crate::error::EngineError::internal(format!(
                "contact {} already terminal at {:?}, cannot transition to {:?}",
                self.id, self.enrichment_status, status
            )));
        }
        self.enrichment_status = status;
        self.failure_reason = failure_reason;
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ============================================================================
// ProviderResult
// ============================================================================

/// One row recorded per provider consulted during a contact's cascade.
/// Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProviderResult {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub provider: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub confidence: f64,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Credit ledger
// ============================================================================

/// The kind of operation a ledger row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum LedgerOperation {
    Enrichment,
    Verification,
    Topup,
    Refund,
    CacheHit,
}

/// A single append-only transaction against a user's credit balance.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditLedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub contact_id: Option<Uuid>,
    pub provider: Option<String>,
    pub operation: LedgerOperation,
    pub cost: f64,
    pub success: bool,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

/// A user's running credit balance. Exactly one row per user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditBalance {
    pub total_credits: f64,
    pub used_credits: f64,
    pub expired_credits: f64,
    pub updated_at: DateTime<Utc>,
}

impl CreditBalance {
    pub fn remaining(&self) -> f64 {
        (self.total_credits - self.expired_credits - self.used_credits).max(0.0)
    }
}

/// Derived, recomputable-from-ledger view of a user's quota consumption.
/// May be cached with a short TTL but is never itself the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaState {
    pub user_id: String,
    pub today_consumed: f64,
    pub month_consumed: f64,
    pub per_provider_month_consumed: std::collections::HashMap<String, f64>,
}

// ============================================================================
// Cache
// ============================================================================

/// A global, cross-user cache row keyed by contact fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub confidence: f64,
    pub source_provider: String,
    pub last_refreshed: DateTime<Utc>,
    pub hit_count: i64,
}

/// Records that a specific user has already paid for a specific fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserContactHistory {
    pub user_id: String,
    pub fingerprint: String,
    pub contact_id: Uuid,
    pub first_enriched_at: DateTime<Utc>,
}

// ============================================================================
// Lead score
// ============================================================================

/// The 0-100 lead score plus the component signals that produced it, so the
/// deterministic formula is auditable rather than a bare integer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LeadScore {
    pub value: u8,
    pub has_email: bool,
    pub email_verified: bool,
    pub has_phone: bool,
    pub phone_verified: bool,
    pub has_position: bool,
    pub has_company: bool,
    pub high_confidence: bool,
}

// ============================================================================
// Subscription / quotas read model
// ============================================================================

/// Per-plan quota limits, as read from the billing boundary's
/// `GetSubscription` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanQuotas {
    pub daily: Option<f64>,
    pub monthly: Option<f64>,
    pub per_provider_month: Option<f64>,
}

/// Read-only mirror of `GetSubscription`'s response shape, needed by the
/// Coordinator's quota precheck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: String,
    pub quotas: PlanQuotas,
    pub price_per_enrichment: f64,
}
