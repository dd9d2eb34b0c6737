//! The Cascade Coordinator: the per-contact state machine (spec §4.3).
//!
//! Six steps, run once per contact: cache consult, quota precheck, the
//! cost-ordered provider walk, outcome decision, verification/scoring
//! post-process, and persistence + progress emission. Nothing here retries
//! a whole contact — a contact that times out or exhausts its providers
//! reaches a terminal status and is never re-entered except by a fresh job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::{CascadeConfig, VerificationConfig};
use crate::core_types::domain::{
    Contact, EnrichmentStatus, JobState, LeadScore, PlanQuotas, ProviderResult,
};
use crate::core_types::normalize::{self, normalize_contact};
use crate::core_types::provider::{
    LookupOutcome, NormalizedContact, ProviderAdapter, ProviderFailure, ProviderName,
};
use crate::error::{EngineResult, FailureReason};
use crate::events::{EngineEvent, EventBus};
use crate::internals::rate_limiter::SharedRateLimiterRegistry;
use crate::internals::retry::CircuitBreaker;
use crate::ledger::{ChargeRequest, CreditLedger};
use crate::logging::{log_debug, log_info, log_warn};
use crate::persistence::Repository;
use crate::providers::verification;
use crate::scoring::compute_lead_score;

/// One enrichment provider plus the circuit breaker guarding it. Built once
/// by the Engine and shared across every worker's cascade runs.
#[derive(Clone)]
pub struct ProviderHandle {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub circuit: Arc<Mutex<CircuitBreaker>>,
}

impl ProviderHandle {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            circuit: Arc::new(Mutex::new(CircuitBreaker::default())),
        }
    }
}

/// Everything the Coordinator needs to run one contact, borrowed from the
/// Engine for the duration of the call.
pub struct CascadeDeps<'a> {
    pub repo: &'a Repository,
    pub cache: &'a CacheStore,
    pub ledger: &'a CreditLedger,
    pub rate_limiters: &'a SharedRateLimiterRegistry,
    pub providers: &'a [ProviderHandle],
    pub hlr: Option<&'a ProviderHandle>,
    pub cascade: &'a CascadeConfig,
    pub verification: &'a VerificationConfig,
    pub events: &'a EventBus,
    pub user_id: &'a str,
    pub quotas: PlanQuotas,
    /// Cancelled when the owning job is cancelled (spec §4.7). Checked
    /// between provider calls in step 3 so an in-flight contact finishes
    /// its current call but skips the rest of the walk and is persisted
    /// as-is rather than charged further.
    pub cancellation: &'a CancellationToken,
}

/// What one cascade run produced, already persisted by the time it's
/// returned.
pub struct CascadeOutcome {
    pub contact: Contact,
    pub provider_results: Vec<ProviderResult>,
}

/// A provider result whose email is `@domain` with an empty local part
/// carries no usable mailbox and is never persisted as `Contact.email`
/// (spec §4.5).
fn is_domain_only_email(email: &str) -> bool {
    email.split_once('@').is_some_and(|(local, _)| local.is_empty())
}

struct FieldWinner {
    value: String,
    confidence: f64,
    provider: ProviderName,
}

impl FieldWinner {
    fn consider(current: &mut Option<FieldWinner>, value: Option<String>, confidence: f64, provider: ProviderName) {
        let Some(value) = value else { return };
        let replace = match current {
            None => true,
            Some(existing) => confidence > existing.confidence,
        };
        if replace {
            *current = Some(FieldWinner {
                value,
                confidence,
                provider,
            });
        }
    }
}

pub struct CascadeCoordinator;

impl CascadeCoordinator {
    /// Run the full six-step algorithm for one contact.
    pub async fn run(mut contact: Contact, deps: &CascadeDeps<'_>) -> EngineResult<CascadeOutcome> {
        let normalized = normalize_contact(
            &contact.first_name,
            &contact.last_name,
            &contact.company,
            contact.company_domain.as_deref(),
            contact.profile_url.as_deref(),
            contact.position.as_deref(),
            contact.location.as_deref(),
        );
        let fingerprint = normalize::fingerprint(&normalized);
        let profile_fingerprint = normalize::fingerprint_by_profile_url(&normalized);

        // -- Step 1: cache consult -----------------------------------------
        if let Some(outcome) =
            Self::consult_cache(&mut contact, &fingerprint, profile_fingerprint.as_deref(), deps).await?
        {
            return Self::finish(contact, outcome, deps).await;
        }

        // -- Step 2: quota precheck -----------------------------------------
        let max_provider_cost = deps
            .providers
            .iter()
            .map(|p| p.adapter.cost())
            .fold(0.0_f64, f64::max);

        if let Err(err) = deps
            .ledger
            .precheck(deps.user_id, max_provider_cost, &deps.quotas)
            .await
        {
            contact.transition_to(EnrichmentStatus::Failed, Some(FailureReason::QuotaExceeded))?;
            deps.ledger
                .record_rejected_charge(
                    deps.user_id,
                    ChargeRequest {
                        contact_id: Some(contact.id),
                        provider: None,
                        operation: crate::core_types::domain::LedgerOperation::Enrichment,
                        cost: 0.0,
                        quotas: deps.quotas,
                        details: serde_json::json!({ "reason": err.to_string() }),
                    },
                )
                .await
                .ok();
            return Self::finish(contact, Vec::new(), deps).await;
        }

        // -- Step 3: walk the cascade -----------------------------------------
        let deadline = Instant::now() + Duration::from_secs(deps.cascade.contact_deadline_seconds);
        let mut provider_results = Vec::new();
        let mut best_email: Option<FieldWinner> = None;
        let mut best_phone: Option<FieldWinner> = None;
        let mut had_any_success = false;

        for handle in deps.providers {
            if Instant::now() >= deadline {
                log_debug!(contact_id = %contact.id, "Cascade deadline reached, stopping walk");
                break;
            }
            if deps.cancellation.is_cancelled() {
                log_debug!(contact_id = %contact.id, "Job cancelled, stopping walk after the current provider");
                break;
            }

            let provider = handle.adapter.name();

            if deps
                .ledger
                .provider_monthly_exhausted(deps.user_id, provider, &deps.quotas)
                .await?
            {
                log_debug!(contact_id = %contact.id, %provider, "Skipping provider: per-user monthly cap exhausted");
                continue;
            }

            {
                let circuit = handle.circuit.lock().await;
                if !circuit.should_allow_request() {
                    log_debug!(contact_id = %contact.id, %provider, "Skipping provider: circuit open");
                    continue;
                }
            }

            if deps.rate_limiters.acquire(provider, deadline).await.is_err() {
                provider_results.push(Self::failed_result(&contact, provider, "rate limiter denied within deadline"));
                continue;
            }

            let mut lookup = handle.adapter.lookup(&normalized).await;
            if let Err(ProviderFailure::RateLimited { retry_after, .. }) = &lookup {
                let jitter_ms = 100 + fastrand::u64(..200);
                let wait = retry_after.unwrap_or(Duration::from_millis(250)) + Duration::from_millis(jitter_ms);
                if Instant::now() + wait < deadline {
                    tokio::time::sleep(wait).await;
                    lookup = handle.adapter.lookup(&normalized).await;
                }
            }

            match lookup {
                Ok(outcome) => {
                    had_any_success = true;
                    handle.circuit.lock().await.record_success();

                    provider_results.push(Self::success_result(&contact, provider, &outcome));

                    if outcome.confidence >= deps.cascade.tau_min {
                        let email_candidate = outcome
                            .email
                            .clone()
                            .filter(|email| !is_domain_only_email(email));
                        FieldWinner::consider(&mut best_email, email_candidate, outcome.confidence, provider);
                        FieldWinner::consider(&mut best_phone, outcome.phone.clone(), outcome.confidence, provider);

                        deps.ledger
                            .consume(
                                deps.user_id,
                                ChargeRequest {
                                    contact_id: Some(contact.id),
                                    provider: Some(provider.as_str().to_string()),
                                    operation: crate::core_types::domain::LedgerOperation::Enrichment,
                                    cost: handle.adapter.cost(),
                                    quotas: deps.quotas,
                                    details: serde_json::json!({ "confidence": outcome.confidence }),
                                },
                            )
                            .await?;
                        contact.credits_consumed += handle.adapter.cost();

                        if outcome.confidence >= deps.cascade.tau_stop {
                            break;
                        }
                    }
                }
                Err(failure) => {
                    if failure.trips_circuit() {
                        handle.circuit.lock().await.record_failure();
                    }
                    if !matches!(failure, ProviderFailure::NotFound { .. }) {
                        log_warn!(contact_id = %contact.id, %provider, error = %failure, "Provider call failed");
                    }
                    provider_results.push(Self::failure_result(&contact, provider, &failure));
                }
            }
        }

        // -- Step 4: decide outcome -----------------------------------------
        if best_email.is_some() || best_phone.is_some() {
            let winning_confidence = best_email
                .as_ref()
                .map(|w| w.confidence)
                .into_iter()
                .chain(best_phone.as_ref().map(|w| w.confidence))
                .fold(0.0_f64, f64::max);
            let winning_provider = [&best_email, &best_phone]
                .into_iter()
                .flatten()
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
                .map(|w| w.provider);

            contact.email = best_email.map(|w| w.value);
            contact.phone = best_phone.map(|w| w.value);
            contact.enrichment_provider = winning_provider.map(|p| p.as_str().to_string());
            contact.enrichment_score = Some(winning_confidence);
            contact.transition_to(EnrichmentStatus::Enriched, None)?;
        } else if had_any_success {
            contact.transition_to(EnrichmentStatus::NotFound, None)?;
        } else {
            contact.transition_to(EnrichmentStatus::Failed, Some(FailureReason::ProviderUnavailable))?;
        }

        // -- Step 5: verification + scoring -----------------------------------
        Self::post_process(&mut contact, deps).await;

        Self::finish(contact, provider_results, deps).await
    }

    /// Step 1: user-duplicate hit, then global-cache hit. Returns
    /// `Some(provider_results)` if a cache hit fully resolved the contact
    /// (caller should skip straight to persistence), `None` on a miss.
    async fn consult_cache(
        contact: &mut Contact,
        fingerprint: &str,
        profile_fingerprint: Option<&str>,
        deps: &CascadeDeps<'_>,
    ) -> EngineResult<Option<Vec<ProviderResult>>> {
        let candidates: Vec<&str> = std::iter::once(fingerprint).chain(profile_fingerprint).collect();

        for fp in &candidates {
            if deps.cache.lookup_user_history(deps.user_id, fp).await?.is_some() {
                if let Some(entry) = deps.cache.lookup_global(fp).await? {
                    contact.email = entry.email.clone();
                    contact.phone = entry.phone.clone();
                    contact.enrichment_provider = Some(ProviderName::CacheUserDuplicate.as_str().to_string());
                    contact.enrichment_score = Some(entry.confidence);
                    contact.transition_to(EnrichmentStatus::Enriched, None)?;

                    deps.ledger
                        .consume(
                            deps.user_id,
                            ChargeRequest {
                                contact_id: Some(contact.id),
                                provider: Some(ProviderName::CacheUserDuplicate.as_str().to_string()),
                                operation: crate::core_types::domain::LedgerOperation::CacheHit,
                                cost: 0.0,
                                quotas: deps.quotas,
                                details: serde_json::json!({ "fingerprint": fp }),
                            },
                        )
                        .await?;

                    log_info!(contact_id = %contact.id, "Resolved from user-duplicate cache");
                    Self::post_process(contact, deps).await;
                    return Ok(Some(Vec::new()));
                }
            }
        }

        for fp in &candidates {
            if let Some(entry) = deps.cache.lookup_global(fp).await? {
                if entry.confidence >= deps.cascade.tau_min {
                    contact.email = entry.email.clone();
                    contact.phone = entry.phone.clone();
                    contact.enrichment_provider = Some(ProviderName::CacheGlobal.as_str().to_string());
                    contact.enrichment_score = Some(entry.confidence);
                    contact.transition_to(EnrichmentStatus::Enriched, None)?;

                    deps.ledger
                        .consume(
                            deps.user_id,
                            ChargeRequest {
                                contact_id: Some(contact.id),
                                provider: Some(ProviderName::CacheGlobal.as_str().to_string()),
                                operation: crate::core_types::domain::LedgerOperation::CacheHit,
                                cost: deps.cascade.enrichment_unit_price,
                                quotas: deps.quotas,
                                details: serde_json::json!({ "fingerprint": fp, "api_cost_saved": true }),
                            },
                        )
                        .await?;
                    contact.credits_consumed += deps.cascade.enrichment_unit_price;

                    deps.cache
                        .record_user_history(crate::core_types::domain::UserContactHistory {
                            user_id: deps.user_id.to_string(),
                            fingerprint: fp.to_string(),
                            contact_id: contact.id,
                            first_enriched_at: chrono::Utc::now(),
                        })
                        .await?;

                    log_info!(contact_id = %contact.id, "Resolved from global cache");
                    Self::post_process(contact, deps).await;
                    return Ok(Some(Vec::new()));
                }
            }
        }

        Ok(None)
    }

    /// Step 5: email verification, phone classification (with optional HLR
    /// refinement), lead score, and reliability bucket.
    async fn post_process(contact: &mut Contact, deps: &CascadeDeps<'_>) {
        if let Some(email) = contact.email.clone() {
            let outcome = verification::verify_email(&email, deps.verification).await;
            contact.email_verified = Some(outcome.verified);
            contact.email_verification_score = Some(outcome.score);
            contact.email_verification_level = outcome.level_reached;
            contact.is_disposable = Some(outcome.is_disposable);
            contact.is_role_based = Some(outcome.is_role_based);
            contact.is_catchall = Some(outcome.is_catchall);
            contact.email_reliability = Some(outcome.reliability);
        } else {
            contact.email_reliability = Some(crate::core_types::domain::EmailReliability::NoEmail);
        }

        if let Some(phone) = contact.phone.clone() {
            let outcome = verification::classify_phone(
                &phone,
                contact.company_domain.as_deref(),
                contact.location.as_deref(),
            );
            contact.phone = outcome.e164.clone().or(Some(phone.clone()));
            contact.phone_type = Some(outcome.phone_type);
            contact.phone_country = outcome.country.clone();
            contact.phone_verified = Some(outcome.verified);

            if let Some(hlr) = deps.hlr {
                let probe_contact = NormalizedContact {
                    first_name: contact.first_name.clone(),
                    last_name: contact.last_name.clone(),
                    company: contact.company.clone(),
                    company_domain: contact.company_domain.clone(),
                    profile_url: contact.profile_url.clone(),
                    position: contact.position.clone(),
                    location: contact.location.clone(),
                    known_phone: contact.phone.clone(),
                };
                if let Ok(hlr_outcome) = hlr.adapter.lookup(&probe_contact).await {
                    if hlr_outcome.confidence >= deps.cascade.tau_min {
                        contact.phone_verified = Some(true);
                    }
                }
            }
        }

        let lead_score: LeadScore = compute_lead_score(
            contact.email.is_some(),
            contact.email_verified.unwrap_or(false),
            contact.phone.is_some(),
            contact.phone_verified.unwrap_or(false),
            contact.position.as_deref().is_some_and(|p| !p.trim().is_empty()),
            !contact.company.trim().is_empty(),
            contact.enrichment_score.is_some_and(|s| s >= deps.cascade.tau_stop),
        );
        contact.lead_score = Some(lead_score);
    }

    /// Step 6: persist the contact and its provider results, refresh the
    /// global cache when a fresh (non-cache-hit) cascade improved it,
    /// advance the job's progress counter, and emit a progress event.
    async fn finish(
        contact: Contact,
        provider_results: Vec<ProviderResult>,
        deps: &CascadeDeps<'_>,
    ) -> EngineResult<CascadeOutcome> {
        deps.repo.update_contact(&contact).await?;
        for result in &provider_results {
            deps.repo.insert_provider_result(result).await?;
        }

        if contact.enrichment_status == EnrichmentStatus::Enriched {
            if let Some(provider) = &contact.enrichment_provider {
                if provider != ProviderName::CacheUserDuplicate.as_str()
                    && provider != ProviderName::CacheGlobal.as_str()
                {
                    let normalized = normalize_contact(
                        &contact.first_name,
                        &contact.last_name,
                        &contact.company,
                        contact.company_domain.as_deref(),
                        contact.profile_url.as_deref(),
                        contact.position.as_deref(),
                        contact.location.as_deref(),
                    );
                    let fingerprint = normalize::fingerprint(&normalized);
                    let profile_fingerprint = normalize::fingerprint_by_profile_url(&normalized);

                    for fp in std::iter::once(fingerprint).chain(profile_fingerprint) {
                        deps.cache
                            .upsert_global(crate::core_types::domain::CacheEntry {
                                fingerprint: fp.clone(),
                                email: contact.email.clone(),
                                phone: contact.phone.clone(),
                                confidence: contact.enrichment_score.unwrap_or(0.0),
                                source_provider: provider.clone(),
                                last_refreshed: chrono::Utc::now(),
                                hit_count: 0,
                            })
                            .await?;
                        deps.cache
                            .record_user_history(crate::core_types::domain::UserContactHistory {
                                user_id: deps.user_id.to_string(),
                                fingerprint: fp,
                                contact_id: contact.id,
                                first_enriched_at: chrono::Utc::now(),
                            })
                            .await?;
                    }
                }
            }
        }

        let job = deps.repo.get_job(contact.job_id).await?;
        if let Some(job) = job {
            let next_state = if job.completed + 1 >= job.total {
                JobState::Completed
            } else {
                JobState::Running
            };
            deps.repo.advance_job_progress(job.id, next_state).await?;
            let _ = deps.events.send(EngineEvent::JobProgress {
                job_id: job.id,
                completed: job.completed + 1,
                total: job.total,
            });
            if next_state == JobState::Completed {
                let _ = deps.events.send(EngineEvent::JobCompleted {
                    job_id: job.id,
                    state: next_state,
                });
            }
        }

        Ok(CascadeOutcome {
            contact,
            provider_results,
        })
    }

    fn success_result(contact: &Contact, provider: ProviderName, outcome: &LookupOutcome) -> ProviderResult {
        ProviderResult {
            id: uuid::Uuid::new_v4(),
            contact_id: contact.id,
            provider: provider.as_str().to_string(),
            email: outcome.email.clone(),
            phone: outcome.phone.clone(),
            confidence: outcome.confidence,
            email_verified: false,
            phone_verified: false,
            raw_payload: outcome.raw.clone(),
            created_at: chrono::Utc::now(),
        }
    }

    fn failure_result(contact: &Contact, provider: ProviderName, failure: &ProviderFailure) -> ProviderResult {
        ProviderResult {
            id: uuid::Uuid::new_v4(),
            contact_id: contact.id,
            provider: provider.as_str().to_string(),
            email: None,
            phone: None,
            confidence: 0.0,
            email_verified: false,
            phone_verified: false,
            raw_payload: serde_json::json!({ "error": failure.to_string() }),
            created_at: chrono::Utc::now(),
        }
    }

    fn failed_result(contact: &Contact, provider: ProviderName, reason: &str) -> ProviderResult {
        ProviderResult {
            id: uuid::Uuid::new_v4(),
            contact_id: contact.id,
            provider: provider.as_str().to_string(),
            email: None,
            phone: None,
            confidence: 0.0,
            email_verified: false,
            phone_verified: false,
            raw_payload: serde_json::json!({ "error": reason }),
            created_at: chrono::Utc::now(),
        }
    }
}
