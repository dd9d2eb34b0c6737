//! Integration tests for `CascadeCoordinator::run` against a real Postgres
//! schema (via `#[sqlx::test]`) and hand-written stub providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use captely_cascade::cascade::{CascadeCoordinator, CascadeDeps};
use captely_cascade::core_types::domain::{CacheEntry, EnrichmentStatus, UserContactHistory};
use captely_cascade::core_types::normalize::{fingerprint, normalize_contact};
use captely_cascade::{FailureReason, ProviderName};
use sqlx::PgPool;

use common::{
    build_context, new_contact, not_found, phone_hit, provision_balance, transient,
    unlimited_quotas, StubAdapter, JOB_ORIGIN,
};

async fn seed_job(pool: &PgPool, owner: &str, total: i32) -> uuid::Uuid {
    let job = captely_cascade::Job {
        id: uuid::Uuid::new_v4(),
        owner: owner.to_string(),
        state: captely_cascade::JobState::Running,
        total,
        completed: 0,
        origin: JOB_ORIGIN,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let repo = captely_cascade::persistence::Repository::new(pool.clone());
    repo.insert_job(&job).await.unwrap();
    job.id
}

#[sqlx::test]
async fn all_providers_fail_marks_the_contact_failed_and_provider_unavailable(pool: PgPool) {
    provision_balance(&pool, "user-1", 100.0).await;
    let job_id = seed_job(&pool, "user-1", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![Err(not_found(ProviderName::Icypeas))],
    );
    let dropcontact = StubAdapter::new(
        ProviderName::Dropcontact,
        0.2,
        captely_cascade::ProviderCapabilities::both(),
        vec![Err(transient(ProviderName::Dropcontact))],
    );

    let ctx = build_context(
        pool.clone(),
        vec![icypeas.as_adapter(), dropcontact.as_adapter()],
        vec![ProviderName::Icypeas, ProviderName::Dropcontact],
    );

    let contact = new_contact(job_id, "Alice", "Martin", "Acme Corp");
    captely_cascade::persistence::Repository::new(pool.clone())
        .insert_contact(&contact)
        .await
        .unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-1",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::Failed);
    assert_eq!(outcome.contact.failure_reason, Some(FailureReason::ProviderUnavailable));
    assert_eq!(icypeas.call_count(), 1);
    assert_eq!(dropcontact.call_count(), 1);
}

#[sqlx::test]
async fn a_success_below_tau_min_with_no_acceptance_anywhere_is_not_found(pool: PgPool) {
    provision_balance(&pool, "user-1", 100.0).await;
    let job_id = seed_job(&pool, "user-1", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![Ok(phone_hit(ProviderName::Icypeas, "+14155551234", 0.40))],
    );

    let ctx = build_context(pool.clone(), vec![icypeas.as_adapter()], vec![ProviderName::Icypeas]);

    let contact = new_contact(job_id, "Bob", "Dupont", "Initech");
    captely_cascade::persistence::Repository::new(pool.clone())
        .insert_contact(&contact)
        .await
        .unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-1",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::NotFound);
    assert!(outcome.contact.failure_reason.is_none());
    assert!(outcome.contact.phone.is_none());
}

#[sqlx::test]
async fn a_sub_threshold_miss_then_an_accepted_hit_walks_to_the_second_provider(pool: PgPool) {
    provision_balance(&pool, "user-1", 100.0).await;
    let job_id = seed_job(&pool, "user-1", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![Ok(phone_hit(ProviderName::Icypeas, "+14155551234", 0.40))],
    );
    let dropcontact = StubAdapter::new(
        ProviderName::Dropcontact,
        0.2,
        captely_cascade::ProviderCapabilities::both(),
        vec![Ok(phone_hit(ProviderName::Dropcontact, "+14155556789", 0.80))],
    );

    let ctx = build_context(
        pool.clone(),
        vec![icypeas.as_adapter(), dropcontact.as_adapter()],
        vec![ProviderName::Icypeas, ProviderName::Dropcontact],
    );

    let contact = new_contact(job_id, "Carol", "Nguyen", "Umbrella");
    captely_cascade::persistence::Repository::new(pool.clone())
        .insert_contact(&contact)
        .await
        .unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-1",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::Enriched);
    assert_eq!(outcome.contact.phone.as_deref(), Some("+14155556789"));
    assert_eq!(outcome.contact.enrichment_provider.as_deref(), Some("dropcontact"));
    assert_eq!(icypeas.call_count(), 1);
    assert_eq!(dropcontact.call_count(), 1);

    let entries = ctx.repo.get_ledger_entries("user-1").await.unwrap();
    let charge = entries
        .iter()
        .find(|e| e.provider.as_deref() == Some("dropcontact"))
        .expect("dropcontact charge recorded");
    assert!(charge.success);
    assert_eq!(charge.cost, 0.2);
}

#[sqlx::test]
async fn a_hit_at_or_above_tau_stop_short_circuits_the_remaining_providers(pool: PgPool) {
    provision_balance(&pool, "user-1", 100.0).await;
    let job_id = seed_job(&pool, "user-1", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![Ok(phone_hit(ProviderName::Icypeas, "+14155551234", 0.95))],
    );
    let dropcontact = StubAdapter::new(
        ProviderName::Dropcontact,
        0.2,
        captely_cascade::ProviderCapabilities::both(),
        vec![Ok(phone_hit(ProviderName::Dropcontact, "+14155556789", 0.99))],
    );

    let ctx = build_context(
        pool.clone(),
        vec![icypeas.as_adapter(), dropcontact.as_adapter()],
        vec![ProviderName::Icypeas, ProviderName::Dropcontact],
    );

    let contact = new_contact(job_id, "Dave", "Okafor", "Soylent");
    captely_cascade::persistence::Repository::new(pool.clone())
        .insert_contact(&contact)
        .await
        .unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-1",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::Enriched);
    assert_eq!(outcome.contact.phone.as_deref(), Some("+14155551234"));
    assert_eq!(icypeas.call_count(), 1);
    assert_eq!(dropcontact.call_count(), 0, "tau_stop should short-circuit the walk");
}

#[sqlx::test]
async fn a_quota_precheck_failure_fails_the_contact_and_still_audits_a_zero_cost_charge(pool: PgPool) {
    provision_balance(&pool, "user-1", 0.05).await;
    let job_id = seed_job(&pool, "user-1", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![Ok(phone_hit(ProviderName::Icypeas, "+14155551234", 0.95))],
    );

    let ctx = build_context(pool.clone(), vec![icypeas.as_adapter()], vec![ProviderName::Icypeas]);

    let contact = new_contact(job_id, "Eve", "Park", "Stark Industries");
    captely_cascade::persistence::Repository::new(pool.clone())
        .insert_contact(&contact)
        .await
        .unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-1",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::Failed);
    assert_eq!(outcome.contact.failure_reason, Some(FailureReason::QuotaExceeded));
    assert_eq!(icypeas.call_count(), 0, "the provider walk never runs after a precheck failure");

    let entries = ctx.repo.get_ledger_entries("user-1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].cost, 0.0);
    assert!(!entries[0].success);
}

#[sqlx::test]
async fn a_user_duplicate_cache_hit_resolves_without_consulting_any_provider(pool: PgPool) {
    provision_balance(&pool, "user-1", 100.0).await;
    let job_id = seed_job(&pool, "user-1", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![],
    );
    let ctx = build_context(pool.clone(), vec![icypeas.as_adapter()], vec![ProviderName::Icypeas]);

    let contact = new_contact(job_id, "Frank", "Liu", "Wayne Enterprises");
    let normalized = normalize_contact(
        &contact.first_name,
        &contact.last_name,
        &contact.company,
        None,
        None,
        None,
        None,
    );
    let fp = fingerprint(&normalized);

    ctx.repo
        .upsert_global_cache_entry(&CacheEntry {
            fingerprint: fp.clone(),
            email: None,
            phone: Some("+14155559999".to_string()),
            confidence: 0.95,
            source_provider: "dropcontact".to_string(),
            last_refreshed: chrono::Utc::now(),
            hit_count: 0,
        })
        .await
        .unwrap();
    ctx.repo
        .insert_user_contact_history(&UserContactHistory {
            user_id: "user-1".to_string(),
            fingerprint: fp,
            contact_id: uuid::Uuid::new_v4(),
            first_enriched_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    ctx.repo.insert_contact(&contact).await.unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-1",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::Enriched);
    assert_eq!(outcome.contact.phone.as_deref(), Some("+14155559999"));
    assert_eq!(
        outcome.contact.enrichment_provider.as_deref(),
        Some("cache_user_duplicate")
    );
    assert_eq!(icypeas.call_count(), 0);

    let entries = ctx.repo.get_ledger_entries("user-1").await.unwrap();
    let cache_charge = entries
        .iter()
        .find(|e| e.provider.as_deref() == Some("cache_user_duplicate"))
        .expect("user-duplicate cache hit recorded");
    assert_eq!(cache_charge.cost, 0.0);
}

#[sqlx::test]
async fn a_global_cache_hit_above_tau_min_charges_the_enrichment_unit_price_and_records_history(pool: PgPool) {
    provision_balance(&pool, "user-2", 100.0).await;
    let job_id = seed_job(&pool, "user-2", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![],
    );
    let ctx = build_context(pool.clone(), vec![icypeas.as_adapter()], vec![ProviderName::Icypeas]);

    let contact = new_contact(job_id, "Grace", "Kim", "LexCorp");
    let normalized = normalize_contact(
        &contact.first_name,
        &contact.last_name,
        &contact.company,
        None,
        None,
        None,
        None,
    );
    let fp = fingerprint(&normalized);

    ctx.repo
        .upsert_global_cache_entry(&CacheEntry {
            fingerprint: fp.clone(),
            email: None,
            phone: Some("+14155550000".to_string()),
            confidence: 0.85,
            source_provider: "hunter".to_string(),
            last_refreshed: chrono::Utc::now(),
            hit_count: 0,
        })
        .await
        .unwrap();

    ctx.repo.insert_contact(&contact).await.unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-2",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::Enriched);
    assert_eq!(outcome.contact.enrichment_provider.as_deref(), Some("cache_global"));
    assert_eq!(icypeas.call_count(), 0);

    let entries = ctx.repo.get_ledger_entries("user-2").await.unwrap();
    let cache_charge = entries
        .iter()
        .find(|e| e.provider.as_deref() == Some("cache_global"))
        .expect("global cache hit recorded");
    assert_eq!(cache_charge.cost, 0.5);

    let history = ctx.repo.get_user_contact_history("user-2", &fp).await.unwrap();
    assert!(history.is_some(), "a global cache hit should record user history so a repeat hit is free");
}

#[sqlx::test]
async fn a_provider_behind_a_forced_open_circuit_is_skipped(pool: PgPool) {
    provision_balance(&pool, "user-1", 100.0).await;
    let job_id = seed_job(&pool, "user-1", 1).await;

    let icypeas = StubAdapter::new(
        ProviderName::Icypeas,
        0.1,
        captely_cascade::ProviderCapabilities::both(),
        vec![Ok(phone_hit(ProviderName::Icypeas, "+14155551234", 0.95))],
    );

    let mut ctx = build_context(pool.clone(), vec![icypeas.as_adapter()], vec![ProviderName::Icypeas]);
    let ctx_mut = Arc::get_mut(&mut ctx).expect("sole owner before sharing");
    ctx_mut.providers[0].circuit = Arc::new(tokio::sync::Mutex::new(captely_cascade::CircuitBreaker {
        state: captely_cascade::CircuitState::Open,
        failure_count: 5,
        last_failure_time: Some(std::time::Instant::now()),
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(3600),
    }));

    let contact = new_contact(job_id, "Henry", "Osei", "Queen Consolidated");
    ctx.repo.insert_contact(&contact).await.unwrap();

    let deps = CascadeDeps {
        repo: &ctx.repo,
        cache: &ctx.cache,
        ledger: &ctx.ledger,
        rate_limiters: &ctx.rate_limiters,
        providers: &ctx.providers,
        hlr: None,
        cascade: &ctx.cascade_config,
        verification: &ctx.verification_config,
        events: &ctx.events,
        user_id: "user-1",
        quotas: unlimited_quotas(),
        cancellation: &CancellationToken::new(),
    };

    let outcome = CascadeCoordinator::run(contact, &deps).await.unwrap();
    assert_eq!(outcome.contact.enrichment_status, EnrichmentStatus::Failed);
    assert_eq!(icypeas.call_count(), 0, "a forced-open circuit must skip the provider entirely");
}
