//! Integration tests for `CacheStore`'s read-through/write-through behavior
//! against a real Postgres schema.

mod common;

use captely_cascade::config::CacheConfig;
use captely_cascade::core_types::domain::{CacheEntry, UserContactHistory};
use captely_cascade::persistence::Repository;
use captely_cascade::CacheStore;
use sqlx::PgPool;
use uuid::Uuid;

#[sqlx::test]
async fn lookup_global_misses_then_hits_after_an_upsert(pool: PgPool) {
    let repo = Repository::new(pool.clone());
    let cache = CacheStore::new(repo, CacheConfig::default());

    assert!(cache.lookup_global("fp-1").await.unwrap().is_none());

    cache
        .upsert_global(CacheEntry {
            fingerprint: "fp-1".to_string(),
            email: Some("alice@acme.com".to_string()),
            phone: None,
            confidence: 0.9,
            source_provider: "dropcontact".to_string(),
            last_refreshed: chrono::Utc::now(),
            hit_count: 0,
        })
        .await
        .unwrap();

    let hit = cache.lookup_global("fp-1").await.unwrap().unwrap();
    assert_eq!(hit.email.as_deref(), Some("alice@acme.com"));
    assert_eq!(hit.confidence, 0.9);
}

#[sqlx::test]
async fn upsert_global_never_downgrades_confidence_or_the_fields_that_earned_it(pool: PgPool) {
    let repo = Repository::new(pool.clone());
    let cache = CacheStore::new(repo, CacheConfig::default());

    cache
        .upsert_global(CacheEntry {
            fingerprint: "fp-2".to_string(),
            email: Some("bob@initech.com".to_string()),
            phone: None,
            confidence: 0.9,
            source_provider: "dropcontact".to_string(),
            last_refreshed: chrono::Utc::now(),
            hit_count: 0,
        })
        .await
        .unwrap();

    cache
        .upsert_global(CacheEntry {
            fingerprint: "fp-2".to_string(),
            email: Some("bob@low-confidence.com".to_string()),
            phone: None,
            confidence: 0.3,
            source_provider: "icypeas".to_string(),
            last_refreshed: chrono::Utc::now(),
            hit_count: 0,
        })
        .await
        .unwrap();

    let entry = cache.lookup_global("fp-2").await.unwrap().unwrap();
    assert_eq!(entry.confidence, 0.9, "confidence is a running max, never downgraded");
    assert_eq!(entry.email.as_deref(), Some("bob@initech.com"));
    assert_eq!(entry.source_provider, "dropcontact");
    assert_eq!(entry.hit_count, 2);
}

#[sqlx::test]
async fn lookup_user_history_misses_then_hits_after_recording(pool: PgPool) {
    let repo = Repository::new(pool.clone());
    let cache = CacheStore::new(repo, CacheConfig::default());

    assert!(cache.lookup_user_history("user-1", "fp-3").await.unwrap().is_none());

    let contact_id = Uuid::new_v4();
    cache
        .record_user_history(UserContactHistory {
            user_id: "user-1".to_string(),
            fingerprint: "fp-3".to_string(),
            contact_id,
            first_enriched_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let hit = cache.lookup_user_history("user-1", "fp-3").await.unwrap().unwrap();
    assert_eq!(hit.contact_id, contact_id);
}

#[sqlx::test]
async fn user_history_is_scoped_per_user_not_shared_across_accounts(pool: PgPool) {
    let repo = Repository::new(pool.clone());
    let cache = CacheStore::new(repo, CacheConfig::default());

    cache
        .record_user_history(UserContactHistory {
            user_id: "user-1".to_string(),
            fingerprint: "fp-4".to_string(),
            contact_id: Uuid::new_v4(),
            first_enriched_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    assert!(cache.lookup_user_history("user-2", "fp-4").await.unwrap().is_none());
}
