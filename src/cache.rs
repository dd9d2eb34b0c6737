//! Two-layer cache: an in-memory `moka` layer in front of the Postgres-backed
//! global fingerprint cache and per-user duplicate history (spec §4.3 step 1
//! / §4.4 cache-hit billing).
//!
//! The in-memory layer exists purely to spare a round trip to Postgres for
//! fingerprints seen repeatedly within a short window (a CSV import of the
//! same list twice, or several users enriching overlapping contact lists in
//! the same minute); Postgres remains the source of truth and is always
//! written through.

use std::time::Duration;

use moka::future::Cache as MokaCache;

use crate::config::CacheConfig;
use crate::core_types::domain::{CacheEntry, UserContactHistory};
use crate::error::EngineResult;
use crate::logging::log_debug;
use crate::persistence::Repository;

const IN_MEMORY_TTL: Duration = Duration::from_secs(300);
const IN_MEMORY_CAPACITY: u64 = 100_000;

/// Front door for the Coordinator's cache-consult step. Holds a handle to
/// the repository and two read-through/write-through `moka` caches.
#[derive(Clone)]
pub struct CacheStore {
    repo: Repository,
    global: MokaCache<String, Option<CacheEntry>>,
    user_history: MokaCache<(String, String), Option<UserContactHistory>>,
    #[allow(dead_code)]
    config: CacheConfig,
}

impl CacheStore {
    pub fn new(repo: Repository, config: CacheConfig) -> Self {
        Self {
            repo,
            global: MokaCache::builder()
                .max_capacity(IN_MEMORY_CAPACITY)
                .time_to_live(IN_MEMORY_TTL)
                .build(),
            user_history: MokaCache::builder()
                .max_capacity(IN_MEMORY_CAPACITY)
                .time_to_live(IN_MEMORY_TTL)
                .build(),
            config,
        }
    }

    /// Step 1a: has this exact user already paid to enrich this fingerprint?
    pub async fn lookup_user_history(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> EngineResult<Option<UserContactHistory>> {
        let key = (user_id.to_string(), fingerprint.to_string());
        if let Some(hit) = self.user_history.get(&key).await {
            log_debug!(user_id, fingerprint, "User contact history served from memory");
            return Ok(hit);
        }
        let row = self.repo.get_user_contact_history(user_id, fingerprint).await?;
        self.user_history.insert(key, row.clone()).await;
        Ok(row)
    }

    /// Step 1b: has any user's prior cascade already resolved this
    /// fingerprint, at or above the acceptance threshold the caller checks?
    pub async fn lookup_global(&self, fingerprint: &str) -> EngineResult<Option<CacheEntry>> {
        if let Some(hit) = self.global.get(fingerprint).await {
            log_debug!(fingerprint, "Global cache entry served from memory");
            return Ok(hit);
        }
        let row = self.repo.get_global_cache_entry(fingerprint).await?;
        self.global.insert(fingerprint.to_string(), row.clone()).await;
        Ok(row)
    }

    /// Record that `user_id` has now paid for `fingerprint`, so a later
    /// duplicate submission within the same account is free.
    pub async fn record_user_history(&self, row: UserContactHistory) -> EngineResult<()> {
        self.repo.insert_user_contact_history(&row).await?;
        self.user_history
            .insert(
                (row.user_id.clone(), row.fingerprint.clone()),
                Some(row),
            )
            .await;
        Ok(())
    }

    /// Write through a fresh or improved cascade result into the global
    /// cache, available to every future user who hits this fingerprint.
    pub async fn upsert_global(&self, entry: CacheEntry) -> EngineResult<()> {
        self.repo.upsert_global_cache_entry(&entry).await?;
        self.global.insert(entry.fingerprint.clone(), Some(entry)).await;
        Ok(())
    }
}
