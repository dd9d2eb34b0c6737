//! Per-provider token bucket rate limiting.
//!
//! One `governor::RateLimiter` per provider, keyed by [`ProviderName`].
//! Acquisition is non-blocking with a caller-supplied deadline (spec §4.2):
//! on a denial, the registry either sleeps until the wait fits inside the
//! deadline, or returns [`ProviderFailure::RateLimited`] immediately if it
//! doesn't.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{Quota, RateLimiter as GovernorLimiter};
use tokio::sync::Mutex;

use crate::core_types::provider::{ProviderFailure, ProviderName, RateLimitSpec};
use crate::logging::log_debug;

type GovernorInner = GovernorLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A registry of one token bucket per provider.
///
/// Process-wide shared state (spec §4.2): when horizontally scaled, each
/// process gets an independent bucket sized to its share via
/// [`RateLimitSpec`]; distributed limiting is a future concern, not
/// implemented here.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    buckets: HashMap<ProviderName, Arc<GovernorInner>>,
}

impl RateLimiterRegistry {
    /// Build a registry with one bucket per entry in `specs`.
    pub fn new(specs: &[(ProviderName, RateLimitSpec)]) -> Self {
        let mut buckets = HashMap::with_capacity(specs.len());
        for (provider, spec) in specs {
            buckets.insert(*provider, Arc::new(Self::build_limiter(*spec)));
        }
        Self { buckets }
    }

    fn build_limiter(spec: RateLimitSpec) -> GovernorInner {
        let per_minute = NonZeroU32::new(spec.max_per_minute.max(1)).unwrap();
        let burst = NonZeroU32::new(spec.burst.max(1)).unwrap();
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        GovernorLimiter::direct(quota)
    }

    /// Acquire a token for `provider`, waiting at most until `deadline`
    /// (an absolute instant). Returns `Ok(())` once a token is granted, or
    /// `ProviderFailure::RateLimited` if the bucket cannot grant one within
    /// the deadline.
    pub async fn acquire(
        &self,
        provider: ProviderName,
        deadline: Instant,
    ) -> Result<(), ProviderFailure> {
        let Some(bucket) = self.buckets.get(&provider) else {
            // No configured bucket means no limiting is applied.
            return Ok(());
        };

        match bucket.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(governor::clock::DefaultClock::default().now());
                let now = Instant::now();
                if now + wait > deadline {
                    log_debug!(
                        provider = %provider,
                        wait_ms = wait.as_millis(),
                        "Rate limiter denied request, wait exceeds caller deadline"
                    );
                    return Err(ProviderFailure::RateLimited {
                        provider,
                        retry_after: Some(wait),
                    });
                }
                tokio::time::sleep(wait).await;
                bucket.check().map_err(|_| ProviderFailure::RateLimited {
                    provider,
                    retry_after: Some(Duration::from_millis(50)),
                })
            }
        }
    }
}

/// Wraps [`RateLimiterRegistry`] behind a mutex so it can be shared and
/// reconfigured (e.g. in tests) without requiring `&mut` at every call
/// site; `governor`'s own limiter is lock-free internally, the mutex here
/// only guards registry construction/replacement.
#[derive(Debug, Clone)]
pub struct SharedRateLimiterRegistry {
    inner: Arc<Mutex<Arc<RateLimiterRegistry>>>,
}

impl SharedRateLimiterRegistry {
    pub fn new(registry: RateLimiterRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(registry))),
        }
    }

    pub async fn acquire(
        &self,
        provider: ProviderName,
        deadline: Instant,
    ) -> Result<(), ProviderFailure> {
        let registry = self.inner.lock().await.clone();
        registry.acquire(provider, deadline).await
    }
}
