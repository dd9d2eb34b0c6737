//! Configuration types for the cascade engine.
//!
//! This module centralizes every environment-derived setting the engine
//! needs to boot: cascade thresholds, per-provider rate limits and cost,
//! verification toggles, worker pool sizing, quota defaults, and database
//! connectivity. Each provider has its own config type implementing
//! [`ProviderSettings`], mirroring how the teacher crate's `ProviderConfig`
//! trait lets each LLM provider carry its own shape behind a uniform
//! interface.
//!
//! # From Environment Variables
//!
//! ```rust,no_run
//! use captely_cascade::EngineConfig;
//!
//! let config = EngineConfig::from_env()?;
//! # Ok::<(), captely_cascade::EngineError>(())
//! ```

use std::any::Any;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::core_types::provider::{ProviderName, RateLimitSpec};
use crate::error::{EngineError, EngineResult};
use crate::logging::log_debug;

/// Trait for provider-specific rate limit, cost, and credential settings.
///
/// You typically don't need to implement this yourself unless adding a
/// custom provider.
pub trait ProviderSettings: Send + Sync + Debug + Any {
    /// Stable provider identity.
    fn name(&self) -> ProviderName;

    /// Static per-call cost in credits.
    fn cost(&self) -> f64;

    /// Token bucket parameters for this provider.
    fn rate_limit(&self) -> RateLimitSpec;

    /// Per-call timeout.
    fn call_timeout_seconds(&self) -> u64;

    /// API key, if this provider requires one.
    fn api_key(&self) -> Option<&str>;

    /// Base URL for API requests.
    fn base_url(&self) -> &str;

    /// Validate that the configuration is complete.
    fn validate(&self) -> EngineResult<()>;

    /// Downcast helper for accessing concrete config types.
    fn as_any(&self) -> &dyn Any;
}

macro_rules! provider_settings_config {
    ($ty:ident, $name:expr, $default_base_url:expr, $default_cost:expr, $default_max_per_minute:expr, $default_burst:expr, $env_prefix:expr) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $ty {
            pub api_key: Option<String>,
            pub base_url: String,
            pub cost: f64,
            pub max_per_minute: u32,
            pub burst: u32,
            pub call_timeout_seconds: u64,
        }

        impl Default for $ty {
            fn default() -> Self {
                Self {
                    api_key: None,
                    base_url: $default_base_url.to_string(),
                    cost: $default_cost,
                    max_per_minute: $default_max_per_minute,
                    burst: $default_burst,
                    call_timeout_seconds: 10,
                }
            }
        }

        impl ProviderSettings for $ty {
            fn name(&self) -> ProviderName {
                $name
            }

            fn cost(&self) -> f64 {
                self.cost
            }

            fn rate_limit(&self) -> RateLimitSpec {
                RateLimitSpec {
                    max_per_minute: self.max_per_minute,
                    burst: self.burst,
                }
            }

            fn call_timeout_seconds(&self) -> u64 {
                self.call_timeout_seconds
            }

            fn api_key(&self) -> Option<&str> {
                self.api_key.as_deref()
            }

            fn base_url(&self) -> &str {
                &self.base_url
            }

            fn validate(&self) -> EngineResult<()> {
                if self.api_key.is_none() {
                    return Err(EngineError::invalid_input(format!(
                        "{} API key is required",
                        $name
                    )));
                }
                Ok(())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        impl $ty {
            fn from_env() -> Self {
                let mut config = Self::default();
                if let Ok(key) = std::env::var(concat!($env_prefix, "_API_KEY")) {
                    config.api_key = Some(key);
                }
                if let Ok(url) = std::env::var(concat!($env_prefix, "_BASE_URL")) {
                    config.base_url = url;
                }
                if let Ok(cost) = std::env::var(concat!($env_prefix, "_COST")) {
                    if let Ok(parsed) = cost.parse() {
                        config.cost = parsed;
                    }
                }
                if let Ok(max) = std::env::var(concat!($env_prefix, "_MAX_PER_MINUTE")) {
                    if let Ok(parsed) = max.parse() {
                        config.max_per_minute = parsed;
                    }
                }
                if let Ok(burst) = std::env::var(concat!($env_prefix, "_BURST")) {
                    if let Ok(parsed) = burst.parse() {
                        config.burst = parsed;
                    }
                }
                config
            }
        }
    };
}

provider_settings_config!(
    IcypeasConfig,
    ProviderName::Icypeas,
    "https://app.icypeas.com/api",
    0.1,
    60,
    10,
    "ICYPEAS"
);
provider_settings_config!(
    DropcontactConfig,
    ProviderName::Dropcontact,
    "https://api.dropcontact.io",
    0.2,
    30,
    5,
    "DROPCONTACT"
);
provider_settings_config!(
    HunterConfig,
    ProviderName::Hunter,
    "https://api.hunter.io/v2",
    0.3,
    15,
    3,
    "HUNTER"
);
provider_settings_config!(
    ApolloConfig,
    ProviderName::Apollo,
    "https://api.apollo.io/v1",
    0.4,
    50,
    10,
    "APOLLO"
);
provider_settings_config!(
    HlrConfig,
    ProviderName::Hlr,
    "https://api.hlr-lookups.com/v2",
    0.05,
    60,
    10,
    "HLR"
);

/// Cascade traversal thresholds and ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Provider names in ascending cost order.
    pub order: Vec<ProviderName>,
    /// Confidence required to accept a result (default 0.70).
    pub tau_min: f64,
    /// Confidence at which the cascade short-circuits (default 0.90).
    pub tau_stop: f64,
    /// Per-contact deadline across the whole cascade walk (default 45s).
    pub contact_deadline_seconds: u64,
    /// What a global-cache hit bills the user (spec §4.4: the business
    /// charges for the result, not the API call that originally produced
    /// it).
    pub enrichment_unit_price: f64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            order: vec![
                ProviderName::Icypeas,
                ProviderName::Dropcontact,
                ProviderName::Hunter,
                ProviderName::Apollo,
            ],
            tau_min: 0.70,
            tau_stop: 0.90,
            contact_deadline_seconds: 45,
            enrichment_unit_price: 0.5,
        }
    }
}

/// Email/phone verification toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Whether the L4 SMTP probe runs. Defaults to the letter of the spec
    /// (`true`); production deployments in shared hosting environments
    /// should set this to `false` to avoid anti-spam greylisting.
    pub smtp_enabled: bool,
    /// The envelope-from address used in the `MAIL FROM` step of the probe.
    pub smtp_probe_from: String,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            smtp_enabled: true,
            smtp_probe_from: "verify@captely.com".to_string(),
        }
    }
}

/// Default per-user quota ceilings, used when a user's plan does not
/// specify an override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub daily_default: Option<f64>,
    pub monthly_default: Option<f64>,
    pub per_provider_month_default: Option<f64>,
    /// Balance below which a `LowCredit` event is emitted.
    pub low_credit_threshold: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_default: None,
            monthly_default: None,
            per_provider_month_default: None,
            low_credit_threshold: 5.0,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get() * 4,
            queue_capacity: 1_000,
        }
    }
}

/// Cache staleness policy. No auto-expiry by default (§9 Open Question);
/// `staleness_days` is surfaced so a future policy layer can act on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    pub staleness_days: Option<u32>,
}

/// Database connectivity settings, part of the ambient stack the
/// distillation omitted but a real service needs to boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/captely".to_string(),
            max_connections: 10,
        }
    }
}

/// Structured logging verbosity, read once at boot the same way
/// `LLMConfig::from_env` is documented as the only place environment
/// variables are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level engine configuration, analogous to the teacher's `LLMConfig`
/// but aggregating settings for every component rather than a single
/// provider.
#[derive(Debug)]
pub struct EngineConfig {
    pub providers: Vec<Box<dyn ProviderSettings>>,
    /// HLR phone-verification settings, present only when `HLR_API_KEY` is
    /// set. Unlike the cascade providers, a missing key just disables the
    /// refinement step rather than failing boot (spec §4.6: "when
    /// unavailable, phone_verified reflects parse/plan validation only").
    pub hlr: Option<HlrConfig>,
    pub cascade: CascadeConfig,
    pub verification: VerificationConfig,
    pub quota: QuotaConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Clone provider settings by downcasting to each concrete type, the
    /// same pattern `LLMConfig::clone_provider` uses to keep `Box<dyn
    /// ProviderSettings>` cloneable without a supertrait.
    fn clone_providers(&self) -> Vec<Box<dyn ProviderSettings>> {
        self.providers
            .iter()
            .map(|p| {
                let any_ref = p.as_any();
                if let Some(c) = any_ref.downcast_ref::<IcypeasConfig>() {
                    return Box::new(c.clone()) as Box<dyn ProviderSettings>;
                }
                if let Some(c) = any_ref.downcast_ref::<DropcontactConfig>() {
                    return Box::new(c.clone()) as Box<dyn ProviderSettings>;
                }
                if let Some(c) = any_ref.downcast_ref::<HunterConfig>() {
                    return Box::new(c.clone()) as Box<dyn ProviderSettings>;
                }
                if let Some(c) = any_ref.downcast_ref::<ApolloConfig>() {
                    return Box::new(c.clone()) as Box<dyn ProviderSettings>;
                }
                unreachable!("unknown provider settings type - all are handled above")
            })
            .collect()
    }

    /// Look up one provider's settings by name.
    pub fn provider(&self, name: ProviderName) -> Option<&dyn ProviderSettings> {
        self.providers.iter().find(|p| p.name() == name).map(|b| b.as_ref())
    }

    /// Load configuration from environment variables.
    ///
    /// This is the ONLY method that should access environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] if a provider's required
    /// credentials are missing.
    pub fn from_env() -> EngineResult<Self> {
        log_debug!("Loading engine configuration from environment");

        let providers: Vec<Box<dyn ProviderSettings>> = vec![
            Box::new(IcypeasConfig::from_env()),
            Box::new(DropcontactConfig::from_env()),
            Box::new(HunterConfig::from_env()),
            Box::new(ApolloConfig::from_env()),
        ];

        for provider in &providers {
            provider.validate()?;
        }

        let hlr = std::env::var("HLR_API_KEY").ok().map(|_| HlrConfig::from_env());

        let verification = VerificationConfig {
            smtp_enabled: std::env::var("VERIFICATION_SMTP_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            smtp_probe_from: std::env::var("VERIFICATION_SMTP_PROBE_FROM")
                .unwrap_or_else(|_| "verify@captely.com".to_string()),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DatabaseConfig::default().url),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        };

        let logging = LoggingConfig {
            level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        };

        log_debug!(
            providers = providers.len(),
            smtp_enabled = verification.smtp_enabled,
            "Engine configuration loaded and validated"
        );

        Ok(Self {
            providers,
            hlr,
            cascade: CascadeConfig::default(),
            verification,
            quota: QuotaConfig::default(),
            worker: WorkerConfig::default(),
            cache: CacheConfig::default(),
            database,
            logging,
        })
    }
}

impl Clone for EngineConfig {
    fn clone(&self) -> Self {
        Self {
            providers: self.clone_providers(),
            hlr: self.hlr.clone(),
            cascade: self.cascade.clone(),
            verification: self.verification.clone(),
            quota: self.quota,
            worker: self.worker,
            cache: self.cache,
            database: self.database.clone(),
            logging: self.logging.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::error::ErrorCategory;

    fn clear_env() {
        for var in [
            "ICYPEAS_API_KEY",
            "DROPCONTACT_API_KEY",
            "HUNTER_API_KEY",
            "APOLLO_API_KEY",
            "HLR_API_KEY",
            "DATABASE_URL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn from_env_fails_validation_when_a_cascade_provider_key_is_missing() {
        clear_env();
        std::env::set_var("DROPCONTACT_API_KEY", "x");
        std::env::set_var("HUNTER_API_KEY", "x");
        std::env::set_var("APOLLO_API_KEY", "x");
        let err = EngineConfig::from_env().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Client);
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_leaves_hlr_absent_when_its_key_is_not_set() {
        clear_env();
        for var in ["ICYPEAS_API_KEY", "DROPCONTACT_API_KEY", "HUNTER_API_KEY", "APOLLO_API_KEY"] {
            std::env::set_var(var, "x");
        }
        let config = EngineConfig::from_env().unwrap();
        assert!(config.hlr.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_builds_hlr_settings_when_its_key_is_set() {
        clear_env();
        for var in ["ICYPEAS_API_KEY", "DROPCONTACT_API_KEY", "HUNTER_API_KEY", "APOLLO_API_KEY", "HLR_API_KEY"] {
            std::env::set_var(var, "x");
        }
        let config = EngineConfig::from_env().unwrap();
        assert!(config.hlr.is_some());
        assert_eq!(config.hlr.unwrap().name(), ProviderName::Hlr);
        clear_env();
    }

    #[test]
    fn clone_providers_preserves_every_concrete_settings_type() {
        let config = EngineConfig {
            providers: vec![
                Box::new(IcypeasConfig::default()),
                Box::new(DropcontactConfig::default()),
                Box::new(HunterConfig::default()),
                Box::new(ApolloConfig::default()),
            ],
            hlr: None,
            cascade: CascadeConfig::default(),
            verification: VerificationConfig::default(),
            quota: QuotaConfig::default(),
            worker: WorkerConfig::default(),
            cache: CacheConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        };
        let cloned = config.clone();
        assert_eq!(cloned.providers.len(), 4);
        assert!(cloned.provider(ProviderName::Apollo).is_some());
    }

    #[test]
    fn cascade_config_defaults_match_the_documented_thresholds() {
        let cascade = CascadeConfig::default();
        assert_eq!(cascade.tau_min, 0.70);
        assert_eq!(cascade.tau_stop, 0.90);
        assert_eq!(
            cascade.order,
            vec![
                ProviderName::Icypeas,
                ProviderName::Dropcontact,
                ProviderName::Hunter,
                ProviderName::Apollo,
            ]
        );
    }
}
