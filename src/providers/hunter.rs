//! Hunter adapter. Hunter's email-finder API is email-only; it never
//! returns a phone number.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::core_types::provider::{
    Credits, LookupOutcome, NormalizedContact, ProviderAdapter, ProviderCapabilities,
    ProviderFailure, ProviderName, RateLimitSpec,
};
use crate::providers::http_common::{build_client, classify_request_error, classify_status};

#[derive(Debug, Deserialize)]
struct HunterEnvelope {
    data: HunterData,
}

#[derive(Debug, Deserialize)]
struct HunterData {
    email: Option<String>,
    score: Option<u32>,
}

pub struct HunterAdapter {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    cost: Credits,
    rate_limit: RateLimitSpec,
}

impl HunterAdapter {
    pub fn new(settings: &dyn ProviderSettings) -> Self {
        Self {
            http_client: build_client(std::time::Duration::from_secs(
                settings.call_timeout_seconds(),
            )),
            api_key: settings.api_key().unwrap_or_default().to_string(),
            base_url: settings.base_url().to_string(),
            cost: settings.cost(),
            rate_limit: settings.rate_limit(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for HunterAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Hunter
    }

    fn cost(&self) -> Credits {
        self.cost
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::email_only()
    }

    fn rate_limit(&self) -> RateLimitSpec {
        self.rate_limit
    }

    async fn lookup(
        &self,
        contact: &NormalizedContact,
    ) -> Result<LookupOutcome, ProviderFailure> {
        let Some(domain) = contact.company_domain.as_deref() else {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Hunter,
            });
        };

        let response = self
            .http_client
            .get(format!("{}/email-finder", self.base_url))
            .query(&[
                ("domain", domain),
                ("first_name", contact.first_name.as_str()),
                ("last_name", contact.last_name.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| classify_request_error(ProviderName::Hunter, e))?;

        if let Some(failure) = classify_status(ProviderName::Hunter, response.status()) {
            return Err(failure);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Hunter,
                message: e.to_string(),
            })?;

        let parsed: HunterEnvelope =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Hunter,
                message: e.to_string(),
            })?;

        let Some(email) = parsed.data.email else {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Hunter,
            });
        };

        let confidence = parsed.data.score.unwrap_or(50) as f64 / 100.0;

        Ok(LookupOutcome {
            email: Some(email),
            phone: None,
            confidence: confidence.clamp(0.0, 1.0),
            provider: ProviderName::Hunter,
            raw,
        })
    }
}
