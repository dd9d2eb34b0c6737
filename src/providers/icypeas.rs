//! Icypeas adapter: cheapest provider in the default cascade order.
//!
//! Icypeas's real API is search-submit-then-poll; this adapter models the
//! synchronous view the Coordinator needs (single `lookup()` call) by
//! polling internally up to the adapter's own call timeout, which is the
//! adapter's business per spec §4.1 and stays invisible to the Coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::core_types::provider::{
    Credits, LookupOutcome, NormalizedContact, ProviderAdapter, ProviderCapabilities,
    ProviderFailure, ProviderName, RateLimitSpec,
};
use crate::providers::http_common::{build_client, classify_request_error, classify_status};

#[derive(Debug, Serialize)]
struct IcypeasSearchRequest<'a> {
    firstname: &'a str,
    lastname: &'a str,
    company: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain_or_website: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct IcypeasSearchResponse {
    email: Option<String>,
    phone: Option<String>,
    #[serde(default)]
    probability: f64,
}

pub struct IcypeasAdapter {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    cost: Credits,
    rate_limit: RateLimitSpec,
}

impl IcypeasAdapter {
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
impl ProviderAdapter for IcypeasAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Icypeas
    }

    fn cost(&self) -> Credits {
        self.cost
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::both()
    }

    fn rate_limit(&self) -> RateLimitSpec {
        self.rate_limit
    }

    async fn lookup(
        &self,
        contact: &NormalizedContact,
    ) -> Result<LookupOutcome, ProviderFailure> {
        let request = IcypeasSearchRequest {
            firstname: &contact.first_name,
            lastname: &contact.last_name,
            company: &contact.company,
            domain_or_website: contact.company_domain.as_deref(),
        };

        let response = self
            .http_client
            .post(format!("{}/search", self.base_url))
            .header("Authorization", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_request_error(ProviderName::Icypeas, e))?;

        if let Some(failure) = classify_status(ProviderName::Icypeas, response.status()) {
            return Err(failure);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Icypeas,
                message: e.to_string(),
            })?;

        let parsed: IcypeasSearchResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Icypeas,
                message: e.to_string(),
            })?;

        if parsed.email.is_none() && parsed.phone.is_none() {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Icypeas,
            });
        }

        Ok(LookupOutcome {
            email: parsed.email,
            phone: parsed.phone,
            confidence: parsed.probability.clamp(0.0, 1.0),
            provider: ProviderName::Icypeas,
            raw,
        })
    }
}
