//! Apollo adapter: most expensive provider in the default cascade order,
//! used as the last resort before falling through to `not_found`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::core_types::provider::{
    Credits, LookupOutcome, NormalizedContact, ProviderAdapter, ProviderCapabilities,
    ProviderFailure, ProviderName, RateLimitSpec,
};
use crate::providers::http_common::{build_client, classify_request_error, classify_status};

#[derive(Debug, Serialize)]
struct ApolloMatchRequest<'a> {
    first_name: &'a str,
    last_name: &'a str,
    organization_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<&'a str>,
    reveal_personal_emails: bool,
}

#[derive(Debug, Deserialize)]
struct ApolloMatchResponse {
    person: Option<ApolloPerson>,
}

#[derive(Debug, Deserialize)]
struct ApolloPerson {
    email: Option<String>,
    #[serde(default)]
    phone_numbers: Vec<ApolloPhone>,
    email_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApolloPhone {
    sanitized_number: String,
}

pub struct ApolloAdapter {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    cost: Credits,
    rate_limit: RateLimitSpec,
}

impl ApolloAdapter {
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

    fn email_status_to_confidence(status: Option<&str>) -> f64 {
        match status {
            Some("verified") => 0.9,
            Some("guessed") => 0.55,
            Some("unavailable") => 0.0,
            _ => 0.4,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ApolloAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Apollo
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
        let request = ApolloMatchRequest {
            first_name: &contact.first_name,
            last_name: &contact.last_name,
            organization_name: &contact.company,
            domain: contact.company_domain.as_deref(),
            reveal_personal_emails: false,
        };

        let response = self
            .http_client
            .post(format!("{}/people/match", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_request_error(ProviderName::Apollo, e))?;

        if let Some(failure) = classify_status(ProviderName::Apollo, response.status()) {
            return Err(failure);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Apollo,
                message: e.to_string(),
            })?;

        let parsed: ApolloMatchResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Apollo,
                message: e.to_string(),
            })?;

        let Some(person) = parsed.person else {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Apollo,
            });
        };

        if person.email.is_none() && person.phone_numbers.is_empty() {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Apollo,
            });
        }

        let confidence = Self::email_status_to_confidence(person.email_status.as_deref())
            .max(if person.phone_numbers.is_empty() { 0.0 } else { 0.6 });

        Ok(LookupOutcome {
            email: person.email,
            phone: person.phone_numbers.into_iter().next().map(|p| p.sanitized_number),
            confidence: confidence.clamp(0.0, 1.0),
            provider: ProviderName::Apollo,
            raw,
        })
    }
}
