//! Dropcontact adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::core_types::provider::{
    Credits, LookupOutcome, NormalizedContact, ProviderAdapter, ProviderCapabilities,
    ProviderFailure, ProviderName, RateLimitSpec,
};
use crate::providers::http_common::{build_client, classify_request_error, classify_status};

#[derive(Debug, Serialize)]
struct DropcontactRequest<'a> {
    data: [DropcontactDataEntry<'a>; 1],
}

#[derive(Debug, Serialize)]
struct DropcontactDataEntry<'a> {
    first_name: &'a str,
    last_name: &'a str,
    company: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    website: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DropcontactResult {
    email: Option<Vec<DropcontactEmail>>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DropcontactEmail {
    email: String,
    qualification: String,
}

#[derive(Debug, Deserialize)]
struct DropcontactResponse {
    data: Vec<DropcontactResult>,
}

pub struct DropcontactAdapter {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    cost: Credits,
    rate_limit: RateLimitSpec,
}

impl DropcontactAdapter {
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

    fn qualification_to_confidence(qualification: &str) -> f64 {
        match qualification {
            "nominative@pro" => 0.95,
            "nominative@pro_shared" => 0.8,
            "pro" => 0.6,
            _ => 0.4,
        }
    }
}

#[async_trait]
impl ProviderAdapter for DropcontactAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Dropcontact
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
        let request = DropcontactRequest {
            data: [DropcontactDataEntry {
                first_name: &contact.first_name,
                last_name: &contact.last_name,
                company: &contact.company,
                website: contact.company_domain.as_deref(),
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/batch", self.base_url))
            .header("X-Access-Token", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_request_error(ProviderName::Dropcontact, e))?;

        if let Some(failure) = classify_status(ProviderName::Dropcontact, response.status()) {
            return Err(failure);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Dropcontact,
                message: e.to_string(),
            })?;

        let parsed: DropcontactResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Dropcontact,
                message: e.to_string(),
            })?;

        let Some(result) = parsed.data.into_iter().next() else {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Dropcontact,
            });
        };

        let best_email = result
            .email
            .unwrap_or_default()
            .into_iter()
            .max_by(|a, b| {
                Self::qualification_to_confidence(&a.qualification)
                    .partial_cmp(&Self::qualification_to_confidence(&b.qualification))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let confidence = best_email
            .as_ref()
            .map(|e| Self::qualification_to_confidence(&e.qualification))
            .unwrap_or(0.0);

        if best_email.is_none() && result.phone.is_none() {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Dropcontact,
            });
        }

        Ok(LookupOutcome {
            email: best_email.map(|e| e.email),
            phone: result.phone,
            confidence,
            provider: ProviderName::Dropcontact,
            raw,
        })
    }
}
