//! Optional HLR (Home Location Register) lookup adapter.
//!
//! Pluggable provider obeying the ordinary [`ProviderAdapter`] contract
//! (spec §4.6) so it slots into the same rate-limiting/circuit-breaker
//! machinery as the enrichment providers rather than being a bespoke code
//! path. When not configured, `phone_verified` reflects parse/numbering-
//! plan validation only (see [`crate::providers::verification::phone`]).

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::core_types::provider::{
    Credits, LookupOutcome, NormalizedContact, ProviderAdapter, ProviderCapabilities,
    ProviderFailure, ProviderName, RateLimitSpec,
};
use crate::providers::http_common::{build_client, classify_request_error, classify_status};

#[derive(Debug, Deserialize)]
struct HlrResponse {
    status: String,
    #[serde(default)]
    confidence: f64,
}

pub struct HlrAdapter {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    cost: Credits,
    rate_limit: RateLimitSpec,
}

impl HlrAdapter {
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
impl ProviderAdapter for HlrAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Hlr
    }

    fn cost(&self) -> Credits {
        self.cost
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::phone_only()
    }

    fn rate_limit(&self) -> RateLimitSpec {
        self.rate_limit
    }

    async fn lookup(
        &self,
        contact: &NormalizedContact,
    ) -> Result<LookupOutcome, ProviderFailure> {
        // HLR needs a phone number to check, not the name/company shape
        // the other adapters discover from; the Coordinator only calls
        // this adapter after a phone has already been found.
        let Some(phone) = &contact.known_phone else {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Hlr,
            });
        };

        let response = self
            .http_client
            .get(format!("{}/hlr", self.base_url))
            .query(&[("msisdn", phone.as_str()), ("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| classify_request_error(ProviderName::Hlr, e))?;

        if let Some(failure) = classify_status(ProviderName::Hlr, response.status()) {
            return Err(failure);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Hlr,
                message: e.to_string(),
            })?;

        let parsed: HlrResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderFailure::InvalidResponse {
                provider: ProviderName::Hlr,
                message: e.to_string(),
            })?;

        if parsed.status != "connected" {
            return Err(ProviderFailure::NotFound {
                provider: ProviderName::Hlr,
            });
        }

        Ok(LookupOutcome {
            email: None,
            phone: Some(phone.clone()),
            confidence: parsed.confidence.clamp(0.0, 1.0),
            provider: ProviderName::Hlr,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::HlrConfig;

    fn settings(base_url: String) -> HlrConfig {
        HlrConfig {
            api_key: Some("test-key".to_string()),
            base_url,
            ..HlrConfig::default()
        }
    }

    fn contact_with_phone(phone: Option<&str>) -> NormalizedContact {
        NormalizedContact {
            first_name: "alice".to_string(),
            last_name: "martin".to_string(),
            company: "acme".to_string(),
            company_domain: None,
            profile_url: None,
            position: None,
            location: None,
            known_phone: phone.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn lookup_without_a_known_phone_is_not_found_without_any_http_call() {
        let server = MockServer::start().await;
        let adapter = HlrAdapter::new(&settings(server.uri()));
        let err = adapter.lookup(&contact_with_phone(None)).await.unwrap_err();
        assert!(matches!(err, ProviderFailure::NotFound { .. }));
    }

    #[tokio::test]
    async fn lookup_reports_connected_status_with_clamped_confidence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hlr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "connected",
                "confidence": 1.2
            })))
            .mount(&server)
            .await;

        let adapter = HlrAdapter::new(&settings(server.uri()));
        let outcome = adapter.lookup(&contact_with_phone(Some("+14155551234"))).await.unwrap();
        assert_eq!(outcome.phone.as_deref(), Some("+14155551234"));
        assert_eq!(outcome.confidence, 1.0);
    }

    #[tokio::test]
    async fn lookup_reports_not_found_for_a_disconnected_number() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hlr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "absent",
                "confidence": 0.0
            })))
            .mount(&server)
            .await;

        let adapter = HlrAdapter::new(&settings(server.uri()));
        let err = adapter.lookup(&contact_with_phone(Some("+14155551234"))).await.unwrap_err();
        assert!(matches!(err, ProviderFailure::NotFound { .. }));
    }
}
