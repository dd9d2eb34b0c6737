//! Shared HTTP client construction and response handling for provider
//! adapters, generalized from the teacher's `openai_shared` module which
//! served the same role for OpenAI-compatible LLM providers.

use std::time::Duration;

use crate::core_types::provider::{ProviderFailure, ProviderName};

/// Build a `reqwest::Client` with the provider's per-call timeout applied,
/// the only place adapters configure their own HTTP timeout (spec §4.1:
/// adapters enforce their own per-call timeout; retry/backoff lives one
/// layer up, in the Coordinator).
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client configuration is static and always valid")
}

/// Translate a `reqwest::Error` into the closed [`ProviderFailure`]
/// taxonomy.
pub fn classify_request_error(provider: ProviderName, err: reqwest::Error) -> ProviderFailure {
    if err.is_timeout() || err.is_connect() {
        ProviderFailure::TransientNetwork {
            provider,
            message: err.to_string(),
        }
    } else {
        ProviderFailure::InvalidResponse {
            provider,
            message: err.to_string(),
        }
    }
}

/// Interpret an HTTP status code against the closed failure taxonomy.
/// Returns `None` if the status is a non-error (2xx) that the caller
/// should proceed to parse normally.
pub fn classify_status(
    provider: ProviderName,
    status: reqwest::StatusCode,
) -> Option<ProviderFailure> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 | 403 => ProviderFailure::Unauthorized { provider },
        404 => ProviderFailure::NotFound { provider },
        429 => ProviderFailure::RateLimited {
            provider,
            retry_after: None,
        },
        402 | 409 => ProviderFailure::QuotaExhaustedAtProvider { provider },
        500..=599 => ProviderFailure::TransientNetwork {
            provider,
            message: format!("server error {status}"),
        },
        _ => ProviderFailure::InvalidResponse {
            provider,
            message: format!("unexpected status {status}"),
        },
    })
}
