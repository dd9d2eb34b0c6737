//! Input normalization and fingerprint hashing.
//!
//! Normalization is for matching only; it never mutates stored values.
//! `normalize(normalize(x)) == normalize(x)` for every function here
//! (Testable Property 7).

use sha2::{Digest, Sha256};

use crate::core_types::provider::NormalizedContact;

/// Case-fold and trim a name or company for matching purposes.
pub fn normalize_text(input: &str) -> String {
    input.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize a LinkedIn profile URL: force `https`, lowercase the host,
/// strip the trailing slash and any query string (tracking parameters).
pub fn normalize_profile_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_scheme = trimmed
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let without_query = without_scheme.split(['?', '#']).next().unwrap_or(without_scheme);
    let lowered = without_query.to_lowercase();
    let trimmed_slash = lowered.trim_end_matches('/');
    if trimmed_slash.is_empty() {
        return None;
    }
    Some(format!("https://{trimmed_slash}"))
}

/// Build a [`NormalizedContact`] from raw contact fields, normalizing the
/// name/company for matching while leaving stored values untouched by the
/// caller.
pub fn normalize_contact(
    first_name: &str,
    last_name: &str,
    company: &str,
    company_domain: Option<&str>,
    profile_url: Option<&str>,
    position: Option<&str>,
    location: Option<&str>,
) -> NormalizedContact {
    NormalizedContact {
        first_name: normalize_text(first_name),
        last_name: normalize_text(last_name),
        company: normalize_text(company),
        company_domain: company_domain.map(|d| d.trim().to_lowercase()),
        profile_url: profile_url.and_then(normalize_profile_url),
        position: position.map(|p| p.trim().to_string()),
        location: location.map(|l| l.trim().to_string()),
        known_phone: None,
    }
}

/// Deterministic hash over normalized identifying fields, used as the
/// global cache key. If a profile URL is present it contributes an
/// additional equivalence class (the same person can be looked up either
/// by name+company or by profile URL and land on the same fingerprint
/// family, though the two classes are stored under distinct keys).
pub fn fingerprint(contact: &NormalizedContact) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contact.first_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(contact.last_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(contact.company.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of the profile-URL equivalence class, when a profile URL is
/// present.
pub fn fingerprint_by_profile_url(contact: &NormalizedContact) -> Option<String> {
    contact.profile_url.as_ref().map(|url| {
        let mut hasher = Sha256::new();
        hasher.update(b"profile_url\0");
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    })
}
