//! Phone parsing and classification (spec §4.6).
//!
//! Parses to E.164 using a country hint derived from the company domain's
//! TLD or the contact's location, then classifies via `phonenumber`'s own
//! `number_type()` with a fallback to an embedded numbering-plan table for
//! ranges the crate reports as unknown.

use phonenumber::country::Id as CountryId;
use phonenumber::PhoneNumber;

use crate::core_types::domain::PhoneType;

/// Outcome of parsing and classifying one phone number.
#[derive(Debug, Clone)]
pub struct PhoneVerificationOutcome {
    pub e164: Option<String>,
    pub phone_type: PhoneType,
    pub verified: bool,
    pub country: Option<String>,
}

/// A handful of TLD/ccTLD to ISO country mappings used to derive a parsing
/// hint from a company domain when no explicit location is given. Not
/// exhaustive; the numbering plan fallback still applies per-number.
const TLD_COUNTRY_HINTS: &[(&str, CountryId)] = &[
    ("fr", CountryId::FR),
    ("de", CountryId::DE),
    ("uk", CountryId::GB),
    ("es", CountryId::ES),
    ("it", CountryId::IT),
    ("nl", CountryId::NL),
    ("be", CountryId::BE),
    ("ch", CountryId::CH),
    ("ca", CountryId::CA),
    ("au", CountryId::AU),
    ("us", CountryId::US),
];

/// A small embedded numbering-plan fallback: country calling code prefix
/// to the set of ranges typically allocated to mobile numbers, used only
/// when `phonenumber::number_type()` itself reports `Unknown`.
const MOBILE_PREFIX_FALLBACK: &[(&str, &[&str])] = &[
    ("33", &["6", "7"]),       // France
    ("44", &["7"]),            // UK
    ("49", &["15", "16", "17"]), // Germany
    ("1", &[]),                // NANP: mobile/landline are indistinguishable by number alone
];

fn country_hint_from_domain(domain: Option<&str>) -> Option<CountryId> {
    let domain = domain?;
    let tld = domain.rsplit('.').next()?;
    TLD_COUNTRY_HINTS
        .iter()
        .find(|(suffix, _)| suffix.eq_ignore_ascii_case(tld))
        .map(|(_, id)| *id)
}

fn country_hint_from_location(location: Option<&str>) -> Option<CountryId> {
    let location = location?.to_lowercase();
    TLD_COUNTRY_HINTS
        .iter()
        .find(|(_, id)| location.contains(&format!("{id:?}").to_lowercase()))
        .map(|(_, id)| *id)
}

fn classify_via_fallback(number: &PhoneNumber) -> PhoneType {
    let national = number.national().to_string();
    let code = number.code().value().to_string();
    let Some((_, prefixes)) = MOBILE_PREFIX_FALLBACK.iter().find(|(cc, _)| *cc == code) else {
        return PhoneType::Unknown;
    };
    if prefixes.iter().any(|p| national.starts_with(p)) {
        PhoneType::Mobile
    } else if prefixes.is_empty() {
        PhoneType::Unknown
    } else {
        PhoneType::Landline
    }
}

/// Classify via `phonenumber`'s own numbering-plan metadata first; the
/// embedded prefix table only covers ranges the crate itself can't place.
fn classify_phone_type(number: &PhoneNumber) -> PhoneType {
    match number.number_type() {
        phonenumber::Type::Mobile => PhoneType::Mobile,
        phonenumber::Type::FixedLine => PhoneType::Landline,
        phonenumber::Type::Voip => PhoneType::Voip,
        _ => classify_via_fallback(number),
    }
}

/// Parse `raw` to E.164 and classify it. `phone_verified` iff parsing
/// succeeds and the number is allocated in the numbering plan
/// (`phonenumber::is_valid`).
pub fn classify_phone(
    raw: &str,
    company_domain: Option<&str>,
    location: Option<&str>,
) -> PhoneVerificationOutcome {
    let hint = country_hint_from_domain(company_domain).or_else(|| country_hint_from_location(location));

    let parsed = phonenumber::parse(hint, raw);
    let Ok(number) = parsed else {
        return PhoneVerificationOutcome {
            e164: None,
            phone_type: PhoneType::Unknown,
            verified: false,
            country: hint.map(|c| format!("{c:?}")),
        };
    };

    let is_valid = phonenumber::is_valid(&number);
    let phone_type = classify_phone_type(&number);

    PhoneVerificationOutcome {
        e164: Some(number.format().mode(phonenumber::Mode::E164).to_string()),
        phone_type,
        verified: is_valid,
        country: number.country().id().map(|c| format!("{c:?}")),
    }
}
