//! Lead scoring: a deterministic 0-100 formula over enrichment signals
//! (spec §4.3 step 5 / §9 Open Question — the source's weighting was
//! inconsistent across code paths, so this is the one formula the engine
//! uses, documented here and in DESIGN.md).
//!
//! Weights sum to 100: email present (20), email verified (20), phone
//! present (15), phone verified (15), position populated (10), company
//! populated (10), high confidence i.e. best result reached `tau_stop` (10).

use crate::core_types::domain::LeadScore;

#[allow(clippy::too_many_arguments)]
pub fn compute_lead_score(
    has_email: bool,
    email_verified: bool,
    has_phone: bool,
    phone_verified: bool,
    has_position: bool,
    has_company: bool,
    high_confidence: bool,
) -> LeadScore {
    let mut value: u16 = 0;
    if has_email {
        value += 20;
    }
    if email_verified {
        value += 20;
    }
    if has_phone {
        value += 15;
    }
    if phone_verified {
        value += 15;
    }
    if has_position {
        value += 10;
    }
    if has_company {
        value += 10;
    }
    if high_confidence {
        value += 10;
    }

    LeadScore {
        value: value.min(100) as u8,
        has_email,
        email_verified,
        has_phone,
        phone_verified,
        has_position,
        has_company,
        high_confidence,
    }
}
