//! Verification pipeline: escalating email checks and phone classification,
//! run by the Cascade Coordinator after a contact reaches `enriched`
//! (spec §4.5, §4.6). Not itself part of the provider cascade, though the
//! optional SMTP probe and HLR lookup are implemented as ordinary
//! [`crate::core_types::provider::ProviderAdapter`]s so they slot into the
//! same retry/rate-limit machinery instead of being bespoke code paths.

pub mod email;
pub mod hlr;
pub mod phone;
pub mod smtp;

pub use email::{verify_email, EmailVerificationOutcome};
pub use hlr::HlrAdapter;
pub use phone::{classify_phone, PhoneVerificationOutcome};
