//! Provider adapter implementations.
//!
//! This module contains one adapter per external enrichment or
//! verification service, each implementing [`crate::core_types::provider::ProviderAdapter`]:
//!
//! - **icypeas**, **dropcontact**, **hunter**, **apollo**: enrichment
//!   providers consulted by the cascade, cheapest-first.
//! - **verification**: email (SMTP probe) and phone (HLR) verification-only
//!   adapters that slot into the same trait rather than being bespoke code
//!   paths.
//! - **http_common**: shared HTTP client construction and JSON response
//!   handling, the generalized form of the teacher's `openai_shared` module.

pub mod apollo;
pub mod dropcontact;
pub mod http_common;
pub mod hunter;
pub mod icypeas;
pub mod verification;

pub use apollo::ApolloAdapter;
pub use dropcontact::DropcontactAdapter;
pub use hunter::HunterAdapter;
pub use icypeas::IcypeasAdapter;
pub use verification::HlrAdapter;
