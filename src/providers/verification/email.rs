//! L1-L4 email verification (spec §4.5).
//!
//! Each level annotates the contact independently; a failure at level N
//! does not prevent levels `1..N-1` from having already been recorded.
//! Composite score weights: L1 up to 0.2, L2 up to 0.2, L3 up to 0.3, L4
//! up to 0.3. `email_verified = score >= 0.7 && !is_disposable`.

use std::collections::HashSet;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::VerificationConfig;
use crate::core_types::domain::EmailReliability;
use crate::providers::verification::smtp::{probe_mailbox, SmtpProbeOutcome};

static EMAIL_SYNTAX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$")
        .expect("static email syntax regex is valid")
});

static DISPOSABLE_DOMAINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "mailinator.com",
        "guerrillamail.com",
        "10minutemail.com",
        "tempmail.com",
        "yopmail.com",
        "trashmail.com",
        "getnada.com",
        "throwawaymail.com",
    ]
    .into_iter()
    .collect()
});

static ROLE_LOCAL_PARTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "info", "contact", "admin", "support", "sales", "hello", "office", "team", "billing",
        "marketing", "press", "jobs", "careers", "webmaster", "postmaster", "abuse", "noreply",
        "no-reply",
    ]
    .into_iter()
    .collect()
});

/// Outcome of the full L1-L4 pipeline for one email address.
#[derive(Debug, Clone)]
pub struct EmailVerificationOutcome {
    pub score: f64,
    pub verified: bool,
    /// Highest level actually completed (0 if syntax already failed).
    pub level_reached: u8,
    pub is_disposable: bool,
    pub is_role_based: bool,
    pub is_catchall: bool,
    pub reliability: EmailReliability,
}

fn split_email(email: &str) -> Option<(&str, &str)> {
    email.split_once('@')
}

/// L1: syntax, disposable-domain, and role-account checks. Does not
/// short-circuit: both flags are computed even if syntax is invalid.
fn l1_syntax(email: &str) -> (bool, bool, bool) {
    let syntax_ok = EMAIL_SYNTAX_RE.is_match(email) && email.len() <= 254;
    let Some((local, domain)) = split_email(email) else {
        return (syntax_ok, false, false);
    };
    // Domain-only email (empty local part) is handled by the caller before
    // this function is reached; local is non-empty here by construction.
    let is_disposable = DISPOSABLE_DOMAINS.contains(domain.to_lowercase().as_str());
    let is_role_based = ROLE_LOCAL_PARTS.contains(local.to_lowercase().as_str());
    (syntax_ok, is_disposable, is_role_based)
}

async fn resolve_a_or_aaaa(resolver: &TokioAsyncResolver, domain: &str) -> bool {
    resolver.ipv4_lookup(domain).await.is_ok() || resolver.ipv6_lookup(domain).await.is_ok()
}

async fn resolve_mx(resolver: &TokioAsyncResolver, domain: &str) -> Vec<String> {
    match resolver.mx_lookup(domain).await {
        Ok(lookup) => {
            let mut hosts: Vec<(u16, String)> = lookup
                .iter()
                .map(|mx| (mx.preference(), mx.exchange().to_utf8()))
                .collect();
            hosts.sort_by_key(|(preference, _)| *preference);
            hosts.into_iter().map(|(_, host)| host).collect()
        }
        Err(_) => Vec::new(),
    }
}

/// Run the full L1-L4 pipeline for `email`. A domain-only email (empty
/// local part) is treated as inconclusive and the caller should not
/// persist it (§9 Open Question); this function still returns a result so
/// the raw provider payload remains auditable.
pub async fn verify_email(email: &str, config: &VerificationConfig) -> EmailVerificationOutcome {
    let Some((local, domain)) = split_email(email) else {
        return EmailVerificationOutcome {
            score: 0.0,
            verified: false,
            level_reached: 0,
            is_disposable: false,
            is_role_based: false,
            is_catchall: false,
            reliability: EmailReliability::NoEmail,
        };
    };

    if local.is_empty() {
        return EmailVerificationOutcome {
            score: 0.0,
            verified: false,
            level_reached: 0,
            is_disposable: false,
            is_role_based: false,
            is_catchall: false,
            reliability: EmailReliability::Unknown,
        };
    }

    let (syntax_ok, is_disposable, is_role_based) = l1_syntax(email);
    let mut score = if syntax_ok { 0.2 } else { 0.0 };
    let mut level_reached = 1;

    if !syntax_ok {
        return EmailVerificationOutcome {
            score,
            verified: false,
            level_reached,
            is_disposable,
            is_role_based,
            is_catchall: false,
            reliability: EmailReliability::Poor,
        };
    }

    let resolver =
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    // L2: domain existence.
    let domain_exists = resolve_a_or_aaaa(&resolver, domain).await;
    if domain_exists {
        score += 0.2;
        level_reached = 2;
    }

    // L3: MX, falling back to A/AAAA per RFC; catch-all probe.
    let mut is_catchall = false;
    let mx_hosts = resolve_mx(&resolver, domain).await;
    let mx_ok = !mx_hosts.is_empty() || domain_exists;
    if mx_ok {
        score += 0.3;
        level_reached = 3;

        if let Some(mx_host) = mx_hosts.first() {
            let random_local = format!("nonexistent-probe-{}", fastrand::u32(..));
            let probe_address = format!("{random_local}@{domain}");
            if probe_mailbox(mx_host, &config.smtp_probe_from, &probe_address).await
                == SmtpProbeOutcome::Accepted
            {
                is_catchall = true;
            }
        }
    }

    // L4: optional SMTP probe of the actual mailbox.
    if config.smtp_enabled && mx_ok {
        if let Some(mx_host) = mx_hosts.first() {
            match probe_mailbox(mx_host, &config.smtp_probe_from, email).await {
                SmtpProbeOutcome::Accepted => {
                    score += 0.3;
                    level_reached = 4;
                }
                SmtpProbeOutcome::Rejected => {
                    level_reached = 4;
                    // Negative L4 contributes nothing, but we did complete it.
                }
                SmtpProbeOutcome::Inconclusive => {
                    // Treated as neither positive nor negative; score unchanged.
                }
            }
        }
    }

    let verified = score >= 0.7 && !is_disposable;

    let reliability = if is_catchall {
        EmailReliability::Fair.min(reliability_from_score(score))
    } else {
        reliability_from_score(score)
    };

    EmailVerificationOutcome {
        score,
        verified,
        level_reached,
        is_disposable,
        is_role_based,
        is_catchall,
        reliability,
    }
}

fn reliability_from_score(score: f64) -> EmailReliability {
    if score >= 0.9 {
        EmailReliability::Excellent
    } else if score >= 0.7 {
        EmailReliability::Good
    } else if score >= 0.5 {
        EmailReliability::Fair
    } else {
        EmailReliability::Poor
    }
}

impl EmailReliability {
    /// Ordering used only to cap a reliability bucket at `fair` when
    /// `is_catchall` is set, regardless of the raw score (spec §4.5).
    fn min(self, other: EmailReliability) -> EmailReliability {
        fn rank(r: EmailReliability) -> u8 {
            match r {
                EmailReliability::NoEmail => 0,
                EmailReliability::Unknown => 1,
                EmailReliability::Poor => 2,
                EmailReliability::Fair => 3,
                EmailReliability::Good => 4,
                EmailReliability::Excellent => 5,
            }
        }
        if rank(self) <= rank(other) {
            self
        } else {
            other
        }
    }
}
