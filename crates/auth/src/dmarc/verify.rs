/*
 * vAuth mail authentication library
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! DMARC record discovery and alignment evaluation (RFC 7489 §6.6).

use vauth_common::dns::{DnsError, Resolver};
use vauth_common::{dmarc::Value, domain_equals};

use super::record::{AlignmentMode, DmarcError, Record, DMARC1_RECORD_PREFIX};
use super::result::Dmarc;
use crate::PublicSuffix;

// DNS namespace for DMARC records
const DMARC_RECORD_DNS_PREFIX: &str = "_dmarc";

/// What the session feeds into one DMARC evaluation.
pub struct DmarcInput<'a> {
    /// the Author Domain (RFC5322.From)
    pub author_domain: &'a str,
    /// the domain SPF authenticated with `pass` in the `spf1` scope:
    /// MAIL FROM's domain, or HELO for the null reverse-path
    pub spf_authenticated_domain: Option<&'a str>,
    /// SDIDs of the signatures that verified
    pub dkim_verified_sdids: &'a [String],
}

enum Discovery {
    Found(Record),
    NotExist,
    PermError,
    TempError,
}

fn query(domain: &str, resolver: &dyn Resolver) -> Discovery {
    let qname = format!("{DMARC_RECORD_DNS_PREFIX}.{domain}");
    let texts = match resolver.lookup_txt(&qname) {
        Ok(texts) => texts,
        Err(DnsError::NoData | DnsError::NxDomain | DnsError::NoValidAnswer) => {
            tracing::debug!(domain, "no DMARC record candidates found");
            return Discovery::NotExist;
        }
        Err(error) if error.is_temporary() => return Discovery::TempError,
        Err(_) => return Discovery::TempError,
    };

    /*
     * [RFC7489] 6.6.3.
     * Records that do not start with a "v=" tag that identifies the
     * current version of DMARC are discarded; if the remaining set
     * contains multiple records or no records, processing terminates.
     */
    let mut candidate = None;
    for text in &texts {
        if !text.starts_with(DMARC1_RECORD_PREFIX) {
            continue;
        }
        if candidate.is_some() {
            tracing::info!(domain, "multiple DMARC record candidates found");
            return Discovery::PermError;
        }
        candidate = Some(text.as_str());
    }
    let Some(text) = candidate else {
        return Discovery::NotExist;
    };

    match Record::build(domain, text) {
        Ok(record) => Discovery::Found(record),
        // a record without a usable policy is treated as absent
        Err(DmarcError::UnusablePolicy) => Discovery::NotExist,
        Err(error) => {
            tracing::info!(domain, %error, record = %text, "invalid DMARC record");
            Discovery::PermError
        }
    }
}

/*
 * [RFC7489] 6.6.3.
 * Query the domain matching RFC5322.From; if the set is empty, query the
 * Organizational Domain in place of it (if different).
 */
fn discover(author_domain: &str, psl: &dyn PublicSuffix, resolver: &dyn Resolver) -> Discovery {
    match query(author_domain, resolver) {
        Discovery::NotExist => {}
        outcome => return outcome,
    }
    match psl.organizational_domain(author_domain) {
        Some(org_domain) if !domain_equals(author_domain, &org_domain) => {
            query(&org_domain, resolver)
        }
        _ => Discovery::NotExist,
    }
}

fn aligned(
    mode: AlignmentMode,
    authenticated_domain: &str,
    author_domain: &str,
    psl: &dyn PublicSuffix,
) -> bool {
    match mode {
        AlignmentMode::Strict => domain_equals(authenticated_domain, author_domain),
        /*
         * [RFC7489] 3.1.
         * In relaxed mode, the Organizational Domains of both must be
         * equal.
         */
        AlignmentMode::Relaxed => {
            if domain_equals(authenticated_domain, author_domain) {
                return true;
            }
            let lhs = psl
                .organizational_domain(authenticated_domain)
                .unwrap_or_else(|| authenticated_domain.to_string());
            let rhs = psl
                .organizational_domain(author_domain)
                .unwrap_or_else(|| author_domain.to_string());
            domain_equals(&lhs, &rhs)
        }
    }
}

/// Discover the applicable record and evaluate identifier alignment.
#[must_use]
pub fn verify(input: &DmarcInput<'_>, psl: &dyn PublicSuffix, resolver: &dyn Resolver) -> Dmarc {
    let author_domain = input.author_domain.to_string();

    let record = match discover(input.author_domain, psl, resolver) {
        Discovery::Found(record) => record,
        Discovery::NotExist => {
            return Dmarc {
                value: Value::None,
                domain: author_domain,
                record: None,
            }
        }
        Discovery::PermError => {
            return Dmarc {
                value: Value::PermError,
                domain: author_domain,
                record: None,
            }
        }
        Discovery::TempError => {
            return Dmarc {
                value: Value::TempError,
                domain: author_domain,
                record: None,
            }
        }
    };

    let spf_aligned = input.spf_authenticated_domain.is_some_and(|domain| {
        aligned(record.spf_alignment, domain, input.author_domain, psl)
    });
    let dkim_aligned = input.dkim_verified_sdids.iter().any(|sdid| {
        aligned(record.dkim_alignment, sdid, input.author_domain, psl)
    });

    /*
     * [RFC7489] 6.6.2.
     * A message satisfies the DMARC checks if at least one of the
     * authentication mechanisms passes with an aligned identifier.
     */
    let value = if spf_aligned || dkim_aligned {
        Value::Pass
    } else {
        Value::Fail
    };
    tracing::debug!(
        author = %input.author_domain,
        policy_domain = %record.domain,
        spf_aligned,
        dkim_aligned,
        %value,
        "dmarc evaluated"
    );

    Dmarc {
        value,
        domain: author_domain,
        record: Some(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmarc::ReceiverPolicy;
    use crate::EmbeddedPublicSuffix;
    use vauth_common::dns::StaticResolver;

    fn input<'a>(
        spf: Option<&'a str>,
        sdids: &'a [String],
    ) -> DmarcInput<'a> {
        DmarcInput {
            author_domain: "example.com",
            spf_authenticated_domain: spf,
            dkim_verified_sdids: sdids,
        }
    }

    #[test]
    fn pass_via_relaxed_dkim_alignment() {
        let mut resolver = StaticResolver::new();
        resolver.txt("_dmarc.example.com", &["v=DMARC1; p=reject; adkim=r"]);
        let sdids = vec!["mail.example.com".to_string()];

        let outcome = verify(&input(None, &sdids), &EmbeddedPublicSuffix, &resolver);
        assert_eq!(outcome.value, Value::Pass);
        assert_eq!(
            outcome.record.unwrap().receiver_policy,
            ReceiverPolicy::Reject
        );
    }

    #[test]
    fn strict_dkim_alignment_requires_equality() {
        let mut resolver = StaticResolver::new();
        resolver.txt("_dmarc.example.com", &["v=DMARC1; p=reject; adkim=s"]);
        let sdids = vec!["mail.example.com".to_string()];

        let outcome = verify(&input(None, &sdids), &EmbeddedPublicSuffix, &resolver);
        assert_eq!(outcome.value, Value::Fail);
        assert_eq!(
            outcome.requested_disposition(),
            Some(ReceiverPolicy::Reject)
        );
    }

    #[test]
    fn pass_via_spf_alignment() {
        let mut resolver = StaticResolver::new();
        resolver.txt("_dmarc.example.com", &["v=DMARC1; p=none"]);

        let outcome = verify(
            &input(Some("bounce.example.com"), &[]),
            &EmbeddedPublicSuffix,
            &resolver,
        );
        assert_eq!(outcome.value, Value::Pass);
    }

    #[test]
    fn organizational_domain_fallback() {
        let mut resolver = StaticResolver::new();
        resolver.txt("_dmarc.example.com", &["v=DMARC1; p=quarantine; sp=reject"]);

        let sdids: Vec<String> = vec![];
        let outcome = verify(
            &DmarcInput {
                author_domain: "news.example.com",
                spf_authenticated_domain: None,
                dkim_verified_sdids: &sdids,
            },
            &EmbeddedPublicSuffix,
            &resolver,
        );
        assert_eq!(outcome.value, Value::Fail);
        // the record came from the org domain: sp= applies
        assert_eq!(
            outcome.requested_disposition(),
            Some(ReceiverPolicy::Reject)
        );
    }

    #[test]
    fn no_record_is_none() {
        let resolver = StaticResolver::new();
        let outcome = verify(&input(None, &[]), &EmbeddedPublicSuffix, &resolver);
        assert_eq!(outcome.value, Value::None);
        assert!(outcome.record.is_none());
    }

    #[test]
    fn multiple_records_are_permerror() {
        let mut resolver = StaticResolver::new();
        resolver.txt(
            "_dmarc.example.com",
            &["v=DMARC1; p=none", "v=DMARC1; p=reject"],
        );
        let outcome = verify(&input(None, &[]), &EmbeddedPublicSuffix, &resolver);
        assert_eq!(outcome.value, Value::PermError);
    }

    #[test]
    fn non_dmarc_txt_records_are_ignored() {
        let mut resolver = StaticResolver::new();
        resolver.txt(
            "_dmarc.example.com",
            &["some verification token", "v=DMARC1; p=none"],
        );
        let outcome = verify(&input(Some("example.com"), &[]), &EmbeddedPublicSuffix, &resolver);
        assert_eq!(outcome.value, Value::Pass);
    }

    #[test]
    fn temperror_on_dns_failure() {
        let mut resolver = StaticResolver::new();
        resolver.txt_error(
            "_dmarc.example.com",
            vauth_common::dns::DnsError::Rcode(vauth_common::dns::Rcode::ServFail),
        );
        let outcome = verify(&input(None, &[]), &EmbeddedPublicSuffix, &resolver);
        assert_eq!(outcome.value, Value::TempError);
    }

    #[test]
    fn pct_never_changes_the_verdict() {
        let mut resolver = StaticResolver::new();
        resolver.txt("_dmarc.example.com", &["v=DMARC1; p=reject; pct=0"]);
        let outcome = verify(&input(None, &[]), &EmbeddedPublicSuffix, &resolver);
        assert_eq!(outcome.value, Value::Fail);
        assert_eq!(outcome.record.unwrap().sampling_rate, 0);
    }
}
