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

//! `vAuth` authentication engine
//!
//! SPF / Sender ID / DKIM / ADSP / ATPS / DMARC
//!
//! The engine is consumed by a message-filter daemon embedded in an MTA:
//! for any incoming message it returns, per identity, a verdict drawn from
//! the RFC 8601 result vocabulary together with enough metadata to render
//! an `Authentication-Results` header field. All DNS goes through the
//! [`vauth_common::dns::Resolver`] abstraction; the engine itself never
//! performs I/O, never retries and never panics on input.

#![cfg_attr(docsrs, feature(doc_cfg))]
//
#![doc(html_no_source)]
// #![deny(missing_docs)]
#![forbid(unsafe_code)]
//

pub mod taglist;

/// The implementation follows RFC 7208, plus the older Sender ID variants
/// of RFC 4406/4407 (`spf2.0/mfrom`, `spf2.0/pra`).
///
/// ```txt
/// Email on the Internet can be forged in a number of ways.  In
/// particular, existing protocols place no restriction on what a sending
/// host can use as the "MAIL FROM" of a message or the domain given on
/// the SMTP HELO/EHLO commands.  This document describes version 1 of
/// the Sender Policy Framework (SPF) protocol, whereby ADministrative
/// Management Domains (ADMDs) can explicitly authorize the hosts that
/// are allowed to use their domain names, and a receiving host can check
/// such authorization.
/// ```
pub mod spf;

/// The implementation follows RFC 6376 & 8301 & 8463, with the ADSP
/// (RFC 5617) and ATPS (RFC 6541) author-policy extensions.
///
/// ```txt
/// DomainKeys Identified Mail (DKIM) permits a person, role, or
/// organization that owns the signing domain to claim some
/// responsibility for a message by associating the domain with the
/// message.  This can be an author's organization, an operational relay,
/// or one of their agents.  DKIM separates the question of the identity
/// of the Signer of the message from the purported author of the
/// message.  Assertion of responsibility is validated through a
/// cryptographic signature and by querying the Signer's domain directly
/// to retrieve the appropriate public key.
/// ```
pub mod dkim;

/// The implementation follows RFC 7489.
///
/// ```txt
/// Domain-based Message Authentication, Reporting, and Conformance
/// (DMARC) is a scalable mechanism by which a mail-originating
/// organization can express domain-level policies and preferences for
/// message validation, disposition, and reporting, that a mail-receiving
/// organization can use to improve mail handling.
/// ```
pub mod dmarc;

pub mod authres;

pub mod session;

///
#[must_use]
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    ///
    #[error("missing required field: `{field}`")]
    MissingRequiredField {
        ///
        field: String,
    },
    ///
    #[error("syntax error: `{reason}`")]
    SyntaxError {
        ///
        reason: String,
    },
    ///
    #[error("invalid argument: `{reason}`")]
    InvalidArgument {
        ///
        reason: String,
    },
}

/// The Public Suffix interface: the ancestor of a fully qualified domain
/// that owns a Public Suffix boundary. Consumed by the DMARC layer for
/// record discovery fallback and relaxed alignment.
pub trait PublicSuffix {
    fn organizational_domain(&self, fqdn: &str) -> Option<String>;
}

/// [`PublicSuffix`] backed by the embedded Public Suffix List of the
/// `addr` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedPublicSuffix;

impl PublicSuffix for EmbeddedPublicSuffix {
    fn organizational_domain(&self, fqdn: &str) -> Option<String> {
        get_root_domain(fqdn).ok().flatten()
    }
}

/// Return the root of a domain
///
/// # Errors
///
/// * could not parse the `domain`
/// * could not retrieve the root of the domain
fn get_root_domain(domain: &str) -> Result<Option<String>, addr::error::Error<'_>> {
    Ok(addr::parse_domain_name(domain)?.root().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::{EmbeddedPublicSuffix, PublicSuffix};

    #[test]
    fn organizational_domains() {
        let psl = EmbeddedPublicSuffix;
        assert_eq!(
            psl.organizational_domain("mail.example.com").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            psl.organizational_domain("a.b.example.co.uk").as_deref(),
            Some("example.co.uk")
        );
    }
}
