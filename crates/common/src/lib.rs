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

//! `vAuth` base library
//!
//! Host-facing substrate shared between the authentication engine and the
//! milter daemon embedding it: ABNF scanners and parsers, mailboxes, the
//! ordered header sequence, the DNS resolver abstraction and the result
//! vocabularies of RFC 8601.

#![cfg_attr(docsrs, feature(doc_cfg))]
//
#![doc(html_no_source)]
// #![deny(missing_docs)]
#![forbid(unsafe_code)]
//

pub mod syntax;

pub mod mailbox;
pub use mailbox::{Mailbox, MailboxError};

mod headers;
pub use headers::{AuthorError, HeaderList};

mod fold;
pub use fold::FoldString;

pub mod dns;

/// Result values of the `spf` and `sender-id` methods.
///
/// ```txt
/// Email on the Internet can be forged in a number of ways.  In
/// particular, existing protocols place no restriction on what a sending
/// host can use as the "MAIL FROM" of a message or the domain given on
/// the SMTP HELO/EHLO commands.
/// ```
pub mod spf;

/// Result values of the `dkim` method.
pub mod dkim;

/// Result values of the `dmarc` method.
pub mod dmarc;

/// Result values of the `dkim-adsp` method (RFC 5617).
pub mod adsp;

/// Result values of the `dkim-atps` method (RFC 6541).
pub mod atps;

/// Compare two domain names per RFC 5321: ASCII case-insensitive, an
/// optional trailing root dot is not significant.
#[must_use]
pub fn domain_equals(lhs: &str, rhs: &str) -> bool {
    lhs.trim_end_matches('.')
        .eq_ignore_ascii_case(rhs.trim_end_matches('.'))
}

/// Return whether `child` equals `parent` or is a subdomain of it.
#[must_use]
pub fn domain_is_within(parent: &str, child: &str) -> bool {
    let parent = parent.trim_end_matches('.');
    let child = child.trim_end_matches('.');
    if parent.len() > child.len() {
        return false;
    }
    if parent.len() == child.len() {
        return parent.eq_ignore_ascii_case(child);
    }
    let offset = child.len() - parent.len();
    child[offset..].eq_ignore_ascii_case(parent) && child.as_bytes()[offset - 1] == b'.'
}

#[cfg(test)]
mod tests {
    use super::{domain_equals, domain_is_within};

    #[test]
    fn domain_comparisons() {
        assert!(domain_equals("Example.COM", "example.com"));
        assert!(domain_equals("example.com.", "example.com"));
        assert!(!domain_equals("mail.example.com", "example.com"));

        assert!(domain_is_within("example.com", "example.com"));
        assert!(domain_is_within("example.com", "mail.Example.Com"));
        assert!(!domain_is_within("example.com", "notexample.com"));
        assert!(!domain_is_within("mail.example.com", "example.com"));
    }
}
