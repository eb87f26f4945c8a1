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

use crate::mailbox::{self, Mailbox};
use crate::syntax::scan;

/// The ordered header sequence of a message, duplicates included.
///
/// Position is semantically significant: DKIM's `h=` walk consumes
/// instances bottom-up and PRA selection depends on `Resent-*` ordering.
/// `keep_leading_space` records whether the producer kept the SP after the
/// `:` in the stored values (sendmail 8.14 with `SMFIP_HDR_LEADSPC` does,
/// earlier milter protocols do not); the DKIM canonicalizers need it to
/// reconstruct the wire form.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
    keep_leading_space: bool,
}

/// Failure to derive the Author addresses from the `From:` header.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthorError {
    #[error("no From header found")]
    NotExist,
    #[error("multiple From headers found")]
    NotUnique,
    #[error("From header violates the mailbox-list syntax")]
    BadSyntax,
}

impl HeaderList {
    #[must_use]
    pub fn new(keep_leading_space: bool) -> Self {
        Self {
            entries: Vec::new(),
            keep_leading_space,
        }
    }

    #[must_use]
    pub const fn keep_leading_space(&self) -> bool {
        self.keep_leading_space
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, pos: usize) -> Option<(&str, &str)> {
        self.entries.get(pos).map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Index of the first header named `name`.
    ///
    /// With `ignore_empty`, headers whose value contains no non-whitespace
    /// character are treated as absent (RFC 4407 §2). The second element
    /// reports whether more than one matching header exists.
    #[must_use]
    pub fn header_index(&self, name: &str, ignore_empty: bool) -> (Option<usize>, bool) {
        let mut found = None;
        for (i, (headerf, headerv)) in self.entries.iter().enumerate() {
            if !headerf.eq_ignore_ascii_case(name) {
                continue;
            }
            if ignore_empty && scan::fws(headerv) == headerv.len() {
                continue;
            }
            if found.is_some() {
                return (found, true);
            }
            found = Some(i);
        }
        (found, false)
    }

    /// Index of the first non-empty header named `name`.
    #[must_use]
    pub fn non_empty_header_index(&self, name: &str) -> (Option<usize>, bool) {
        self.header_index(name, true)
    }

    /// Extract the Author addresses from the single `From:` header
    /// (RFC 5617 §2.3: each mailbox of the mailbox-list is an Author).
    pub fn extract_authors(&self) -> Result<Vec<Mailbox>, AuthorError> {
        let (index, multiple) = self.header_index("From", false);
        let Some(index) = index else {
            return Err(AuthorError::NotExist);
        };
        if multiple {
            return Err(AuthorError::NotUnique);
        }

        let value = &self.entries[index].1;
        let (authors, consumed) =
            mailbox::parse_5322_mailbox_list(value).map_err(|_| AuthorError::BadSyntax)?;
        let rest = &value[consumed..];
        if scan::fws(rest) == rest.len() {
            Ok(authors)
        } else {
            Err(AuthorError::BadSyntax)
        }
    }
}
