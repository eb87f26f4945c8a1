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

//! Author Domain Signing Practices (RFC 5617).

use vauth_common::dns::{DnsError, Resolver};
use vauth_common::syntax::scan;

use super::{DkimError, DKIM_DNS_NAMESPACE};
use crate::taglist::{self, TagContext, TagSpec};

/// DNS label the ADSP record is published under, below `_domainkey`.
const ADSP_SELECTOR: &str = "_adsp";

/// The published outbound signing practice (`dkim=` tag).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
    fake::Dummy,
)]
#[strum(serialize_all = "lowercase")]
pub enum AdspPractice {
    All,
    Discardable,
    Unknown,
}

/// A parsed `_adsp` record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AdspRecord {
    pub practice: AdspPractice,
}

#[derive(Debug, Default)]
struct AdspParser {
    practice: Option<AdspPractice>,
}

/*
 * [RFC5617] 4.2.1.
 * adsp-dkim-tag = %x64.6b.69.6d *WSP "=" *WSP
 *                 ("unknown" / "all" / "discardable" / x-adsp-dkim-tag)
 * Any other value is treated as "unknown".
 */
fn parse_dkim(parser: &mut AdspParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let n = scan::hyphenated_word(context.value);
    if n == 0 {
        return Err(DkimError::TagSyntaxViolation {
            near: context.value.to_string(),
        });
    }
    let keyword = &context.value[..n];
    parser.practice = Some(if keyword.eq_ignore_ascii_case("all") {
        AdspPractice::All
    } else if keyword.eq_ignore_ascii_case("discardable") {
        AdspPractice::Discardable
    } else {
        AdspPractice::Unknown
    });
    Ok(n)
}

const ADSP_TAGS: &[TagSpec<AdspParser, DkimError>] = &[TagSpec {
    name: "dkim",
    required: true,
    default_value: None,
    parser: Some(parse_dkim),
}];

impl std::str::FromStr for AdspRecord {
    type Err = DkimError;

    fn from_str(record_text: &str) -> Result<Self, Self::Err> {
        let mut parser = AdspParser::default();
        /*
         * [RFC5617] 4.1.
         * ADSP changes the "Tag=Value List" syntax from [RFC4871] to use
         * WSP rather than FWS in its DNS records.
         */
        taglist::parse(&mut parser, record_text, ADSP_TAGS, true, false)?;
        Ok(Self {
            practice: parser
                .practice
                .ok_or(DkimError::MissingRequiredTag { name: "dkim" })?,
        })
    }
}

/// How an ADSP lookup can end without producing a record.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum AdspLookupError {
    /// The Author Domain itself does not exist.
    NxDomain,
    /// No valid ADSP record is published.
    NotExist,
    /// More than one valid record: a permanent error.
    MultipleRecords,
    Temporary(String),
    System(String),
}

/// Fetch and parse the ADSP record of `author_domain`.
pub(super) fn lookup(
    author_domain: &str,
    resolver: &dyn Resolver,
) -> Result<AdspRecord, AdspLookupError> {
    let qname = format!("{ADSP_SELECTOR}.{DKIM_DNS_NAMESPACE}.{author_domain}");
    let texts = match resolver.lookup_txt(&qname) {
        Ok(texts) => texts,
        Err(DnsError::NxDomain) => return Err(AdspLookupError::NxDomain),
        Err(DnsError::NoData | DnsError::NoValidAnswer) => return Err(AdspLookupError::NotExist),
        Err(error) if error.is_temporary() => {
            return Err(AdspLookupError::Temporary(error.to_string()))
        }
        Err(error) => return Err(AdspLookupError::System(error.to_string())),
    };

    let mut found = None;
    for text in &texts {
        match text.parse::<AdspRecord>() {
            Ok(record) => {
                if found.is_some() {
                    tracing::info!(qname, "multiple DKIM ADSP records found");
                    return Err(AdspLookupError::MultipleRecords);
                }
                found = Some(record);
            }
            Err(error) => {
                tracing::debug!(qname, %error, record = %text, "ADSP record candidate discarded");
            }
        }
    }
    found.ok_or(AdspLookupError::NotExist)
}
