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

//! DMARC policy records (RFC 7489 §6.3): a WSP tag-list parsed leniently,
//! syntax errors in non-required tags falling back to their defaults.

use vauth_common::syntax::{parse, scan};

use crate::taglist::{self, TagContext, TagSpec, TAG_NO_AS_DEFAULT_VALUE};

// version string of DMARC records
const DMARC1_VERSION_TAG: &str = "DMARC1";
/// prefix that qualifies a TXT string as a DMARC record candidate
pub(super) const DMARC1_RECORD_PREFIX: &str = "v=DMARC1";

// max length of dmarc-ainterval value
const REC_RI_TAG_LEN: usize = 12;
// max length of dmarc-percent value
const REC_PCT_TAG_LEN: usize = 3;

/// Why a DMARC record could not be used.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DmarcError {
    #[error("tag-list syntax violation: near {near}")]
    TagSyntaxViolation {
        ///
        near: String,
    },
    #[error("tag duplicated: {name}")]
    TagDuplicated {
        ///
        name: String,
    },
    #[error("missing required tag: {name}")]
    MissingRequiredTag {
        ///
        name: &'static str,
    },
    #[error("implementation error: {detail}")]
    ImplementationError {
        ///
        detail: String,
    },
    #[error("incompatible record version")]
    IncompatibleRecordVersion,
    /// No usable `p=` and no reporting URI to fall back on: the record is
    /// discarded entirely (RFC 7489 §6.6.3).
    #[error("record carries no usable policy")]
    UnusablePolicy,
}

impl crate::taglist::TagListError for DmarcError {
    fn tag_syntax_violation(near: &str) -> Self {
        Self::TagSyntaxViolation {
            near: near.to_string(),
        }
    }

    fn tag_duplicated(name: &str) -> Self {
        Self::TagDuplicated {
            name: name.to_string(),
        }
    }

    fn missing_required_tag(name: &'static str) -> Self {
        Self::MissingRequiredTag { name }
    }

    fn implementation_error(detail: String) -> Self {
        Self::ImplementationError { detail }
    }

    fn is_tag_syntax_violation(&self) -> bool {
        matches!(self, Self::TagSyntaxViolation { .. })
    }
}

/// Requested receiver disposition (`p=` / `sp=`).
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
pub enum ReceiverPolicy {
    None,
    Quarantine,
    Reject,
}

/// Identifier alignment mode (`adkim=` / `aspf=`).
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
pub enum AlignmentMode {
    #[strum(serialize = "r")]
    Relaxed,
    #[strum(serialize = "s")]
    Strict,
}

/// Failure reporting options (`fo=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, fake::Dummy)]
pub enum ReportingOption {
    /// `0`: report when every mechanism failed to align
    AllFail,
    /// `1`: report when any mechanism failed to align
    AnyFail,
    /// `d`: report per failed DKIM signature
    Dkim,
    /// `s`: report per failed SPF evaluation
    Spf,
}

/// Failure report format (`rf=`).
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
pub enum ReportFormat {
    Afrf,
    Iodef,
}

/// A usable DMARC record.
#[serde_with::serde_as]
#[derive(Debug, Clone, serde::Serialize)]
pub struct Record {
    /// the domain the record was discovered at (the Author Domain or its
    /// Organizational Domain)
    pub domain: String,
    pub receiver_policy: ReceiverPolicy,
    /// `sp=`; applies when the policy domain differs from the Author
    /// Domain, falling back to `p=` when absent
    pub subdomain_policy: Option<ReceiverPolicy>,
    pub dkim_alignment: AlignmentMode,
    pub spf_alignment: AlignmentMode,
    pub failure_reporting_options: Vec<ReportingOption>,
    /// `pct=`; affects only the reporter sampling, never the verdict
    pub sampling_rate: u8,
    pub failure_report_format: ReportFormat,
    pub aggregate_report_interval: u32,
    /// raw `rua=` URIs
    pub aggregate_report_uris: Vec<String>,
    /// raw `ruf=` URIs
    pub failure_report_uris: Vec<String>,
}

#[derive(Debug, Default)]
struct RecordParser {
    receiver_policy: Option<ReceiverPolicy>,
    policy_invalid: bool,
    subdomain_policy: Option<ReceiverPolicy>,
    dkim_alignment: Option<AlignmentMode>,
    spf_alignment: Option<AlignmentMode>,
    failure_reporting_options: Vec<ReportingOption>,
    sampling_rate: Option<u8>,
    failure_report_format: Option<ReportFormat>,
    aggregate_report_interval: Option<u32>,
    aggregate_report_uris: Vec<String>,
    failure_report_uris: Vec<String>,
}

fn syntax(near: &str) -> DmarcError {
    DmarcError::TagSyntaxViolation {
        near: near.chars().take(50).collect(),
    }
}

/*
 * [RFC7489] 6.4.
 * dmarc-version = "v" *WSP "=" *WSP %x44 %x4d %x41 %x52 %x43 %x31
 *
 * The value of this tag MUST match precisely and it MUST be the first
 * tag in the list.
 */
fn parse_v(_parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    if context.tag_no != TAG_NO_AS_DEFAULT_VALUE && context.tag_no > 0 {
        return Err(syntax(context.value));
    }
    if context.value == DMARC1_VERSION_TAG {
        Ok(context.value.len())
    } else {
        Err(DmarcError::IncompatibleRecordVersion)
    }
}

fn alignment_mode(value: &str) -> Result<AlignmentMode, DmarcError> {
    match value {
        "r" => Ok(AlignmentMode::Relaxed),
        "s" => Ok(AlignmentMode::Strict),
        _ => Err(syntax(value)),
    }
}

fn parse_adkim(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    parser.dkim_alignment = Some(alignment_mode(context.value)?);
    Ok(context.value.len())
}

fn parse_aspf(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    parser.spf_alignment = Some(alignment_mode(context.value)?);
    Ok(context.value.len())
}

/*
 * [RFC7489] 6.3.
 * dmarc-fo = "fo" *WSP "=" *WSP ( "0" / "1" / "d" / "s" )
 *            *(*WSP ":" *WSP ( "0" / "1" / "d" / "s" ))
 */
fn parse_fo(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    let value = context.value;
    let bytes = value.as_bytes();
    let mut pos = 0;
    loop {
        pos += scan::wsp_block(&value[pos..]);
        let option = match bytes.get(pos) {
            Some(b'0') => ReportingOption::AllFail,
            Some(b'1') => ReportingOption::AnyFail,
            Some(b'd') => ReportingOption::Dkim,
            Some(b's') => ReportingOption::Spf,
            _ => return Err(syntax(value)),
        };
        if !parser.failure_reporting_options.contains(&option) {
            parser.failure_reporting_options.push(option);
        }
        pos += 1;
        let end = pos;
        pos += scan::wsp_block(&value[pos..]);
        if scan::char1(&value[pos..], b':') == 0 {
            return Ok(end);
        }
        pos += 1;
    }
}

fn receiver_policy(value: &str) -> Option<ReceiverPolicy> {
    if value.eq_ignore_ascii_case("none") {
        Some(ReceiverPolicy::None)
    } else if value.eq_ignore_ascii_case("quarantine") {
        Some(ReceiverPolicy::Quarantine)
    } else if value.eq_ignore_ascii_case("reject") {
        Some(ReceiverPolicy::Reject)
    } else {
        None
    }
}

/*
 * [RFC7489] 6.3.
 * dmarc-request = "p" *WSP "=" *WSP ( "none" / "quarantine" / "reject" )
 *
 * An invalid value does not fail the record here: §6.6.3 decides whether
 * the record still acts as "p=none" (a plausible rua= exists) or is
 * discarded entirely.
 */
fn parse_p(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    match receiver_policy(context.value) {
        Some(policy) => parser.receiver_policy = Some(policy),
        None => parser.policy_invalid = true,
    }
    Ok(context.value.len())
}

fn parse_sp(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    let policy = receiver_policy(context.value).ok_or_else(|| syntax(context.value))?;
    parser.subdomain_policy = Some(policy);
    Ok(context.value.len())
}

fn parse_ri(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    let (value, consumed) = parse::bounded_decimal(context.value, REC_RI_TAG_LEN);
    if consumed == 0 || consumed < context.value.len() {
        return Err(syntax(context.value));
    }
    parser.aggregate_report_interval = u32::try_from(value).ok();
    Ok(consumed)
}

fn parse_pct(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    let (value, consumed) = parse::bounded_decimal(context.value, REC_PCT_TAG_LEN);
    if consumed == 0 || consumed < context.value.len() || !(0..=100).contains(&value) {
        return Err(syntax(context.value));
    }
    parser.sampling_rate = Some(value as u8);
    Ok(consumed)
}

fn parse_rf(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    let n = scan::alnum_block(context.value);
    if n == 0 {
        return Err(syntax(context.value));
    }
    let format = &context.value[..n];
    parser.failure_report_format = Some(if format.eq_ignore_ascii_case("afrf") {
        ReportFormat::Afrf
    } else if format.eq_ignore_ascii_case("iodef") {
        ReportFormat::Iodef
    } else {
        return Err(syntax(context.value));
    });
    Ok(n)
}

/// `dmarc-uri *(*WSP "," *WSP dmarc-uri)`; the URIs are retained raw, the
/// engine itself never reports.
fn parse_uri_list(value: &str, out: &mut Vec<String>) -> Result<usize, DmarcError> {
    for uri in value.split(',') {
        let uri = uri.trim_matches([' ', '\t']);
        // a minimally plausible URI has a scheme
        if !uri.is_empty() && uri.contains(':') {
            out.push(uri.to_string());
        }
    }
    Ok(value.len())
}

fn parse_rua(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    parse_uri_list(context.value, &mut parser.aggregate_report_uris)
}

fn parse_ruf(parser: &mut RecordParser, context: &TagContext<'_>) -> Result<usize, DmarcError> {
    parse_uri_list(context.value, &mut parser.failure_report_uris)
}

const DMARC_TAGS: &[TagSpec<RecordParser, DmarcError>] = &[
    TagSpec { name: "v", required: true, default_value: Some(DMARC1_VERSION_TAG), parser: Some(parse_v) },
    TagSpec { name: "adkim", required: false, default_value: Some("r"), parser: Some(parse_adkim) },
    TagSpec { name: "aspf", required: false, default_value: Some("r"), parser: Some(parse_aspf) },
    TagSpec { name: "fo", required: false, default_value: Some("0"), parser: Some(parse_fo) },
    TagSpec { name: "p", required: false, default_value: None, parser: Some(parse_p) },
    TagSpec { name: "pct", required: false, default_value: Some("100"), parser: Some(parse_pct) },
    TagSpec { name: "rf", required: false, default_value: Some("afrf"), parser: Some(parse_rf) },
    TagSpec { name: "ri", required: false, default_value: Some("86400"), parser: Some(parse_ri) },
    TagSpec { name: "rua", required: false, default_value: None, parser: Some(parse_rua) },
    TagSpec { name: "ruf", required: false, default_value: None, parser: Some(parse_ruf) },
    TagSpec { name: "sp", required: false, default_value: None, parser: Some(parse_sp) },
];

impl Record {
    /// Parse a record discovered at `domain`.
    ///
    /// [RFC7489] 6.6.3: a record whose `p=` is missing or invalid acts as
    /// `p=none` when it carries a plausible `rua=` URI; otherwise it is
    /// discarded ([`DmarcError::UnusablePolicy`]) and discovery reports
    /// "no record".
    pub(super) fn build(domain: &str, record_text: &str) -> Result<Self, DmarcError> {
        let mut parser = RecordParser::default();
        taglist::parse(&mut parser, record_text, DMARC_TAGS, true, true)?;

        let receiver_policy = match (parser.receiver_policy, parser.policy_invalid) {
            (Some(policy), false) => policy,
            _ => {
                if parser.aggregate_report_uris.is_empty() {
                    return Err(DmarcError::UnusablePolicy);
                }
                tracing::info!(
                    domain,
                    "invalid or missing p= tag, record acts as p=none for reporting"
                );
                ReceiverPolicy::None
            }
        };

        Ok(Self {
            domain: domain.to_string(),
            receiver_policy,
            subdomain_policy: parser.subdomain_policy,
            dkim_alignment: parser.dkim_alignment.unwrap_or(AlignmentMode::Relaxed),
            spf_alignment: parser.spf_alignment.unwrap_or(AlignmentMode::Relaxed),
            failure_reporting_options: parser.failure_reporting_options,
            sampling_rate: parser.sampling_rate.unwrap_or(100),
            failure_report_format: parser.failure_report_format.unwrap_or(ReportFormat::Afrf),
            aggregate_report_interval: parser.aggregate_report_interval.unwrap_or(86_400),
            aggregate_report_uris: parser.aggregate_report_uris,
            failure_report_uris: parser.failure_report_uris,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AlignmentMode, DmarcError, ReceiverPolicy, Record};

    #[test]
    fn typical_record() {
        let record = Record::build(
            "example.com",
            "v=DMARC1; p=reject; sp=quarantine; adkim=s; aspf=r; pct=50; rua=mailto:agg@example.com",
        )
        .unwrap();
        assert_eq!(record.receiver_policy, ReceiverPolicy::Reject);
        assert_eq!(record.subdomain_policy, Some(ReceiverPolicy::Quarantine));
        assert_eq!(record.dkim_alignment, AlignmentMode::Strict);
        assert_eq!(record.spf_alignment, AlignmentMode::Relaxed);
        assert_eq!(record.sampling_rate, 50);
        assert_eq!(record.aggregate_report_uris, ["mailto:agg@example.com"]);
    }

    #[test]
    fn version_tag_must_lead_and_match() {
        assert_eq!(
            Record::build("example.com", "p=reject; v=DMARC1").unwrap_err(),
            DmarcError::TagSyntaxViolation {
                near: "DMARC1".to_string()
            }
        );
        assert_eq!(
            Record::build("example.com", "v=dmarc1; p=none").unwrap_err(),
            DmarcError::IncompatibleRecordVersion
        );
    }

    #[test]
    fn lenient_optional_tags_fall_back_to_defaults() {
        let record = Record::build(
            "example.com",
            "v=DMARC1; p=none; adkim=x; pct=400; ri=oops",
        )
        .unwrap();
        assert_eq!(record.dkim_alignment, AlignmentMode::Relaxed);
        assert_eq!(record.sampling_rate, 100);
        assert_eq!(record.aggregate_report_interval, 86_400);
    }

    #[test]
    fn invalid_policy_with_rua_acts_as_none() {
        let record = Record::build(
            "example.com",
            "v=DMARC1; p=bogus; rua=mailto:agg@example.com",
        )
        .unwrap();
        assert_eq!(record.receiver_policy, ReceiverPolicy::None);
    }

    #[test]
    fn invalid_policy_without_rua_is_unusable() {
        assert_eq!(
            Record::build("example.com", "v=DMARC1; p=bogus").unwrap_err(),
            DmarcError::UnusablePolicy
        );
        assert_eq!(
            Record::build("example.com", "v=DMARC1").unwrap_err(),
            DmarcError::UnusablePolicy
        );
    }

    #[test]
    fn invalid_subdomain_policy_falls_back_to_p() {
        let record = Record::build("example.com", "v=DMARC1; p=reject; sp=bogus").unwrap();
        assert_eq!(record.subdomain_policy, None);
    }

    #[test]
    fn duplicate_tags_are_fatal_even_in_lenient_mode() {
        assert_eq!(
            Record::build("example.com", "v=DMARC1; p=none; p=reject").unwrap_err(),
            DmarcError::TagDuplicated {
                name: "p".to_string()
            }
        );
    }
}
