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

//! The `DKIM-Signature` header field (RFC 6376 §3.5), with the ATPS
//! extension tags of RFC 6541 §4.2.

use std::ops::Range;

use base64::{engine::general_purpose::STANDARD, Engine};
use vauth_common::syntax::{parse, scan};
use vauth_common::{domain_is_within, mailbox, FoldString, Mailbox};

use super::atps::AtpsHashAlgorithm;
use super::canonicalization::Canonicalization;
use super::{decode_base64_value, DkimError, SigningAlgorithm, DKIM_DNS_NAMESPACE};
use crate::taglist::{self, TagContext, TagSpec};

// max length of sig-l-tag value
const SIG_L_TAG_LEN: usize = 76;
// max length of sig-t-tag value
const SIG_T_TAG_LEN: usize = 12;
// max length of sig-x-tag value
const SIG_X_TAG_LEN: usize = 12;

const FROM_HEADER: &str = "From";

/// Public key retrieval method (`q=` tag). Unrecognized methods are
/// ignored at parse time, so only the supported one is represented.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    serde_with::SerializeDisplay,
    fake::Dummy,
)]
pub enum QueryMethod {
    #[strum(serialize = "dns/txt")]
    DnsTxt,
}

/// A parsed `DKIM-Signature` header value.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Signature {
    pub signing_algorithm: SigningAlgorithm,
    /// decoded `b=`
    pub signature: Vec<u8>,
    /// decoded `bh=`
    pub body_hash: Vec<u8>,
    pub canonicalization: Canonicalization,
    pub sdid: String,
    pub selector: String,
    /// AUID; synthesized as `@<sdid>` when `i=` is absent
    pub auid: Mailbox,
    pub signed_headers: Vec<String>,
    pub signature_timestamp: Option<i64>,
    pub expire_time: Option<i64>,
    pub body_length: Option<u64>,
    pub query_methods: Vec<QueryMethod>,
    pub atps_domain: Option<String>,
    pub atps_hash: Option<AtpsHashAlgorithm>,
    /// the raw header value as received (or rendered, when signing)
    #[serde(skip)]
    pub(super) raw_value: String,
    /// byte range of the `b=` tag value within `raw_value`
    #[serde(skip)]
    pub(super) b_value_range: Range<usize>,
}

#[derive(Debug, Default)]
struct SignatureParser {
    signing_algorithm: Option<SigningAlgorithm>,
    signature: Option<Vec<u8>>,
    body_hash: Option<Vec<u8>>,
    canonicalization: Option<Canonicalization>,
    sdid: Option<String>,
    selector: Option<String>,
    auid: Option<Mailbox>,
    signed_headers: Vec<String>,
    signature_timestamp: Option<i64>,
    expire_time: Option<i64>,
    body_length: Option<u64>,
    query_methods: Vec<QueryMethod>,
    atps_domain: Option<String>,
    atps_hash: Option<AtpsHashAlgorithm>,
    b_value_range: Range<usize>,
}

fn syntax(near: &str) -> DkimError {
    DkimError::TagSyntaxViolation {
        near: near.chars().take(50).collect(),
    }
}

fn alpha_alnum(s: &str) -> usize {
    let bytes = s.as_bytes();
    if !bytes.first().is_some_and(u8::is_ascii_alphabetic) {
        return 0;
    }
    1 + bytes[1..]
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric())
        .count()
}

/*
 * [RFC6376] 3.5.
 * sig-v-tag       = %x76 [FWS] "=" [FWS] 1*DIGIT
 *
 * It MUST have the value "1" for implementations compliant with this
 * version of DKIM; everything else is PERMFAIL (incompatible version).
 */
fn parse_v(_parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    if context.value == "1" {
        Ok(context.value.len())
    } else {
        Err(DkimError::IncompatibleVersion)
    }
}

/*
 * [RFC6376] 3.5.
 * sig-a-tag       = %x61 [FWS] "=" [FWS] sig-a-tag-alg
 * sig-a-tag-alg   = sig-a-tag-k "-" sig-a-tag-h
 */
fn parse_a(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let value = context.value;
    let key_len = alpha_alnum(value);
    if key_len == 0 {
        return Err(syntax(value));
    }
    if scan::char1(&value[key_len..], b'-') == 0 {
        return Err(syntax(value));
    }
    let hash_start = key_len + 1;
    let hash_len = alpha_alnum(&value[hash_start..]);
    if hash_len == 0 {
        return Err(syntax(value));
    }
    parser.signing_algorithm = Some(SigningAlgorithm::from_parts(
        &value[..key_len],
        &value[hash_start..hash_start + hash_len],
    )?);
    Ok(hash_start + hash_len)
}

fn parse_b(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    if context.value.is_empty() {
        return Err(syntax(context.value));
    }
    parser.signature = Some(decode_base64_value(context.value)?);
    parser.b_value_range = context.value_offset..context.value_offset + context.value.len();
    Ok(context.value.len())
}

fn parse_bh(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    if context.value.is_empty() {
        return Err(syntax(context.value));
    }
    parser.body_hash = Some(decode_base64_value(context.value)?);
    Ok(context.value.len())
}

fn parse_c(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let (canonicalization, consumed) = Canonicalization::parse_value(context.value)?;
    parser.canonicalization = Some(canonicalization);
    Ok(consumed)
}

fn parse_d(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let n = scan::domain_name(context.value);
    if n == 0 {
        return Err(syntax(context.value));
    }
    parser.sdid = Some(context.value[..n].to_string());
    Ok(n)
}

/*
 * [RFC6376] 3.5.
 * sig-h-tag       = %x68 [FWS] "=" [FWS] hdr-name
 *                    *( [FWS] ":" [FWS] hdr-name )
 */
fn parse_h(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let value = context.value;
    let mut pos = 0;
    loop {
        pos += scan::fws(&value[pos..]);
        let name = scan::field_name(&value[pos..]);
        if name == 0 {
            return Err(syntax(value));
        }
        parser
            .signed_headers
            .push(value[pos..pos + name].to_string());
        pos += name;
        let gap = scan::fws(&value[pos..]);
        if scan::char1(&value[pos + gap..], b':') == 0 {
            return Ok(pos);
        }
        pos += gap + 1;
    }
}

fn parse_i(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let mut decoded = String::new();
    let consumed = parse::dkim_quoted_printable(context.value, &mut decoded);
    let (auid, parsed) = mailbox::parse_dkim_identity(&decoded).map_err(|_| syntax(context.value))?;
    if parsed != decoded.len() {
        return Err(syntax(context.value));
    }
    parser.auid = Some(auid);
    Ok(consumed)
}

fn parse_l(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let (value, consumed) = parse::bounded_decimal(context.value, SIG_L_TAG_LEN);
    if consumed == 0 {
        return Err(syntax(context.value));
    }
    parser.body_length = Some(value.unsigned_abs());
    Ok(consumed)
}

/*
 * [RFC6376] 3.5.
 * sig-q-tag        = %x71 [FWS] "=" [FWS] sig-q-tag-method
 *                       *([FWS] ":" [FWS] sig-q-tag-method)
 * Unrecognized query mechanisms MUST be ignored.
 */
fn parse_q(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let value = context.value;
    let mut pos = 0;
    loop {
        pos += scan::fws(&value[pos..]);
        let method_start = pos;
        let type_len = scan::hyphenated_word(&value[pos..]);
        if type_len == 0 {
            return Err(syntax(value));
        }
        pos += type_len;
        if scan::char1(&value[pos..], b'/') > 0 {
            let args_len = scan::hyphenated_word(&value[pos + 1..]);
            if args_len == 0 {
                return Err(syntax(value));
            }
            pos += 1 + args_len;
        }
        let method = &value[method_start..pos];
        if method.eq_ignore_ascii_case("dns/txt")
            && !parser.query_methods.contains(&QueryMethod::DnsTxt)
        {
            parser.query_methods.push(QueryMethod::DnsTxt);
        }
        let end = pos;
        let gap = scan::fws(&value[pos..]);
        if scan::char1(&value[pos + gap..], b':') == 0 {
            if parser.query_methods.is_empty() {
                return Err(DkimError::UnsupportedQueryMethod);
            }
            return Ok(end);
        }
        pos += gap + 1;
    }
}

fn parse_s(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let n = scan::selector(context.value);
    if n == 0 {
        return Err(syntax(context.value));
    }
    parser.selector = Some(context.value[..n].to_string());
    Ok(n)
}

fn parse_t(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let (value, consumed) = parse::bounded_decimal(context.value, SIG_T_TAG_LEN);
    if consumed == 0 {
        return Err(syntax(context.value));
    }
    parser.signature_timestamp = Some(value);
    Ok(consumed)
}

fn parse_x(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let (value, consumed) = parse::bounded_decimal(context.value, SIG_X_TAG_LEN);
    if consumed == 0 {
        return Err(syntax(context.value));
    }
    parser.expire_time = Some(value);
    Ok(consumed)
}

/*
 * [RFC6541] 4.2.
 * dkim-atps-tag = %x61.74.70.73 *WSP "=" *WSP domain-name
 */
fn parse_atps(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let n = scan::domain_name(context.value);
    if n == 0 {
        return Err(syntax(context.value));
    }
    parser.atps_domain = Some(context.value[..n].to_string());
    Ok(n)
}

/*
 * [RFC6541] 4.2.
 * dkim-atpsh-tag = %x61.74.70.73.68 *WSP "=" *WSP ( "none" / key-h-tag-alg )
 */
fn parse_atpsh(parser: &mut SignatureParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let algorithm =
        AtpsHashAlgorithm::lookup(context.value).ok_or_else(|| syntax(context.value))?;
    parser.atps_hash = Some(algorithm);
    Ok(context.value.len())
}

const SIGNATURE_TAGS: &[TagSpec<SignatureParser, DkimError>] = &[
    TagSpec { name: "v", required: true, default_value: None, parser: Some(parse_v) },
    TagSpec { name: "a", required: true, default_value: None, parser: Some(parse_a) },
    TagSpec { name: "b", required: true, default_value: None, parser: Some(parse_b) },
    TagSpec { name: "bh", required: true, default_value: None, parser: Some(parse_bh) },
    TagSpec { name: "c", required: false, default_value: Some("simple/simple"), parser: Some(parse_c) },
    TagSpec { name: "d", required: true, default_value: None, parser: Some(parse_d) },
    TagSpec { name: "h", required: true, default_value: None, parser: Some(parse_h) },
    TagSpec { name: "i", required: false, default_value: None, parser: Some(parse_i) },
    TagSpec { name: "l", required: false, default_value: None, parser: Some(parse_l) },
    TagSpec { name: "q", required: false, default_value: Some("dns/txt"), parser: Some(parse_q) },
    TagSpec { name: "s", required: true, default_value: None, parser: Some(parse_s) },
    TagSpec { name: "t", required: false, default_value: None, parser: Some(parse_t) },
    TagSpec { name: "x", required: false, default_value: None, parser: Some(parse_x) },
    // sig-z-tag has no concern with the verification process
    TagSpec { name: "z", required: false, default_value: None, parser: None },
    TagSpec { name: "atps", required: false, default_value: None, parser: Some(parse_atps) },
    TagSpec { name: "atpsh", required: false, default_value: None, parser: Some(parse_atpsh) },
];

impl std::str::FromStr for Signature {
    type Err = DkimError;

    fn from_str(raw_value: &str) -> Result<Self, Self::Err> {
        let mut parser = SignatureParser::default();
        taglist::parse(&mut parser, raw_value, SIGNATURE_TAGS, false, false)?;

        let sdid = parser.sdid.ok_or(DkimError::MissingRequiredTag { name: "d" })?;

        /*
         * [RFC6376] 6.1.1.
         * If the "h=" tag does not include the From header field, the
         * Verifier MUST ignore the DKIM-Signature header field.
         */
        if !parser
            .signed_headers
            .iter()
            .any(|name| name.eq_ignore_ascii_case(FROM_HEADER))
        {
            return Err(DkimError::FromFieldNotSigned);
        }

        // consistency between sig-t-tag and sig-x-tag
        if let (Some(timestamp), Some(expire)) = (parser.signature_timestamp, parser.expire_time) {
            if expire < timestamp {
                return Err(DkimError::InconsistentTimestamp);
            }
        }

        let auid = match parser.auid {
            /*
             * [RFC6376] 6.1.1.
             * Verifiers MUST confirm that the domain specified in the "d="
             * tag is the same as or a parent domain of the domain part of
             * the "i=" tag.
             */
            Some(auid) => {
                if !domain_is_within(&sdid, auid.domain()) {
                    return Err(DkimError::DomainMismatch);
                }
                auid
            }
            /*
             * [RFC6376] 6.1.1.
             * If the DKIM-Signature header field does not contain the "i="
             * tag, the Verifier MUST behave as though the value of that
             * tag were "@d".
             */
            None => Mailbox::new("", sdid.clone()),
        };

        Ok(Self {
            signing_algorithm: parser
                .signing_algorithm
                .ok_or(DkimError::MissingRequiredTag { name: "a" })?,
            signature: parser
                .signature
                .ok_or(DkimError::MissingRequiredTag { name: "b" })?,
            body_hash: parser
                .body_hash
                .ok_or(DkimError::MissingRequiredTag { name: "bh" })?,
            canonicalization: parser.canonicalization.unwrap_or_default(),
            sdid,
            selector: parser
                .selector
                .ok_or(DkimError::MissingRequiredTag { name: "s" })?,
            auid,
            signed_headers: parser.signed_headers,
            signature_timestamp: parser.signature_timestamp,
            expire_time: parser.expire_time,
            body_length: parser.body_length,
            query_methods: parser.query_methods,
            atps_domain: parser.atps_domain,
            atps_hash: parser.atps_hash,
            raw_value: raw_value.to_string(),
            b_value_range: parser.b_value_range,
        })
    }
}

impl Signature {
    /// Check whether the signature has expired.
    pub(super) fn check_expiry(&self, now: i64) -> Result<(), DkimError> {
        /*
         * [RFC6376] 6.1.1.
         * Verifiers MAY ignore the DKIM-Signature header field and return
         * PERMFAIL (signature expired) if it contains an "x=" tag and the
         * signature has expired.
         */
        match self.expire_time {
            Some(expire) if expire > 0 && expire < now => Err(DkimError::SignatureExpired),
            _ => Ok(()),
        }
    }

    /// Check whether the signature claims a future timestamp beyond the
    /// tolerated clock skew.
    pub(super) fn check_future_timestamp(&self, now: i64, max_clock_skew: i64) -> Result<(), DkimError> {
        match self.signature_timestamp {
            Some(timestamp) if timestamp > now + max_clock_skew => {
                Err(DkimError::InconsistentTimestamp)
            }
            _ => Ok(()),
        }
    }

    /// The DNS name the public key record is published at.
    #[must_use]
    pub fn get_dns_query(&self) -> String {
        format!("{}.{DKIM_DNS_NAMESPACE}.{}", self.selector, self.sdid)
    }

    #[must_use]
    pub fn is_header_signed(&self, name: &str) -> bool {
        self.signed_headers
            .iter()
            .any(|signed| signed.eq_ignore_ascii_case(name))
    }

    /// The raw header value with the `b=` tag value blanked, the form the
    /// header hash covers (RFC 6376 §3.7).
    #[must_use]
    pub(super) fn raw_value_with_empty_b(&self) -> String {
        let mut blanked =
            String::with_capacity(self.raw_value.len() - self.b_value_range.len());
        blanked.push_str(&self.raw_value[..self.b_value_range.start]);
        blanked.push_str(&self.raw_value[self.b_value_range.end..]);
        blanked
    }

    /// First characters of the base64 signature, for the `header.b`
    /// property of Authentication-Results (RFC 6008).
    #[must_use]
    pub fn signature_prefix(&self, len: usize) -> String {
        let encoded = STANDARD.encode(&self.signature);
        encoded.chars().take(len).collect()
    }

    /// Render the tag-list (for the signer side): `bh=` before `b=`, the
    /// `b=` value empty in digest mode and filled on emission, folded near
    /// 78 columns with `\n\t`.
    #[must_use]
    pub(super) fn render_value(&self, fill_signature: bool) -> String {
        let mut fold = FoldString::new(78);
        fold.consume_line_space(super::DKIM_SIGNHEADER.len() + 2);

        fold.append_block(false, "v=1;");
        fold.append_block(true, &format!(" a={};", self.signing_algorithm));
        fold.append_block(true, &format!(" c={};", self.canonicalization));
        fold.append_block(true, &format!(" d={};", self.sdid));
        fold.append_block(true, &format!(" s={};", self.selector));
        if !self.auid.local_part().is_empty() || self.auid.domain() != self.sdid {
            fold.append_block(true, &format!(" i={};", self.auid.to_addr_spec()));
        }
        if let Some(timestamp) = self.signature_timestamp {
            fold.append_block(true, &format!(" t={timestamp};"));
        }
        if let Some(expire) = self.expire_time {
            fold.append_block(true, &format!(" x={expire};"));
        }
        if let Some(limit) = self.body_length {
            fold.append_block(true, &format!(" l={limit};"));
        }
        if let Some(atps_domain) = &self.atps_domain {
            fold.append_block(true, &format!(" atps={atps_domain};"));
        }
        if let Some(atps_hash) = self.atps_hash {
            fold.append_block(true, &format!(" atpsh={atps_hash};"));
        }
        fold.append_block(true, &format!(" bh={};", STANDARD.encode(&self.body_hash)));

        fold.append_block(true, " h=");
        for (index, name) in self.signed_headers.iter().enumerate() {
            let separator = if index + 1 == self.signed_headers.len() {
                ";"
            } else {
                ":"
            };
            fold.append_block(index > 0, &format!("{name}{separator}"));
        }

        fold.append_block(true, " b=");
        if fill_signature {
            let encoded = STANDARD.encode(&self.signature);
            let mut rest = encoded.as_str();
            while !rest.is_empty() {
                let take = rest.len().min(72);
                fold.append_block(true, &rest[..take]);
                rest = &rest[take..];
            }
        }
        fold.into_string()
    }
}
