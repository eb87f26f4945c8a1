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

//! SPF/Sender ID record parsing (RFC 7208 §12 grammar, RFC 4406 scopes).
//!
//! `domain-spec` parameters are macro-expanded at parse time against the
//! current evaluation frame, and the expansion is truncated from the left
//! to the 253-octet domain name bound before it is ever queried.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use vauth_common::syntax::scan;

use super::macros::{expand_macro_string, ExpandError, MacroContext};

pub(crate) const SCOPE_SPF1: u8 = 0x01;
pub(crate) const SCOPE_SPF2_MFROM: u8 = 0x02;
pub(crate) const SCOPE_SPF2_PRA: u8 = 0x04;
pub(crate) const SCOPE_UNKNOWN: u8 = 0x08;

const SPF1_PREFIX: &str = "v=spf1";
const SPF2_PREFIX: &str = "spf2.0";

const IP4_MAX_CIDR_LENGTH: u16 = 32;
const IP6_MAX_CIDR_LENGTH: u16 = 128;
// 128 is the largest value, three digits are enough
const CIDRLEN_MAX_WIDTH: usize = 3;
const MACRO_EXPANSION_MAX_LENGTH: usize = 253;

/// Why a record failed to build; every variant maps to `permerror`.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(super) enum RecordError {
    #[error("unsupported mechanism")]
    UnsupportedMechanism,
    #[error("record syntax violation")]
    SyntaxViolation,
    #[error("invalid cidr-length")]
    InvalidCidrLength,
    #[error("{0}")]
    Macro(#[from] ExpandError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Qualifier {
    Plus,
    Minus,
    Question,
    Tilde,
}

impl Qualifier {
    pub(super) const fn score(self) -> super::SpfScore {
        match self {
            Self::Plus => super::SpfScore::Pass,
            Self::Minus => super::SpfScore::Fail,
            Self::Question => super::SpfScore::Neutral,
            Self::Tilde => super::SpfScore::SoftFail,
        }
    }

    const fn from_byte(c: u8) -> Option<Self> {
        match c {
            b'+' => Some(Self::Plus),
            b'-' => Some(Self::Minus),
            b'?' => Some(Self::Question),
            b'~' => Some(Self::Tilde),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MechanismKind {
    All,
    Include,
    A,
    Mx,
    Ptr,
    Ip4,
    Ip6,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    None,
    DomainSpec,
    Ip4,
    Ip6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CidrOption {
    None,
    Dual,
    Ip4Only,
    Ip6Only,
}

struct MechanismAttribute {
    name: &'static str,
    kind: MechanismKind,
    param_type: ParamType,
    involves_dns: bool,
    required_parameter: bool,
    cidr: CidrOption,
}

// first match wins, so "a" must come after "all"
const MECHANISMS: &[MechanismAttribute] = &[
    MechanismAttribute {
        name: "all",
        kind: MechanismKind::All,
        param_type: ParamType::None,
        involves_dns: false,
        required_parameter: false,
        cidr: CidrOption::None,
    },
    MechanismAttribute {
        name: "include",
        kind: MechanismKind::Include,
        param_type: ParamType::DomainSpec,
        involves_dns: true,
        required_parameter: true,
        cidr: CidrOption::None,
    },
    MechanismAttribute {
        name: "a",
        kind: MechanismKind::A,
        param_type: ParamType::DomainSpec,
        involves_dns: true,
        required_parameter: false,
        cidr: CidrOption::Dual,
    },
    MechanismAttribute {
        name: "mx",
        kind: MechanismKind::Mx,
        param_type: ParamType::DomainSpec,
        involves_dns: true,
        required_parameter: false,
        cidr: CidrOption::Dual,
    },
    MechanismAttribute {
        name: "ptr",
        kind: MechanismKind::Ptr,
        param_type: ParamType::DomainSpec,
        involves_dns: true,
        required_parameter: false,
        cidr: CidrOption::None,
    },
    MechanismAttribute {
        name: "ip4",
        kind: MechanismKind::Ip4,
        param_type: ParamType::Ip4,
        involves_dns: false,
        required_parameter: true,
        cidr: CidrOption::Ip4Only,
    },
    MechanismAttribute {
        name: "ip6",
        kind: MechanismKind::Ip6,
        param_type: ParamType::Ip6,
        involves_dns: false,
        required_parameter: true,
        cidr: CidrOption::Ip6Only,
    },
    MechanismAttribute {
        name: "exists",
        kind: MechanismKind::Exists,
        param_type: ParamType::DomainSpec,
        involves_dns: true,
        required_parameter: true,
        cidr: CidrOption::None,
    },
];

/// A parsed directive.
#[derive(Debug, Clone)]
pub(super) struct Term {
    pub qualifier: Qualifier,
    pub kind: MechanismKind,
    pub involves_dns: bool,
    /// the macro-expanded `domain-spec`, truncated to the DNS name length
    /// bound
    pub query_domain: Option<String>,
    pub ip4: Option<Ipv4Addr>,
    pub ip6: Option<Ipv6Addr>,
    pub ip4_cidr: u8,
    pub ip6_cidr: u8,
}

/// A parsed `redirect=` / `exp=` modifier.
#[derive(Debug, Clone)]
pub(super) struct ModifierTerm {
    pub query_domain: String,
}

#[derive(Debug, Clone, Default)]
pub(super) struct Record {
    pub directives: Vec<Term>,
    pub redirect: Option<ModifierTerm>,
    pub exp: Option<ModifierTerm>,
}

/// Parse the leading `version` production and return the scope mask plus
/// the byte offset where the terms begin. `None` when the string is not an
/// SPF record of any scope (not an error: the TXT RRset may carry
/// arbitrary other records).
pub(super) fn record_scope(record: &str) -> Option<(u8, usize)> {
    // SPF record?
    let n = scan::casestring(record, SPF1_PREFIX);
    if n > 0 {
        return terminated_scope(record, SCOPE_SPF1, n);
    }

    // Sender ID record?
    let n = scan::casestring(record, SPF2_PREFIX);
    if n == 0 || scan::char1(&record[n..], b'/') == 0 {
        return None;
    }
    let mut pos = n + 1;
    let mut mask = 0u8;
    loop {
        let name = scan::spf_name(&record[pos..]);
        if name == 0 {
            return None;
        }
        let scope = &record[pos..pos + name];
        if scope.eq_ignore_ascii_case("mfrom") {
            mask |= SCOPE_SPF2_MFROM;
        } else if scope.eq_ignore_ascii_case("pra") {
            mask |= SCOPE_SPF2_PRA;
        } else {
            // unsupported scopes are ignored, not fatal
            tracing::debug!(scope, "unsupported spf2.0 scope specified (ignored)");
            mask |= SCOPE_UNKNOWN;
        }
        pos += name;
        if scan::char1(&record[pos..], b',') == 0 {
            break;
        }
        pos += 1;
    }
    terminated_scope(record, mask, pos)
}

/// The version must be followed by SP or the end of the record.
fn terminated_scope(record: &str, mask: u8, pos: usize) -> Option<(u8, usize)> {
    if pos == record.len() || record.as_bytes()[pos] == b' ' {
        Some((mask, pos))
    } else {
        None
    }
}

/// Scan a cidr-length backwards from `term`'s tail. Returns
/// `Some((value, slash_index))` when the term ends in `"/" 1*3DIGIT`.
fn parse_back_cidr(term: &str) -> Option<(u16, usize)> {
    let bytes = term.as_bytes();
    if term.is_empty() {
        return None;
    }
    let mut digits = 0;
    let mut value: u32 = 0;
    let mut base: u32 = 1;
    while digits < CIDRLEN_MAX_WIDTH {
        let Some(&c) = bytes.len().checked_sub(digits + 1).and_then(|i| bytes.get(i)) else {
            break;
        };
        if !c.is_ascii_digit() {
            break;
        }
        value += u32::from(c - b'0') * base;
        base *= 10;
        digits += 1;
    }
    if digits == 0 {
        return None;
    }
    let slash = bytes.len().checked_sub(digits + 1)?;
    if bytes[slash] != b'/' {
        return None;
    }
    Some((value.min(u32::from(u16::MAX)) as u16, slash))
}

struct CidrParse {
    ip4_cidr: u16,
    ip6_cidr: u16,
    /// byte offset where the cidr-length part begins
    param_end: usize,
}

fn parse_cidr(option: CidrOption, term: &str) -> Result<CidrParse, RecordError> {
    let mut out = CidrParse {
        ip4_cidr: IP4_MAX_CIDR_LENGTH,
        ip6_cidr: IP6_MAX_CIDR_LENGTH,
        param_end: term.len(),
    };
    match option {
        CidrOption::None => {}
        CidrOption::Ip4Only => {
            if let Some((value, slash)) = parse_back_cidr(term) {
                if value == 0 || value > IP4_MAX_CIDR_LENGTH {
                    return Err(RecordError::InvalidCidrLength);
                }
                out.ip4_cidr = value;
                out.param_end = slash;
            }
        }
        CidrOption::Ip6Only => {
            if let Some((value, slash)) = parse_back_cidr(term) {
                if value == 0 || value > IP6_MAX_CIDR_LENGTH {
                    return Err(RecordError::InvalidCidrLength);
                }
                out.ip6_cidr = value;
                out.param_end = slash;
            }
        }
        CidrOption::Dual => {
            if let Some((value, slash)) = parse_back_cidr(term) {
                if slash > 0 && term.as_bytes()[slash - 1] == b'/' {
                    // "//N" is the ip6-cidr-length
                    if value == 0 || value > IP6_MAX_CIDR_LENGTH {
                        return Err(RecordError::InvalidCidrLength);
                    }
                    out.ip6_cidr = value;
                    if let Some((v4, slash4)) = parse_back_cidr(&term[..slash - 1]) {
                        if v4 == 0 || v4 > IP4_MAX_CIDR_LENGTH {
                            return Err(RecordError::InvalidCidrLength);
                        }
                        out.ip4_cidr = v4;
                        out.param_end = slash4;
                    } else {
                        out.param_end = slash - 1;
                    }
                } else {
                    if value == 0 || value > IP4_MAX_CIDR_LENGTH {
                        return Err(RecordError::InvalidCidrLength);
                    }
                    out.ip4_cidr = value;
                    out.param_end = slash;
                }
            }
        }
    }
    Ok(out)
}

/// Strip leading labels until the expansion fits the DNS name bound.
fn truncate_query_domain(expanded: &str) -> Result<String, RecordError> {
    let mut query = expanded;
    while query.len() > MACRO_EXPANSION_MAX_LENGTH {
        match query.split_once('.') {
            Some((_, upward)) => query = upward,
            // no labels remain
            None => return Err(RecordError::Macro(ExpandError::ExpansionTooLong)),
        }
    }
    Ok(query.to_string())
}

fn parse_domain_spec(
    ctx: &MacroContext<'_>,
    input: &str,
) -> Result<(String, usize), RecordError> {
    let (expanded, consumed) = expand_macro_string(ctx, input, false)?;
    let query = truncate_query_domain(&expanded)?;
    if query != expanded {
        tracing::info!(domain = ctx.domain, truncated = %query, "domain-spec truncated");
    }
    Ok((query, consumed))
}

impl Record {
    /// Parse the terms after the version production.
    pub(super) fn parse(ctx: &MacroContext<'_>, terms: &str) -> Result<Self, RecordError> {
        let mut record = Self::default();
        let mut rest = terms.trim_start_matches(' ');
        if rest.is_empty() {
            return Ok(record);
        }
        loop {
            let term_len = rest.find(' ').unwrap_or(rest.len());
            record.parse_term(ctx, &rest[..term_len])?;
            rest = &rest[term_len..];
            let gap = scan::sp_block(rest);
            if gap == 0 || gap == rest.len() {
                rest = &rest[gap..];
                break;
            }
            rest = &rest[gap..];
        }
        // trailing *SP is fine, anything else is not
        if rest.is_empty() {
            Ok(record)
        } else {
            Err(RecordError::SyntaxViolation)
        }
    }

    fn parse_term(&mut self, ctx: &MacroContext<'_>, term: &str) -> Result<(), RecordError> {
        let bytes = term.as_bytes();
        let qualifier = bytes.first().copied().and_then(Qualifier::from_byte);
        let name_start = usize::from(qualifier.is_some());
        let name_len = scan::spf_name(&term[name_start..]);
        let name = &term[name_start..name_start + name_len];
        let after_name = name_start + name_len;

        if scan::char1(&term[after_name..], b'=') == 0 {
            // a mechanism
            let Some(attr) = MECHANISMS
                .iter()
                .find(|attr| attr.name.eq_ignore_ascii_case(name))
            else {
                tracing::debug!(near = term, "unsupported mechanism");
                return Err(RecordError::UnsupportedMechanism);
            };
            let parsed = self.build_term(ctx, attr, &term[after_name..])?;
            self.directives.push(Term {
                qualifier: qualifier.unwrap_or(Qualifier::Plus),
                ..parsed
            });
            Ok(())
        } else if qualifier.is_none() {
            // a modifier
            match name.to_ascii_lowercase().as_str() {
                "redirect" => self.build_modifier(ctx, &term[after_name + 1..], |record| {
                    &mut record.redirect
                }),
                "exp" => {
                    self.build_modifier(ctx, &term[after_name + 1..], |record| &mut record.exp)
                }
                // [RFC7208] 6.: Unrecognized modifiers MUST be ignored
                _ => {
                    tracing::debug!(near = term, "unknown modifier (ignored)");
                    Ok(())
                }
            }
        } else {
            // a qualifier followed by '=': syntax violation
            Err(RecordError::SyntaxViolation)
        }
    }

    fn build_term(
        &mut self,
        ctx: &MacroContext<'_>,
        attr: &MechanismAttribute,
        after_name: &str,
    ) -> Result<Term, RecordError> {
        let cidr = parse_cidr(attr.cidr, after_name)?;
        let param = &after_name[..cidr.param_end];

        let mut term = Term {
            qualifier: Qualifier::Plus,
            kind: attr.kind,
            involves_dns: attr.involves_dns,
            query_domain: None,
            ip4: None,
            ip6: None,
            ip4_cidr: cidr.ip4_cidr as u8,
            ip6_cidr: cidr.ip6_cidr as u8,
        };

        if attr.param_type == ParamType::None {
            if !param.is_empty() {
                return Err(RecordError::SyntaxViolation);
            }
            return Ok(term);
        }

        if scan::char1(param, b':') == 0 {
            if attr.required_parameter {
                return Err(RecordError::SyntaxViolation);
            }
            if !param.is_empty() {
                return Err(RecordError::SyntaxViolation);
            }
            return Ok(term);
        }
        let value = &param[1..];

        match attr.param_type {
            ParamType::DomainSpec => {
                let (query, consumed) = parse_domain_spec(ctx, value)?;
                if consumed != value.len() {
                    return Err(RecordError::SyntaxViolation);
                }
                term.query_domain = Some(query);
            }
            ParamType::Ip4 => {
                let len = value
                    .bytes()
                    .take_while(|c| c.is_ascii_digit() || *c == b'.')
                    .count();
                if len != value.len() {
                    return Err(RecordError::SyntaxViolation);
                }
                term.ip4 =
                    Some(Ipv4Addr::from_str(value).map_err(|_| RecordError::SyntaxViolation)?);
            }
            ParamType::Ip6 => {
                let len = value
                    .bytes()
                    .take_while(|c| c.is_ascii_hexdigit() || *c == b':' || *c == b'.')
                    .count();
                if len != value.len() {
                    return Err(RecordError::SyntaxViolation);
                }
                term.ip6 =
                    Some(Ipv6Addr::from_str(value).map_err(|_| RecordError::SyntaxViolation)?);
            }
            ParamType::None => unreachable!("handled above"),
        }
        Ok(term)
    }

    fn build_modifier(
        &mut self,
        ctx: &MacroContext<'_>,
        value: &str,
        slot: fn(&mut Self) -> &mut Option<ModifierTerm>,
    ) -> Result<(), RecordError> {
        let (query, consumed) = parse_domain_spec(ctx, value)?;
        if consumed != value.len() || query.is_empty() {
            return Err(RecordError::SyntaxViolation);
        }
        // [RFC7208] 6.: redirect and exp MUST NOT appear more than once
        if slot(self).is_some() {
            return Err(RecordError::SyntaxViolation);
        }
        *slot(self) = Some(ModifierTerm { query_domain: query });
        Ok(())
    }
}
