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

//! Macro-string parsing and expansion (RFC 7208 §7).

use std::fmt::Write;
use std::net::IpAddr;

use vauth_common::dns::Resolver;
use vauth_common::{domain_equals, domain_is_within, Mailbox};

const ALL_DELIMITERS: &str = ".-+,/_=";
const DEFAULT_P_MACRO_VALUE: &str = "unknown";
const DEFAULT_R_MACRO_VALUE: &str = "unknown";

/// Why a macro-string could not be expanded; every variant is a
/// `permerror` at the evaluation level.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(super) enum ExpandError {
    #[error("'%' not followed by a spec-defined character")]
    Syntax,
    #[error("undefined or out-of-context macro-letter")]
    UnsupportedMacro,
    #[error("delimiter specified repeatedly in macro-expand")]
    DelimiterDuplicated,
    #[error("expanded macro exceeds the configured size limit")]
    ExpansionTooLong,
}

/// Everything a macro expansion can refer to, borrowed from the
/// evaluator's frame.
pub(super) struct MacroContext<'a> {
    pub sender: &'a Mailbox,
    pub helo_domain: &'a str,
    pub ip: IpAddr,
    /// current `<domain>` of check_host()
    pub domain: &'a str,
    pub checking_domain: Option<&'a str>,
    pub expansion_limit: usize,
    pub max_ptr_names: usize,
    pub resolver: &'a dyn Resolver,
}

const fn is_macro_literal(c: u8) -> bool {
    matches!(c, 0x21..=0x7e) && c != b'%'
}

const fn is_delimiter(c: u8) -> bool {
    matches!(c, b'.' | b'-' | b'+' | b',' | b'/' | b'_' | b'=')
}

fn nibble(b: u8) -> char {
    char::from_digit(u32::from(b), 16).unwrap_or('0')
}

fn dotted_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let mut out = String::with_capacity(63);
            for (n, byte) in v6.octets().iter().enumerate() {
                if n > 0 {
                    out.push('.');
                }
                out.push(nibble(byte >> 4));
                out.push('.');
                out.push(nibble(byte & 0x0f));
            }
            out
        }
    }
}

/// Forward-confirm one PTR name against the client address.
/// `1` = confirmed, `0` = mismatch, `-1` = DNS error.
fn validate_ptr_name(ctx: &MacroContext<'_>, revdomain: &str) -> i8 {
    match ctx.ip {
        IpAddr::V4(v4) => match ctx.resolver.lookup_a(revdomain) {
            Ok(addrs) => i8::from(addrs.contains(&v4)),
            Err(_) => -1,
        },
        IpAddr::V6(v6) => match ctx.resolver.lookup_aaaa(revdomain) {
            Ok(addrs) => i8::from(addrs.contains(&v6)),
            Err(_) => -1,
        },
    }
}

/// The `%{p}` value: the validated domain name of `<ip>` (RFC 7208 §7.3),
/// preferring the current `<domain>`, then its subdomains, then anything.
/// `"unknown"` on DNS errors or when nothing validates.
fn validated_domain_name(ctx: &MacroContext<'_>) -> String {
    let Ok(names) = ctx.resolver.lookup_ptr(ctx.ip) else {
        return DEFAULT_P_MACRO_VALUE.to_string();
    };
    let names = &names[..names.len().min(ctx.max_ptr_names)];

    // preference passes: the <domain> itself, then its subdomains, then
    // any remaining name
    for pass in 0..3 {
        for name in names {
            let name = name.trim_end_matches('.');
            let selected = match pass {
                0 => domain_equals(ctx.domain, name),
                1 => domain_is_within(ctx.domain, name) && !domain_equals(ctx.domain, name),
                _ => !domain_is_within(ctx.domain, name),
            };
            if !selected {
                continue;
            }
            match validate_ptr_name(ctx, name) {
                1 => return name.to_string(),
                0 => {}
                _ => return DEFAULT_P_MACRO_VALUE.to_string(),
            }
        }
    }
    DEFAULT_P_MACRO_VALUE.to_string()
}

struct Macro {
    letter: u8,
    url_escape: bool,
    transformer: usize,
    reverse: bool,
    delimiters: String,
}

fn macro_source(ctx: &MacroContext<'_>, letter: u8, exp_record: bool) -> Result<String, ExpandError> {
    let value = match letter {
        b's' => format!("{}@{}", ctx.sender.local_part(), ctx.sender.domain()),
        b'l' => ctx.sender.local_part().to_string(),
        b'o' => ctx.sender.domain().to_string(),
        b'd' => ctx.domain.to_string(),
        b'i' => dotted_ip(ctx.ip),
        b'p' => validated_domain_name(ctx),
        b'v' => match ctx.ip {
            IpAddr::V4(_) => "in-addr".to_string(),
            IpAddr::V6(_) => "ip6".to_string(),
        },
        b'h' => ctx.helo_domain.to_string(),
        // the following are only legal inside the explanation string
        b'c' if exp_record => ctx.ip.to_string(),
        b'r' if exp_record => ctx
            .checking_domain
            .unwrap_or(DEFAULT_R_MACRO_VALUE)
            .to_string(),
        b't' if exp_record => time::OffsetDateTime::now_utc().unix_timestamp().to_string(),
        _ => return Err(ExpandError::UnsupportedMacro),
    };
    Ok(value)
}

fn parse_macro(input: &str, exp_record: bool) -> Result<(Macro, usize), ExpandError> {
    // caller consumed "%{"
    let bytes = input.as_bytes();
    let mut pos = 0;

    let letter = *bytes.first().ok_or(ExpandError::Syntax)?;
    if !letter.is_ascii_alphabetic() {
        return Err(ExpandError::UnsupportedMacro);
    }
    let lower = letter.to_ascii_lowercase();
    if !matches!(lower, b's' | b'l' | b'o' | b'd' | b'i' | b'p' | b'v' | b'h' | b'c' | b'r' | b't') {
        return Err(ExpandError::UnsupportedMacro);
    }
    if !exp_record && matches!(lower, b'c' | b'r' | b't') {
        return Err(ExpandError::UnsupportedMacro);
    }
    pos += 1;

    // transformers = *DIGIT [ "r" ]
    let digits = vauth_common::syntax::scan::digit_block(&input[pos..]);
    let transformer = if digits == 0 {
        0
    } else {
        input[pos..pos + digits].parse::<usize>().unwrap_or(usize::MAX)
    };
    pos += digits;
    let reverse = bytes.get(pos) == Some(&b'r');
    if reverse {
        pos += 1;
    }

    // *delimiter; repeating one is a permanent error
    let mut delimiters = String::new();
    while let Some(&c) = bytes.get(pos) {
        if !is_delimiter(c) {
            break;
        }
        if delimiters.contains(c as char) {
            return Err(ExpandError::DelimiterDuplicated);
        }
        delimiters.push(c as char);
        pos += 1;
    }
    if delimiters.is_empty() {
        delimiters.push('.');
    }

    if bytes.get(pos) != Some(&b'}') {
        return Err(ExpandError::Syntax);
    }
    pos += 1;

    Ok((
        Macro {
            letter: lower,
            url_escape: letter.is_ascii_uppercase(),
            transformer,
            reverse,
            delimiters,
        },
        pos,
    ))
}

fn expand_one(ctx: &MacroContext<'_>, m: &Macro, exp_record: bool, out: &mut String) -> Result<(), ExpandError> {
    let source = macro_source(ctx, m.letter, exp_record)?;
    let mut parts: Vec<&str> = source
        .split(|c: char| m.delimiters.contains(c))
        .collect();
    if m.reverse {
        parts.reverse();
    }
    if m.transformer > 0 && m.transformer < parts.len() {
        parts.drain(..parts.len() - m.transformer);
    }
    let joined = parts.join(".");

    if m.url_escape {
        // [RFC7208] 7.3. / [RFC3986] 2.3.: escape everything outside the
        // unreserved set
        for c in joined.chars() {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
                out.push(c);
            } else {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    let _ = write!(out, "%{byte:02x}");
                }
            }
        }
    } else {
        out.push_str(&joined);
    }
    Ok(())
}

/// Expand a macro-string: consume as many `macro-expand` / `macro-literal`
/// tokens as the input offers and return the expansion together with the
/// number of bytes consumed.
pub(super) fn expand_macro_string(
    ctx: &MacroContext<'_>,
    input: &str,
    exp_record: bool,
) -> Result<(String, usize), ExpandError> {
    let bytes = input.as_bytes();
    let mut out = String::new();
    let mut pos = 0;

    loop {
        // macro-literal block
        let lit = bytes[pos..].iter().take_while(|&&c| is_macro_literal(c)).count();
        out.push_str(&input[pos..pos + lit]);
        pos += lit;

        if bytes.get(pos) != Some(&b'%') {
            return Ok((out, pos));
        }
        match bytes.get(pos + 1) {
            Some(b'{') => {
                let (m, consumed) = parse_macro(&input[pos + 2..], exp_record)?;
                expand_one(ctx, &m, exp_record, &mut out)?;
                if out.len() > ctx.expansion_limit {
                    return Err(ExpandError::ExpansionTooLong);
                }
                pos += 2 + consumed;
            }
            Some(b'%') => {
                out.push('%');
                pos += 2;
            }
            Some(b'_') => {
                out.push(' ');
                pos += 2;
            }
            Some(b'-') => {
                out.push_str("%20");
                pos += 2;
            }
            // [RFC7208] 7.1.: a '%' not followed by '{', '%', '-' or '_'
            // is a syntax error
            _ => return Err(ExpandError::Syntax),
        }
    }
}

/// Expand an explanation string: macro-strings separated by SP
/// (RFC 7208 `explain-string`).
pub(super) fn expand_explain_string(
    ctx: &MacroContext<'_>,
    input: &str,
) -> Result<String, ExpandError> {
    let mut out = String::new();
    let mut pos = 0;
    while pos < input.len() {
        if input.as_bytes()[pos] == b' ' {
            out.push(' ');
            pos += 1;
            continue;
        }
        let (chunk, consumed) = expand_macro_string(ctx, &input[pos..], true)?;
        if consumed == 0 {
            // nothing parseable left: explanation failures are silent at
            // the caller, report as syntax here
            return Err(ExpandError::Syntax);
        }
        out.push_str(&chunk);
        pos += consumed;
    }
    Ok(out)
}
