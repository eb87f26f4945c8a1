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

//! Allocating parsers. Each function scans like its `scan` sibling but also
//! appends the semantic value to the caller-provided buffer: quoted-pairs
//! are interpreted, FWS is collapsed, encodings are decoded.

use super::scan;

/// RFC 5322 `dot-atom`: the semantic value is the `dot-atom-text` without
/// the surrounding CFWS.
#[must_use]
pub fn dot_atom(s: &str, out: &mut String) -> usize {
    let lead = scan::cfws(s);
    let core = scan::dot_atom_text(&s[lead..]);
    if core == 0 {
        return 0;
    }
    out.push_str(&s[lead..lead + core]);
    lead + core + scan::cfws(&s[lead + core..])
}

/// RFC 5322 `quoted-string`: the semantic value is the content between the
/// DQUOTEs with quoted-pairs interpreted and each inner FWS run collapsed
/// to a single SP.
#[must_use]
pub fn quoted_string(s: &str, out: &mut String) -> usize {
    let lead = scan::cfws(s);
    let mut pos = lead;
    if scan::char1(&s[pos..], b'"') == 0 {
        return 0;
    }
    pos += 1;
    let mut pending_ws = false;
    loop {
        let ws = scan::fws(&s[pos..]);
        if ws > 0 {
            pos += ws;
            pending_ws = true;
            continue;
        }
        let rest = &s[pos..];
        let b = rest.as_bytes();
        if b.first().is_some_and(|&c| scan::is_qtext(c)) {
            if pending_ws {
                out.push(' ');
                pending_ws = false;
            }
            let n = b.iter().take_while(|&&c| scan::is_qtext(c)).count();
            out.push_str(&rest[..n]);
            pos += n;
        } else if scan::quoted_pair(rest) > 0 {
            if pending_ws {
                out.push(' ');
                pending_ws = false;
            }
            out.push(rest.as_bytes()[1] as char);
            pos += 2;
        } else {
            break;
        }
    }
    if scan::char1(&s[pos..], b'"') == 0 {
        return 0;
    }
    pos += 1;
    pos + scan::cfws(&s[pos..])
}

/// RFC 5321 `QuotedString`: quoted-pairSMTP interpreted, no FWS inside.
#[must_use]
pub fn quoted_string_smtp(s: &str, out: &mut String) -> usize {
    if scan::char1(s, b'"') == 0 {
        return 0;
    }
    let mut pos = 1;
    loop {
        let rest = &s[pos..];
        let b = rest.as_bytes();
        if b.first().is_some_and(|&c| scan::is_qtext_smtp(c)) {
            let n = b.iter().take_while(|&&c| scan::is_qtext_smtp(c)).count();
            out.push_str(&rest[..n]);
            pos += n;
        } else if scan::quoted_pair_smtp(rest) > 0 {
            out.push(b[1] as char);
            pos += 2;
        } else {
            break;
        }
    }
    if scan::char1(&s[pos..], b'"') > 0 {
        pos + 1
    } else {
        0
    }
}

const fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}

/// RFC 6376 `dkim-quoted-printable`: `=XX` decoded, FWS dropped.
#[must_use]
pub fn dkim_quoted_printable(s: &str, out: &mut String) -> usize {
    let b = s.as_bytes();
    let mut pos = 0;
    loop {
        let ws = scan::fws(&s[pos..]);
        if ws > 0 {
            pos += ws;
            continue;
        }
        match b.get(pos) {
            Some(&b'=')
                if b.get(pos + 1).is_some_and(u8::is_ascii_hexdigit)
                    && b.get(pos + 2).is_some_and(u8::is_ascii_hexdigit) =>
            {
                out.push((hex_value(b[pos + 1]) * 16 + hex_value(b[pos + 2])) as char);
                pos += 3;
            }
            Some(&c) if scan::is_dkim_safe_char(c) => {
                out.push(c as char);
                pos += 1;
            }
            _ => return pos,
        }
    }
}

/// RFC 3461 `xtext`: `+XX` decoded (uppercase hex only).
#[must_use]
pub fn xtext(s: &str, out: &mut String) -> usize {
    let b = s.as_bytes();
    let mut pos = 0;
    loop {
        match b.get(pos) {
            Some(&b'+')
                if b.get(pos + 1).is_some_and(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F'))
                    && b.get(pos + 2).is_some_and(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F')) =>
            {
                out.push((hex_value(b[pos + 1]) * 16 + hex_value(b[pos + 2])) as char);
                pos += 3;
            }
            Some(&c) if scan::is_xchar(c) => {
                out.push(c as char);
                pos += 1;
            }
            _ => return pos,
        }
    }
}

/// Parse a bounded decimal integer (`1*DIGIT`, at most `max_digits`).
/// Returns `(value, consumed)`; `consumed == 0` means no match.
#[must_use]
pub fn bounded_decimal(s: &str, max_digits: usize) -> (i64, usize) {
    let n = scan::digit_block(s);
    if n == 0 || n > max_digits {
        return (-1, 0);
    }
    match s[..n].parse::<i64>() {
        Ok(v) => (v, n),
        Err(_) => (-1, 0),
    }
}
