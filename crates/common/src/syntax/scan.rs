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

//! Non-allocating scanners. Every function takes the remaining input and
//! returns the number of bytes matched at its start (0 = no match).

// character classes ////////////////////////////////////////////////////

/// RFC 5322 `atext`
#[must_use]
pub const fn is_atext(c: u8) -> bool {
    matches!(c,
        b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9'
        | b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-'
        | b'/' | b'=' | b'?' | b'^' | b'_' | b'`' | b'{' | b'|' | b'}' | b'~')
}

/// RFC 5322 `ctext`
#[must_use]
pub const fn is_ctext(c: u8) -> bool {
    matches!(c, 33..=39 | 42..=91 | 93..=126)
}

/// RFC 5322 `dtext`
#[must_use]
pub const fn is_dtext(c: u8) -> bool {
    matches!(c, 33..=90 | 94..=126)
}

/// RFC 5322 `ftext` (printable US-ASCII except `:`)
#[must_use]
pub const fn is_ftext(c: u8) -> bool {
    matches!(c, 33..=57 | 59..=126)
}

/// RFC 5322 `qtext`
#[must_use]
pub const fn is_qtext(c: u8) -> bool {
    matches!(c, 33 | 35..=91 | 93..=126)
}

/// RFC 5321 `qtextSMTP`
#[must_use]
pub const fn is_qtext_smtp(c: u8) -> bool {
    matches!(c, 32..=33 | 35..=91 | 93..=126)
}

/// RFC 5234 `VCHAR`
#[must_use]
pub const fn is_vchar(c: u8) -> bool {
    matches!(c, 0x21..=0x7e)
}

/// RFC 5234 `WSP`
#[must_use]
pub const fn is_wsp(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

#[must_use]
pub const fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic()
}

#[must_use]
pub const fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

#[must_use]
pub const fn is_alnum(c: u8) -> bool {
    c.is_ascii_alphanumeric()
}

/// RFC 6376 `ALNUMPUNC`
#[must_use]
pub const fn is_alnumpunc(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// RFC 6376 `VALCHAR` (EXCLAMATION to TILDE except SEMICOLON)
#[must_use]
pub const fn is_valchar(c: u8) -> bool {
    matches!(c, 0x21..=0x3a | 0x3c..=0x7e)
}

/// RFC 6376 `dkim-safe-char` (VALCHAR except `;` and `=`)
#[must_use]
pub const fn is_dkim_safe_char(c: u8) -> bool {
    matches!(c, 0x21..=0x3a | 0x3c | 0x3e..=0x7e)
}

/// base64 alphabet character (without `=` padding)
#[must_use]
pub const fn is_base64_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'+' || c == b'/'
}

/// RFC 7208 `name` character (after the leading ALPHA)
#[must_use]
pub const fn is_spf_name(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_' | b'.')
}

/// RFC 3461 `xchar`
#[must_use]
pub const fn is_xchar(c: u8) -> bool {
    matches!(c, 0x21..=0x7e) && c != b'+' && c != b'='
}

/// RFC 2045 `token` character
#[must_use]
pub const fn is_mime_token(c: u8) -> bool {
    matches!(c, 0x21..=0x7e)
        && !matches!(
            c,
            b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/' | b'[' | b']' | b'?' | b'='
        )
}

// elementary scanners //////////////////////////////////////////////////

/// Match the single byte `c`.
#[must_use]
pub fn char1(s: &str, c: u8) -> usize {
    usize::from(s.as_bytes().first() == Some(&c))
}

/// Match `lit` byte for byte.
#[must_use]
pub fn string(s: &str, lit: &str) -> usize {
    if s.as_bytes().len() >= lit.len() && &s.as_bytes()[..lit.len()] == lit.as_bytes() {
        lit.len()
    } else {
        0
    }
}

/// Match `lit` ASCII-case-insensitively.
#[must_use]
pub fn casestring(s: &str, lit: &str) -> usize {
    if s.len() >= lit.len() && s.as_bytes()[..lit.len()].eq_ignore_ascii_case(lit.as_bytes()) {
        lit.len()
    } else {
        0
    }
}

fn block(s: &str, pred: fn(u8) -> bool) -> usize {
    s.as_bytes().iter().take_while(|&&c| pred(c)).count()
}

#[must_use]
pub fn wsp(s: &str) -> usize {
    usize::from(s.as_bytes().first().is_some_and(|&c| is_wsp(c)))
}

#[must_use]
pub fn wsp_block(s: &str) -> usize {
    block(s, is_wsp)
}

#[must_use]
pub fn sp_block(s: &str) -> usize {
    block(s, |c| c == b' ')
}

#[must_use]
pub fn digit_block(s: &str) -> usize {
    block(s, is_digit)
}

#[must_use]
pub fn alnum_block(s: &str) -> usize {
    block(s, is_alnum)
}

#[must_use]
pub fn atext_block(s: &str) -> usize {
    block(s, is_atext)
}

#[must_use]
pub fn field_name(s: &str) -> usize {
    block(s, is_ftext)
}

#[must_use]
pub fn mime_token(s: &str) -> usize {
    block(s, is_mime_token)
}

/// CRLF, leniently also a bare LF (messages are frequently handed over
/// LF-normalized by the MTA glue).
#[must_use]
pub fn crlf(s: &str) -> usize {
    let b = s.as_bytes();
    if b.starts_with(b"\r\n") {
        2
    } else {
        usize::from(b.first() == Some(&b'\n'))
    }
}

/// RFC 5322 `FWS` (folding white space), accepting multiple folds.
#[must_use]
pub fn fws(s: &str) -> usize {
    let mut pos = 0;
    loop {
        pos += wsp_block(&s[pos..]);
        let nl = crlf(&s[pos..]);
        if nl > 0 && wsp(&s[pos + nl..]) > 0 {
            pos += nl;
            continue;
        }
        return pos;
    }
}

// RFC 5322 comments / CFWS /////////////////////////////////////////////

/// RFC 5322 `quoted-pair`
#[must_use]
pub fn quoted_pair(s: &str) -> usize {
    let b = s.as_bytes();
    if b.first() == Some(&b'\\') && b.get(1).is_some_and(|&c| is_vchar(c) || is_wsp(c)) {
        2
    } else {
        0
    }
}

/// RFC 5322 `comment` (recursive)
#[must_use]
pub fn comment(s: &str) -> usize {
    if char1(s, b'(') == 0 {
        return 0;
    }
    let mut pos = 1;
    loop {
        pos += fws(&s[pos..]);
        let rest = &s[pos..];
        let n = {
            let b = rest.as_bytes();
            if b.first().is_some_and(|&c| is_ctext(c)) {
                block(rest, is_ctext)
            } else {
                let qp = quoted_pair(rest);
                if qp > 0 {
                    qp
                } else {
                    comment(rest)
                }
            }
        };
        if n == 0 {
            break;
        }
        pos += n;
    }
    if char1(&s[pos..], b')') > 0 {
        pos + 1
    } else {
        0
    }
}

/// RFC 5322 `CFWS`
#[must_use]
pub fn cfws(s: &str) -> usize {
    let mut pos = 0;
    loop {
        let f = fws(&s[pos..]);
        let c = comment(&s[pos + f..]);
        if c == 0 {
            // a trailing FWS without comment still belongs to CFWS
            pos += f;
            return pos;
        }
        pos += f + c;
    }
}

// RFC 5322 atoms and friends ///////////////////////////////////////////

/// RFC 5322 `dot-atom-text`
#[must_use]
pub fn dot_atom_text(s: &str) -> usize {
    let first = atext_block(s);
    if first == 0 {
        return 0;
    }
    let mut pos = first;
    loop {
        if char1(&s[pos..], b'.') == 0 {
            return pos;
        }
        let label = atext_block(&s[pos + 1..]);
        if label == 0 {
            return pos;
        }
        pos += 1 + label;
    }
}

/// RFC 5322 `dot-atom`
#[must_use]
pub fn dot_atom(s: &str) -> usize {
    let lead = cfws(s);
    let core = dot_atom_text(&s[lead..]);
    if core == 0 {
        return 0;
    }
    lead + core + cfws(&s[lead + core..])
}

/// RFC 5322 `atom`
#[must_use]
pub fn atom(s: &str) -> usize {
    let lead = cfws(s);
    let core = atext_block(&s[lead..]);
    if core == 0 {
        return 0;
    }
    lead + core + cfws(&s[lead + core..])
}

/// RFC 5322 `quoted-string`
#[must_use]
pub fn quoted_string(s: &str) -> usize {
    let lead = cfws(s);
    let mut pos = lead;
    if char1(&s[pos..], b'"') == 0 {
        return 0;
    }
    pos += 1;
    loop {
        pos += fws(&s[pos..]);
        let rest = &s[pos..];
        let n = if rest.as_bytes().first().is_some_and(|&c| is_qtext(c)) {
            block(rest, is_qtext)
        } else {
            quoted_pair(rest)
        };
        if n == 0 {
            break;
        }
        pos += n;
    }
    if char1(&s[pos..], b'"') == 0 {
        return 0;
    }
    pos += 1;
    pos + cfws(&s[pos..])
}

/// RFC 5322 `word`
#[must_use]
pub fn word(s: &str) -> usize {
    let a = atom(s);
    if a > 0 {
        a
    } else {
        quoted_string(s)
    }
}

/// RFC 5322 `phrase`
#[must_use]
pub fn phrase(s: &str) -> usize {
    let mut pos = word(s);
    if pos == 0 {
        return 0;
    }
    loop {
        // obs-phrase allows interleaved dots; seen in the wild in display names
        let n = {
            let w = word(&s[pos..]);
            if w > 0 {
                w
            } else {
                char1(&s[pos..], b'.')
            }
        };
        if n == 0 {
            return pos;
        }
        pos += n;
    }
}

/// RFC 5322 `domain-literal`
#[must_use]
pub fn domain_literal(s: &str) -> usize {
    let lead = cfws(s);
    let mut pos = lead;
    if char1(&s[pos..], b'[') == 0 {
        return 0;
    }
    pos += 1;
    loop {
        pos += fws(&s[pos..]);
        let n = block(&s[pos..], is_dtext);
        if n == 0 {
            break;
        }
        pos += n;
    }
    if char1(&s[pos..], b']') == 0 {
        return 0;
    }
    pos += 1;
    pos + cfws(&s[pos..])
}

/// RFC 5322 `local-part`
#[must_use]
pub fn local_part(s: &str) -> usize {
    let d = dot_atom(s);
    if d > 0 {
        d
    } else {
        quoted_string(s)
    }
}

/// RFC 5322 `domain`
#[must_use]
pub fn domain(s: &str) -> usize {
    let d = dot_atom(s);
    if d > 0 {
        d
    } else {
        domain_literal(s)
    }
}

/// RFC 5322 `addr-spec`
#[must_use]
pub fn addr_spec(s: &str) -> usize {
    let lp = local_part(s);
    if lp == 0 || char1(&s[lp..], b'@') == 0 {
        return 0;
    }
    let dom = domain(&s[lp + 1..]);
    if dom == 0 {
        return 0;
    }
    lp + 1 + dom
}

// RFC 5321 /////////////////////////////////////////////////////////////

/// RFC 5321 `sub-domain` (`Let-dig [Ldh-str]`)
#[must_use]
pub fn sub_domain(s: &str) -> usize {
    let b = s.as_bytes();
    if !b.first().is_some_and(|&c| is_alnum(c)) {
        return 0;
    }
    let run = b
        .iter()
        .take_while(|&&c| is_alnum(c) || c == b'-')
        .count();
    // Ldh-str must end with Let-dig
    let mut end = run;
    while end > 1 && b[end - 1] == b'-' {
        end -= 1;
    }
    end
}

/// RFC 5321 `Domain` (`sub-domain *("." sub-domain)`)
#[must_use]
pub fn domain_5321(s: &str) -> usize {
    let first = sub_domain(s);
    if first == 0 {
        return 0;
    }
    let mut pos = first;
    loop {
        if char1(&s[pos..], b'.') == 0 {
            return pos;
        }
        let label = sub_domain(&s[pos + 1..]);
        if label == 0 {
            return pos;
        }
        pos += 1 + label;
    }
}

/// RFC 5321 `address-literal`, permissively scanned
#[must_use]
pub fn address_literal(s: &str) -> usize {
    if char1(s, b'[') == 0 {
        return 0;
    }
    let inner = block(&s[1..], is_dtext);
    if inner == 0 || char1(&s[1 + inner..], b']') == 0 {
        return 0;
    }
    inner + 2
}

/// RFC 5321 `quoted-pairSMTP`
#[must_use]
pub fn quoted_pair_smtp(s: &str) -> usize {
    let b = s.as_bytes();
    if b.first() == Some(&b'\\') && b.get(1).is_some_and(|&c| matches!(c, 0x20..=0x7e)) {
        2
    } else {
        0
    }
}

/// RFC 5321 `QuotedString`
#[must_use]
pub fn quoted_string_smtp(s: &str) -> usize {
    if char1(s, b'"') == 0 {
        return 0;
    }
    let mut pos = 1;
    loop {
        let rest = &s[pos..];
        let n = if rest.as_bytes().first().is_some_and(|&c| is_qtext_smtp(c)) {
            block(rest, is_qtext_smtp)
        } else {
            quoted_pair_smtp(rest)
        };
        if n == 0 {
            break;
        }
        pos += n;
    }
    if char1(&s[pos..], b'"') > 0 {
        pos + 1
    } else {
        0
    }
}

/// RFC 5321 `Dot-string`
#[must_use]
pub fn dot_string(s: &str) -> usize {
    let first = atext_block(s);
    if first == 0 {
        return 0;
    }
    let mut pos = first;
    loop {
        if char1(&s[pos..], b'.') == 0 {
            return pos;
        }
        let label = atext_block(&s[pos + 1..]);
        if label == 0 {
            return pos;
        }
        pos += 1 + label;
    }
}

/// RFC 5321 `Local-part`
#[must_use]
pub fn local_part_smtp(s: &str) -> usize {
    let d = dot_string(s);
    if d > 0 {
        d
    } else {
        quoted_string_smtp(s)
    }
}

/// RFC 5321 `Mailbox`
#[must_use]
pub fn mailbox_smtp(s: &str) -> usize {
    let lp = local_part_smtp(s);
    if lp == 0 || char1(&s[lp..], b'@') == 0 {
        return 0;
    }
    let dom = domain_5321(&s[lp + 1..]);
    let dom = if dom > 0 {
        dom
    } else {
        address_literal(&s[lp + 1..])
    };
    if dom == 0 {
        return 0;
    }
    lp + 1 + dom
}

// RFC 7208 /////////////////////////////////////////////////////////////

/// RFC 7208 `name` (`ALPHA *( ALPHA / DIGIT / "-" / "_" / "." )`)
#[must_use]
pub fn spf_name(s: &str) -> usize {
    if !s.as_bytes().first().is_some_and(|&c| is_alpha(c)) {
        return 0;
    }
    1 + block(&s[1..], is_spf_name)
}

// RFC 6376 /////////////////////////////////////////////////////////////

/// RFC 6376 `selector` (`sub-domain *( "." sub-domain )`)
#[must_use]
pub fn selector(s: &str) -> usize {
    domain_5321(s)
}

/// RFC 6376 `domain-name` (`sub-domain 1*("." sub-domain)`)
#[must_use]
pub fn domain_name(s: &str) -> usize {
    let n = domain_5321(s);
    // at least two labels
    if s[..n].contains('.') {
        n
    } else {
        0
    }
}

/// RFC 6376 `hyphenated-word`
#[must_use]
pub fn hyphenated_word(s: &str) -> usize {
    let b = s.as_bytes();
    if !b.first().is_some_and(|&c| is_alpha(c)) {
        return 0;
    }
    let run = 1 + b[1..]
        .iter()
        .take_while(|&&c| is_alnum(c) || c == b'-')
        .count();
    let mut end = run;
    while end > 1 && b[end - 1] == b'-' {
        end -= 1;
    }
    end
}

/// RFC 6376 `tag-name`
#[must_use]
pub fn tag_name(s: &str) -> usize {
    if !s.as_bytes().first().is_some_and(|&c| is_alpha(c)) {
        return 0;
    }
    1 + block(&s[1..], is_alnumpunc)
}

/// RFC 6376 `tag-value` (`[ tval *( 1*(WSP / FWS) tval ) ]`);
/// trailing whitespace is not part of the value.
#[must_use]
pub fn tag_value(s: &str) -> usize {
    let mut pos = block(s, is_valchar);
    if pos == 0 {
        return 0;
    }
    loop {
        let ws = fws(&s[pos..]);
        if ws == 0 {
            return pos;
        }
        let tval = block(&s[pos + ws..], is_valchar);
        if tval == 0 {
            return pos;
        }
        pos += ws + tval;
    }
}

/// RFC 6376 `base64string` (FWS tolerated between characters)
#[must_use]
pub fn base64string(s: &str) -> usize {
    let mut pos = 0;
    let mut end = 0;
    loop {
        let ws = fws(&s[pos..]);
        let n = block(&s[pos + ws..], is_base64_char);
        if n == 0 {
            break;
        }
        pos += ws + n;
        end = pos;
    }
    if end == 0 {
        return 0;
    }
    // up to two '=' padding characters
    for _ in 0..2 {
        let ws = fws(&s[pos..]);
        if char1(&s[pos + ws..], b'=') == 0 {
            break;
        }
        pos += ws + 1;
        end = pos;
    }
    end
}

/// RFC 6376 `dkim-quoted-printable`
#[must_use]
pub fn dkim_quoted_printable(s: &str) -> usize {
    let b = s.as_bytes();
    let mut pos = 0;
    loop {
        let rest = &s[pos..];
        let ws = fws(rest);
        if ws > 0 {
            pos += ws;
            continue;
        }
        match b.get(pos) {
            Some(&b'=')
                if b.get(pos + 1).is_some_and(|c| c.is_ascii_hexdigit())
                    && b.get(pos + 2).is_some_and(|c| c.is_ascii_hexdigit()) =>
            {
                pos += 3;
            }
            Some(&c) if is_dkim_safe_char(c) => pos += 1,
            _ => return pos,
        }
    }
}

/// "loose" dot-atom-text used by the obsolete `g=` granularity: atext or
/// `*`, dots anywhere between runs.
#[must_use]
pub fn loose_dot_atom_text(s: &str) -> usize {
    let is_loose = |c: u8| is_atext(c) || c == b'*';
    let first = block(s, is_loose);
    if first == 0 {
        return 0;
    }
    let mut pos = first;
    loop {
        if char1(&s[pos..], b'.') == 0 {
            return pos;
        }
        let label = block(&s[pos + 1..], is_loose);
        if label == 0 {
            return pos;
        }
        pos += 1 + label;
    }
}

// RFC 3461 /////////////////////////////////////////////////////////////

/// RFC 3461 `xtext`
#[must_use]
pub fn xtext(s: &str) -> usize {
    let b = s.as_bytes();
    let mut pos = 0;
    loop {
        match b.get(pos) {
            Some(&b'+')
                if b.get(pos + 1).is_some_and(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F'))
                    && b.get(pos + 2).is_some_and(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F')) =>
            {
                pos += 3;
            }
            Some(&c) if is_xchar(c) => pos += 1,
            _ => return pos,
        }
    }
}
