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

use crate::syntax::{parse, scan};

/// An internet mailbox split into its two halves.
///
/// The local-part is stored with quoting removed and compared
/// case-sensitively; the domain is compared ASCII-case-insensitively.
/// The SMTP null reverse-path `<>` is represented by an empty mailbox.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Mailbox {
    local_part: String,
    domain: String,
}

#[must_use]
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    /// The input does not match the requested mailbox production; the
    /// offset points at the first offending byte.
    #[error("mailbox syntax error at byte offset {offset}")]
    ParseAt {
        ///
        offset: usize,
    },
}

const fn err(offset: usize) -> MailboxError {
    MailboxError::ParseAt { offset }
}

impl Mailbox {
    #[must_use]
    pub fn new(local_part: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local_part: local_part.into(),
            domain: domain.into(),
        }
    }

    /// The SMTP null reverse-path `<>`.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            local_part: String::new(),
            domain: String::new(),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.local_part.is_empty() && self.domain.is_empty()
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether the local-part needs quoting to be written back as an
    /// `addr-spec`. An empty local-part (the DKIM identity form `@domain`)
    /// is written bare.
    #[must_use]
    pub fn is_local_part_quoted(&self) -> bool {
        !self.local_part.is_empty()
            && scan::dot_atom_text(&self.local_part) != self.local_part.len()
    }

    /// Render as `addr-spec`, re-quoting the local-part when necessary.
    #[must_use]
    pub fn to_addr_spec(&self) -> String {
        if self.is_null() {
            return "<>".to_string();
        }
        let mut out = String::with_capacity(self.local_part.len() + self.domain.len() + 3);
        if self.is_local_part_quoted() {
            out.push('"');
            for c in self.local_part.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(&self.local_part);
        }
        out.push('@');
        out.push_str(&self.domain);
        out
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_addr_spec())
    }
}

// RFC 5322 /////////////////////////////////////////////////////////////

fn local_part_5322(s: &str, out: &mut String) -> usize {
    let n = parse::dot_atom(s, out);
    if n > 0 {
        n
    } else {
        parse::quoted_string(s, out)
    }
}

fn domain_5322(s: &str, out: &mut String) -> usize {
    let n = parse::dot_atom(s, out);
    if n > 0 {
        return n;
    }
    // domain-literal, captured with its brackets but without CFWS
    let lead = scan::cfws(s);
    let lit = {
        let rest = &s[lead..];
        let full = scan::domain_literal(rest);
        if full == 0 {
            return 0;
        }
        // trim the trailing CFWS off the captured text
        let mut end = full;
        loop {
            let b = rest[..end].as_bytes();
            if b[end - 1] == b']' {
                break;
            }
            end -= 1;
        }
        out.push_str(&rest[..end]);
        full
    };
    lead + lit
}

fn addr_spec_5322(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    let mut local_part = String::new();
    let lp = local_part_5322(s, &mut local_part);
    if lp == 0 {
        return Err(err(0));
    }
    if scan::char1(&s[lp..], b'@') == 0 {
        return Err(err(lp));
    }
    let mut domain = String::new();
    let dom = domain_5322(&s[lp + 1..], &mut domain);
    if dom == 0 {
        return Err(err(lp + 1));
    }
    Ok((Mailbox { local_part, domain }, lp + 1 + dom))
}

fn angle_addr_5322(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    let mut pos = scan::cfws(s);
    if scan::char1(&s[pos..], b'<') == 0 {
        return Err(err(pos));
    }
    pos += 1;
    let (mailbox, n) = addr_spec_5322(&s[pos..]).map_err(|MailboxError::ParseAt { offset }| err(pos + offset))?;
    pos += n;
    if scan::char1(&s[pos..], b'>') == 0 {
        return Err(err(pos));
    }
    pos += 1;
    pos += scan::cfws(&s[pos..]);
    Ok((mailbox, pos))
}

/// RFC 5322 `mailbox` (`name-addr / addr-spec`).
pub fn parse_5322_mailbox(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    // addr-spec first: "a@b" must not be mistaken for a display-name
    if let Ok((mailbox, n)) = addr_spec_5322(s) {
        // an addr-spec immediately followed by '<' was a display-name
        if scan::char1(&s[n..], b'<') == 0 {
            return Ok((mailbox, n));
        }
    }
    let display = scan::phrase(s);
    angle_addr_5322(&s[display..])
        .map(|(mailbox, n)| (mailbox, display + n))
        .map_err(|MailboxError::ParseAt { offset }| err(display + offset))
}

/// RFC 5322 `mailbox-list` (`mailbox *("," mailbox)`).
pub fn parse_5322_mailbox_list(s: &str) -> Result<(Vec<Mailbox>, usize), MailboxError> {
    let mut mailboxes = Vec::new();
    let mut pos = 0;
    loop {
        let (mailbox, n) =
            parse_5322_mailbox(&s[pos..]).map_err(|MailboxError::ParseAt { offset }| err(pos + offset))?;
        mailboxes.push(mailbox);
        pos += n;
        if scan::char1(&s[pos..], b',') == 0 {
            return Ok((mailboxes, pos));
        }
        pos += 1;
    }
}

// RFC 5321 /////////////////////////////////////////////////////////////

fn smtp_mailbox_parts(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    let mut local_part = String::new();
    let lp = {
        let n = scan::dot_string(s);
        if n > 0 {
            local_part.push_str(&s[..n]);
            n
        } else {
            let n = parse::quoted_string_smtp(s, &mut local_part);
            if n == 0 {
                return Err(err(0));
            }
            n
        }
    };
    if scan::char1(&s[lp..], b'@') == 0 {
        return Err(err(lp));
    }
    let after_at = &s[lp + 1..];
    let dom = {
        let n = scan::domain_5321(after_at);
        if n > 0 {
            n
        } else {
            scan::address_literal(after_at)
        }
    };
    if dom == 0 {
        return Err(err(lp + 1));
    }
    Ok((
        Mailbox {
            local_part,
            domain: after_at[..dom].to_string(),
        },
        lp + 1 + dom,
    ))
}

/// RFC 5321 `Mailbox`.
pub fn parse_smtp_mailbox(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    smtp_mailbox_parts(s)
}

fn source_route(s: &str) -> usize {
    // A-d-l ":" — obsolete, accepted and discarded
    let mut pos = 0;
    loop {
        if scan::char1(&s[pos..], b'@') == 0 {
            return 0;
        }
        let dom = scan::domain_5321(&s[pos + 1..]);
        if dom == 0 {
            return 0;
        }
        pos += 1 + dom;
        if scan::char1(&s[pos..], b',') > 0 {
            pos += 1;
            continue;
        }
        if scan::char1(&s[pos..], b':') > 0 {
            return pos + 1;
        }
        return 0;
    }
}

/// RFC 5321 `Path` (`"<" [ A-d-l ":" ] Mailbox ">"`).
pub fn parse_smtp_path(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    if scan::char1(s, b'<') == 0 {
        return Err(err(0));
    }
    let mut pos = 1;
    pos += source_route(&s[pos..]);
    let (mailbox, n) =
        smtp_mailbox_parts(&s[pos..]).map_err(|MailboxError::ParseAt { offset }| err(pos + offset))?;
    pos += n;
    if scan::char1(&s[pos..], b'>') == 0 {
        return Err(err(pos));
    }
    Ok((mailbox, pos + 1))
}

/// RFC 5321 `Reverse-path` (`Path / "<>"`).
pub fn parse_smtp_reverse_path(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    if s.starts_with("<>") {
        return Ok((Mailbox::null(), 2));
    }
    parse_smtp_path(s)
}

/// The permissive reverse-path sendmail hands to a milter: angle brackets
/// are optional, `<>` and the bare empty string are the null sender.
pub fn parse_sendmail_reverse_path(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    let lead = scan::wsp_block(s);
    let rest = &s[lead..];
    if rest.is_empty() {
        return Ok((Mailbox::null(), lead));
    }
    if rest.starts_with('<') {
        return parse_smtp_reverse_path(rest)
            .map(|(mailbox, n)| (mailbox, lead + n))
            .map_err(|MailboxError::ParseAt { offset }| err(lead + offset));
    }
    smtp_mailbox_parts(rest)
        .map(|(mailbox, n)| (mailbox, lead + n))
        .map_err(|MailboxError::ParseAt { offset }| err(lead + offset))
}

// RFC 6376 /////////////////////////////////////////////////////////////

/// DKIM AUID (`sig-i-tag` value): `[ Local-part ] "@" domain-name`, the
/// local-part may be empty.
pub fn parse_dkim_identity(s: &str) -> Result<(Mailbox, usize), MailboxError> {
    let mut local_part = String::new();
    let lp = {
        let n = scan::dot_string(s);
        if n > 0 {
            local_part.push_str(&s[..n]);
            n
        } else {
            parse::quoted_string_smtp(s, &mut local_part)
        }
    };
    if scan::char1(&s[lp..], b'@') == 0 {
        return Err(err(lp));
    }
    let after_at = &s[lp + 1..];
    let dom = scan::domain_name(after_at);
    if dom == 0 {
        return Err(err(lp + 1));
    }
    Ok((
        Mailbox {
            local_part,
            domain: after_at[..dom].to_string(),
        },
        lp + 1 + dom,
    ))
}
