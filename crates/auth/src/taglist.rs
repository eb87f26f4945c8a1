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

//! The `tag=value;` list consumer shared by DKIM signatures, DKIM public
//! keys, ADSP, ATPS and DMARC records (RFC 6376 §3.2 syntax).
//!
//! A record type declares a table of [`TagSpec`]s; the driver walks the
//! record, dispatches each tag to its parser callback, rejects duplicates,
//! fills absent required tags by re-parsing their default-value strings
//! and ignores unknown tags. Two mode switches cover the RFC deltas of
//! the consumers: `wsp_only` restricts inter-token whitespace to WSP
//! (ADSP, RFC 5617 §4.1), `lenient` discards syntax errors in
//! non-required tags in favour of defaults (DMARC, RFC 7489 §6.3).

use vauth_common::syntax::scan;

/// `tag_no` value passed when a parser runs on a default-value string
/// rather than on record text.
pub const TAG_NO_AS_DEFAULT_VALUE: isize = -1;

/// Context handed to a tag parser callback.
#[derive(Debug)]
pub struct TagContext<'a> {
    /// Position of the tag within the record, or
    /// [`TAG_NO_AS_DEFAULT_VALUE`].
    pub tag_no: isize,
    /// The tag value, trailing whitespace excluded.
    pub value: &'a str,
    /// Byte offset of `value` within the record string.
    pub value_offset: usize,
}

/// A parser callback: consumes the tag value, stores the semantic result
/// on the target and returns how many bytes of the value it used.
pub type TagParser<T, E> = fn(&mut T, &TagContext<'_>) -> Result<usize, E>;

/// One row of a record type's tag table.
pub struct TagSpec<T, E> {
    /// Tag name, matched case-sensitively (RFC 6376 §3.2).
    pub name: &'static str,
    pub required: bool,
    /// Default-value string re-parsed through `parser` when the tag is
    /// absent.
    pub default_value: Option<&'static str>,
    /// `None` makes the tag recognized-but-ignored (`z=`, `n=`, ...).
    pub parser: Option<TagParser<T, E>>,
}

/// Errors the driver itself can raise; record error types plug in here so
/// that tag parsers and the driver share one error channel.
pub trait TagListError: Sized {
    fn tag_syntax_violation(near: &str) -> Self;
    fn tag_duplicated(name: &str) -> Self;
    fn missing_required_tag(name: &'static str) -> Self;
    /// A default-value string failed its own parser; always a bug in the
    /// tag table.
    fn implementation_error(detail: String) -> Self;
    /// Whether this error is a tag-value syntax violation, recoverable in
    /// lenient mode.
    fn is_tag_syntax_violation(&self) -> bool;
}

fn near(s: &str) -> &str {
    match s.char_indices().nth(50) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn is_trailing_ws(s: &str) -> bool {
    s.bytes().all(|c| matches!(c, b' ' | b'\t' | b'\r' | b'\n'))
}

/// Drive the tag table over `record`.
pub fn parse<T, E: TagListError>(
    target: &mut T,
    record: &str,
    table: &[TagSpec<T, E>],
    wsp_only: bool,
    lenient: bool,
) -> Result<(), E> {
    debug_assert!(table.len() <= 64);
    let skip = if wsp_only { scan::wsp_block } else { scan::fws };

    let mut parsed_mask = 0u64;
    let mut tag_no: isize = 0;
    let mut pos = 0;

    loop {
        pos += skip(&record[pos..]);

        // accept trailing whitespace (a bare CRLF included) after ';'
        if tag_no > 0 && is_trailing_ws(&record[pos..]) {
            pos = record.len();
            break;
        }

        let name_len = scan::tag_name(&record[pos..]);
        if name_len == 0 {
            return Err(E::tag_syntax_violation(near(&record[pos..])));
        }
        let name_start = pos;
        pos += name_len;

        pos += skip(&record[pos..]);
        if scan::char1(&record[pos..], b'=') == 0 {
            return Err(E::tag_syntax_violation(near(&record[name_start..])));
        }
        pos += 1;
        pos += skip(&record[pos..]);

        // a 0-length tag-value is permitted
        let value_len = scan::tag_value(&record[pos..]);
        let name = &record[name_start..name_start + name_len];
        let value = &record[pos..pos + value_len];

        match table.iter().position(|spec| spec.name == name) {
            Some(field_no) => {
                if parsed_mask & (1 << field_no) != 0 {
                    return Err(E::tag_duplicated(name));
                }
                if let Some(parser) = table[field_no].parser {
                    let context = TagContext {
                        tag_no,
                        value,
                        value_offset: pos,
                    };
                    match parser(target, &context) {
                        Ok(consumed) => {
                            if consumed < value.len() {
                                return Err(E::tag_syntax_violation(near(
                                    &record[name_start..],
                                )));
                            }
                            parsed_mask |= 1 << field_no;
                        }
                        Err(error) => {
                            // [RFC7489] 6.3.
                            // Syntax errors in the remainder of the record
                            // SHOULD be discarded in favor of default
                            // values (if any) or ignored outright.
                            if !(lenient
                                && !table[field_no].required
                                && error.is_tag_syntax_violation())
                            {
                                return Err(error);
                            }
                        }
                    }
                }
                // recognized tag without parser: ignored
            }
            // [RFC6376] 3.2. Unrecognized tags MUST be ignored.
            None => {}
        }
        pos += value_len;

        pos += skip(&record[pos..]);
        if scan::char1(&record[pos..], b';') == 0 {
            break;
        }
        pos += 1;
        tag_no += 1;
        if pos >= record.len() {
            break;
        }
    }

    // accept trailing FWS (or WSP) after the final tag
    pos += skip(&record[pos..]);
    if pos < record.len() {
        return Err(E::tag_syntax_violation(near(&record[pos..])));
    }

    // fill absent tags from defaults, error on absent required tags
    for (field_no, spec) in table.iter().enumerate() {
        if parsed_mask & (1 << field_no) != 0 {
            continue;
        }
        if let (Some(default_value), Some(parser)) = (spec.default_value, spec.parser) {
            let context = TagContext {
                tag_no: TAG_NO_AS_DEFAULT_VALUE,
                value: default_value,
                value_offset: 0,
            };
            parser(target, &context).map_err(|_| {
                E::implementation_error(format!(
                    "default value is unable to parse: {}={default_value}",
                    spec.name
                ))
            })?;
            continue;
        }
        if spec.required {
            return Err(E::missing_required_tag(spec.name));
        }
    }

    Ok(())
}
