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

//! Construction of the `Authentication-Results` header field body
//! (RFC 8601, née RFC 5451), and the authserv-id match used to strip
//! spoofed chains on ingress.
//!
//! ```txt
//! authres-header = "Authentication-Results:" [CFWS] authserv-id
//!          [ CFWS version ]
//!          ( [CFWS] ";" [CFWS] "none" / 1*resinfo ) [CFWS] CRLF
//! authserv-id = dot-atom
//! resinfo = [CFWS] ";" methodspec [ CFWS reasonspec ]
//!           *( CFWS propspec )
//! methodspec = [CFWS] method [CFWS] "=" [CFWS] result
//! reasonspec = "reason" [CFWS] "=" [CFWS] value
//! propspec = ptype [CFWS] "." [CFWS] property [CFWS] "=" pvalue
//! ```

use vauth_common::syntax::scan;
use vauth_common::FoldString;

/// header field name the rendered value belongs to
pub const AUTHRES_HEADER: &str = "Authentication-Results";

const AUTHRES_WIDTH: usize = 78;

/// Builder for one `Authentication-Results` field body. Methods chain with
/// `;`, the output folds near 78 columns, LF-only by default.
#[derive(Debug)]
pub struct AuthResult {
    fold: FoldString,
    method_count: usize,
}

fn is_mime_token(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(scan::is_mime_token)
}

/// Encode as a quoted-string with `\\` and `\"` escapes.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

impl AuthResult {
    /// Start a field body with the local `authserv-id`.
    #[must_use]
    pub fn new(authserv_id: &str) -> Self {
        let mut fold = FoldString::new(AUTHRES_WIDTH);
        // room for the "Authentication-Results: " prefix
        fold.consume_line_space(AUTHRES_HEADER.len() + 2);
        fold.append_block(true, authserv_id);
        Self {
            fold,
            method_count: 0,
        }
    }

    /// Use CRLF instead of the default LF when folding.
    pub fn set_folding_cr(&mut self, folding_cr: bool) {
        self.fold.set_folding_cr(folding_cr);
    }

    /// `; method=result`
    pub fn append_method(&mut self, method: &str, result: impl std::fmt::Display) {
        self.fold.append_char(false, ';');
        self.fold.append_block(true, &format!(" {method}={result}"));
        self.method_count += 1;
    }

    /// `(comment)`; parentheses and backslashes inside are dropped, a
    /// comment cannot be escaped out of
    pub fn append_comment(&mut self, comment: &str) {
        let sanitized: String = comment
            .chars()
            .filter(|c| !matches!(c, '(' | ')' | '\\') && !c.is_control())
            .collect();
        self.fold.append_block(true, &format!(" ({sanitized})"));
    }

    /// `reason=value`, quoted-string encoded when the value steps outside
    /// the MIME `token` set
    pub fn append_reason(&mut self, reason: &str) {
        let value = if is_mime_token(reason) {
            reason.to_string()
        } else {
            quote(reason)
        };
        self.fold.append_block(true, &format!(" reason={value}"));
    }

    /// `ptype.property=pvalue`
    pub fn append_property(&mut self, ptype: &str, property: &str, value: &str) {
        // a pvalue may be a value, a domain or an addr-spec; quote
        // anything that is none of those
        let needs_quoting = !value
            .bytes()
            .all(|c| scan::is_mime_token(c) || c == b'@');
        let rendered = if needs_quoting && !value.is_empty() {
            quote(value)
        } else {
            value.to_string()
        };
        self.fold
            .append_block(true, &format!(" {ptype}.{property}={rendered}"));
    }

    /// Finish the body; a result set without any method reads `none`.
    #[must_use]
    pub fn into_value(mut self) -> String {
        if self.method_count == 0 {
            /*
             * [RFC8601] 2.2.
             * ( [CFWS] ";" [CFWS] "none" / 1*resinfo )
             */
            self.fold.append_char(false, ';');
            self.fold.append_block(true, " none");
        }
        self.fold.into_string()
    }
}

/// Whether an existing `Authentication-Results` field body claims the
/// given `authserv-id` (case-insensitively); matching leading fields are
/// stripped by the host to prevent spoofed results from surviving
/// ingress.
#[must_use]
pub fn matches_authserv_id(header_value: &str, authserv_id: &str) -> bool {
    let lead = scan::cfws(header_value);
    let id_len = scan::dot_atom_text(&header_value[lead..]);
    if id_len == 0 {
        return false;
    }
    header_value[lead..lead + id_len].eq_ignore_ascii_case(authserv_id)
}

#[cfg(test)]
mod tests {
    use super::{matches_authserv_id, AuthResult};

    #[test]
    fn renders_methods_and_properties() {
        let mut authres = AuthResult::new("mx.example.org");
        authres.append_method("spf", "pass");
        authres.append_property("smtp", "mailfrom", "user@example.com");
        authres.append_method("dkim", "fail");
        authres.append_reason("bad signature");
        authres.append_property("header", "d", "example.com");

        let value = authres.into_value();
        let flat = value.replace("\n\t", " ");
        assert_eq!(
            flat,
            "mx.example.org; spf=pass smtp.mailfrom=user@example.com; \
             dkim=fail reason=\"bad signature\" header.d=example.com"
        );
    }

    #[test]
    fn no_results_reads_none() {
        let authres = AuthResult::new("mx.example.org");
        assert_eq!(authres.into_value(), "mx.example.org; none");
    }

    #[test]
    fn comments_cannot_escape() {
        let mut authres = AuthResult::new("mx.example.org");
        authres.append_method("dkim", "neutral");
        authres.append_comment("key revoked) evil=injected (");
        let value = authres.into_value();
        assert!(value.contains("(key revoked evil=injected )"));
    }

    #[test]
    fn folds_near_the_width_target() {
        let mut authres = AuthResult::new("mx.example.org");
        for _ in 0..6 {
            authres.append_method("dkim", "pass");
            authres.append_property("header", "d", "some-long-domain.example.com");
        }
        let value = authres.into_value();
        for line in value.split('\n') {
            assert!(line.len() <= 78 + 1, "overlong line: {line:?}");
        }
    }

    #[test]
    fn authserv_id_matching() {
        assert!(matches_authserv_id(
            " mx.example.org; spf=pass",
            "MX.Example.Org"
        ));
        assert!(matches_authserv_id(
            " (genuine) mx.example.org 1; dkim=pass",
            "mx.example.org"
        ));
        assert!(!matches_authserv_id(
            " other.example.net; spf=pass",
            "mx.example.org"
        ));
        assert!(!matches_authserv_id(" ; spf=pass", "mx.example.org"));
    }
}
