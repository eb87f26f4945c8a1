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

//! Header and body canonicalization (RFC 6376 §3.4).

use super::DkimError;
use vauth_common::syntax::scan;

/// One of the two canonicalization algorithms of RFC 6376.
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
pub enum CanonicalizationAlgorithm {
    /// `simple`: tolerates almost no modification
    Simple,
    /// `relaxed`: tolerates common whitespace modification
    Relaxed,
}

impl CanonicalizationAlgorithm {
    fn lookup(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("simple") {
            Some(Self::Simple)
        } else if name.eq_ignore_ascii_case("relaxed") {
            Some(Self::Relaxed)
        } else {
            None
        }
    }

    /// Canonicalize one complete header (`Name: value`, any internal folds
    /// included, trailing CRLF excluded).
    #[must_use]
    pub fn canonicalize_header(self, raw: &str) -> String {
        let raw = raw.strip_suffix("\r\n").unwrap_or(raw);
        match self {
            Self::Simple => raw.to_string(),
            Self::Relaxed => {
                let (name, value) = raw.split_once(':').unwrap_or((raw, ""));

                let mut out = String::with_capacity(raw.len());
                out.push_str(name.trim_end_matches([' ', '\t']).to_ascii_lowercase().as_str());
                out.push(':');

                // unfold, then reduce every WSP run to a single SP
                let mut pending_ws = false;
                let mut start = true;
                for c in value.chars() {
                    match c {
                        '\r' | '\n' => {}
                        ' ' | '\t' => pending_ws = true,
                        _ => {
                            if pending_ws && !start {
                                out.push(' ');
                            }
                            pending_ws = false;
                            start = false;
                            out.push(c);
                        }
                    }
                }
                out
            }
        }
    }
}

/// The `c=` pair of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, fake::Dummy)]
pub struct Canonicalization {
    pub header: CanonicalizationAlgorithm,
    pub body: CanonicalizationAlgorithm,
}

impl Default for Canonicalization {
    fn default() -> Self {
        Self {
            header: CanonicalizationAlgorithm::Simple,
            body: CanonicalizationAlgorithm::Simple,
        }
    }
}

impl std::fmt::Display for Canonicalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.header, self.body)
    }
}

impl Canonicalization {
    /// Parse a `sig-c-tag` value; returns the consumed length.
    pub(super) fn parse_value(value: &str) -> Result<(Self, usize), DkimError> {
        let header_len = scan::hyphenated_word(value);
        if header_len == 0 {
            return Err(DkimError::TagSyntaxViolation {
                near: value.to_string(),
            });
        }
        let header = CanonicalizationAlgorithm::lookup(&value[..header_len])
            .ok_or(DkimError::UnsupportedC14nAlgorithm)?;

        /*
         * [RFC6376] 3.5.
         * If only one algorithm is named, that algorithm is used for the
         * header and "simple" is used for the body.
         */
        if scan::char1(&value[header_len..], b'/') == 0 {
            return Ok((
                Self {
                    header,
                    body: CanonicalizationAlgorithm::Simple,
                },
                header_len,
            ));
        }
        let body_start = header_len + 1;
        let body_len = scan::hyphenated_word(&value[body_start..]);
        if body_len == 0 {
            return Err(DkimError::TagSyntaxViolation {
                near: value.to_string(),
            });
        }
        let body = CanonicalizationAlgorithm::lookup(&value[body_start..body_start + body_len])
            .ok_or(DkimError::UnsupportedC14nAlgorithm)?;
        Ok((Self { header, body }, body_start + body_len))
    }
}

/// Streaming body canonicalizer: takes body octets in arbitrary chunks and
/// produces the canonical stream, normalizing the trailing blank lines at
/// `finish`.
#[derive(Debug)]
pub(crate) struct BodyCanonicalizer {
    algorithm: CanonicalizationAlgorithm,
    line: Vec<u8>,
    pending_blank: usize,
    saw_cr: bool,
    emitted_content: bool,
}

impl BodyCanonicalizer {
    pub(crate) const fn new(algorithm: CanonicalizationAlgorithm) -> Self {
        Self {
            algorithm,
            line: Vec::new(),
            pending_blank: 0,
            saw_cr: false,
            emitted_content: false,
        }
    }

    pub(crate) fn update(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &byte in chunk {
            if self.saw_cr {
                self.saw_cr = false;
                if byte == b'\n' {
                    self.complete_line(out);
                    continue;
                }
                // a stray CR stays line content
                self.line.push(b'\r');
            }
            match byte {
                b'\r' => self.saw_cr = true,
                // tolerate LF-only input from the milter glue
                b'\n' => self.complete_line(out),
                _ => self.line.push(byte),
            }
        }
    }

    pub(crate) fn finish(&mut self, out: &mut Vec<u8>) {
        if self.saw_cr {
            self.saw_cr = false;
            self.line.push(b'\r');
        }
        if !self.line.is_empty() {
            // a non-empty body must end with CRLF
            self.complete_line(out);
        }
        /*
         * [RFC6376] 3.4.3.
         * Note that a completely empty or missing body is canonicalized
         * as a single "CRLF" by the "simple" algorithm and as the null
         * input by the "relaxed" algorithm.
         */
        if !self.emitted_content && self.algorithm == CanonicalizationAlgorithm::Simple {
            out.extend_from_slice(b"\r\n");
        }
    }

    fn complete_line(&mut self, out: &mut Vec<u8>) {
        let processed: Vec<u8> = match self.algorithm {
            CanonicalizationAlgorithm::Simple => std::mem::take(&mut self.line),
            CanonicalizationAlgorithm::Relaxed => {
                let mut collapsed = Vec::with_capacity(self.line.len());
                let mut pending_ws = false;
                for &byte in &self.line {
                    if byte == b' ' || byte == b'\t' {
                        pending_ws = true;
                    } else {
                        if pending_ws {
                            collapsed.push(b' ');
                        }
                        pending_ws = false;
                        collapsed.push(byte);
                    }
                }
                self.line.clear();
                collapsed
            }
        };

        if processed.is_empty() {
            self.pending_blank += 1;
            return;
        }
        for _ in 0..self.pending_blank {
            out.extend_from_slice(b"\r\n");
        }
        self.pending_blank = 0;
        out.extend_from_slice(&processed);
        out.extend_from_slice(b"\r\n");
        self.emitted_content = true;
    }
}
