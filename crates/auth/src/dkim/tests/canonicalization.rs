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

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::dkim::canonicalization::BodyCanonicalizer;
use crate::dkim::{CanonicalizationAlgorithm, HashAlgorithm};

fn canonicalize_body(algorithm: CanonicalizationAlgorithm, chunks: &[&[u8]]) -> Vec<u8> {
    let mut canonicalizer = BodyCanonicalizer::new(algorithm);
    let mut out = Vec::new();
    for chunk in chunks {
        canonicalizer.update(chunk, &mut out);
    }
    canonicalizer.finish(&mut out);
    out
}

macro_rules! canonicalization_empty_body {
    ($name:ident, $canon:expr, $algo:expr, $expected:expr) => {
        #[test]
        fn $name() {
            assert_eq!(
                STANDARD.encode($algo.hash(canonicalize_body($canon, &[]))),
                $expected
            );
        }
    };
}

#[cfg(feature = "historic")]
canonicalization_empty_body!(
    simple_empty_body_rsa_sha1,
    CanonicalizationAlgorithm::Simple,
    HashAlgorithm::Sha1,
    "uoq1oCgLlTqpdDX/iUbLy7J1Wic="
);

canonicalization_empty_body!(
    simple_empty_body_rsa_sha256,
    CanonicalizationAlgorithm::Simple,
    HashAlgorithm::Sha256,
    "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY="
);

#[cfg(feature = "historic")]
canonicalization_empty_body!(
    relaxed_empty_body_rsa_sha1,
    CanonicalizationAlgorithm::Relaxed,
    HashAlgorithm::Sha1,
    "2jmj7l5rSw0yVb/vlWAYkK/YBwk="
);

canonicalization_empty_body!(
    relaxed_empty_body_rsa_sha256,
    CanonicalizationAlgorithm::Relaxed,
    HashAlgorithm::Sha256,
    "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
);

#[rstest::rstest]
#[case("A: X\r\n", "a:X")]
#[case("B \t: Y\t\r\n\tZ  \r\n", "b:Y Z")]
// RFC 6376 §3.4.5 example
#[case("SUBJect: AbC\r\n", "subject:AbC")]
#[case("No-Value:\r\n", "no-value:")]
fn canonicalize_headers_relaxed(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(
        CanonicalizationAlgorithm::Relaxed.canonicalize_header(input),
        expected
    );
}

#[test]
fn canonicalize_headers_simple() {
    assert_eq!(
        CanonicalizationAlgorithm::Simple.canonicalize_header("A: X\r\n"),
        "A: X"
    );
    // simple keeps internal folds verbatim
    assert_eq!(
        CanonicalizationAlgorithm::Simple.canonicalize_header("B: Y\r\n\tZ\r\n"),
        "B: Y\r\n\tZ"
    );
}

#[test]
fn canonicalize_body_relaxed() {
    let out = canonicalize_body(
        CanonicalizationAlgorithm::Relaxed,
        &[b" C \r\n", b"D \t E\r\n", b"\r\n", b"\r\n"],
    );
    assert_eq!(out, b" C\r\nD E\r\n");
}

#[test]
fn canonicalize_body_simple() {
    let out = canonicalize_body(
        CanonicalizationAlgorithm::Simple,
        &[b" C \r\n", b"D \t E\r\n", b"\r\n", b"\r\n"],
    );
    assert_eq!(out, b" C \r\nD \t E\r\n");
}

#[test]
fn trailing_blank_lines_collapse() {
    let out = canonicalize_body(
        CanonicalizationAlgorithm::Simple,
        &[b"Hi.\r\n", b"\r\n", b"\r\n", b"\r\n"],
    );
    assert_eq!(out, b"Hi.\r\n");

    // inner blank lines survive
    let out = canonicalize_body(
        CanonicalizationAlgorithm::Simple,
        &[b"Hi.\r\n\r\nBye.\r\n\r\n"],
    );
    assert_eq!(out, b"Hi.\r\n\r\nBye.\r\n");
}

#[test]
fn unterminated_final_line_gains_crlf() {
    let out = canonicalize_body(CanonicalizationAlgorithm::Simple, &[b"no newline"]);
    assert_eq!(out, b"no newline\r\n");
}

#[test]
fn chunk_boundaries_do_not_matter() {
    let whole = canonicalize_body(
        CanonicalizationAlgorithm::Relaxed,
        &[b"line  one\r\n\r\ntail \r\n"],
    );
    let split = canonicalize_body(
        CanonicalizationAlgorithm::Relaxed,
        &[b"line ", b" one\r", b"\n\r", b"\ntail", b" \r\n"],
    );
    assert_eq!(whole, split);
}

#[test]
fn relaxed_application_is_collapsing() {
    // applying relaxed twice equals applying it once
    let once = canonicalize_body(
        CanonicalizationAlgorithm::Relaxed,
        &[b"a  b\t c\r\n x\r\n\r\n"],
    );
    let twice = canonicalize_body(CanonicalizationAlgorithm::Relaxed, &[once.as_slice()]);
    assert_eq!(once, twice);

    let header_once = CanonicalizationAlgorithm::Relaxed.canonicalize_header("A:  b  c\r\n");
    let header_twice = CanonicalizationAlgorithm::Relaxed.canonicalize_header(&header_once);
    assert_eq!(header_once, header_twice);
}
