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

use crate::dkim::{
    CanonicalizationAlgorithm, DkimError, QueryMethod, Signature, SigningAlgorithm,
};

#[test]
fn full_header() {
    let header = "v=1; a=rsa-sha256; d=example.net; s=brisbane;\r\n\t\
        c=relaxed/simple; q=dns/txt; i=foo@eng.example.net;\r\n\t\
        t=1117574938; x=9118006938; l=200;\r\n\t\
        h=from:to:subject:date:keywords:keywords;\r\n\t\
        z=From:foo@eng.example.net|To:joe@example.com;\r\n\t\
        bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;\r\n\t\
        b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";

    let signature: Signature = header.parse().unwrap();
    assert_eq!(signature.signing_algorithm, SigningAlgorithm::RsaSha256);
    assert_eq!(signature.sdid, "example.net");
    assert_eq!(signature.selector, "brisbane");
    assert_eq!(
        signature.canonicalization.header,
        CanonicalizationAlgorithm::Relaxed
    );
    assert_eq!(
        signature.canonicalization.body,
        CanonicalizationAlgorithm::Simple
    );
    assert_eq!(signature.auid.local_part(), "foo");
    assert_eq!(signature.auid.domain(), "eng.example.net");
    assert_eq!(signature.signature_timestamp, Some(1_117_574_938));
    assert_eq!(signature.expire_time, Some(9_118_006_938));
    assert_eq!(signature.body_length, Some(200));
    assert_eq!(signature.query_methods, vec![QueryMethod::DnsTxt]);
    assert_eq!(
        signature.signed_headers,
        ["from", "to", "subject", "date", "keywords", "keywords"]
    );
    assert_eq!(signature.body_hash.len(), 32);
    assert_eq!(signature.get_dns_query(), "brisbane._domainkey.example.net");
}

#[test]
fn auid_defaults_to_sdid() {
    let signature: Signature =
        "v=1; a=rsa-sha256; d=example.net; s=sel; h=From:To; bh=aGFzaA==; b=c2ln"
            .parse()
            .unwrap();
    assert_eq!(signature.auid.local_part(), "");
    assert_eq!(signature.auid.domain(), "example.net");
}

#[test]
fn incompatible_version() {
    let outcome = "v=3; a=rsa-sha256; d=example.net; s=sel; h=From; bh=aGFzaA==; b=c2ln"
        .parse::<Signature>();
    assert_eq!(outcome.unwrap_err(), DkimError::IncompatibleVersion);
}

#[test]
fn missing_required_tag() {
    let outcome =
        "v=1; a=rsa-sha256; s=sel; h=From; bh=aGFzaA==; b=c2ln".parse::<Signature>();
    assert_eq!(
        outcome.unwrap_err(),
        DkimError::MissingRequiredTag { name: "d" }
    );
}

#[test]
fn from_field_must_be_signed() {
    let outcome = "v=1; a=rsa-sha256; d=example.net; s=sel; h=Subject:To; bh=aGFzaA==; b=c2ln"
        .parse::<Signature>();
    assert_eq!(outcome.unwrap_err(), DkimError::FromFieldNotSigned);
}

#[test]
fn auid_outside_sdid_is_rejected() {
    let outcome =
        "v=1; a=rsa-sha256; d=example.net; s=sel; i=foo@hein.com; h=From; bh=aGFzaA==; b=c2ln"
            .parse::<Signature>();
    assert_eq!(outcome.unwrap_err(), DkimError::DomainMismatch);
}

#[test]
fn expiry_before_timestamp_is_rejected() {
    let outcome =
        "v=1; a=rsa-sha256; d=example.net; s=sel; t=1000; x=999; h=From; bh=aGFzaA==; b=c2ln"
            .parse::<Signature>();
    assert_eq!(outcome.unwrap_err(), DkimError::InconsistentTimestamp);
}

#[test]
fn duplicate_tags_are_rejected() {
    let outcome =
        "v=1; v=1; a=rsa-sha256; d=example.net; s=sel; h=From; bh=aGFzaA==; b=c2ln"
            .parse::<Signature>();
    assert_eq!(
        outcome.unwrap_err(),
        DkimError::TagDuplicated {
            name: "v".to_string()
        }
    );
}

#[test]
fn unsupported_algorithms() {
    let outcome = "v=1; a=dsa-sha256; d=example.net; s=sel; h=From; bh=aGFzaA==; b=c2ln"
        .parse::<Signature>();
    assert_eq!(outcome.unwrap_err(), DkimError::UnsupportedKeyAlgorithm);

    let outcome = "v=1; a=rsa-md5; d=example.net; s=sel; h=From; bh=aGFzaA==; b=c2ln"
        .parse::<Signature>();
    assert_eq!(outcome.unwrap_err(), DkimError::UnsupportedHashAlgorithm);
}

#[test]
fn unknown_query_methods_are_ignored() {
    let signature: Signature =
        "v=1; a=rsa-sha256; d=example.net; s=sel; q=future/method:dns/txt; h=From; bh=aGFzaA==; b=c2ln"
            .parse()
            .unwrap();
    assert_eq!(signature.query_methods, vec![QueryMethod::DnsTxt]);

    let outcome =
        "v=1; a=rsa-sha256; d=example.net; s=sel; q=future/method; h=From; bh=aGFzaA==; b=c2ln"
            .parse::<Signature>();
    assert_eq!(outcome.unwrap_err(), DkimError::UnsupportedQueryMethod);
}

#[test]
fn atps_tags() {
    let signature: Signature = "v=1; a=rsa-sha256; d=sign.example.org; s=sel; h=From; \
         atps=example.com; atpsh=sha256; bh=aGFzaA==; b=c2ln"
        .parse()
        .unwrap();
    assert_eq!(signature.atps_domain.as_deref(), Some("example.com"));
    assert_eq!(
        signature.atps_hash,
        Some(crate::dkim::atps::AtpsHashAlgorithm::Sha256)
    );
}

#[test]
fn expiry_checks_follow_the_clock() {
    let signature: Signature =
        "v=1; a=rsa-sha256; d=example.net; s=sel; t=1000; x=2000; h=From; bh=aGFzaA==; b=c2ln"
            .parse()
            .unwrap();
    assert!(signature.check_expiry(1500).is_ok());
    assert_eq!(
        signature.check_expiry(2500).unwrap_err(),
        DkimError::SignatureExpired
    );
    assert!(signature.check_future_timestamp(900, 300).is_ok());
    assert_eq!(
        signature.check_future_timestamp(500, 300).unwrap_err(),
        DkimError::InconsistentTimestamp
    );
}
