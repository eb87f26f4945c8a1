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

use crate::dkim::{DkimError, DkimVerificationPolicy, HashAlgorithm, PublicKey, Signature};

// 1024-bit RSA key from the RFC 6376 errata sample zone
const RSA_RECORD: &str = "v=DKIM1; p=MIGJAoGBALVI635dLK4cJJAH3Lx6upo3X/Lm1tQz3mezcWTA3BUBnyIsdnRf57aD5BtNmhPrYYDlWlzw3UgnKisIxktkk5+iMQMlFtAS10JB8L3YadXNJY+JBcbeSi5TgJe4WFzNgW95FWDAuSTRXSWZfA/8xjflbTLDx0euFZOM7C4T0GwLAgMBAAE=";

const ED25519_RECORD: &str = "v=DKIM1; k=ed25519; p=11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";

fn sample_signature(algorithm: &str) -> Signature {
    format!("v=1; a={algorithm}; d=example.com; s=sel; h=From; bh=aGFzaA==; b=c2ln")
        .parse()
        .unwrap()
}

#[test]
fn rsa_record() {
    let key: PublicKey = RSA_RECORD.parse().unwrap();
    assert_eq!(key.bits(), Some(1024));
    assert!(!key.is_testing());
    assert!(key.record.email_service_usable);
    assert!(key
        .record
        .acceptable_hash_algorithms
        .contains(&HashAlgorithm::Sha256));
}

#[test]
fn ed25519_record() {
    let key: PublicKey = ED25519_RECORD.parse().unwrap();
    assert_eq!(key.bits(), None);
    key.validate(
        &DkimVerificationPolicy::default(),
        &sample_signature("ed25519-sha256"),
    )
    .unwrap();
    assert_eq!(
        key.validate(
            &DkimVerificationPolicy::default(),
            &sample_signature("rsa-sha256"),
        )
        .unwrap_err(),
        DkimError::InappropriateKeyAlgorithm
    );
}

#[test]
fn revoked_key() {
    assert_eq!(
        "v=DKIM1; p=".parse::<PublicKey>().unwrap_err(),
        DkimError::KeyRevoked
    );
}

#[test]
fn version_tag_must_come_first() {
    assert!("k=rsa; v=DKIM1; p=".parse::<PublicKey>().is_err());
    assert_eq!(
        "v=DKIM2; p=abc".parse::<PublicKey>().unwrap_err(),
        DkimError::IncompatibleKeyVersion
    );
    // the comparison is case-sensitive
    assert_eq!(
        "v=dkim1; p=abc".parse::<PublicKey>().unwrap_err(),
        DkimError::IncompatibleKeyVersion
    );
}

#[test]
fn broken_key_material() {
    assert_eq!(
        "v=DKIM1; p=AAAA".parse::<PublicKey>().unwrap_err(),
        DkimError::PublicKeyBroken
    );
    // raw ed25519 keys must be exactly 32 bytes
    assert_eq!(
        "v=DKIM1; k=ed25519; p=AAAA".parse::<PublicKey>().unwrap_err(),
        DkimError::PublicKeyTypeMismatch
    );
}

#[test]
fn service_type_must_cover_email() {
    let record = format!("{RSA_RECORD}; s=web");
    let key: PublicKey = record.parse().unwrap();
    assert_eq!(
        key.validate(
            &DkimVerificationPolicy::default(),
            &sample_signature("rsa-sha256"),
        )
        .unwrap_err(),
        DkimError::InappropriateServiceType
    );

    let record = format!("{RSA_RECORD}; s=web:email");
    let key: PublicKey = record.parse().unwrap();
    key.validate(
        &DkimVerificationPolicy::default(),
        &sample_signature("rsa-sha256"),
    )
    .unwrap();
}

#[test]
fn hash_algorithm_restriction() {
    let record = format!("{RSA_RECORD}; h=sha256");
    let key: PublicKey = record.parse().unwrap();
    key.validate(
        &DkimVerificationPolicy::default(),
        &sample_signature("rsa-sha256"),
    )
    .unwrap();

    #[cfg(feature = "historic")]
    {
        let record = format!("{RSA_RECORD}; h=sha1");
        let key: PublicKey = record.parse().unwrap();
        assert_eq!(
            key.validate(
                &DkimVerificationPolicy::default(),
                &sample_signature("rsa-sha256"),
            )
            .unwrap_err(),
            DkimError::InappropriateHashAlgorithm
        );
    }
}

#[test]
fn strict_flag_rejects_subdomain_identities() {
    let record = format!("{RSA_RECORD}; t=y:s");
    let key: PublicKey = record.parse().unwrap();
    assert!(key.is_testing());

    let strict_signature: Signature =
        "v=1; a=rsa-sha256; d=example.com; s=sel; i=@mail.example.com; h=From; bh=aGFzaA==; b=c2ln"
            .parse()
            .unwrap();
    assert_eq!(
        key.validate(&DkimVerificationPolicy::default(), &strict_signature)
            .unwrap_err(),
        DkimError::SubdomainProhibited
    );
}

#[test]
fn granularity_applies_in_rfc4871_mode_only() {
    let policy_4871 = DkimVerificationPolicy {
        rfc4871_compatible: true,
        ..DkimVerificationPolicy::default()
    };
    let record = format!("{RSA_RECORD}; g=user");
    // outside the compatible mode g= is ignored entirely
    let key: PublicKey = record.parse().unwrap();
    key.validate(
        &DkimVerificationPolicy::default(),
        &sample_signature("rsa-sha256"),
    )
    .unwrap();

    let key = PublicKey::build(&policy_4871, &record).unwrap();
    let matching: Signature =
        "v=1; a=rsa-sha256; d=example.com; s=sel; i=user@example.com; h=From; bh=aGFzaA==; b=c2ln"
            .parse()
            .unwrap();
    key.validate(&policy_4871, &matching).unwrap();
    assert_eq!(
        key.validate(&policy_4871, &sample_signature("rsa-sha256"))
            .unwrap_err(),
        DkimError::InapplicableKey
    );
}

#[test]
fn unknown_tags_are_ignored() {
    let record = format!("{RSA_RECORD}; n=some notes; future=tag");
    assert!(record.parse::<PublicKey>().is_ok());
}
