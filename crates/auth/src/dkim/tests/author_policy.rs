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
use vauth_common::dns::StaticResolver;
use vauth_common::{adsp, atps, HeaderList};

use crate::dkim::atps::{encode_base32, AtpsHashAlgorithm};
use crate::dkim::{
    sign, Canonicalization, CanonicalizationAlgorithm, DkimSignPolicy, DkimVerificationPolicy,
    DkimVerifier, HashAlgorithm, PrivateKey,
};

const BODY: &[u8] = b"Hello.\r\n";

fn message() -> HeaderList {
    let mut headers = HeaderList::new(true);
    headers.append("From", " user@example.com");
    headers.append("To", " other@example.net");
    headers.append("Subject", " hello");
    headers
}

fn ed25519_key() -> (PrivateKey, String) {
    use ring_compat::ring::rand::SystemRandom;
    use ring_compat::ring::signature::{Ed25519KeyPair, KeyPair};

    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
    let public_b64 = STANDARD.encode(key_pair.public_key().as_ref());
    (
        PrivateKey::ed25519_from_pkcs8_der(pkcs8.as_ref()).unwrap(),
        public_b64,
    )
}

/// Sign `headers` for `sdid` and publish the key in `resolver`.
fn sign_and_publish(
    headers: &mut HeaderList,
    resolver: &mut StaticResolver,
    sdid: &str,
    policy: &DkimSignPolicy,
) {
    let (private_key, public_b64) = ed25519_key();
    let (_, header_value) = sign(
        headers,
        BODY,
        &private_key,
        policy,
        sdid,
        "sel",
        vec!["From".to_string(), "Subject".to_string()],
    )
    .unwrap();
    headers.append("DKIM-Signature", header_value);
    let record = format!("v=DKIM1; k=ed25519; p={public_b64}");
    resolver.txt(&format!("sel._domainkey.{sdid}"), &[record.as_str()]);
}

fn run(
    headers: &HeaderList,
    resolver: &StaticResolver,
    policy: &DkimVerificationPolicy,
) -> Vec<crate::dkim::AuthorPolicyResult> {
    let mut verifier = DkimVerifier::new(policy, resolver, headers.clone());
    verifier.update_body(BODY);
    verifier.verify();
    verifier.check_author_policy()
}

fn relaxed() -> DkimSignPolicy {
    DkimSignPolicy {
        canonicalization: Canonicalization {
            header: CanonicalizationAlgorithm::Relaxed,
            body: CanonicalizationAlgorithm::Relaxed,
        },
        ..DkimSignPolicy::default()
    }
}

#[test]
fn author_domain_signature_passes_without_lookup() {
    let mut headers = message();
    let mut resolver = StaticResolver::new();
    sign_and_publish(&mut headers, &mut resolver, "example.com", &relaxed());

    let results = run(&headers, &resolver, &DkimVerificationPolicy::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].adsp, adsp::Value::Pass);
    assert_eq!(results[0].atps, None);
}

#[test]
fn discardable_practice_without_author_signature() {
    let headers = message();
    let mut resolver = StaticResolver::new();
    resolver.txt("_adsp._domainkey.example.com", &["dkim=discardable"]);

    let results = run(&headers, &resolver, &DkimVerificationPolicy::default());
    assert_eq!(results[0].adsp, adsp::Value::Discard);
}

#[test]
fn adsp_all_practice_fails_unsigned_mail() {
    let headers = message();
    let mut resolver = StaticResolver::new();
    resolver.txt("_adsp._domainkey.example.com", &["dkim=all"]);
    let results = run(&headers, &resolver, &DkimVerificationPolicy::default());
    assert_eq!(results[0].adsp, adsp::Value::Fail);
}

#[test]
fn adsp_outcomes_without_records() {
    // the whole author domain does not exist
    let headers = message();
    let resolver = StaticResolver::new();
    let results = run(&headers, &resolver, &DkimVerificationPolicy::default());
    assert_eq!(results[0].adsp, adsp::Value::NxDomain);

    // domain exists, no practice published
    let mut resolver = StaticResolver::new();
    resolver.txt_error(
        "_adsp._domainkey.example.com",
        vauth_common::dns::DnsError::NoData,
    );
    let results = run(&headers, &resolver, &DkimVerificationPolicy::default());
    assert_eq!(results[0].adsp, adsp::Value::None);
}

#[test]
fn multiple_adsp_records_are_permerror() {
    let headers = message();
    let mut resolver = StaticResolver::new();
    resolver.txt(
        "_adsp._domainkey.example.com",
        &["dkim=all", "dkim=discardable"],
    );
    let results = run(&headers, &resolver, &DkimVerificationPolicy::default());
    assert_eq!(results[0].adsp, adsp::Value::PermError);
}

#[test]
fn broken_from_header_is_permerror() {
    let mut headers = HeaderList::new(true);
    headers.append("From", " not a mailbox at all");
    let resolver = StaticResolver::new();
    let policy = DkimVerificationPolicy {
        enable_atps: true,
        ..DkimVerificationPolicy::default()
    };
    let results = run(&headers, &resolver, &policy);
    assert_eq!(results.len(), 1);
    assert!(results[0].author.is_none());
    assert_eq!(results[0].adsp, adsp::Value::PermError);
    assert_eq!(results[0].atps, Some(atps::Value::PermError));
}

#[test]
fn atps_delegation_passes() {
    let mut headers = message();
    let mut resolver = StaticResolver::new();
    let third_party = DkimSignPolicy {
        atps_domain: Some("example.com".to_string()),
        atps_hash_algorithm: Some(AtpsHashAlgorithm::Sha256),
        ..relaxed()
    };
    // a third party signs on behalf of the author domain
    sign_and_publish(&mut headers, &mut resolver, "esp.example.org", &third_party);

    let label = encode_base32(&HashAlgorithm::Sha256.hash(b"esp.example.org"));
    resolver.txt(
        &format!("{label}._atps.example.com"),
        &["v=ATPS1; d=esp.example.org"],
    );
    resolver.txt("_adsp._domainkey.example.com", &["dkim=all"]);

    let policy = DkimVerificationPolicy {
        enable_atps: true,
        ..DkimVerificationPolicy::default()
    };
    let results = run(&headers, &resolver, &policy);
    assert_eq!(results[0].atps, Some(atps::Value::Pass));
    // ADSP still reports the missing author domain signature
    assert_eq!(results[0].adsp, adsp::Value::Fail);
}

#[test]
fn atps_without_published_record_fails() {
    let mut headers = message();
    let mut resolver = StaticResolver::new();
    let third_party = DkimSignPolicy {
        atps_domain: Some("example.com".to_string()),
        atps_hash_algorithm: Some(AtpsHashAlgorithm::Sha256),
        ..relaxed()
    };
    sign_and_publish(&mut headers, &mut resolver, "esp.example.org", &third_party);
    resolver.txt_error(
        "_adsp._domainkey.example.com",
        vauth_common::dns::DnsError::NoData,
    );

    let policy = DkimVerificationPolicy {
        enable_atps: true,
        ..DkimVerificationPolicy::default()
    };
    let results = run(&headers, &resolver, &policy);
    assert_eq!(results[0].atps, Some(atps::Value::Fail));
}

#[test]
fn atps_ignores_unrelated_delegations() {
    let mut headers = message();
    let mut resolver = StaticResolver::new();
    // atps= names some other domain: the tag must be ignored
    let unrelated = DkimSignPolicy {
        atps_domain: Some("elsewhere.example".to_string()),
        atps_hash_algorithm: Some(AtpsHashAlgorithm::Sha256),
        ..relaxed()
    };
    sign_and_publish(&mut headers, &mut resolver, "esp.example.org", &unrelated);
    resolver.txt_error(
        "_adsp._domainkey.example.com",
        vauth_common::dns::DnsError::NoData,
    );

    let policy = DkimVerificationPolicy {
        enable_atps: true,
        ..DkimVerificationPolicy::default()
    };
    let results = run(&headers, &resolver, &policy);
    // a verified atps-bearing signature exists, but confirms nothing
    assert_eq!(results[0].atps, Some(atps::Value::Fail));
}

#[test]
fn no_atps_signatures_omits_the_method() {
    let mut headers = message();
    let mut resolver = StaticResolver::new();
    sign_and_publish(&mut headers, &mut resolver, "esp.example.org", &relaxed());
    resolver.txt_error(
        "_adsp._domainkey.example.com",
        vauth_common::dns::DnsError::NoData,
    );

    let policy = DkimVerificationPolicy {
        enable_atps: true,
        ..DkimVerificationPolicy::default()
    };
    let results = run(&headers, &resolver, &policy);
    assert_eq!(results[0].atps, None);
}
