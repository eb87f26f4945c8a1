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

//! DKIM public key records (RFC 6376 §3.6.1), their retrieval from DNS
//! (§3.6.2) and the verifier-side validity checks (§6.1.2).

use rsa::pkcs8::DecodePublicKey;
use vauth_common::dns::{DnsError, Resolver};
use vauth_common::domain_equals;
use vauth_common::syntax::scan;

use super::algorithm::KeyType;
use super::policy::DkimVerificationPolicy;
use super::signature::Signature;
use super::wildcard::match_pubkey_granularity;
use super::{decode_base64_value, DkimError, HashAlgorithm, SigningAlgorithm};
use crate::taglist::{self, TagContext, TagSpec, TAG_NO_AS_DEFAULT_VALUE};

// a limit on the number of TXT RRs tried as DKIM public key candidates
const PUBKEY_CANDIDATE_MAX: usize = 10;

const DKIM1_VERSION_TAG: &str = "DKIM1";
const ED25519_PUBKEY_LEN: usize = 32;

/// Parsed `key-*` tags of one record.
#[derive(Debug, Clone)]
pub struct PublicKeyRecord {
    /// `h=`; the signature's hash algorithm must be listed
    pub acceptable_hash_algorithms: Vec<HashAlgorithm>,
    /// `k=`
    pub(super) key_type: KeyType,
    /// `s=` includes `email` or `*`
    pub email_service_usable: bool,
    /// `t=y`: the domain is testing DKIM
    pub testing: bool,
    /// `t=s`: AUID domain must equal the SDID exactly
    pub subdomain_prohibited: bool,
    /// `g=`, consulted in RFC 4871 compatible mode only
    pub granularity: Option<String>,
}

/// The usable verification key.
#[derive(Debug)]
pub(super) enum VerifyingKey {
    Rsa(Box<rsa::RsaPublicKey>),
    /// raw 32-byte key per RFC 8463
    Ed25519(Vec<u8>),
}

impl VerifyingKey {
    pub(super) fn verify(
        &self,
        digest: &[u8],
        signature: &[u8],
        signing_algorithm: SigningAlgorithm,
    ) -> Result<(), DkimError> {
        match (self, signing_algorithm) {
            #[cfg(feature = "historic")]
            (Self::Rsa(key), SigningAlgorithm::RsaSha1) => key
                .verify(rsa::Pkcs1v15Sign::new::<sha1::Sha1>(), digest, signature)
                .map_err(|_| DkimError::SignatureMismatch),
            (Self::Rsa(key), SigningAlgorithm::RsaSha256) => key
                .verify(rsa::Pkcs1v15Sign::new::<sha2::Sha256>(), digest, signature)
                .map_err(|_| DkimError::SignatureMismatch),
            (Self::Ed25519(key), SigningAlgorithm::Ed25519Sha256) => {
                use ring_compat::ring::signature::{UnparsedPublicKey, ED25519};
                UnparsedPublicKey::new(&ED25519, key)
                    .verify(digest, signature)
                    .map_err(|_| DkimError::SignatureMismatch)
            }
            _ => Err(DkimError::InappropriateKeyAlgorithm),
        }
    }

    /// Key strength in bits, where the notion applies.
    pub(super) fn bits(&self) -> Option<usize> {
        match self {
            Self::Rsa(key) => Some(rsa::traits::PublicKeyParts::size(key.as_ref()) * 8),
            Self::Ed25519(_) => None,
        }
    }
}

/// A validated public key, ready to verify signatures.
#[derive(Debug)]
pub struct PublicKey {
    pub record: PublicKeyRecord,
    pub(super) inner: VerifyingKey,
}

#[derive(Debug)]
struct PublicKeyParser {
    policy_rfc4871_compatible: bool,
    hash_algorithms: Vec<HashAlgorithm>,
    key_type: Option<KeyType>,
    email_service_usable: bool,
    testing: bool,
    subdomain_prohibited: bool,
    granularity: Option<String>,
    key_data: Option<Vec<u8>>,
}

fn syntax(near: &str) -> DkimError {
    DkimError::TagSyntaxViolation {
        near: near.chars().take(50).collect(),
    }
}

/*
 * [RFC6376] 3.6.1.
 * key-v-tag = %x76 [FWS] "=" [FWS] %x44.4B.49.4D.31
 *
 * Compared case-sensitively, and only accepted at the head of the record.
 */
fn parse_v(_parser: &mut PublicKeyParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    if context.tag_no != TAG_NO_AS_DEFAULT_VALUE && context.tag_no > 0 {
        return Err(syntax(context.value));
    }
    if context.value == DKIM1_VERSION_TAG {
        Ok(context.value.len())
    } else {
        Err(DkimError::IncompatibleKeyVersion)
    }
}

/*
 * [RFC4871] 3.6.1.
 * key-g-tag       = %x67 [FWS] "=" [FWS] key-g-tag-lpart
 *
 * Obsoleted by RFC 6376; outside the compatible mode the tag is ignored.
 */
fn parse_g(parser: &mut PublicKeyParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    if !parser.policy_rfc4871_compatible {
        return Ok(context.value.len());
    }
    let n = scan::loose_dot_atom_text(context.value);
    parser.granularity = Some(context.value[..n].to_string());
    Ok(n)
}

/*
 * [RFC6376] 3.6.1.
 * key-h-tag = %x68 [FWS] "=" [FWS] key-h-tag-alg
 *             *( [FWS] ":" [FWS] key-h-tag-alg )
 * Unknown algorithms are ignored in view of future extension.
 */
fn parse_h(parser: &mut PublicKeyParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let value = context.value;
    let mut pos = 0;
    loop {
        pos += scan::fws(&value[pos..]);
        let alg = scan::hyphenated_word(&value[pos..]);
        if alg == 0 {
            return Err(syntax(value));
        }
        if let Some(algorithm) = HashAlgorithm::lookup(&value[pos..pos + alg]) {
            if !parser.hash_algorithms.contains(&algorithm) {
                parser.hash_algorithms.push(algorithm);
            }
        }
        pos += alg;
        let end = pos;
        let gap = scan::fws(&value[pos..]);
        if scan::char1(&value[pos + gap..], b':') == 0 {
            return Ok(end);
        }
        pos += gap + 1;
    }
}

fn parse_k(parser: &mut PublicKeyParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    parser.key_type =
        Some(KeyType::lookup(context.value).ok_or(DkimError::UnsupportedKeyAlgorithm)?);
    Ok(context.value.len())
}

/*
 * [RFC6376] 3.6.1.
 * key-p-tag = %x70 [FWS] "=" [ [FWS] base64string ]
 *
 * An empty value means that this public key has been revoked.
 */
fn parse_p(parser: &mut PublicKeyParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    if context.value.is_empty() {
        return Err(DkimError::KeyRevoked);
    }
    parser.key_data = Some(decode_base64_value(context.value)?);
    Ok(context.value.len())
}

/*
 * [RFC6376] 3.6.1.
 * key-s-tag = %x73 [FWS] "=" [FWS] key-s-tag-type
 *             *( [FWS] ":" [FWS] key-s-tag-type )
 * key-s-tag-type = "email" / "*" / x-key-s-tag-type
 */
fn parse_s(parser: &mut PublicKeyParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let value = context.value;
    let mut pos = 0;
    loop {
        pos += scan::fws(&value[pos..]);
        // '*' is not part of hyphenated-word
        let service = {
            let n = scan::hyphenated_word(&value[pos..]);
            if n > 0 {
                n
            } else {
                scan::char1(&value[pos..], b'*')
            }
        };
        if service == 0 {
            return Err(syntax(value));
        }
        let name = &value[pos..pos + service];
        if name == "*" || name.eq_ignore_ascii_case("email") {
            parser.email_service_usable = true;
        }
        pos += service;
        let end = pos;
        let gap = scan::fws(&value[pos..]);
        if scan::char1(&value[pos + gap..], b':') == 0 {
            return Ok(end);
        }
        pos += gap + 1;
    }
}

/*
 * [RFC6376] 3.6.1.
 * key-t-tag = %x74 [FWS] "=" [FWS] key-t-tag-flag
 *             *( [FWS] ":" [FWS] key-t-tag-flag )
 * key-t-tag-flag = "y" / "s" / x-key-t-tag-flag
 */
fn parse_t(parser: &mut PublicKeyParser, context: &TagContext<'_>) -> Result<usize, DkimError> {
    let value = context.value;
    let mut pos = 0;
    loop {
        pos += scan::fws(&value[pos..]);
        let flag = scan::hyphenated_word(&value[pos..]);
        if flag == 0 {
            return Err(syntax(value));
        }
        let name = &value[pos..pos + flag];
        if name.eq_ignore_ascii_case("y") {
            parser.testing = true;
        } else if name.eq_ignore_ascii_case("s") {
            parser.subdomain_prohibited = true;
        }
        pos += flag;
        let end = pos;
        let gap = scan::fws(&value[pos..]);
        if scan::char1(&value[pos + gap..], b':') == 0 {
            return Ok(end);
        }
        pos += gap + 1;
    }
}

const PUBKEY_TAGS: &[TagSpec<PublicKeyParser, DkimError>] = &[
    TagSpec { name: "v", required: false, default_value: Some(DKIM1_VERSION_TAG), parser: Some(parse_v) },
    TagSpec { name: "g", required: false, default_value: Some("*"), parser: Some(parse_g) },
    /*
     * The default semantics for an absent key-h-tag is "all algorithms";
     * RFC 6376 has no "*" notation, so the acceptable set is enumerated.
     */
    TagSpec { name: "h", required: false, default_value: Some("sha1:sha256"), parser: Some(parse_h) },
    TagSpec { name: "k", required: false, default_value: Some("rsa"), parser: Some(parse_k) },
    // key-n-tag has no concern with the verification process
    TagSpec { name: "n", required: false, default_value: None, parser: None },
    TagSpec { name: "p", required: true, default_value: None, parser: Some(parse_p) },
    TagSpec { name: "s", required: false, default_value: Some("*"), parser: Some(parse_s) },
    TagSpec { name: "t", required: false, default_value: None, parser: Some(parse_t) },
];

impl PublicKey {
    /// Build one record candidate from its TXT string.
    pub(super) fn build(
        policy: &DkimVerificationPolicy,
        record_text: &str,
    ) -> Result<Self, DkimError> {
        let mut parser = PublicKeyParser {
            policy_rfc4871_compatible: policy.rfc4871_compatible,
            hash_algorithms: Vec::new(),
            key_type: None,
            email_service_usable: false,
            testing: false,
            subdomain_prohibited: false,
            granularity: None,
            key_data: None,
        };
        taglist::parse(&mut parser, record_text, PUBKEY_TAGS, false, false)?;

        let key_type = parser.key_type.unwrap_or(KeyType::Rsa);
        let key_data = parser.key_data.ok_or(DkimError::MissingRequiredTag { name: "p" })?;

        // compare the declared key type against the content of key-p-tag
        let inner = match key_type {
            KeyType::Rsa => rsa::RsaPublicKey::from_public_key_der(&key_data)
                .map(Box::new)
                .map(VerifyingKey::Rsa)
                .map_err(|_| DkimError::PublicKeyBroken)?,
            KeyType::Ed25519 => {
                if key_data.len() != ED25519_PUBKEY_LEN {
                    return Err(DkimError::PublicKeyTypeMismatch);
                }
                VerifyingKey::Ed25519(key_data)
            }
        };

        Ok(Self {
            record: PublicKeyRecord {
                acceptable_hash_algorithms: parser.hash_algorithms,
                key_type,
                email_service_usable: parser.email_service_usable,
                testing: parser.testing,
                subdomain_prohibited: parser.subdomain_prohibited,
                granularity: parser.granularity,
            },
            inner,
        })
    }

    /// Validity checks of RFC 6376 §6.1.2 against one signature; a record
    /// failing any of them is discarded as a candidate.
    pub(super) fn validate(
        &self,
        policy: &DkimVerificationPolicy,
        signature: &Signature,
    ) -> Result<(), DkimError> {
        // reject if "email" is not among the service types
        if !self.record.email_service_usable {
            return Err(DkimError::InappropriateServiceType);
        }

        /*
         * [RFC6376] 6.1.2. step 6:
         * the hash algorithm implied by the a= tag must be included in
         * the h= tag of the key record.
         */
        if !signature
            .signing_algorithm
            .support_any(&self.record.acceptable_hash_algorithms)
        {
            return Err(DkimError::InappropriateHashAlgorithm);
        }

        /*
         * [RFC6376] 6.1.2. step 8:
         * the public key data must be suitable for the a= algorithm.
         */
        if self.record.key_type != signature.signing_algorithm.key_type() {
            return Err(DkimError::InappropriateKeyAlgorithm);
        }

        /*
         * [RFC6376] 3.10.
         * If the referenced key record contains the "s" flag as part of
         * the "t=" tag, the domain of the AUID must be the same as that
         * of the SDID.
         */
        if self.record.subdomain_prohibited
            && !domain_equals(&signature.sdid, signature.auid.domain())
        {
            return Err(DkimError::SubdomainProhibited);
        }

        /*
         * [RFC4871] 6.1.2. step 6:
         * the "g=" granularity must match the local-part of the "i=" tag.
         */
        if policy.rfc4871_compatible {
            let granularity = self.record.granularity.as_deref().unwrap_or("*");
            if !match_pubkey_granularity(granularity, signature.auid.local_part()) {
                return Err(DkimError::InapplicableKey);
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn is_testing(&self) -> bool {
        self.record.testing
    }

    #[must_use]
    pub fn bits(&self) -> Option<usize> {
        self.inner.bits()
    }
}

/// Retrieve and validate the public key for `signature` over its `q=`
/// methods (RFC 6376 §6.1.2 steps 1-8).
pub(super) fn lookup(
    policy: &DkimVerificationPolicy,
    signature: &Signature,
    resolver: &dyn Resolver,
) -> Result<PublicKey, DkimError> {
    /*
     * [RFC6376] 3.5.
     * Implementations MUST use the recognized query mechanisms in the
     * order presented.  Unrecognized query mechanisms MUST be ignored.
     */
    let mut outcome = Err(DkimError::NoKeyForSignature);
    for _method in &signature.query_methods {
        // DnsTxt is the only recognized method
        outcome = retrieve(policy, signature, resolver);
        match &outcome {
            Ok(_) => break,
            Err(error) if error.is_temporary() || error.is_system() => return outcome,
            Err(_) => {}
        }
    }
    let public_key = outcome?;

    // check the key strength against the verifier policy
    if let Some(bits) = public_key.bits() {
        if bits < policy.min_rsa_key_length {
            tracing::info!(bits, minimum = policy.min_rsa_key_length, "public key too weak");
            return Err(DkimError::KeyTooWeak { bits });
        }
    }
    Ok(public_key)
}

fn retrieve(
    policy: &DkimVerificationPolicy,
    signature: &Signature,
    resolver: &dyn Resolver,
) -> Result<PublicKey, DkimError> {
    let qname = signature.get_dns_query();
    let texts = match resolver.lookup_txt(&qname) {
        Ok(texts) => texts,
        /*
         * [RFC6376] 6.1.2. step 3:
         * if the key record does not exist, the Verifier MUST immediately
         * return PERMFAIL (no key for signature).
         */
        Err(DnsError::NoData | DnsError::NxDomain | DnsError::NoValidAnswer) => {
            tracing::debug!(qname, "no public key record found on DNS");
            return Err(DkimError::NoKeyForSignature);
        }
        Err(error) if error.is_temporary() => {
            return Err(DkimError::DnsTemporary(error.to_string()))
        }
        Err(error) => return Err(DkimError::DnsSystem(error.to_string())),
    };

    /*
     * [RFC6376] 6.1.2. step 4:
     * if the query returns multiple key records, the Verifier can cycle
     * through them; malformed candidates MUST be ignored.
     */
    for text in texts.iter().take(PUBKEY_CANDIDATE_MAX) {
        match PublicKey::build(policy, text)
            .and_then(|key| key.validate(policy, signature).map(|()| key))
        {
            Ok(key) => return Ok(key),
            Err(error) => {
                tracing::debug!(qname, %error, record = %text, "public key candidate discarded");
            }
        }
    }
    tracing::info!(qname, "no suitable public key record found");
    Err(DkimError::NoKeyForSignature)
}

/// Parse a single record string without DNS; used by tests and by hosts
/// that cache key records.
impl std::str::FromStr for PublicKey {
    type Err = DkimError;

    fn from_str(record_text: &str) -> Result<Self, Self::Err> {
        Self::build(&DkimVerificationPolicy::default(), record_text)
    }
}
