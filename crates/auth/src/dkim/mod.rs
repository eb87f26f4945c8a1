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

mod algorithm;
pub mod adsp;
pub mod atps;
mod canonicalization;
mod digester;
mod policy;
mod private_key;
mod public_key;
mod result;
mod sign;
mod signature;
mod verifier;
mod wildcard;


const RSA_MINIMUM_ACCEPTABLE_KEY_SIZE: usize = 1024;

/// header field name of the DKIM signature header
pub const DKIM_SIGNHEADER: &str = "DKIM-Signature";

/// DNS namespace for DKIM public key records
pub(crate) const DKIM_DNS_NAMESPACE: &str = "_domainkey";

pub use algorithm::{HashAlgorithm, SigningAlgorithm};
pub use canonicalization::{Canonicalization, CanonicalizationAlgorithm};
pub use policy::{DkimSignPolicy, DkimVerificationPolicy};
pub use private_key::PrivateKey;
pub use public_key::{PublicKey, PublicKeyRecord};
pub use result::{AuthorPolicyResult, DkimVerificationResult};
pub use sign::{format_header, sign};
pub use signature::{QueryMethod, Signature};
pub use verifier::DkimVerifier;

/// Errors from the crypto backends.
#[must_use]
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// rsa errors
    #[error("{0}")]
    Rsa(#[from] rsa::errors::Error),
    /// ed25519 errors
    #[error("{0}")]
    Ed25519(#[from] ring_compat::signature::Error),
}

/// Everything that can interrupt DKIM processing, tag-list driver errors
/// included (the same channel serves the ADSP/ATPS/DMARC records, which
/// reuse the tag-list engine).
///
/// The public verdict of a signature follows from the error class, see
/// [`DkimError::score`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DkimError {
    // tag-list level
    #[error("tag-list syntax violation: near {near}")]
    TagSyntaxViolation { near: String },
    #[error("tag duplicated: {name}")]
    TagDuplicated { name: String },
    #[error("missing required tag: {name}")]
    MissingRequiredTag { name: &'static str },
    #[error("implementation error: {detail}")]
    ImplementationError { detail: String },

    // signature semantics
    #[error("incompatible signature version")]
    IncompatibleVersion,
    #[error("unsupported public key algorithm")]
    UnsupportedKeyAlgorithm,
    #[error("unsupported digest algorithm")]
    UnsupportedHashAlgorithm,
    #[error("unsupported canonicalization algorithm")]
    UnsupportedC14nAlgorithm,
    #[error("no supported query method")]
    UnsupportedQueryMethod,
    #[error("base64 decode failed: {0}")]
    Base64(String),
    #[error("From field not signed")]
    FromFieldNotSigned,
    #[error("signature expired")]
    SignatureExpired,
    #[error("signature timestamps are inconsistent")]
    InconsistentTimestamp,
    #[error("sig-d-tag and sig-i-tag domain mismatch")]
    DomainMismatch,

    // public key record
    #[error("incompatible public key record version")]
    IncompatibleKeyVersion,
    #[error("public key has been revoked")]
    KeyRevoked,
    #[error("broken public key data")]
    PublicKeyBroken,
    #[error("key-k-tag and key-p-tag do not match")]
    PublicKeyTypeMismatch,
    #[error("public key record is not for email use")]
    InappropriateServiceType,
    #[error("digest algorithm not acceptable to the public key record")]
    InappropriateHashAlgorithm,
    #[error("public key algorithm mismatch")]
    InappropriateKeyAlgorithm,
    #[error("public key record prohibits subdomains")]
    SubdomainProhibited,
    #[error("granularity does not cover the identity")]
    InapplicableKey,
    #[error("no key for signature")]
    NoKeyForSignature,
    #[error("the public key is too weak: {bits} bits")]
    KeyTooWeak {
        ///
        bits: usize,
    },

    // verification outcome
    #[error("body hash did not verify")]
    BodyHashMismatch,
    #[error("signature did not verify")]
    SignatureMismatch,
    #[error("body length limit exceeds the message")]
    BodyLengthExceedsMessage,
    #[error("{0}")]
    Backend(String),

    // local policy
    #[error("too many signature headers")]
    TooManySignatures,

    // transport
    #[error("dns error: {0}")]
    DnsTemporary(String),
    #[error("dns system error: {0}")]
    DnsSystem(String),
}

impl From<BackendError> for DkimError {
    fn from(error: BackendError) -> Self {
        Self::Backend(error.to_string())
    }
}

impl DkimError {
    /// Transient failures (map to `temperror`).
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::DnsTemporary(_))
    }

    /// Local failures the session may choose to defer on.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::DnsSystem(_) | Self::ImplementationError { .. })
    }

    /// RFC 8601 result value of a signature that failed with this error.
    #[must_use]
    pub const fn score(&self) -> vauth_common::dkim::Value {
        use vauth_common::dkim::Value;
        match self {
            /*
             * [RFC5451] 2.4.1.
             * fail: The message was signed and the signature or signatures
             * were acceptable to the verifier, but they failed the
             * verification test(s).
             */
            Self::BodyHashMismatch | Self::SignatureMismatch => Value::Fail,
            Self::DnsTemporary(_) | Self::DnsSystem(_) | Self::ImplementationError { .. } => {
                Value::TempError
            }
            Self::TooManySignatures => Value::Policy,
            /*
             * [RFC5451] 2.4.1.
             * neutral: The message was signed but the signature or
             * signatures contained syntax errors or were not otherwise
             * able to be processed.
             */
            _ => Value::Neutral,
        }
    }
}

impl crate::taglist::TagListError for DkimError {
    fn tag_syntax_violation(near: &str) -> Self {
        Self::TagSyntaxViolation {
            near: near.to_string(),
        }
    }

    fn tag_duplicated(name: &str) -> Self {
        Self::TagDuplicated {
            name: name.to_string(),
        }
    }

    fn missing_required_tag(name: &'static str) -> Self {
        Self::MissingRequiredTag { name }
    }

    fn implementation_error(detail: String) -> Self {
        Self::ImplementationError { detail }
    }

    fn is_tag_syntax_violation(&self) -> bool {
        matches!(self, Self::TagSyntaxViolation { .. })
    }
}

/// Decode a base64 tag value (`b=`, `bh=`, `p=`), FWS tolerated.
pub(crate) fn decode_base64_value(value: &str) -> Result<Vec<u8>, DkimError> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let scanned = vauth_common::syntax::scan::base64string(value);
    let rest = &value[scanned..];
    if vauth_common::syntax::scan::fws(rest) != rest.len() {
        return Err(DkimError::TagSyntaxViolation {
            near: value.to_string(),
        });
    }
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|error| DkimError::Base64(error.to_string()))
}
