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

use super::DkimError;

/// Hash & sign algorithm exposed in a `DKIM-Signature` header (`a=` tag).
#[allow(clippy::module_name_repetitions)]
#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    strum::EnumString,
    strum::Display,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
    fake::Dummy,
)]
pub enum SigningAlgorithm {
    /// The SHA-1 hash function should be considered cryptographically broken and unsuitable
    /// for further use in any security critical capacity.
    ///
    /// See the implementation <https://docs.rs/sha1>
    #[cfg_attr(docsrs, doc(cfg(feature = "historic")))]
    #[cfg(feature = "historic")]
    #[strum(serialize = "rsa-sha1")]
    RsaSha1,
    /// See the implementation <https://docs.rs/sha2>
    #[strum(serialize = "rsa-sha256")]
    RsaSha256,
    /// See the implementation <https://docs.rs/ring-compat>
    #[strum(serialize = "ed25519-sha256")]
    Ed25519Sha256,
}

impl SigningAlgorithm {
    /// Parse the `sig-a-tag-k` / `sig-a-tag-h` halves of an `a=` value.
    pub(super) fn from_parts(key: &str, hash: &str) -> Result<Self, DkimError> {
        let key_type = KeyType::lookup(key).ok_or(DkimError::UnsupportedKeyAlgorithm)?;
        match (key_type, hash) {
            #[cfg(feature = "historic")]
            (KeyType::Rsa, h) if h.eq_ignore_ascii_case("sha1") => Ok(Self::RsaSha1),
            (KeyType::Rsa, h) if h.eq_ignore_ascii_case("sha256") => Ok(Self::RsaSha256),
            (KeyType::Ed25519, h) if h.eq_ignore_ascii_case("sha256") => Ok(Self::Ed25519Sha256),
            _ => Err(DkimError::UnsupportedHashAlgorithm),
        }
    }

    pub(super) const fn key_type(self) -> KeyType {
        match self {
            #[cfg(feature = "historic")]
            Self::RsaSha1 => KeyType::Rsa,
            Self::RsaSha256 => KeyType::Rsa,
            Self::Ed25519Sha256 => KeyType::Ed25519,
        }
    }

    /// The digest the header/body hashes are computed with.
    #[must_use]
    pub const fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            #[cfg(feature = "historic")]
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 | Self::Ed25519Sha256 => HashAlgorithm::Sha256,
        }
    }

    pub(super) fn support_any(self, hash_algo: &[HashAlgorithm]) -> bool {
        hash_algo.contains(&self.hash_algorithm())
    }
}

/// Key algorithm named by the `k=` tag of a public key record.
#[derive(
    Debug, PartialEq, Eq, Copy, Clone, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum KeyType {
    Rsa,
    Ed25519,
}

impl KeyType {
    pub(super) fn lookup(name: &str) -> Option<Self> {
        // keyword comparison per ABNF, case-insensitive
        if name.eq_ignore_ascii_case("rsa") {
            Some(Self::Rsa)
        } else if name.eq_ignore_ascii_case("ed25519") {
            Some(Self::Ed25519)
        } else {
            None
        }
    }
}

/// Hash algorithms exposed in the DKIM public key record (`h=` tag).
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, PartialEq, Eq, Copy, Clone, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum HashAlgorithm {
    /// The SHA-1 hash function should be considered cryptographically broken and unsuitable
    /// for further use in any security critical capacity.
    ///
    /// See the implementation <https://docs.rs/sha1>
    #[cfg_attr(docsrs, doc(cfg(feature = "historic")))]
    #[cfg(feature = "historic")]
    Sha1,
    /// See the implementation <https://docs.rs/sha2>
    Sha256,
}

impl HashAlgorithm {
    pub(super) fn lookup(name: &str) -> Option<Self> {
        #[cfg(feature = "historic")]
        if name.eq_ignore_ascii_case("sha1") {
            return Some(Self::Sha1);
        }
        if name.eq_ignore_ascii_case("sha256") {
            Some(Self::Sha256)
        } else {
            None
        }
    }

    /// Return the hashed `data` using the algorithm.
    #[must_use]
    pub fn hash<T: AsRef<[u8]>>(self, data: T) -> Vec<u8> {
        let mut hasher = Hasher::new(self);
        hasher.update(data.as_ref());
        hasher.finalize()
    }
}

/// A streaming digest over either algorithm.
#[derive(Debug, Clone)]
pub(crate) enum Hasher {
    #[cfg(feature = "historic")]
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    pub(crate) fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            #[cfg(feature = "historic")]
            HashAlgorithm::Sha1 => Self::Sha1(<sha1::Sha1 as sha1::Digest>::new()),
            HashAlgorithm::Sha256 => Self::Sha256(<sha2::Sha256 as sha2::Digest>::new()),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            #[cfg(feature = "historic")]
            Self::Sha1(digest) => sha1::Digest::update(digest, data),
            Self::Sha256(digest) => sha2::Digest::update(digest, data),
        }
    }

    pub(crate) fn finalize(self) -> Vec<u8> {
        match self {
            #[cfg(feature = "historic")]
            Self::Sha1(digest) => sha1::Digest::finalize(digest).to_vec(),
            Self::Sha256(digest) => sha2::Digest::finalize(digest).to_vec(),
        }
    }
}
