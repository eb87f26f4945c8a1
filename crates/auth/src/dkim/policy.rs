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

use super::atps::AtpsHashAlgorithm;
use super::Canonicalization;

// [RFC8301] 3.2. verifiers MUST NOT consider RSA keys shorter than 1024
const DEFAULT_MIN_RSA_KEY_LENGTH: usize = 1024;
const DEFAULT_MAX_CLOCK_SKEW: i64 = 300;

/// Verification policy, built once at daemon startup and shared read-only
/// between messages.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DkimVerificationPolicy {
    /// Maximum number of DKIM signature headers to verify. They are
    /// evaluated from the top and the excess is annotated with the
    /// `policy` result. `None` for unlimited.
    pub sign_header_limit: Option<usize>,
    /// Maximum number of Authors to check the policies of (ADSP/ATPS).
    /// `None` for unlimited.
    pub author_limit: Option<usize>,
    /// RFC 4871 compatible mode: exercise the obsolete `g=` granularity.
    pub rfc4871_compatible: bool,
    /// Treat expired signatures (`x=` in the past) as valid.
    pub accept_expired_signature: bool,
    /// Treat signatures timestamped in the future as valid.
    pub accept_future_signature: bool,
    /// Tolerated clock skew (seconds) for the future-timestamp check.
    pub max_clock_skew: i64,
    /// Reject verified keys weaker than this many bits.
    pub min_rsa_key_length: usize,
    /// Evaluate ATPS (RFC 6541) third-party authorizations.
    pub enable_atps: bool,
}

impl Default for DkimVerificationPolicy {
    fn default() -> Self {
        Self {
            sign_header_limit: None,
            author_limit: None,
            rfc4871_compatible: false,
            accept_expired_signature: false,
            accept_future_signature: false,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            min_rsa_key_length: DEFAULT_MIN_RSA_KEY_LENGTH,
            enable_atps: false,
        }
    }
}

/// Signing policy: the knobs of the signer side, immutable once built.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DkimSignPolicy {
    pub canonicalization: Canonicalization,
    /// Emit a `t=` tag with the signing time.
    pub add_timestamp: bool,
    /// Emit an `x=` tag this many seconds after the signing time.
    pub signature_ttl: Option<u64>,
    /// Third-party signing: emit `atps=`/`atpsh=` tags naming the ADMD
    /// the signer acts for (RFC 6541 §4.2).
    pub atps_domain: Option<String>,
    pub atps_hash_algorithm: Option<AtpsHashAlgorithm>,
}

impl Default for DkimSignPolicy {
    fn default() -> Self {
        Self {
            canonicalization: Canonicalization::default(),
            add_timestamp: false,
            signature_ttl: None,
            atps_domain: None,
            atps_hash_algorithm: None,
        }
    }
}
