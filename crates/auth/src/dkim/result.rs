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

use vauth_common::Mailbox;

use super::Signature;

/// The outcome of one verification frame, one per `DKIM-Signature`
/// header.
///
/// <https://datatracker.ietf.org/doc/html/rfc8601#section-2.7.1>
#[serde_with::serde_as]
#[derive(Debug, Clone, serde::Serialize)]
pub struct DkimVerificationResult {
    pub value: vauth_common::dkim::Value,
    /// NOTE: wrapped in an Option if the header could not be parsed
    pub signature: Option<Signature>,
    /// human-readable cause when the signature did not verify
    pub detail: Option<String>,
    /// the key record carries `t=y`: the domain is only testing DKIM
    pub testing: bool,
    /// strength of the verification key, where the notion applies
    pub key_bits: Option<usize>,
}

/// ADSP and ATPS verdicts for one Author address.
#[serde_with::serde_as]
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthorPolicyResult {
    /// NOTE: wrapped in an Option if the From header was missing, not
    /// unique or unparsable
    pub author: Option<Mailbox>,
    pub adsp: vauth_common::adsp::Value,
    /// `None` when ATPS is disabled or no signature carries `atps=` tags
    pub atps: Option<vauth_common::atps::Value>,
}
