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

//! The signer side, the dual of the verifier: same canonicalization, same
//! digester, the `b=` value empty at hash time and filled on emission.

use vauth_common::{HeaderList, Mailbox};

use super::digester::Digester;
use super::policy::DkimSignPolicy;
use super::private_key::PrivateKey;
use super::signature::Signature;
use super::{DkimError, DKIM_SIGNHEADER};

/// Sign `headers` + `body` and return the filled-in [`Signature`]; its
/// header value is obtained from [`sign`]'s second return, ready to be
/// prepended as `DKIM-Signature`.
///
/// # Errors
///
/// * the private key refuses the digest (see [`DkimError`])
pub fn sign(
    headers: &HeaderList,
    body: &[u8],
    private_key: &PrivateKey,
    policy: &DkimSignPolicy,
    sdid: impl Into<String>,
    selector: impl Into<String>,
    signed_headers: Vec<String>,
) -> Result<(Signature, String), DkimError> {
    let sdid = sdid.into();
    let signing_algorithm = private_key.get_preferred_signing_algo();

    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let signature_timestamp = policy.add_timestamp.then_some(now);
    let expire_time = policy
        .signature_ttl
        .and_then(|ttl| i64::try_from(ttl).ok())
        .map(|ttl| now + ttl);

    let mut signature = Signature {
        signing_algorithm,
        signature: Vec::new(),
        body_hash: Vec::new(),
        canonicalization: policy.canonicalization,
        auid: Mailbox::new("", sdid.clone()),
        sdid,
        selector: selector.into(),
        signed_headers,
        signature_timestamp,
        expire_time,
        body_length: None,
        query_methods: vec![super::signature::QueryMethod::DnsTxt],
        atps_domain: policy.atps_domain.clone(),
        atps_hash: policy.atps_hash_algorithm,
        raw_value: String::new(),
        b_value_range: 0..0,
    };

    // body hash first: it is part of the signed header
    let mut digester = Digester::from_signature(&signature, headers.keep_leading_space());
    digester.update_body(body);
    signature.body_hash = digester.finish_body_hash()?;

    // hash the headers plus this signature header with an empty b=
    let unsigned_value = own_header_value(&signature, headers, false);
    let digest = digester.header_hash_for_signing(headers, &signature, &unsigned_value);

    signature.signature = private_key.sign(signing_algorithm, &digest)?;
    let signed_value = own_header_value(&signature, headers, true);
    signature.raw_value = signed_value.clone();

    Ok((signature, signed_value))
}

/// The full header line for the rendered value.
#[must_use]
pub fn format_header(value: &str) -> String {
    format!("{DKIM_SIGNHEADER}:{value}")
}

/// The header value as the MTA will store it: when the header list keeps
/// the SP after ':', the rendered value carries it too, so that hashing
/// and emission agree byte for byte.
fn own_header_value(signature: &Signature, headers: &HeaderList, fill: bool) -> String {
    let rendered = signature.render_value(fill);
    if headers.keep_leading_space() {
        format!(" {rendered}")
    } else {
        rendered
    }
}

