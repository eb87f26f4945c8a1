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

//! The streaming digest of one verification (or signing) frame: the body
//! hash is computed online as octets arrive, the header hash at finalize
//! (RFC 6376 §3.7).

use base64::{engine::general_purpose::STANDARD, Engine};
use vauth_common::HeaderList;

use super::algorithm::Hasher;
use super::canonicalization::{BodyCanonicalizer, CanonicalizationAlgorithm};
use super::public_key::PublicKey;
use super::signature::Signature;
use super::{DkimError, HashAlgorithm, DKIM_SIGNHEADER};

#[derive(Debug)]
pub(super) struct Digester {
    hash_algorithm: HashAlgorithm,
    header_canon: CanonicalizationAlgorithm,
    body_canonicalizer: BodyCanonicalizer,
    body_hasher: Hasher,
    /// `l=` bound on the hashed octets
    body_limit: Option<u64>,
    /// canonical octets produced
    body_emitted: u64,
    /// canonical octets fed to the hasher (≤ `body_limit`)
    body_hashed: u64,
    keep_leading_space: bool,
    scratch: Vec<u8>,
}

impl Digester {
    pub(super) fn from_signature(signature: &Signature, keep_leading_space: bool) -> Self {
        let hash_algorithm = signature.signing_algorithm.hash_algorithm();
        Self {
            hash_algorithm,
            header_canon: signature.canonicalization.header,
            body_canonicalizer: BodyCanonicalizer::new(signature.canonicalization.body),
            body_hasher: Hasher::new(hash_algorithm),
            body_limit: signature.body_length,
            body_emitted: 0,
            body_hashed: 0,
            keep_leading_space,
            scratch: Vec::new(),
        }
    }

    /// Feed body octets, in exactly the order they appear on the wire.
    pub(super) fn update_body(&mut self, chunk: &[u8]) {
        let mut out = std::mem::take(&mut self.scratch);
        out.clear();
        self.body_canonicalizer.update(chunk, &mut out);
        self.absorb(&out);
        self.scratch = out;
    }

    fn absorb(&mut self, canonical: &[u8]) {
        self.body_emitted += canonical.len() as u64;
        let fed: &[u8] = match self.body_limit {
            Some(limit) => {
                let remaining =
                    usize::try_from(limit.saturating_sub(self.body_hashed)).unwrap_or(usize::MAX);
                &canonical[..canonical.len().min(remaining)]
            }
            None => canonical,
        };
        self.body_hasher.update(fed);
        self.body_hashed += fed.len() as u64;
    }

    /// Close the body stream and return its digest.
    fn finish_body(&mut self) -> Result<Vec<u8>, DkimError> {
        let mut tail = Vec::new();
        self.body_canonicalizer.finish(&mut tail);
        self.absorb(&tail);
        /*
         * [RFC6376] 3.5.
         * The value of the "l=" tag MUST NOT be larger than the actual
         * number of octets in the canonicalized message body.
         */
        if let Some(limit) = self.body_limit {
            if limit > self.body_emitted {
                return Err(DkimError::BodyLengthExceedsMessage);
            }
        }
        Ok(self.body_hasher.clone().finalize())
    }

    fn wire_form(&self, name: &str, value: &str) -> String {
        // reconstruct the SP after ':' when the producer stripped it
        if self.keep_leading_space {
            format!("{name}:{value}")
        } else {
            format!("{name}: {value}")
        }
    }

    /// The header hash: each name of `h=` consumes the bottom-most not yet
    /// consumed instance, the signature header itself comes last with its
    /// `b=` value erased and no trailing CRLF.
    fn header_hash(
        &self,
        headers: &HeaderList,
        signature: &Signature,
        own_header: (&str, &str),
        skip_index: Option<usize>,
    ) -> Vec<u8> {
        let mut hasher = Hasher::new(self.hash_algorithm);
        let mut consumed = vec![false; headers.len()];

        for name in &signature.signed_headers {
            let found = (0..headers.len()).rev().find(|&index| {
                !consumed[index]
                    && Some(index) != skip_index
                    && headers
                        .get(index)
                        .is_some_and(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            });
            let Some(index) = found else {
                // a name with no remaining instance contributes nothing
                continue;
            };
            consumed[index] = true;
            if let Some((header_name, header_value)) = headers.get(index) {
                let canonical = self
                    .header_canon
                    .canonicalize_header(&self.wire_form(header_name, header_value));
                hasher.update(canonical.as_bytes());
                hasher.update(b"\r\n");
            }
        }

        let (own_name, own_value) = own_header;
        let canonical = self
            .header_canon
            .canonicalize_header(&self.wire_form(own_name, own_value));
        hasher.update(canonical.as_bytes());
        hasher.finalize()
    }

    /// Verify one signature against the accumulated body stream and the
    /// message headers.
    pub(super) fn verify_message(
        &mut self,
        headers: &HeaderList,
        own_header_index: usize,
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<(), DkimError> {
        let body_hash = self.finish_body()?;
        if body_hash != signature.body_hash {
            tracing::debug!(
                got = %STANDARD.encode(&body_hash),
                expected = %STANDARD.encode(&signature.body_hash),
                "body hash does not match"
            );
            return Err(DkimError::BodyHashMismatch);
        }

        let Some((own_name, _)) = headers.get(own_header_index) else {
            return Err(DkimError::ImplementationError {
                detail: "signature frame points outside the header list".to_string(),
            });
        };
        let own_value = signature.raw_value_with_empty_b();
        let digest = self.header_hash(
            headers,
            signature,
            (own_name, &own_value),
            Some(own_header_index),
        );
        tracing::trace!(headers_hash = %STANDARD.encode(&digest));

        public_key
            .inner
            .verify(&digest, &signature.signature, signature.signing_algorithm)
    }

    /// Signer side: digest of the canonicalized body.
    pub(super) fn finish_body_hash(&mut self) -> Result<Vec<u8>, DkimError> {
        self.finish_body()
    }

    /// Signer side: the header hash over `headers` plus the rendered
    /// signature header with an empty `b=`.
    pub(super) fn header_hash_for_signing(
        &self,
        headers: &HeaderList,
        signature: &Signature,
        own_value: &str,
    ) -> Vec<u8> {
        self.header_hash(headers, signature, (DKIM_SIGNHEADER, own_value), None)
    }
}
