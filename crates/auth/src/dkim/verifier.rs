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

//! The per-message DKIM verifier: one independent frame per
//! `DKIM-Signature` header, all hashing the same body stream, plus the
//! ADSP/ATPS author-policy pass that runs once the signatures are settled.

use vauth_common::dns::Resolver;
use vauth_common::{domain_equals, HeaderList};

use super::adsp::{self, AdspLookupError, AdspPractice};
use super::atps::{self, AtpsLookupError};
use super::digester::Digester;
use super::policy::DkimVerificationPolicy;
use super::public_key::{self, PublicKey};
use super::result::{AuthorPolicyResult, DkimVerificationResult};
use super::signature::Signature;
use super::{DkimError, DKIM_SIGNHEADER};

#[derive(Debug)]
struct VerificationFrame {
    header_index: usize,
    signature: Option<Signature>,
    public_key: Option<PublicKey>,
    digester: Option<Digester>,
    error: Option<DkimError>,
    verified: bool,
}

impl VerificationFrame {
    const fn new(header_index: usize) -> Self {
        Self {
            header_index,
            signature: None,
            public_key: None,
            digester: None,
            error: None,
            verified: false,
        }
    }

    fn is_testing(&self) -> bool {
        self.public_key.as_ref().is_some_and(PublicKey::is_testing)
    }

    /*
     * [RFC5617] 2.7.
     * An "Author Domain Signature" is a Valid Signature; a key in testing
     * mode does not produce one.
     */
    fn is_signature_verified(&self) -> bool {
        self.verified && self.error.is_none() && !self.is_testing()
    }
}

/// Verification state of one message; exclusively owned by its session.
/// The header sequence moves in at construction, the body streams through
/// afterwards.
pub struct DkimVerifier<'a> {
    policy: &'a DkimVerificationPolicy,
    resolver: &'a dyn Resolver,
    headers: HeaderList,
    frames: Vec<VerificationFrame>,
    /// number of DKIM-Signature headers seen, frames or not
    sigheader_total: usize,
    have_temporary_error: bool,
    have_system_error: bool,
}

impl<'a> DkimVerifier<'a> {
    /// Register the message headers: detect every `DKIM-Signature`, parse
    /// it, retrieve its key and prime the streaming digester. Frames past
    /// the signature-flood cap are annotated, not verified.
    #[must_use]
    pub fn new(
        policy: &'a DkimVerificationPolicy,
        resolver: &'a dyn Resolver,
        headers: HeaderList,
    ) -> Self {
        let signature_headers: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| name.eq_ignore_ascii_case(DKIM_SIGNHEADER))
            .map(|(index, (_, value))| (index, value.to_string()))
            .collect();

        let mut verifier = Self {
            policy,
            resolver,
            headers,
            frames: Vec::new(),
            sigheader_total: 0,
            have_temporary_error: false,
            have_system_error: false,
        };

        for (index, value) in signature_headers {
            verifier.sigheader_total += 1;
            /*
             * [RFC6376] 6.1.
             * A Verifier MAY limit the number of signatures it tries, in
             * order to avoid denial-of-service attacks.
             */
            if let Some(limit) = policy.sign_header_limit {
                if verifier.sigheader_total > limit {
                    tracing::info!(limit, "too many signature headers");
                    continue;
                }
            }
            verifier.setup_frame(index, &value);
        }
        verifier
    }

    /// The header sequence the verifier keyed on.
    #[must_use]
    pub const fn headers(&self) -> &HeaderList {
        &self.headers
    }

    fn setup_frame(&mut self, header_index: usize, header_value: &str) {
        let mut frame = VerificationFrame::new(header_index);

        match header_value.parse::<Signature>() {
            Ok(signature) => {
                let now = time::OffsetDateTime::now_utc().unix_timestamp();
                let mut status = Ok(());
                if !self.policy.accept_expired_signature {
                    status = signature.check_expiry(now);
                }
                if status.is_ok() && !self.policy.accept_future_signature {
                    status = signature.check_future_timestamp(now, self.policy.max_clock_skew);
                }

                if let Err(error) = status {
                    frame.error = Some(error);
                } else {
                    tracing::info!(
                        frame = self.frames.len(),
                        domain = %signature.sdid,
                        selector = %signature.selector,
                        algorithm = %signature.signing_algorithm,
                        canon = %signature.canonicalization,
                        "DKIM-Signature accepted for verification"
                    );
                    match public_key::lookup(self.policy, &signature, self.resolver) {
                        Ok(public_key) => {
                            frame.digester = Some(Digester::from_signature(
                                &signature,
                                self.headers.keep_leading_space(),
                            ));
                            frame.public_key = Some(public_key);
                        }
                        Err(error) => frame.error = Some(error),
                    }
                }
                frame.signature = Some(signature);
            }
            Err(error) => {
                tracing::debug!(%error, "unusable DKIM-Signature header");
                frame.error = Some(error);
            }
        }
        self.frames.push(frame);
    }

    /// Feed a chunk of body octets to every healthy frame. Tolerates
    /// arbitrary chunk sizes.
    pub fn update_body(&mut self, chunk: &[u8]) {
        for frame in &mut self.frames {
            if frame.error.is_some() {
                continue;
            }
            if let Some(digester) = &mut frame.digester {
                digester.update_body(chunk);
            }
        }
    }

    /// End of body: compare body hashes and verify the signatures.
    pub fn verify(&mut self) {
        let headers = &self.headers;
        let mut have_temporary = false;
        let mut have_system = false;
        for frame in &mut self.frames {
            if frame.error.is_some() {
                continue;
            }
            let outcome = match (&mut frame.digester, &frame.signature, &frame.public_key) {
                (Some(digester), Some(signature), Some(public_key)) => digester.verify_message(
                    headers,
                    frame.header_index,
                    signature,
                    public_key,
                ),
                _ => Err(DkimError::ImplementationError {
                    detail: "verification frame left half-initialized".to_string(),
                }),
            };
            match outcome {
                Ok(()) => frame.verified = true,
                Err(error) => {
                    if error.is_temporary() {
                        have_temporary = true;
                    } else if error.is_system() {
                        have_system = true;
                    }
                    frame.error = Some(error);
                }
            }
        }
        self.have_temporary_error |= have_temporary;
        self.have_system_error |= have_system;
    }

    /// Number of `DKIM-Signature` headers the message carries.
    #[must_use]
    pub const fn signature_count(&self) -> usize {
        self.sigheader_total
    }

    /// A transient (DNS) failure interrupted at least one frame.
    #[must_use]
    pub const fn has_temporary_error(&self) -> bool {
        self.have_temporary_error
    }

    /// A local failure interrupted at least one frame; the session maps
    /// this to its distinguished system-error status.
    #[must_use]
    pub const fn has_system_error(&self) -> bool {
        self.have_system_error
    }

    /// Per-signature results, the flood-capped excess included.
    #[must_use]
    pub fn results(&self) -> Vec<DkimVerificationResult> {
        use vauth_common::dkim::Value;

        let mut results: Vec<DkimVerificationResult> = self
            .frames
            .iter()
            .map(|frame| {
                let testing = frame.is_testing();
                let value = match &frame.error {
                    None if frame.verified && testing => Value::Neutral,
                    None if frame.verified => Value::Pass,
                    None => Value::Neutral,
                    /*
                     * the testing flag demotes the crypto outcome but not
                     * transient errors
                     */
                    Some(error) => match error.score() {
                        Value::Pass | Value::Fail if testing => Value::Neutral,
                        score => score,
                    },
                };
                DkimVerificationResult {
                    value,
                    signature: frame.signature.clone(),
                    detail: frame.error.as_ref().map(ToString::to_string),
                    testing,
                    key_bits: frame.public_key.as_ref().and_then(PublicKey::bits),
                }
            })
            .collect();

        for _ in self.frames.len()..self.sigheader_total {
            results.push(DkimVerificationResult {
                value: Value::Policy,
                signature: None,
                detail: Some(DkimError::TooManySignatures.to_string()),
                testing: false,
                key_bits: None,
            });
        }
        results
    }

    fn has_author_domain_signature(&self, author_domain: &str) -> bool {
        self.frames.iter().any(|frame| {
            frame.is_signature_verified()
                && frame
                    .signature
                    .as_ref()
                    .is_some_and(|signature| domain_equals(&signature.sdid, author_domain))
        })
    }

    /// ADSP and ATPS evaluation, one entry per Author address
    /// (RFC 5617 §2.3: each mailbox of the From: mailbox-list).
    #[must_use]
    pub fn check_author_policy(&self) -> Vec<AuthorPolicyResult> {
        use vauth_common::{adsp::Value as AdspValue, atps::Value as AtpsValue};

        let authors = match self.headers.extract_authors() {
            Ok(authors) => authors,
            /*
             * No or multiple From: headers: the policy methods report
             * permerror for the message as a whole.
             */
            Err(error) => {
                tracing::debug!(%error, "author extraction failed");
                return vec![AuthorPolicyResult {
                    author: None,
                    adsp: AdspValue::PermError,
                    atps: self.policy.enable_atps.then_some(AtpsValue::PermError),
                }];
            }
        };

        let cap = self.policy.author_limit.unwrap_or(usize::MAX);
        authors
            .into_iter()
            .take(cap)
            .map(|author| {
                let author_domain = author.domain().to_string();

                /*
                 * [RFC5617] 5.4.
                 * pass: this message had an Author Domain Signature that
                 * was validated; no lookup is needed.
                 */
                if self.has_author_domain_signature(&author_domain) {
                    return AuthorPolicyResult {
                        author: Some(author),
                        adsp: AdspValue::Pass,
                        atps: None,
                    };
                }

                // a transient DKIM failure may be hiding the author
                // domain signature; don't publish a harsher verdict
                if self.have_temporary_error || self.have_system_error {
                    return AuthorPolicyResult {
                        author: Some(author),
                        adsp: AdspValue::TempError,
                        atps: self.policy.enable_atps.then_some(AtpsValue::TempError),
                    };
                }

                let atps = if self.policy.enable_atps {
                    self.eval_atps(&author_domain)
                } else {
                    None
                };
                let adsp = self.eval_adsp(&author_domain);
                AuthorPolicyResult {
                    author: Some(author),
                    adsp,
                    atps,
                }
            })
            .collect()
    }

    fn eval_adsp(&self, author_domain: &str) -> vauth_common::adsp::Value {
        use vauth_common::adsp::Value;

        match adsp::lookup(author_domain, self.resolver) {
            Ok(record) => {
                tracing::debug!(domain = author_domain, practice = %record.practice, "valid ADSP record found");
                match record.practice {
                    AdspPractice::All => Value::Fail,
                    AdspPractice::Discardable => Value::Discard,
                    AdspPractice::Unknown => Value::Unknown,
                }
            }
            Err(AdspLookupError::NxDomain) => {
                tracing::info!(domain = author_domain, "author domain does not exist");
                Value::NxDomain
            }
            Err(AdspLookupError::NotExist) => Value::None,
            Err(AdspLookupError::MultipleRecords) => Value::PermError,
            Err(AdspLookupError::Temporary(_) | AdspLookupError::System(_)) => Value::TempError,
        }
    }

    fn eval_atps(&self, author_domain: &str) -> Option<vauth_common::atps::Value> {
        use vauth_common::atps::Value;

        let mut atps_sig_num = 0usize;
        let mut atps_valid_sig_num = 0usize;
        let mut have_temporary = false;
        let mut have_system = false;

        for frame in &self.frames {
            let Some(signature) = &frame.signature else {
                continue;
            };
            /*
             * [RFC6541] 4.2.
             * The ATPS Signer includes an "atps" tag that names the ADMD
             * on whose behalf it is signing.
             */
            let Some(atps_domain) = signature.atps_domain.as_deref() else {
                continue;
            };
            atps_sig_num += 1;

            if !frame.is_signature_verified() {
                continue;
            }
            atps_valid_sig_num += 1;

            /*
             * [RFC6541] 4.2.
             * The "atpsh" tag MUST also be included, as it is required as
             * part of the algorithm enacted by the Verifier.
             */
            let Some(atps_hash) = signature.atps_hash else {
                continue;
            };
            /*
             * [RFC6541] 4.3.
             * If the "atps" domain does not match the RFC5322.From
             * domain, the tag MUST be ignored.
             */
            if !domain_equals(atps_domain, author_domain) {
                continue;
            }

            match atps::lookup(atps_domain, &signature.sdid, atps_hash, self.resolver) {
                Ok(_) => return Some(Value::Pass),
                Err(AtpsLookupError::NotExist) => {}
                Err(AtpsLookupError::Temporary(_)) => have_temporary = true,
                Err(AtpsLookupError::System(_)) => have_system = true,
            }
        }

        if have_temporary || have_system {
            Some(Value::TempError)
        } else if atps_valid_sig_num > 0 {
            /*
             * [RFC6541] 8.3.
             * fail: all valid DKIM signatures bearing an "atps" tag failed
             * to confirm a third-party authorization.
             */
            Some(Value::Fail)
        } else if atps_sig_num > 0 {
            // signatures bearing "atps" tags exist but none verified
            Some(Value::None)
        } else {
            None
        }
    }
}
