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

//! The per-message session: the milter glue feeds connection context,
//! envelope, headers and body chunks in wire order; the session drives the
//! evaluators in the prescribed sequence (SPF at envelope time, Sender ID
//! once the headers are in, DKIM over the streamed body, the policy layer
//! last) and aggregates everything into one [`ValidatedResult`].

use std::net::IpAddr;

use vauth_common::dns::Resolver;
use vauth_common::{HeaderList, Mailbox};

use crate::authres::AuthResult;
use crate::dkim::{
    AuthorPolicyResult, DkimVerificationPolicy, DkimVerificationResult, DkimVerifier,
};
use crate::dmarc::{self, Dmarc, DmarcInput};
use crate::spf::{self, SpfEvalPolicy, SpfEvaluator, SpfResult, SpfScope, SpfScore};
use crate::PublicSuffix;

/// Which methods the session runs and annotates.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub check_spf: bool,
    /// the historic Sender ID (PRA) check, off by default
    pub check_sender_id: bool,
    pub check_dkim: bool,
    /// ADSP (RFC 5617), off by default
    pub check_dkim_adsp: bool,
    pub check_dmarc: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_spf: true,
            check_sender_id: false,
            check_dkim: true,
            check_dkim_adsp: false,
            check_dmarc: true,
        }
    }
}

/// Everything the engine concluded about one message.
#[derive(Debug, serde::Serialize)]
pub struct ValidatedResult {
    pub spf: Option<SpfResult>,
    /// the SPF identity was the HELO fallback, not MAIL FROM
    pub spf_helo_context: bool,
    pub sender_id: Option<SpfResult>,
    /// header the PRA was taken from, lowercased
    pub sender_id_header: Option<String>,
    pub dkim: Option<Vec<DkimVerificationResult>>,
    /// per-Author ADSP/ATPS verdicts; empty when both are disabled
    pub author_policy: Vec<AuthorPolicyResult>,
    /// whether the `dkim-adsp` method was requested (the author-policy
    /// pass also runs for ATPS alone)
    pub adsp_enabled: bool,
    /// per-Author DMARC verdicts
    pub dmarc: Vec<Dmarc>,
    /// a local failure occurred somewhere; the caller may prefer to
    /// defer the message instead of annotating it
    pub system_error: bool,
}

/// One message's worth of engine state. Single-threaded by construction:
/// the host runs one session per message, policies are shared read-only.
pub struct MessageSession<'a> {
    config: &'a SessionConfig,
    spf_policy: &'a SpfEvalPolicy,
    dkim_policy: &'a DkimVerificationPolicy,
    psl: &'a dyn PublicSuffix,
    resolver: &'a dyn Resolver,

    client_ip: IpAddr,
    helo_domain: String,
    mail_from: Option<Mailbox>,
    headers: HeaderList,

    spf: Option<SpfResult>,
    spf_helo_context: bool,
    spf_authenticated_domain: Option<String>,
    sender_id: Option<SpfResult>,
    sender_id_header: Option<String>,
    verifier: Option<DkimVerifier<'a>>,
    system_error: bool,
}

impl<'a> MessageSession<'a> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a SessionConfig,
        spf_policy: &'a SpfEvalPolicy,
        dkim_policy: &'a DkimVerificationPolicy,
        psl: &'a dyn PublicSuffix,
        resolver: &'a dyn Resolver,
        client_ip: IpAddr,
        helo_domain: impl Into<String>,
        keep_leading_header_space: bool,
    ) -> Self {
        Self {
            config,
            spf_policy,
            dkim_policy,
            psl,
            resolver,
            client_ip,
            helo_domain: helo_domain.into(),
            mail_from: None,
            headers: HeaderList::new(keep_leading_header_space),
            spf: None,
            spf_helo_context: false,
            spf_authenticated_domain: None,
            sender_id: None,
            sender_id_header: None,
            verifier: None,
            system_error: false,
        }
    }

    fn spf_result(&mut self, evaluator: &SpfEvaluator<'_>, score: SpfScore) -> SpfResult {
        if score == SpfScore::SysError {
            self.system_error = true;
        }
        SpfResult {
            value: score.to_value(),
            domain: evaluator
                .sender()
                .map(|sender| sender.domain().to_string()),
            explanation: evaluator.explanation().map(str::to_string),
        }
    }

    /// MAIL FROM arrived: run the `spf1` scope (and remember the
    /// authenticated domain for DMARC alignment).
    pub fn set_envelope(&mut self, mail_from: Option<Mailbox>) {
        self.mail_from = mail_from;
        if !self.config.check_spf {
            return;
        }

        let mut evaluator = SpfEvaluator::new(self.spf_policy, self.resolver);
        evaluator.set_sender(self.mail_from.clone());
        evaluator.set_helo_domain(self.helo_domain.clone());
        evaluator.set_ip(self.client_ip);

        if let Some(score) = evaluator.eval(SpfScope::Spf1) {
            self.spf_helo_context = !evaluator.is_sender_context();
            if score == SpfScore::Pass {
                self.spf_authenticated_domain = evaluator
                    .sender()
                    .map(|sender| sender.domain().to_string());
            }
            let result = self.spf_result(&evaluator, score);
            self.spf = Some(result);
        }
    }

    /// One header field, in wire order.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// End of headers: select the PRA and run the `spf2.0/pra` scope when
    /// Sender ID is enabled, then set up the DKIM verification frames.
    pub fn begin_body(&mut self) {
        if self.config.check_sender_id {
            self.eval_sender_id();
        }
        if self.config.check_dkim {
            self.verifier = Some(DkimVerifier::new(
                self.dkim_policy,
                self.resolver,
                self.headers.clone(),
            ));
        }
    }

    fn eval_sender_id(&mut self) {
        let Some((index, pra_mailbox)) = spf::pra::extract(&self.headers) else {
            /*
             * [RFC4407] 2.
             * A message with a malformed or absent PRA cannot be
             * evaluated further: permerror.
             */
            self.sender_id = Some(SpfResult {
                value: vauth_common::spf::Value::PermError,
                domain: None,
                explanation: None,
            });
            return;
        };
        self.sender_id_header = self
            .headers
            .get(index)
            .map(|(name, _)| name.to_ascii_lowercase());

        let mut evaluator = SpfEvaluator::new(self.spf_policy, self.resolver);
        evaluator.set_sender(Some(pra_mailbox));
        evaluator.set_helo_domain(self.helo_domain.clone());
        evaluator.set_ip(self.client_ip);
        if let Some(score) = evaluator.eval(SpfScope::Spf2Pra) {
            let result = self.spf_result(&evaluator, score);
            self.sender_id = Some(result);
        }
    }

    /// A chunk of body octets, in wire order; tolerates any chunking.
    pub fn update_body(&mut self, chunk: &[u8]) {
        if let Some(verifier) = &mut self.verifier {
            verifier.update_body(chunk);
        }
    }

    /// End of message: settle the DKIM frames, then run the policy layer
    /// (DMARC needs the DKIM results), and aggregate.
    #[must_use]
    pub fn end_of_message(&mut self) -> ValidatedResult {
        let mut dkim_results = None;
        let mut author_policy = Vec::new();
        let mut verified_sdids: Vec<String> = Vec::new();

        if let Some(mut verifier) = self.verifier.take() {
            verifier.verify();
            if verifier.has_system_error() {
                self.system_error = true;
            }
            let results = verifier.results();
            verified_sdids = results
                .iter()
                .filter(|result| {
                    result.value == vauth_common::dkim::Value::Pass
                })
                .filter_map(|result| {
                    result
                        .signature
                        .as_ref()
                        .map(|signature| signature.sdid.clone())
                })
                .collect();

            if self.config.check_dkim_adsp || self.dkim_policy.enable_atps {
                author_policy = verifier.check_author_policy();
            }
            dkim_results = Some(results);
        }

        let dmarc = if self.config.check_dmarc {
            self.eval_dmarc(&verified_sdids)
        } else {
            Vec::new()
        };

        ValidatedResult {
            spf: self.spf.take(),
            spf_helo_context: self.spf_helo_context,
            sender_id: self.sender_id.take(),
            sender_id_header: self.sender_id_header.take(),
            dkim: dkim_results,
            author_policy,
            adsp_enabled: self.config.check_dkim_adsp,
            dmarc,
            system_error: self.system_error,
        }
    }

    fn eval_dmarc(&self, verified_sdids: &[String]) -> Vec<Dmarc> {
        let authors = match self.headers.extract_authors() {
            Ok(authors) => authors,
            Err(error) => {
                /*
                 * [RFC7489] 6.6.1.
                 * Messages with no or multiple RFC5322.From fields are
                 * outside the mechanism; report permerror.
                 */
                tracing::debug!(%error, "author extraction failed for dmarc");
                return vec![Dmarc {
                    value: vauth_common::dmarc::Value::PermError,
                    domain: String::new(),
                    record: None,
                }];
            }
        };

        let cap = self.dkim_policy.author_limit.unwrap_or(usize::MAX);
        authors
            .iter()
            .take(cap)
            .map(|author| {
                dmarc::verify(
                    &DmarcInput {
                        author_domain: author.domain(),
                        spf_authenticated_domain: self.spf_authenticated_domain.as_deref(),
                        dkim_verified_sdids: verified_sdids,
                    },
                    self.psl,
                    self.resolver,
                )
            })
            .collect()
    }
}

impl ValidatedResult {
    /// Render the `Authentication-Results` field body for this message.
    #[must_use]
    pub fn render_authentication_results(&self, authserv_id: &str) -> String {
        let mut authres = AuthResult::new(authserv_id);

        if let Some(spf) = &self.spf {
            authres.append_method("spf", spf.value);
            if let Some(explanation) = &spf.explanation {
                authres.append_comment(explanation);
            }
            if let Some(domain) = &spf.domain {
                let property = if self.spf_helo_context {
                    "helo"
                } else {
                    "mailfrom"
                };
                authres.append_property("smtp", property, domain);
            }
        }

        if let Some(sender_id) = &self.sender_id {
            authres.append_method("sender-id", sender_id.value);
            if let (Some(header), Some(domain)) = (&self.sender_id_header, &sender_id.domain) {
                authres.append_property("header", header, domain);
            }
        }

        if let Some(dkim) = &self.dkim {
            if dkim.is_empty() {
                // the message was not signed
                authres.append_method("dkim", vauth_common::dkim::Value::None);
            }
            for result in dkim {
                authres.append_method("dkim", result.value);
                if let Some(detail) = &result.detail {
                    authres.append_comment(detail);
                }
                if let Some(signature) = &result.signature {
                    authres.append_property("header", "d", &signature.sdid);
                    authres.append_property("header", "i", &signature.auid.to_addr_spec());
                    authres.append_property("header", "s", &signature.selector);
                    authres.append_property(
                        "header",
                        "a",
                        &signature.signing_algorithm.to_string(),
                    );
                    /*
                     * [RFC6008] 2.
                     * At least the first eight characters of the digital
                     * signature, long enough to be unique.
                     */
                    authres.append_property("header", "b", &signature.signature_prefix(8));
                }
            }
        }

        for policy in &self.author_policy {
            if self.adsp_enabled {
                authres.append_method("dkim-adsp", policy.adsp);
                if let Some(author) = &policy.author {
                    authres.append_property("header", "from", author.domain());
                }
            }
            if let Some(atps) = policy.atps {
                authres.append_method("dkim-atps", atps);
                if let Some(author) = &policy.author {
                    authres.append_property("header", "from", author.domain());
                }
            }
        }

        for dmarc in &self.dmarc {
            authres.append_method("dmarc", dmarc.value);
            if !dmarc.domain.is_empty() {
                authres.append_property("header", "from", &dmarc.domain);
            }
        }

        authres.into_value()
    }
}
