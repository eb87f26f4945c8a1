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

//! The `check_host()` function of RFC 7208 §4, covering the Sender ID
//! scopes of RFC 4406 as well.

use std::net::IpAddr;

use ipnet::{Ipv4Net, Ipv6Net};
use vauth_common::dns::{DnsError, Resolver};
use vauth_common::syntax::scan;
use vauth_common::{domain_is_within, Mailbox};

use super::macros::{expand_explain_string, MacroContext};
use super::record::{self, MechanismKind, ModifierTerm, Record, Term};
use super::{SpfEvalPolicy, SpfScope, SpfScore};
use crate::spf::policy::SpfCustomAction;

const DEFAULT_LOCALPART: &str = "postmaster";
const DOMAIN_MAX_LENGTH: usize = 253;

static NULL_SENDER: Mailbox = Mailbox::null();

/// One `check_host()` evaluation tree: loop stack, DNS budgets and the
/// collected explanation all live here, never in globals.
pub struct SpfEvaluator<'a> {
    policy: &'a SpfEvalPolicy,
    resolver: &'a dyn Resolver,
    scope: SpfScope,
    sender: Option<Mailbox>,
    helo_domain: Option<String>,
    ip: Option<IpAddr>,
    is_sender_context: bool,
    domain_stack: Vec<String>,
    dns_mech_count: u32,
    void_lookup_count: u32,
    include_depth: u32,
    redirect_depth: u32,
    local_policy_mode: bool,
    explanation: Option<String>,
}

impl<'a> SpfEvaluator<'a> {
    #[must_use]
    pub fn new(policy: &'a SpfEvalPolicy, resolver: &'a dyn Resolver) -> Self {
        Self {
            policy,
            resolver,
            scope: SpfScope::Spf1,
            sender: None,
            helo_domain: None,
            ip: None,
            is_sender_context: false,
            domain_stack: Vec::new(),
            dns_mech_count: 0,
            void_lookup_count: 0,
            include_depth: 0,
            redirect_depth: 0,
            local_policy_mode: false,
            explanation: None,
        }
    }

    /// The `<sender>` identity. When absent (or the null reverse-path),
    /// `postmaster@<helo>` substitutes at evaluation time (RFC 7208 §4.3).
    pub fn set_sender(&mut self, sender: Option<Mailbox>) {
        self.sender = sender.filter(|mailbox| !mailbox.is_null());
    }

    pub fn set_helo_domain(&mut self, domain: impl Into<String>) {
        self.helo_domain = Some(domain.into());
    }

    pub fn set_ip(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
    }

    /// Whether the last evaluation keyed on the real MAIL FROM rather than
    /// the HELO fallback identity.
    #[must_use]
    pub const fn is_sender_context(&self) -> bool {
        self.is_sender_context
    }

    #[must_use]
    pub fn sender(&self) -> Option<&Mailbox> {
        self.sender.as_ref()
    }

    /// The expanded `exp=` text of a `fail`, when one was obtained.
    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    /// Run `check_host()` for the requested scope. `None` when the
    /// required arguments (client address, HELO domain) are not set.
    pub fn eval(&mut self, scope: SpfScope) -> Option<SpfScore> {
        self.scope = scope;
        self.dns_mech_count = 0;
        self.void_lookup_count = 0;
        self.include_depth = 0;
        self.redirect_depth = 0;
        self.local_policy_mode = false;
        self.domain_stack.clear();
        self.explanation = None;

        if self.ip.is_none() {
            return None;
        }
        let helo_domain = self.helo_domain.clone()?;
        if self.sender.is_none() {
            self.sender = Some(Mailbox::new(DEFAULT_LOCALPART, helo_domain));
            self.is_sender_context = false;
        } else {
            self.is_sender_context = true;
        }

        let domain = self
            .sender
            .as_ref()
            .map(|sender| sender.domain().to_string())?;
        Some(self.check_host(&domain, false))
    }

    const fn depth(&self) -> u32 {
        self.include_depth + self.redirect_depth
    }

    fn macro_context<'s>(&'s self, domain: &'s str) -> MacroContext<'s> {
        MacroContext {
            sender: self.sender.as_ref().unwrap_or(&NULL_SENDER),
            helo_domain: self.helo_domain.as_deref().unwrap_or_default(),
            ip: self.ip.unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            domain,
            checking_domain: self.policy.checking_domain.as_deref(),
            expansion_limit: self.policy.macro_expansion_limit,
            max_ptr_names: self.policy.max_ptrrr_per_ptrmech,
            resolver: self.resolver,
        }
    }

    /// Validate the `<domain>` argument (RFC 7208 §4.3) and check for an
    /// include/redirect loop.
    fn check_domain(&self, domain: &str) -> Option<SpfScore> {
        if domain.len() > DOMAIN_MAX_LENGTH {
            tracing::debug!(domain, "<domain> argument exceeds the DNS name bound");
            return Some(SpfScore::None);
        }
        let mut pos = 0;
        while pos < domain.len() {
            // character check at the same time; 2821-Domain would be too
            // strict here, atext labels are accepted
            let label = scan::atext_block(&domain[pos..]);
            if label == 0 {
                break;
            }
            if label > self.policy.max_label_len {
                tracing::debug!(
                    domain,
                    label_len = label,
                    "label length of <domain> argument exceeds its limit"
                );
                return Some(SpfScore::None);
            }
            pos += label;
            // <domain-spec> may end with '.' (dot, 0x2e)
            if scan::char1(&domain[pos..], b'.') == 0 {
                break;
            }
            pos += 1;
        }
        if pos != domain.len() {
            tracing::debug!(domain, "<domain> argument doesn't match domain-name");
            return Some(SpfScore::None);
        }

        if self
            .domain_stack
            .iter()
            .any(|seen| seen.eq_ignore_ascii_case(domain))
        {
            tracing::info!(domain, "spf evaluation loop detected");
            return Some(SpfScore::PermError);
        }
        None
    }

    fn check_host(&mut self, domain: &str, count_void: bool) -> SpfScore {
        if let Some(precondition) = self.check_domain(domain) {
            return precondition;
        }
        self.domain_stack.push(domain.to_string());
        let score = self.check_host_frame(domain, count_void);
        self.domain_stack.pop();
        score
    }

    fn check_host_frame(&mut self, domain: &str, count_void: bool) -> SpfScore {
        let record = match self.lookup_record(domain, count_void) {
            Ok(record) => record,
            Err(score) => return score,
        };

        if let Some(score) = self.eval_directives(&record.directives, domain) {
            /*
             * [RFC7208] 6.2.
             * During recursion into an "include" mechanism, an exp= modifier
             * from the <target-name> MUST NOT be used.  In contrast, when
             * executing a "redirect" modifier, an exp= modifier from the
             * original domain MUST NOT be used.
             */
            if self.policy.lookup_exp && score == SpfScore::Fail && self.include_depth == 0 {
                if let Some(exp) = &record.exp {
                    self.eval_mod_explanation(domain, exp);
                }
            }
            return score;
        }

        if let Some(redirect) = &record.redirect {
            tracing::debug!(from = domain, to = %redirect.query_domain, "redirect");
            return self.eval_mod_redirect(redirect);
        }

        if let Some(score) = self.eval_local_policy(domain) {
            if self.policy.lookup_exp && score == SpfScore::Fail && self.include_depth == 0 {
                if let Some(explanation) = self.policy.local_policy_explanation.clone() {
                    let expanded =
                        expand_explain_string(&self.macro_context(domain), &explanation).ok();
                    if expanded.is_some() {
                        self.explanation = expanded;
                    }
                }
            }
            return score;
        }

        /*
         * [RFC7208] 4.7.
         * If none of the mechanisms match and there is no "redirect"
         * modifier, then the check_host() returns a result of "neutral".
         */
        tracing::debug!(domain, "default score applied");
        SpfScore::Neutral
    }

    // record retrieval /////////////////////////////////////////////////

    fn count_void_lookup(&mut self, error: &DnsError) -> Result<(), SpfScore> {
        if !error.is_void() {
            return Ok(());
        }
        self.void_lookup_count += 1;
        if let Some(limit) = self.policy.void_lookup_limit {
            /*
             * [RFC7208] 4.6.4.
             * ... abort processing and return "permerror" as soon as more
             * than two "void lookups" have been encountered.
             */
            if self.void_lookup_count > limit {
                tracing::info!(limit, "void lookup limit exceeded");
                return Err(SpfScore::PermError);
            }
        }
        Ok(())
    }

    fn fetch(&mut self, domain: &str, count_void: bool) -> Result<Vec<String>, SpfScore> {
        if self.policy.lookup_spf_rr {
            match self.resolver.lookup_spf(domain) {
                /*
                 * [RFC4406] 4.4. / [RFC4408] 4.5.
                 * If any records of type SPF are in the set, then all
                 * records of type TXT are discarded.
                 */
                Ok(records) => return Ok(records),
                Err(DnsError::NoData | DnsError::NoValidAnswer) => {
                    // no SPF RR, fall back to TXT
                }
                Err(DnsError::NxDomain) => {
                    return Err(self.nxdomain_score());
                }
                Err(error) if error.is_temporary() => return Err(SpfScore::TempError),
                Err(_) => return Err(SpfScore::SysError),
            }
        }

        match self.resolver.lookup_txt(domain) {
            Ok(records) if records.is_empty() => Err(SpfScore::None),
            Ok(records) => Ok(records),
            Err(error @ DnsError::NoData) => {
                if count_void {
                    self.count_void_lookup(&error)?;
                }
                Err(SpfScore::None)
            }
            Err(DnsError::NoValidAnswer) => Err(SpfScore::None),
            Err(error @ DnsError::NxDomain) => {
                if count_void {
                    self.count_void_lookup(&error)?;
                }
                Err(self.nxdomain_score())
            }
            Err(error) if error.is_temporary() => Err(SpfScore::TempError),
            Err(_) => Err(SpfScore::SysError),
        }
    }

    /*
     * [RFC4406] 4.3.
     * When performing the PRA version of the test, if the DNS query
     * returns "non-existent domain" (RCODE 3), then check_host() exits
     * immediately with the result "Fail".
     */
    const fn nxdomain_score(&self) -> SpfScore {
        if self.scope.is_pra() {
            SpfScore::Fail
        } else {
            SpfScore::None
        }
    }

    fn lookup_record(&mut self, domain: &str, count_void: bool) -> Result<Record, SpfScore> {
        let texts = self.fetch(domain, count_void)?;

        let scoped: Vec<(u8, usize, &str)> = texts
            .iter()
            .filter_map(|text| {
                record::record_scope(text).map(|(mask, end)| (mask, end, text.as_str()))
            })
            .collect();

        let mut selected: Option<(u8, usize, &str)> = None;
        let requested = self.scope.mask();
        if requested & (record::SCOPE_SPF2_MFROM | record::SCOPE_SPF2_PRA) != 0 {
            for &candidate in &scoped {
                if candidate.0 & requested != 0 {
                    if selected.is_some() {
                        // multiple records for one scope
                        tracing::info!(domain, scope = %self.scope, "multiple spf2 records found");
                        return Err(SpfScore::PermError);
                    }
                    selected = Some(candidate);
                }
            }
        }
        // an SPF1 record serves SPF2 scopes that found no record of their
        // own (RFC 4406 §4.4 position 2)
        if selected.is_none() {
            for &candidate in &scoped {
                if candidate.0 & record::SCOPE_SPF1 != 0 {
                    if selected.is_some() {
                        tracing::info!(domain, "multiple spf1 records found");
                        return Err(SpfScore::PermError);
                    }
                    selected = Some(candidate);
                }
            }
        }
        let Some((_, scope_end, text)) = selected else {
            tracing::debug!(domain, scope = %self.scope, "no spf record found");
            return Err(SpfScore::None);
        };

        let parsed = {
            let context = self.macro_context(domain);
            Record::parse(&context, &text[scope_end..])
        };
        parsed.map_err(|error| {
            tracing::info!(domain, %error, "unusable spf record");
            SpfScore::PermError
        })
    }

    // mechanism evaluation /////////////////////////////////////////////

    fn increment_dns_mech_counter(&mut self) -> Result<(), SpfScore> {
        self.dns_mech_count += 1;
        if self.dns_mech_count <= self.policy.max_dns_mech {
            Ok(())
        } else {
            tracing::info!(
                limit = self.policy.max_dns_mech,
                domain = self.domain_stack.last().map_or("", String::as_str),
                "over the limit of mechanisms with dns lookup"
            );
            Err(SpfScore::PermError)
        }
    }

    fn eval_directives(&mut self, directives: &[Term], domain: &str) -> Option<SpfScore> {
        for (index, term) in directives.iter().enumerate() {
            if let Some(score) = self.eval_mechanism(term, domain) {
                tracing::debug!(domain, mech_no = index, %score, "mechanism match");
                return Some(score);
            }
            tracing::trace!(domain, mech_no = index, "mechanism not match");
        }
        None
    }

    fn eval_mechanism(&mut self, term: &Term, domain: &str) -> Option<SpfScore> {
        if term.involves_dns {
            if let Err(score) = self.increment_dns_mech_counter() {
                return Some(score);
            }
        }
        match term.kind {
            MechanismKind::All => self.eval_mech_all(term),
            MechanismKind::Include => self.eval_mech_include(term),
            MechanismKind::A => {
                let target = target_name(term, domain).to_string();
                self.eval_by_a_lookup(&target, term, true)
            }
            MechanismKind::Mx => self.eval_mech_mx(term, domain),
            MechanismKind::Ptr => self.eval_mech_ptr(term, domain),
            MechanismKind::Ip4 => self.eval_mech_ip4(term),
            MechanismKind::Ip6 => self.eval_mech_ip6(term),
            MechanismKind::Exists => self.eval_mech_exists(term),
        }
    }

    fn eval_mech_all(&self, term: &Term) -> Option<SpfScore> {
        use super::record::Qualifier;
        if let Some(action) = self.policy.plus_all_action {
            if term.qualifier == Qualifier::Plus {
                match action {
                    SpfCustomAction::Score(score) => return Some(score),
                    SpfCustomAction::Logging => {
                        tracing::info!(
                            domain = self.domain_stack.last().map_or("", String::as_str),
                            "found +all directive in SPF record"
                        );
                    }
                }
            }
        }
        Some(
            self.policy
                .overwrite_all_directive_score
                .unwrap_or_else(|| term.qualifier.score()),
        )
    }

    fn eval_mech_include(&mut self, term: &Term) -> Option<SpfScore> {
        let Some(target) = term.query_domain.clone() else {
            return Some(SpfScore::PermError);
        };
        self.include_depth += 1;
        let inner = self.check_host(&target, true);
        self.include_depth -= 1;
        /*
         * [RFC7208] 5.2.
         * recursive check_host() result  | "include" mechanism
         *   Pass                         | match
         *   Fail / SoftFail / Neutral    | not match
         *   TempError                    | throw TempError
         *   PermError / None             | throw PermError
         */
        match inner {
            SpfScore::Pass => Some(term.qualifier.score()),
            SpfScore::Fail | SpfScore::SoftFail | SpfScore::Neutral => None,
            SpfScore::TempError => Some(SpfScore::TempError),
            SpfScore::SysError => Some(SpfScore::SysError),
            _ => Some(SpfScore::PermError),
        }
    }

    fn eval_by_a_lookup(
        &mut self,
        query_domain: &str,
        term: &Term,
        count_void: bool,
    ) -> Option<SpfScore> {
        let ip = self.ip?;
        match ip {
            IpAddr::V4(client) => match self.resolver.lookup_a(query_domain) {
                Ok(answers) => answers
                    .iter()
                    .any(|&rr| {
                        Ipv4Net::new(rr, term.ip4_cidr)
                            .is_ok_and(|net| net.contains(&client))
                    })
                    .then(|| term.qualifier.score()),
                Err(error) => self.mech_lookup_error(&error, count_void),
            },
            IpAddr::V6(client) => match self.resolver.lookup_aaaa(query_domain) {
                Ok(answers) => answers
                    .iter()
                    .any(|&rr| {
                        Ipv6Net::new(rr, term.ip6_cidr)
                            .is_ok_and(|net| net.contains(&client))
                    })
                    .then(|| term.qualifier.score()),
                Err(error) => self.mech_lookup_error(&error, count_void),
            },
        }
    }

    /// Map a DNS failure during mechanism evaluation (RFC 7208 §5: NXDOMAIN
    /// continues as an empty answer, other errors throw TempError).
    fn mech_lookup_error(&mut self, error: &DnsError, count_void: bool) -> Option<SpfScore> {
        if count_void {
            if let Err(score) = self.count_void_lookup(error) {
                return Some(score);
            }
        }
        match error {
            DnsError::NoData | DnsError::NxDomain | DnsError::NoValidAnswer => None,
            error if error.is_temporary() => Some(SpfScore::TempError),
            _ => Some(SpfScore::SysError),
        }
    }

    fn eval_mech_mx(&mut self, term: &Term, domain: &str) -> Option<SpfScore> {
        let target = target_name(term, domain).to_string();
        let exchanges = match self.resolver.lookup_mx(&target) {
            Ok(exchanges) => exchanges,
            Err(error) => return self.mech_lookup_error(&error, true),
        };
        /*
         * [RFC7208] 5.4.
         * To prevent denial-of-service (DoS) attacks, the processing
         * limits defined in Section 4.6.4 MUST be followed.
         */
        let limit = exchanges.len().min(self.policy.max_mxrr_per_mxmech);
        for exchange in &exchanges[..limit] {
            if let Some(score) = self.eval_by_a_lookup(&exchange.exchange, term, false) {
                return Some(score);
            }
        }
        None
    }

    fn eval_mech_ptr(&mut self, term: &Term, domain: &str) -> Option<SpfScore> {
        let ip = self.ip?;
        let target = target_name(term, domain).to_string();
        let names = match self.resolver.lookup_ptr(ip) {
            Ok(names) => names,
            Err(error) => {
                /*
                 * [RFC4408] 5.5.
                 * If a DNS error occurs while doing the PTR RR lookup,
                 * then this mechanism fails to match.
                 */
                if let Err(score) = self.count_void_lookup(&error) {
                    return Some(score);
                }
                tracing::debug!(%ip, "ptr lookup failed, mechanism ignored");
                return None;
            }
        };

        let limit = names.len().min(self.policy.max_ptrrr_per_ptrmech);
        for name in &names[..limit] {
            let name = name.trim_end_matches('.');
            // checking the <target-name> suffix first saves the
            // validation lookup for names that cannot match anyway
            if !domain_is_within(&target, name) {
                continue;
            }
            match self.validate_ptr_name(ip, name) {
                1 => return Some(term.qualifier.score()),
                /*
                 * [RFC4408] 5.5.
                 * If a DNS error occurs while doing an A RR lookup, then
                 * that domain name is skipped and the search continues.
                 */
                _ => {}
            }
        }
        None
    }

    fn validate_ptr_name(&self, ip: IpAddr, name: &str) -> i8 {
        match ip {
            IpAddr::V4(v4) => match self.resolver.lookup_a(name) {
                Ok(addrs) => i8::from(addrs.contains(&v4)),
                Err(_) => -1,
            },
            IpAddr::V6(v6) => match self.resolver.lookup_aaaa(name) {
                Ok(addrs) => i8::from(addrs.contains(&v6)),
                Err(_) => -1,
            },
        }
    }

    fn eval_mech_ip4(&self, term: &Term) -> Option<SpfScore> {
        let Some(IpAddr::V4(client)) = self.ip else {
            return None;
        };
        let network = term.ip4?;
        Ipv4Net::new(network, term.ip4_cidr)
            .is_ok_and(|net| net.contains(&client))
            .then(|| term.qualifier.score())
    }

    fn eval_mech_ip6(&self, term: &Term) -> Option<SpfScore> {
        let Some(IpAddr::V6(client)) = self.ip else {
            return None;
        };
        let network = term.ip6?;
        Ipv6Net::new(network, term.ip6_cidr)
            .is_ok_and(|net| net.contains(&client))
            .then(|| term.qualifier.score())
    }

    fn eval_mech_exists(&mut self, term: &Term) -> Option<SpfScore> {
        let Some(target) = term.query_domain.as_deref() else {
            return Some(SpfScore::PermError);
        };
        let target = target.to_string();
        match self.resolver.lookup_a(&target) {
            Ok(answers) => (!answers.is_empty()).then(|| term.qualifier.score()),
            Err(error) => self.mech_lookup_error(&error, true),
        }
    }

    // modifiers ////////////////////////////////////////////////////////

    fn eval_mod_redirect(&mut self, term: &ModifierTerm) -> SpfScore {
        if let Err(score) = self.increment_dns_mech_counter() {
            return score;
        }
        self.redirect_depth += 1;
        let score = self.check_host(&term.query_domain.clone(), true);
        self.redirect_depth -= 1;
        /*
         * [RFC7208] 6.1.
         * ... with the exception that if no SPF record is found, or if the
         * <target-name> is malformed, the result is a "permerror".
         */
        if score == SpfScore::None {
            SpfScore::PermError
        } else {
            score
        }
    }

    /*
     * [RFC7208] 6.2.
     * If there are any DNS processing errors, or if no records are
     * returned, or if more than one record is returned, or if there are
     * syntax errors in the explanation string, then proceed as if no
     * "exp" modifier was given.
     */
    fn eval_mod_explanation(&mut self, domain: &str, term: &ModifierTerm) {
        let texts = match self.resolver.lookup_txt(&term.query_domain) {
            Ok(texts) => texts,
            Err(error) => {
                tracing::debug!(domain = %term.query_domain, %error, "exp lookup failed, ignored");
                return;
            }
        };
        if texts.len() != 1 {
            return;
        }
        let expanded = expand_explain_string(&self.macro_context(domain), &texts[0]).ok();
        if expanded.is_some() {
            self.explanation = expanded;
        }
    }

    // local policy /////////////////////////////////////////////////////

    /// Local-policy directives run only at the outermost frame, after the
    /// published record failed to conclude; their temp/perm errors are
    /// swallowed.
    fn eval_local_policy(&mut self, domain: &str) -> Option<SpfScore> {
        if self.depth() > 0 || self.local_policy_mode {
            return None;
        }
        let policy_text = self.policy.local_policy.clone()?;

        tracing::debug!(policy = %policy_text, "evaluating local policy");
        let parsed = {
            let context = self.macro_context(domain);
            Record::parse(&context, &policy_text)
        };
        let Ok(local_record) = parsed else {
            tracing::warn!(policy = %policy_text, "failed to build local policy record");
            return None;
        };

        // mechanisms seen while evaluating the published record do not
        // count against the local policy
        self.dns_mech_count = 0;
        self.local_policy_mode = true;
        let score = self.eval_directives(&local_record.directives, domain);
        self.local_policy_mode = false;

        match score {
            Some(SpfScore::PermError | SpfScore::TempError) => {
                tracing::debug!("ignoring local policy score");
                None
            }
            other => other,
        }
    }
}

fn target_name<'t>(term: &'t Term, domain: &'t str) -> &'t str {
    term.query_domain.as_deref().unwrap_or(domain)
}
