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

use super::SpfScore;

const DEFAULT_MACRO_EXPANSION_LIMIT: usize = 10240;
const DEFAULT_MAX_DNS_MECH: u32 = 10;
const DEFAULT_MAX_MXRR_PER_MXMECH: usize = 10;
const DEFAULT_MAX_PTRRR_PER_PTRMECH: usize = 10;
const DEFAULT_VOID_LOOKUP_LIMIT: u32 = 2;
const DEFAULT_MAX_LABEL_LEN: usize = 63;

/// Action applied when a suspicious construct (a matching `+all`
/// directive) is encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpfCustomAction {
    /// Log the finding and keep the record's own verdict.
    Logging,
    /// Replace the verdict.
    Score(SpfScore),
}

/// Evaluation policy, built once at daemon startup and shared read-only
/// between messages.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpfEvalPolicy {
    /// Try the obsolete SPF RR (type 99) before TXT.
    pub lookup_spf_rr: bool,
    /// Fetch and expand the `exp=` explanation on `fail`.
    pub lookup_exp: bool,
    /// Value of the `%{r}` macro: the name of the host doing the checking.
    pub checking_domain: Option<String>,
    /// Local-policy directives evaluated when the published record did not
    /// conclude (RFC 7208 §6/appendix; only at the outermost frame).
    pub local_policy: Option<String>,
    /// Explanation macro-string attached to a `fail` produced by the
    /// local policy.
    pub local_policy_explanation: Option<String>,
    /// Upper bound on the byte size of a single macro expansion.
    pub macro_expansion_limit: usize,
    /// RFC 7208 §4.6.4: mechanisms that involve DNS per evaluation.
    pub max_dns_mech: u32,
    /// RFC 1035 label limit applied to the `<domain>` argument.
    pub max_label_len: usize,
    /// RFC 7208 §4.6.4: MX RRs inspected per `mx` mechanism.
    pub max_mxrr_per_mxmech: usize,
    /// RFC 7208 §5.5: PTR RRs inspected per `ptr` mechanism.
    pub max_ptrrr_per_ptrmech: usize,
    /// RFC 7208 §4.6.4: void lookups per evaluation; `None` is unlimited.
    pub void_lookup_limit: Option<u32>,
    /// What to do when a `+all` directive matches.
    pub plus_all_action: Option<SpfCustomAction>,
    /// Replace the score of any matching `all` directive.
    pub overwrite_all_directive_score: Option<SpfScore>,
}

impl Default for SpfEvalPolicy {
    fn default() -> Self {
        Self {
            lookup_spf_rr: false,
            lookup_exp: false,
            checking_domain: None,
            local_policy: None,
            local_policy_explanation: None,
            macro_expansion_limit: DEFAULT_MACRO_EXPANSION_LIMIT,
            max_dns_mech: DEFAULT_MAX_DNS_MECH,
            max_label_len: DEFAULT_MAX_LABEL_LEN,
            max_mxrr_per_mxmech: DEFAULT_MAX_MXRR_PER_MXMECH,
            max_ptrrr_per_ptrmech: DEFAULT_MAX_PTRRR_PER_PTRMECH,
            void_lookup_limit: Some(DEFAULT_VOID_LOOKUP_LIMIT),
            plus_all_action: None,
            overwrite_all_directive_score: None,
        }
    }
}
