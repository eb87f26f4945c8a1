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

mod eval;
mod macros;
mod policy;
mod record;
pub mod pra;


pub use eval::SpfEvaluator;
pub use policy::{SpfCustomAction, SpfEvalPolicy};

/// The record scope requested for one evaluation (RFC 7208 `v=spf1`,
/// RFC 4406 `spf2.0/mfrom` and `spf2.0/pra`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
pub enum SpfScope {
    #[strum(serialize = "spf1")]
    Spf1,
    #[strum(serialize = "spf2.0/mfrom")]
    Spf2Mfrom,
    #[strum(serialize = "spf2.0/pra")]
    Spf2Pra,
}

impl SpfScope {
    pub(crate) const fn mask(self) -> u8 {
        match self {
            Self::Spf1 => record::SCOPE_SPF1,
            Self::Spf2Mfrom => record::SCOPE_SPF2_MFROM,
            Self::Spf2Pra => record::SCOPE_SPF2_PRA,
        }
    }

    const fn is_pra(self) -> bool {
        matches!(self, Self::Spf2Pra)
    }
}

/// The internal verdict of one `check_host()` run.
///
/// `SysError` never leaves the engine: it marks a local failure (resolver
/// bug, allocation) so the session can choose to defer, and maps to
/// `temperror` in the public result.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
    fake::Dummy,
)]
#[strum(serialize_all = "lowercase")]
pub enum SpfScore {
    None,
    Neutral,
    Pass,
    Policy,
    Fail,
    SoftFail,
    TempError,
    PermError,
    SysError,
}

impl SpfScore {
    /// Public result value, RFC 8601 lexicon.
    #[must_use]
    pub const fn to_value(self) -> vauth_common::spf::Value {
        use vauth_common::spf::Value;
        match self {
            Self::None => Value::None,
            Self::Neutral => Value::Neutral,
            Self::Pass => Value::Pass,
            Self::Policy => Value::Policy,
            Self::Fail => Value::Fail,
            Self::SoftFail => Value::SoftFail,
            Self::TempError | Self::SysError => Value::TempError,
            Self::PermError => Value::PermError,
        }
    }
}

/// The outcome of evaluating one SPF identity.
#[serde_with::serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpfResult {
    pub value: vauth_common::spf::Value,
    /// The domain the evaluation keyed on.
    /// Wrapped in an option to handle the case where EHLO/HELO is an
    /// ip4/ip6 literal and no domain can be verified.
    pub domain: Option<String>,
    /// Expanded `exp=` explanation attached to a `fail` verdict.
    pub explanation: Option<String>,
}
