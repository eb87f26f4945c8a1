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

/// Result values of the `dkim-adsp` method
/// (<https://datatracker.ietf.org/doc/html/rfc5617#section-5.4>).
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
pub enum Value {
    Pass,
    Unknown,
    Fail,
    Discard,
    NxDomain,
    TempError,
    PermError,
    None,
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn lexicon() {
        assert_eq!(Value::NxDomain.to_string(), "nxdomain");
        assert_eq!(Value::Discard.to_string(), "discard");
    }
}
