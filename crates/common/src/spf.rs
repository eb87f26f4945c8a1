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

/// Result values of the `spf` and `sender-id` methods
/// (<https://datatracker.ietf.org/doc/html/rfc8601#section-2.7.2>).
///
/// `policy` is produced when a local policy override (e.g. on a `+all`
/// directive) replaces the record's own verdict.
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
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
    Policy,
}

#[cfg(test)]
mod tests {
    use super::Value;
    use std::str::FromStr;

    #[test]
    fn lexicon() {
        assert_eq!(Value::SoftFail.to_string(), "softfail");
        assert_eq!(Value::from_str("permerror").unwrap(), Value::PermError);
    }
}
