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

use super::record::{ReceiverPolicy, Record};
use vauth_common::domain_equals;

/// The DMARC verdict for one Author Domain.
#[serde_with::serde_as]
#[derive(Debug, Clone, serde::Serialize)]
pub struct Dmarc {
    pub value: vauth_common::dmarc::Value,
    /// the Author Domain the evaluation keyed on
    pub domain: String,
    // NOTE: wrapped in an Option if the query failed
    pub record: Option<Record>,
}

impl Dmarc {
    /// The disposition the Domain Owner requests for this message:
    /// `p=` when the Author Domain published the record itself, `sp=`
    /// (falling back to `p=`) when it came from the Organizational
    /// Domain. Only meaningful on `fail`.
    #[must_use]
    pub fn requested_disposition(&self) -> Option<ReceiverPolicy> {
        let record = self.record.as_ref()?;
        if domain_equals(&self.domain, &record.domain) {
            Some(record.receiver_policy)
        } else {
            Some(
                record
                    .subdomain_policy
                    .unwrap_or(record.receiver_policy),
            )
        }
    }
}
