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

//! Purported Responsible Address selection (RFC 4407 §2).

use vauth_common::mailbox::{self, Mailbox};
use vauth_common::syntax::scan;
use vauth_common::HeaderList;

const RESENT_SENDER: &str = "Resent-Sender";
const RESENT_FROM: &str = "Resent-From";
const SENDER: &str = "Sender";
const FROM: &str = "From";

const RECEIVED: &str = "Received";
const RETURN_PATH: &str = "Return-Path";

fn lookup(headers: &HeaderList) -> Option<usize> {
    let (resent_sender_pos, _) = headers.non_empty_header_index(RESENT_SENDER);
    let (resent_from_pos, _) = headers.non_empty_header_index(RESENT_FROM);

    if let Some(resent_sender) = resent_sender_pos {
        if let Some(resent_from) = resent_from_pos {
            /*
             * [RFC4407] 2. step 1:
             * a Received or Return-Path header between an earlier
             * Resent-From and the Resent-Sender keeps the Resent-From as
             * the start of the resent block the PRA belongs to.
             */
            if resent_from < resent_sender {
                for index in resent_from + 1..resent_sender {
                    let (name, _) = headers.get(index)?;
                    if name.eq_ignore_ascii_case(RECEIVED) || name.eq_ignore_ascii_case(RETURN_PATH)
                    {
                        return Some(resent_from);
                    }
                }
            }
        }
        return Some(resent_sender);
    }

    if resent_from_pos.is_some() {
        return resent_from_pos;
    }

    let (sender_pos, multiple) = headers.non_empty_header_index(SENDER);
    if sender_pos.is_some() {
        if multiple {
            tracing::debug!("multiple Sender headers found");
            return None;
        }
        return sender_pos;
    }

    let (from_pos, multiple) = headers.non_empty_header_index(FROM);
    if from_pos.is_some() {
        if multiple {
            tracing::debug!("multiple From headers found");
            return None;
        }
        return from_pos;
    }

    tracing::debug!("no (Resent-)Sender/From header found");
    None
}

/// Select the header holding the purported responsible address and parse
/// its single mailbox.
///
/// Returns the selected header index and the mailbox; `None` when no
/// header qualifies or the selected one violates the mailbox syntax — the
/// caller reports that as a permanent failure of the `sender-id` method.
#[must_use]
pub fn extract(headers: &HeaderList) -> Option<(usize, Mailbox)> {
    let index = lookup(headers)?;
    let (name, value) = headers.get(index)?;

    let lead = scan::fws(value);
    let (parsed, consumed) = match mailbox::parse_5322_mailbox(&value[lead..]) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::info!(header = name, %error, "PRA header violates the mailbox format");
            return None;
        }
    };
    let rest = &value[lead + consumed..];
    if scan::fws(rest) == rest.len() {
        Some((index, parsed))
    } else {
        tracing::info!(header = name, "PRA header holds more than one mailbox");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::extract;
    use vauth_common::HeaderList;

    #[test]
    fn preference_order() {
        let mut headers = HeaderList::new(true);
        headers.append("From", " c@example.com");
        headers.append("Sender", " b@example.com");
        assert_eq!(extract(&headers).unwrap().1.local_part(), "b");

        let mut headers = HeaderList::new(true);
        headers.append("From", " c@example.com");
        assert_eq!(extract(&headers).unwrap().1.local_part(), "c");
    }

    #[test]
    fn resent_block_fixup() {
        // Resent-From wins because a Received header sits between it and
        // the later Resent-Sender
        let mut headers = HeaderList::new(true);
        headers.append("Resent-From", " a@example.com");
        headers.append("Received", " from mta.example.net");
        headers.append("Resent-Sender", " b@example.com");
        headers.append("From", " c@example.com");
        let (index, mailbox) = extract(&headers).unwrap();
        assert_eq!(index, 0);
        assert_eq!(mailbox.local_part(), "a");

        // without the trace header in between, Resent-Sender is preferred
        let mut headers = HeaderList::new(true);
        headers.append("Resent-From", " a@example.com");
        headers.append("Resent-Sender", " b@example.com");
        assert_eq!(extract(&headers).unwrap().1.local_part(), "b");
    }

    #[test]
    fn multiple_from_disqualifies() {
        let mut headers = HeaderList::new(true);
        headers.append("From", " a@example.com");
        headers.append("From", " b@example.com");
        assert!(extract(&headers).is_none());
    }

    #[test]
    fn empty_headers_are_skipped() {
        let mut headers = HeaderList::new(true);
        headers.append("Sender", " \t");
        headers.append("From", " c@example.com");
        assert_eq!(extract(&headers).unwrap().1.local_part(), "c");
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut headers = HeaderList::new(true);
        headers.append("From", " a@example.com, b@example.com");
        assert!(extract(&headers).is_none());
    }
}
