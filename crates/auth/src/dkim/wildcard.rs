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

//! The one-wildcard glob of the obsolete `g=` granularity tag
//! (RFC 4871 §3.6.1).

use vauth_common::syntax::scan;

fn match_impl(pattern: &[u8], target: &[u8], accept_wildcard: bool) -> bool {
    let mut p = 0;
    let mut t = 0;
    while p < pattern.len() {
        let c = pattern[p];
        if c == b'*' {
            if accept_wildcard {
                // only the first '*' acts as a wildcard; try every split
                // of the remaining target
                p += 1;
                for split in (t..=target.len()).rev() {
                    if match_impl(&pattern[p..], &target[split..], false) {
                        return true;
                    }
                }
                return false;
            }
            // later occurrences are plain characters
            if target.get(t) != Some(&b'*') {
                return false;
            }
        } else if scan::is_atext(c) || c == b'.' {
            /*
             * compare case-sensitively: the local-part of a mailbox is
             * case-sensitive (RFC 5321 §2.4), and tag values are
             * case-sensitive unless stated otherwise (RFC 6376 §3.2).
             */
            if target.get(t) != Some(&c) {
                return false;
            }
        } else {
            // neither atext nor '.' can appear in key-g-tag-lpart
            return false;
        }
        p += 1;
        t += 1;
    }
    p == pattern.len() && t == target.len()
}

/// Compare `target` (the local-part of the AUID) against the `g=` pattern.
/// An empty pattern never matches any address.
#[must_use]
pub(super) fn match_pubkey_granularity(pattern: &str, target: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match_impl(pattern.as_bytes(), target.as_bytes(), true)
}
