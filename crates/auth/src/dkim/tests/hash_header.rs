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

use vauth_common::HeaderList;

use crate::dkim::digester::Digester;
use crate::dkim::{HashAlgorithm, PublicKey, Signature};

const SIG_VALUE: &str = " v=1; a=rsa-sha256; c=simple/simple; d=example.com; s=mail; \
t=1659541683; bh=Touenr7dUe0Mxv9r3OfnQ+GHpFRIdDa3Wa3TWnDOQKs=; \
h=Date:To:From:Subject:From; b=dzdVyOfAKCdL";

fn message() -> HeaderList {
    let mut headers = HeaderList::new(true);
    headers.append("Date", " Wed, 3 Aug 2022 17:48:03 +0200");
    headers.append("To", " jdoe@negabit.com");
    headers.append("From", " john <john.doe@example.com>");
    headers.append("Subject", " after dns update");
    headers.append("DKIM-Signature", SIG_VALUE);
    headers
}

#[ignore = "used for debugging with QNAME env var pointing at a live key record"]
#[test_log::test]
fn fetch_live_public_key() {
    let qname = option_env!("QNAME").unwrap();
    let txt_record = trust_dns_resolver::Resolver::default()
        .unwrap()
        .txt_lookup(dbg!(qname))
        .unwrap();
    let keys = txt_record
        .into_iter()
        .map(|record| record.to_string().parse::<PublicKey>());
    for key in keys {
        println!("{key:?}");
    }
}

#[test_log::test]
fn header_hash_selects_bottom_up_and_blanks_b() {
    let headers = message();
    let signature: Signature = SIG_VALUE.parse().unwrap();
    let digester = Digester::from_signature(&signature, true);

    // the h= walk picks Date, To, From, Subject; the second From finds no
    // remaining instance and contributes nothing; the signature header
    // itself comes last with its b= value blanked and no trailing CRLF
    let expected_input = concat!(
        "Date: Wed, 3 Aug 2022 17:48:03 +0200\r\n",
        "To: jdoe@negabit.com\r\n",
        "From: john <john.doe@example.com>\r\n",
        "Subject: after dns update\r\n",
        "DKIM-Signature: v=1; a=rsa-sha256; c=simple/simple; d=example.com; s=mail; ",
        "t=1659541683; bh=Touenr7dUe0Mxv9r3OfnQ+GHpFRIdDa3Wa3TWnDOQKs=; ",
        "h=Date:To:From:Subject:From; b="
    );

    let own_value = signature.raw_value_with_empty_b();
    assert!(expected_input.ends_with(&format!("DKIM-Signature:{own_value}")));

    let digest = digester.header_hash_for_signing(&headers, &signature, &own_value);
    assert_eq!(digest, HashAlgorithm::Sha256.hash(expected_input.as_bytes()));
}

#[test]
fn unsigned_headers_do_not_participate() {
    let mut with_noise = HeaderList::new(true);
    with_noise.append("Received", " from mta.example.net");
    with_noise.append("Date", " Wed, 3 Aug 2022 17:48:03 +0200");
    with_noise.append("X-Mailer", " something");
    with_noise.append("To", " jdoe@negabit.com");
    with_noise.append("From", " john <john.doe@example.com>");
    with_noise.append("Subject", " after dns update");
    with_noise.append("DKIM-Signature", SIG_VALUE);

    let signature: Signature = SIG_VALUE.parse().unwrap();
    let digester = Digester::from_signature(&signature, true);
    let own_value = signature.raw_value_with_empty_b();

    let plain = message();
    assert_eq!(
        digester.header_hash_for_signing(&plain, &signature, &own_value),
        digester.header_hash_for_signing(&with_noise, &signature, &own_value),
    );
}

#[test]
fn duplicate_instances_are_consumed_bottom_up() {
    // the bottom-most Subject is hashed, not the top one
    let mut doubled = message();
    let mut reordered = HeaderList::new(true);
    reordered.append("Subject", " the decoy");
    for (name, value) in doubled.iter() {
        reordered.append(name, value);
    }
    doubled = reordered;

    let signature: Signature = SIG_VALUE.parse().unwrap();
    let digester = Digester::from_signature(&signature, true);
    let own_value = signature.raw_value_with_empty_b();

    assert_eq!(
        digester.header_hash_for_signing(&message(), &signature, &own_value),
        digester.header_hash_for_signing(&doubled, &signature, &own_value),
    );
}
