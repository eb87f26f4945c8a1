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

use std::net::IpAddr;

use vauth_common::dns::StaticResolver;
use vauth_common::Mailbox;

use crate::spf::macros::{expand_macro_string, ExpandError, MacroContext};

fn context<'a>(resolver: &'a StaticResolver, sender: &'a Mailbox, ip: IpAddr) -> MacroContext<'a> {
    MacroContext {
        sender,
        helo_domain: "mta.example.org",
        ip,
        domain: "email.example.com",
        checking_domain: Some("checker.example.org"),
        expansion_limit: 10240,
        max_ptr_names: 10,
        resolver,
    }
}

fn expand(input: &str, exp_record: bool) -> Result<String, ExpandError> {
    let resolver = StaticResolver::new();
    let sender = Mailbox::new("strong-bad", "email.example.com");
    let ctx = context(&resolver, &sender, IpAddr::from([192, 0, 2, 3]));
    let (out, consumed) = expand_macro_string(&ctx, input, exp_record)?;
    assert_eq!(consumed, input.len(), "whole input must be consumed: {input}");
    Ok(out)
}

// <https://datatracker.ietf.org/doc/html/rfc7208#section-7.4>
#[test]
fn rfc7208_simple_examples() {
    for (input, expected) in [
        ("%{s}", "strong-bad@email.example.com"),
        ("%{o}", "email.example.com"),
        ("%{d}", "email.example.com"),
        ("%{d4}", "email.example.com"),
        ("%{d3}", "email.example.com"),
        ("%{d2}", "example.com"),
        ("%{d1}", "com"),
        ("%{dr}", "com.example.email"),
        ("%{d2r}", "example.email"),
        ("%{l}", "strong-bad"),
        ("%{l-}", "strong.bad"),
        ("%{lr}", "strong-bad"),
        ("%{lr-}", "bad.strong"),
        ("%{l1r-}", "strong"),
        ("%{h}", "mta.example.org"),
    ] {
        pretty_assertions::assert_eq!(expand(input, false).unwrap(), expected, "{input}");
    }
}

#[test]
fn rfc7208_domain_spec_examples() {
    for (input, expected) in [
        ("%{ir}.%{v}._spf.%{d2}", "3.2.0.192.in-addr._spf.example.com"),
        ("%{lr-}.lp._spf.%{d2}", "bad.strong.lp._spf.example.com"),
        (
            "%{lr-}.lp.%{ir}.%{v}._spf.%{d2}",
            "bad.strong.lp.3.2.0.192.in-addr._spf.example.com",
        ),
        (
            "%{ir}.%{v}.%{l1r-}.lp._spf.%{d2}",
            "3.2.0.192.in-addr.strong.lp._spf.example.com",
        ),
        (
            "%{d2}.trusted-domains.example.net",
            "example.com.trusted-domains.example.net",
        ),
    ] {
        pretty_assertions::assert_eq!(expand(input, false).unwrap(), expected, "{input}");
    }
}

#[test]
fn ipv6_nibble_expansion() {
    let resolver = StaticResolver::new();
    let sender = Mailbox::new("strong-bad", "email.example.com");
    let ip: IpAddr = "2001:db8::cb01".parse().unwrap();
    let ctx = context(&resolver, &sender, ip);

    let (out, _) = expand_macro_string(&ctx, "%{ir}.%{v}._spf.%{d2}", false).unwrap();
    pretty_assertions::assert_eq!(
        out,
        "1.0.b.c.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6._spf.example.com"
    );

    let (out, _) = expand_macro_string(&ctx, "%{c}", true).unwrap();
    assert_eq!(out, "2001:db8::cb01");
    let (out, _) = expand_macro_string(&ctx, "%{C}", true).unwrap();
    assert_eq!(out, "2001%3adb8%3a%3acb01");
}

#[test]
fn literal_escapes() {
    assert_eq!(expand("%%and%_and%-", false).unwrap(), "%and and%20");
}

#[test]
fn exp_only_macros_are_scoped() {
    assert_eq!(expand("%{c}", false), Err(ExpandError::UnsupportedMacro));
    assert_eq!(expand("%{r}", true).unwrap(), "checker.example.org");
    assert!(expand("%{t}", true).unwrap().parse::<i64>().is_ok());
}

#[test]
fn syntax_violations() {
    assert_eq!(expand("%x", false), Err(ExpandError::Syntax));
    assert_eq!(expand("%{s", false), Err(ExpandError::Syntax));
    assert_eq!(expand("%{q}", false), Err(ExpandError::UnsupportedMacro));
    assert_eq!(
        expand("%{d..}", false),
        Err(ExpandError::DelimiterDuplicated)
    );
}

#[test]
fn expansion_size_limit() {
    let resolver = StaticResolver::new();
    let sender = Mailbox::new("strong-bad", "email.example.com");
    let mut ctx = context(&resolver, &sender, IpAddr::from([192, 0, 2, 3]));
    ctx.expansion_limit = 8;
    assert_eq!(
        expand_macro_string(&ctx, "%{d}", false),
        Err(ExpandError::ExpansionTooLong)
    );
}
