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

use std::cell::Cell;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use vauth_common::dns::{DnsError, MxExchange, Resolver, StaticResolver};
use vauth_common::Mailbox;

use crate::spf::{SpfCustomAction, SpfEvalPolicy, SpfEvaluator, SpfScope, SpfScore};

fn evaluator<'a>(
    policy: &'a SpfEvalPolicy,
    resolver: &'a dyn Resolver,
    sender: &str,
    ip: &str,
) -> SpfEvaluator<'a> {
    let mut evaluator = SpfEvaluator::new(policy, resolver);
    let (local_part, domain) = sender.split_once('@').unwrap();
    evaluator.set_sender(Some(Mailbox::new(local_part, domain)));
    evaluator.set_helo_domain("mta.example.org");
    evaluator.set_ip(ip.parse().unwrap());
    evaluator
}

#[test_log::test]
fn pass_via_ip4_mechanism() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 ip4:192.0.2.0/24 -all"]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));
    assert!(spf.is_sender_context());

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "198.51.100.1");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
}

#[test]
fn permerror_via_include_loop() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 include:example.com -all"]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::PermError));
}

#[test]
fn permerror_via_dns_mechanism_budget() {
    // ten nested includes are within the budget, the eleventh
    // DNS-consuming mechanism trips it
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 include:n1.example.com -all"]);
    for hop in 1..10 {
        resolver.txt(
            &format!("n{hop}.example.com"),
            &[format!("v=spf1 include:n{}.example.com -all", hop + 1).as_str()],
        );
    }
    resolver.txt("n10.example.com", &["v=spf1 a -all"]);
    resolver.a("n10.example.com", &[Ipv4Addr::new(192, 0, 2, 10)]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::PermError));
}

#[test]
fn neutral_when_nothing_matches() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 ip4:203.0.113.0/24"]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Neutral));
}

#[test]
fn none_without_record() {
    let resolver = StaticResolver::new();
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::None));

    // a TXT RRset without any SPF record is "none" as well
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["some verification token"]);
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::None));
}

#[test]
fn temperror_on_dns_failure() {
    let mut resolver = StaticResolver::new();
    resolver.txt_error(
        "example.com",
        DnsError::Rcode(vauth_common::dns::Rcode::ServFail),
    );
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::TempError));
}

#[test]
fn syserror_stays_internal() {
    let mut resolver = StaticResolver::new();
    resolver.txt_error("example.com", DnsError::System("allocation".to_string()));
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    let score = spf.eval(SpfScope::Spf1).unwrap();
    assert_eq!(score, SpfScore::SysError);
    assert_eq!(score.to_value(), vauth_common::spf::Value::TempError);
}

#[test]
fn helo_identity_substitutes_missing_sender() {
    let mut resolver = StaticResolver::new();
    resolver.txt("mta.example.org", &["v=spf1 +all"]);
    let policy = SpfEvalPolicy::default();

    let mut spf = SpfEvaluator::new(&policy, &resolver);
    spf.set_sender(Some(Mailbox::null()));
    spf.set_helo_domain("mta.example.org");
    spf.set_ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)));
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));
    assert!(!spf.is_sender_context());
    assert_eq!(spf.sender().unwrap().local_part(), "postmaster");
}

#[test]
fn redirect_semantics() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 redirect=policy.example.net"]);
    resolver.txt("policy.example.net", &["v=spf1 -all"]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));

    // redirect to a domain without a record hardens "none" to "permerror"
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 redirect=missing.example.net"]);
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::PermError));
}

#[test]
fn explanation_is_fetched_on_fail() {
    let mut resolver = StaticResolver::new();
    resolver.txt(
        "example.com",
        &["v=spf1 -all exp=exp.example.com"],
    );
    resolver.txt("exp.example.com", &["%{i} is not allowed to send for %{o}"]);
    let policy = SpfEvalPolicy {
        lookup_exp: true,
        ..SpfEvalPolicy::default()
    };

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
    assert_eq!(
        spf.explanation(),
        Some("192.0.2.10 is not allowed to send for example.com")
    );

    // explanation failures are silent: two TXT records disable it
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 -all exp=exp.example.com"]);
    resolver.txt("exp.example.com", &["one", "two"]);
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
    assert_eq!(spf.explanation(), None);
}

#[test]
fn mx_mechanism() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 mx -all"]);
    resolver.mx("example.com", &[(10, "mx1.example.com"), (20, "mx2.example.com")]);
    resolver.a("mx1.example.com", &[Ipv4Addr::new(198, 51, 100, 7)]);
    resolver.a("mx2.example.com", &[Ipv4Addr::new(192, 0, 2, 10)]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));
}

#[test]
fn mx_inspection_is_capped() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 mx -all"]);
    let exchanges: Vec<(u16, String)> = (0..12)
        .map(|n| (n, format!("mx{n}.example.com")))
        .collect();
    let borrowed: Vec<(u16, &str)> = exchanges
        .iter()
        .map(|(preference, name)| (*preference, name.as_str()))
        .collect();
    resolver.mx("example.com", &borrowed);
    for (_, name) in &exchanges {
        resolver.a(name, &[Ipv4Addr::new(198, 51, 100, 7)]);
    }
    // the client address only shows up past the inspection cap
    resolver.a("mx11.example.com", &[Ipv4Addr::new(192, 0, 2, 10)]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
}

#[test]
fn ptr_mechanism_forward_confirms() {
    let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 ptr -all"]);
    resolver.ptr(ip, &["host.example.com.", "fake.example.net."]);
    resolver.a("host.example.com", &[Ipv4Addr::new(192, 0, 2, 10)]);
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));

    // a PTR name outside the target domain never matches, and a DNS error
    // on the reverse lookup makes the mechanism a no-match, not an error
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 ptr ip4:192.0.2.10"]);
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));
}

#[test]
fn exists_mechanism_and_void_budget() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 exists:%{ir}.sbl.example.org -all"]);
    resolver.a("10.2.0.192.sbl.example.org", &[Ipv4Addr::new(127, 0, 0, 2)]);
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));

    // the third void lookup exceeds the default budget of two
    let mut resolver = StaticResolver::new();
    resolver.txt(
        "example.com",
        &["v=spf1 exists:a.nx.example exists:b.nx.example exists:c.nx.example -all"],
    );
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::PermError));
}

#[test]
fn ip_only_records_are_hermetic() {
    struct Counting<'r> {
        inner: &'r StaticResolver,
        address_lookups: Cell<usize>,
    }
    impl Resolver for Counting<'_> {
        fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
            self.address_lookups.set(self.address_lookups.get() + 1);
            self.inner.lookup_a(name)
        }
        fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError> {
            self.address_lookups.set(self.address_lookups.get() + 1);
            self.inner.lookup_aaaa(name)
        }
        fn lookup_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsError> {
            self.address_lookups.set(self.address_lookups.get() + 1);
            self.inner.lookup_mx(name)
        }
        fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
            self.inner.lookup_txt(name)
        }
        fn lookup_ptr(&self, addr: IpAddr) -> Result<Vec<String>, DnsError> {
            self.address_lookups.set(self.address_lookups.get() + 1);
            self.inner.lookup_ptr(addr)
        }
    }

    let mut inner = StaticResolver::new();
    inner.txt(
        "example.com",
        &["v=spf1 ip4:203.0.113.0/24 ip6:2001:db8::/32 -all"],
    );
    let resolver = Counting {
        inner: &inner,
        address_lookups: Cell::new(0),
    };
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "2001:db8::1");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));
    assert_eq!(resolver.address_lookups.get(), 0);
}

#[test]
fn sender_id_scope_selection() {
    let mut resolver = StaticResolver::new();
    resolver.txt(
        "example.com",
        &["v=spf1 -all", "spf2.0/mfrom,pra ip4:192.0.2.0/24 -all"],
    );
    let policy = SpfEvalPolicy::default();

    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf2Mfrom), Some(SpfScore::Pass));
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
}

#[test]
fn sender_id_falls_back_to_spf1() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 ip4:192.0.2.0/24 -all"]);
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf2Pra), Some(SpfScore::Pass));
}

#[test]
fn pra_scope_hardens_nxdomain_to_fail() {
    let resolver = StaticResolver::new();
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@nowhere.example", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf2Pra), Some(SpfScore::Fail));
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::None));
}

#[test]
fn multiple_records_per_scope_are_permerror() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 -all", "v=spf1 +all"]);
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::PermError));
}

#[test]
fn spf_rr_suppresses_txt() {
    let mut resolver = StaticResolver::new();
    resolver.spf("example.com", &["v=spf1 +all"]);
    resolver.txt("example.com", &["v=spf1 -all"]);
    let policy = SpfEvalPolicy {
        lookup_spf_rr: true,
        ..SpfEvalPolicy::default()
    };
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));

    // without the policy switch the SPF RR is never consulted
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
}

#[test]
fn local_policy_applies_at_top_level_only() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 ip4:203.0.113.0/24"]);
    let policy = SpfEvalPolicy {
        local_policy: Some("ip4:192.0.2.0/24".to_string()),
        ..SpfEvalPolicy::default()
    };
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Pass));

    // a local-policy fail carries the configured explanation
    let policy = SpfEvalPolicy {
        local_policy: Some("-all".to_string()),
        local_policy_explanation: Some("blocked by local policy of %{r}".to_string()),
        checking_domain: Some("checker.example.org".to_string()),
        lookup_exp: true,
        ..SpfEvalPolicy::default()
    };
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
    assert_eq!(
        spf.explanation(),
        Some("blocked by local policy of checker.example.org")
    );
}

#[test]
fn plus_all_custom_action() {
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 +all"]);
    let policy = SpfEvalPolicy {
        plus_all_action: Some(SpfCustomAction::Score(SpfScore::Policy)),
        ..SpfEvalPolicy::default()
    };
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Policy));

    // "-all" is untouched by the +all action
    let mut resolver = StaticResolver::new();
    resolver.txt("example.com", &["v=spf1 -all"]);
    let mut spf = evaluator(&policy, &resolver, "user@example.com", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::Fail));
}

#[test]
fn malformed_domain_argument_is_none() {
    let resolver = StaticResolver::new();
    let policy = SpfEvalPolicy::default();
    let mut spf = evaluator(&policy, &resolver, "user@bad..domain", "192.0.2.10");
    assert_eq!(spf.eval(SpfScope::Spf1), Some(SpfScore::None));
}
