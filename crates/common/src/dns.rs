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

//! The resolver abstraction consumed by the engine.
//!
//! Every lookup is a blocking call; the engine performs no I/O of its own
//! and distinguishes the full response taxonomy, NXDOMAIN from NODATA
//! included, to honor the RFC-mandated result mappings.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// DNS error response codes the engine cares about (RCODE other than
/// NOERROR/NXDOMAIN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Rcode {
    FormErr,
    ServFail,
    NotImp,
    Refused,
    YxDomain,
    YxRrSet,
    NxRrSet,
    NotAuth,
    NotZone,
    #[strum(serialize = "RCODE")]
    Other(u16),
}

/// Exhaustive lookup outcome, so the engine's mapping switches stay total.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnsError {
    /// NOERROR with no records of the requested type.
    #[error("no data")]
    NoData,
    /// RCODE 3.
    #[error("host not found")]
    NxDomain,
    /// An answer was received but contained nothing usable.
    #[error("no valid answer")]
    NoValidAnswer,
    /// An error RCODE (SERVFAIL, REFUSED, ...).
    #[error("error response: {0}")]
    Rcode(Rcode),
    /// The resolver machinery failed (timeout, network unreachable, ...);
    /// transient by nature.
    #[error("resolver failure: {0}")]
    Resolver(String),
    /// A local system failure; mapped to the session-level system error.
    #[error("system error: {0}")]
    System(String),
}

impl DnsError {
    /// NODATA or NXDOMAIN, the two "void lookup" outcomes of RFC 7208.
    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::NoData | Self::NxDomain)
    }

    /// Transient failures that map to `temperror`.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Rcode(_) | Self::Resolver(_))
    }

    /// Local failures that map to the distinguished system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// One MX answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxExchange {
    pub preference: u16,
    pub exchange: String,
}

/// The synchronous resolver interface of the engine.
///
/// TXT answers are delivered as already-concatenated strings per RRset
/// entry. `lookup_mx` answers are sorted by preference. A success never
/// carries an empty answer list; implementations return
/// [`DnsError::NoData`] instead.
pub trait Resolver {
    fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
    fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError>;
    fn lookup_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsError>;
    fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
    /// The obsolete SPF RR (type 99). Implementations without support
    /// report NODATA, which makes the evaluator fall through to TXT.
    fn lookup_spf(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let _ = name;
        Err(DnsError::NoData)
    }
    fn lookup_ptr(&self, addr: IpAddr) -> Result<Vec<String>, DnsError>;
}

fn zone_key(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// A map-backed resolver for hermetic evaluation: every name resolves to a
/// pre-seeded outcome, unknown names are NXDOMAIN.
#[derive(Debug, Default)]
pub struct StaticResolver {
    a: HashMap<String, Result<Vec<Ipv4Addr>, DnsError>>,
    aaaa: HashMap<String, Result<Vec<Ipv6Addr>, DnsError>>,
    mx: HashMap<String, Result<Vec<MxExchange>, DnsError>>,
    txt: HashMap<String, Result<Vec<String>, DnsError>>,
    spf: HashMap<String, Result<Vec<String>, DnsError>>,
    ptr: HashMap<IpAddr, Result<Vec<String>, DnsError>>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn a(&mut self, name: &str, addrs: &[Ipv4Addr]) -> &mut Self {
        self.a.insert(zone_key(name), Ok(addrs.to_vec()));
        self
    }

    pub fn aaaa(&mut self, name: &str, addrs: &[Ipv6Addr]) -> &mut Self {
        self.aaaa.insert(zone_key(name), Ok(addrs.to_vec()));
        self
    }

    pub fn mx(&mut self, name: &str, exchanges: &[(u16, &str)]) -> &mut Self {
        self.mx.insert(
            zone_key(name),
            Ok(exchanges
                .iter()
                .map(|&(preference, exchange)| MxExchange {
                    preference,
                    exchange: exchange.to_string(),
                })
                .collect()),
        );
        self
    }

    pub fn txt(&mut self, name: &str, records: &[&str]) -> &mut Self {
        self.txt.insert(
            zone_key(name),
            Ok(records.iter().map(ToString::to_string).collect()),
        );
        self
    }

    pub fn txt_error(&mut self, name: &str, error: DnsError) -> &mut Self {
        self.txt.insert(zone_key(name), Err(error));
        self
    }

    pub fn a_error(&mut self, name: &str, error: DnsError) -> &mut Self {
        self.a.insert(zone_key(name), Err(error));
        self
    }

    pub fn spf(&mut self, name: &str, records: &[&str]) -> &mut Self {
        self.spf.insert(
            zone_key(name),
            Ok(records.iter().map(ToString::to_string).collect()),
        );
        self
    }

    pub fn ptr(&mut self, addr: IpAddr, names: &[&str]) -> &mut Self {
        self.ptr.insert(
            addr,
            Ok(names.iter().map(ToString::to_string).collect()),
        );
        self
    }

    fn fetch<T: Clone>(
        zone: &HashMap<String, Result<Vec<T>, DnsError>>,
        name: &str,
    ) -> Result<Vec<T>, DnsError> {
        match zone.get(&zone_key(name)) {
            Some(Ok(records)) if records.is_empty() => Err(DnsError::NoData),
            Some(outcome) => outcome.clone(),
            None => Err(DnsError::NxDomain),
        }
    }
}

impl Resolver for StaticResolver {
    fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        Self::fetch(&self.a, name)
    }

    fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError> {
        Self::fetch(&self.aaaa, name)
    }

    fn lookup_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsError> {
        Self::fetch(&self.mx, name)
    }

    fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        Self::fetch(&self.txt, name)
    }

    fn lookup_spf(&self, name: &str) -> Result<Vec<String>, DnsError> {
        match self.spf.get(&zone_key(name)) {
            Some(outcome) => outcome.clone(),
            // absence of the obsolete RR type is NODATA, not NXDOMAIN
            None => Err(DnsError::NoData),
        }
    }

    fn lookup_ptr(&self, addr: IpAddr) -> Result<Vec<String>, DnsError> {
        match self.ptr.get(&addr) {
            Some(outcome) => outcome.clone(),
            None => Err(DnsError::NxDomain),
        }
    }
}

mod live {
    use super::{DnsError, MxExchange, Rcode, Resolver};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};

    /// Blocking adapter over `trust-dns-resolver`.
    pub struct TrustDnsResolver {
        inner: trust_dns_resolver::Resolver,
    }

    fn map_response_code(code: trust_dns_proto::op::ResponseCode) -> DnsError {
        use trust_dns_proto::op::ResponseCode;
        match code {
            ResponseCode::NXDomain => DnsError::NxDomain,
            ResponseCode::NoError => DnsError::NoData,
            ResponseCode::FormErr => DnsError::Rcode(Rcode::FormErr),
            ResponseCode::ServFail => DnsError::Rcode(Rcode::ServFail),
            ResponseCode::NotImp => DnsError::Rcode(Rcode::NotImp),
            ResponseCode::Refused => DnsError::Rcode(Rcode::Refused),
            ResponseCode::YXDomain => DnsError::Rcode(Rcode::YxDomain),
            ResponseCode::YXRRSet => DnsError::Rcode(Rcode::YxRrSet),
            ResponseCode::NXRRSet => DnsError::Rcode(Rcode::NxRrSet),
            ResponseCode::NotAuth => DnsError::Rcode(Rcode::NotAuth),
            ResponseCode::NotZone => DnsError::Rcode(Rcode::NotZone),
            other => DnsError::Rcode(Rcode::Other(u16::from(other))),
        }
    }

    fn map_error(error: &ResolveError) -> DnsError {
        match error.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                map_response_code(*response_code)
            }
            ResolveErrorKind::Timeout => DnsError::Resolver("query timed out".to_string()),
            _ => DnsError::Resolver(error.to_string()),
        }
    }

    fn non_empty<T>(records: Vec<T>) -> Result<Vec<T>, DnsError> {
        if records.is_empty() {
            Err(DnsError::NoValidAnswer)
        } else {
            Ok(records)
        }
    }

    impl TrustDnsResolver {
        pub fn from_system_conf() -> Result<Self, DnsError> {
            trust_dns_resolver::Resolver::from_system_conf()
                .map(|inner| Self { inner })
                .map_err(|e| DnsError::System(e.to_string()))
        }
    }

    impl Resolver for TrustDnsResolver {
        fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
            let response = self.inner.ipv4_lookup(name).map_err(|e| map_error(&e))?;
            non_empty(response.iter().map(|a| a.0).collect())
        }

        fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError> {
            let response = self.inner.ipv6_lookup(name).map_err(|e| map_error(&e))?;
            non_empty(response.iter().map(|a| a.0).collect())
        }

        fn lookup_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsError> {
            let response = self.inner.mx_lookup(name).map_err(|e| map_error(&e))?;
            let mut exchanges = response
                .iter()
                .map(|mx| MxExchange {
                    preference: mx.preference(),
                    exchange: mx.exchange().to_utf8(),
                })
                .collect::<Vec<_>>();
            exchanges.sort_by_key(|mx| mx.preference);
            non_empty(exchanges)
        }

        fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
            let response = self.inner.txt_lookup(name).map_err(|e| map_error(&e))?;
            non_empty(
                response
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|part| String::from_utf8_lossy(part).into_owned())
                            .collect::<String>()
                    })
                    .collect(),
            )
        }

        fn lookup_ptr(&self, addr: IpAddr) -> Result<Vec<String>, DnsError> {
            let response = self.inner.reverse_lookup(addr).map_err(|e| map_error(&e))?;
            non_empty(response.iter().map(|ptr| ptr.0.to_utf8()).collect())
        }
    }
}

pub use live::TrustDnsResolver;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_outcomes() {
        let mut resolver = StaticResolver::new();
        resolver
            .txt("example.com", &["v=spf1 -all"])
            .txt_error("down.example.com", DnsError::Rcode(Rcode::ServFail));

        assert_eq!(
            resolver.lookup_txt("EXAMPLE.COM.").unwrap(),
            vec!["v=spf1 -all".to_string()]
        );
        assert_eq!(
            resolver.lookup_txt("other.example.com"),
            Err(DnsError::NxDomain)
        );
        assert!(resolver
            .lookup_txt("down.example.com")
            .unwrap_err()
            .is_temporary());
        assert_eq!(resolver.lookup_spf("example.com"), Err(DnsError::NoData));
    }
}
