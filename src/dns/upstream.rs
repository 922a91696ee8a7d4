//! Upstream nameserver entries and their textual form.
//!
//! Upstreams are written as `domain=host[:port][/proto]`, e.g.
//! `corp.example.com=10.0.0.53/tcp` or `.=[2001:db8::53]:5353/udp6`.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use serde::Deserialize;

use super::name::DomainName;
use crate::error::ConfigError;

/// Port used when an upstream address does not name one.
pub const DEFAULT_PORT: u16 = 53;

/// How queries are carried to an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// One query datagram, one reply datagram.
    Datagram,
    /// A connection with 2-byte length framing.
    Stream,
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Datagram => "udp",
            Self::Stream => "tcp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family restriction carried by `udp4`/`tcp6` style protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl AddressFamily {
    const fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Any => "usable",
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        }
    }
}

/// A resolved routing entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub domain: DomainName,
    pub transport: Transport,
    pub address: SocketAddr,
}

impl Upstream {
    pub fn new(domain: impl Into<DomainName>, transport: Transport, address: SocketAddr) -> Self {
        Self {
            domain: domain.into(),
            transport,
            address,
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} upstream {} for {}",
            self.transport.as_str().to_uppercase(),
            self.address,
            self.domain
        )
    }
}

/// An upstream as configured, before its address is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "UpstreamTable")]
pub struct UpstreamSpec {
    pub domain: DomainName,
    /// `host:port` with the default port already applied.
    pub address: String,
    pub transport: Transport,
    pub family: AddressFamily,
}

/// TOML form of an upstream: `[[upstream]] domain / address / transport`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpstreamTable {
    domain: String,
    address: String,
    #[serde(default = "default_protocol")]
    transport: String,
}

fn default_protocol() -> String {
    Transport::Datagram.as_str().to_owned()
}

impl TryFrom<UpstreamTable> for UpstreamSpec {
    type Error = ConfigError;

    fn try_from(table: UpstreamTable) -> Result<Self, Self::Error> {
        Self::from_parts(&table.domain, &table.address, &table.transport)
    }
}

impl UpstreamSpec {
    fn from_parts(domain: &str, address: &str, protocol: &str) -> Result<Self, ConfigError> {
        if address.is_empty() {
            return Err(ConfigError::InvalidUpstream {
                value: format!("{domain}={address}/{protocol}"),
            });
        }

        let (transport, rest) = if let Some(rest) = protocol.strip_prefix("udp") {
            (Transport::Datagram, rest)
        } else if let Some(rest) = protocol.strip_prefix("tcp") {
            (Transport::Stream, rest)
        } else {
            return Err(ConfigError::UnsupportedProtocol {
                domain: domain.to_owned(),
                protocol: protocol.to_owned(),
            });
        };

        let family = match rest {
            "4" => AddressFamily::V4,
            "6" => AddressFamily::V6,
            _ => AddressFamily::Any,
        };

        Ok(Self {
            domain: DomainName::from_dotted(domain),
            address: with_default_port(address),
            transport,
            family,
        })
    }

    /// Resolve the address into an [`Upstream`].
    ///
    /// Host names are looked up once here; the first address of the
    /// requested family wins.
    pub fn resolve(&self) -> Result<Upstream, ConfigError> {
        let candidates = self
            .address
            .to_socket_addrs()
            .map_err(|source| ConfigError::Resolve {
                domain: self.domain.to_string(),
                address: self.address.clone(),
                source,
            })?;

        let address = candidates
            .into_iter()
            .find(|addr| self.family.accepts(addr))
            .ok_or_else(|| ConfigError::NoAddress {
                domain: self.domain.to_string(),
                address: self.address.clone(),
                family: self.family.name(),
            })?;

        Ok(Upstream {
            domain: self.domain.clone(),
            transport: self.transport,
            address,
        })
    }
}

impl FromStr for UpstreamSpec {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((domain, target)) = value.split_once('=') else {
            return Err(ConfigError::InvalidUpstream {
                value: value.to_owned(),
            });
        };

        let (address, protocol) = target
            .split_once('/')
            .unwrap_or((target, Transport::Datagram.as_str()));

        Self::from_parts(domain, address, protocol)
    }
}

/// Append `:53` unless the address already carries a port.
///
/// Bare IPv6 literals are bracketed first.
fn with_default_port(address: &str) -> String {
    if address.starts_with('[') {
        if address.contains("]:") {
            address.to_owned()
        } else {
            format!("{address}:{DEFAULT_PORT}")
        }
    } else {
        match address.matches(':').count() {
            0 => format!("{address}:{DEFAULT_PORT}"),
            1 => address.to_owned(),
            _ => format!("[{address}]:{DEFAULT_PORT}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_full_upstream() {
        let spec: UpstreamSpec = "corp.example.com=10.0.0.1:1053/tcp".parse().unwrap();
        assert_eq!(spec.domain.to_string(), "corp.example.com.");
        assert_eq!(spec.address, "10.0.0.1:1053");
        assert_eq!(spec.transport, Transport::Stream);
        assert_eq!(spec.family, AddressFamily::Any);
    }

    #[test]
    fn should_default_to_udp_and_port_53() {
        let spec: UpstreamSpec = ".=192.0.2.200".parse().unwrap();
        assert!(spec.domain.is_root());
        assert_eq!(spec.address, "192.0.2.200:53");
        assert_eq!(spec.transport, Transport::Datagram);
    }

    #[test]
    fn should_treat_empty_domain_as_root() {
        let spec: UpstreamSpec = "=192.0.2.1".parse().unwrap();
        assert!(spec.domain.is_root());
    }

    #[test]
    fn should_bracket_ipv6_literals() {
        assert_eq!(with_default_port("2001:db8::1"), "[2001:db8::1]:53");
        assert_eq!(with_default_port("[2001:db8::1]"), "[2001:db8::1]:53");
        assert_eq!(with_default_port("[2001:db8::1]:5353"), "[2001:db8::1]:5353");
        assert_eq!(with_default_port("ns.example.net"), "ns.example.net:53");
    }

    #[test]
    fn should_read_address_family_suffix() {
        let spec: UpstreamSpec = "a=127.0.0.1/udp6".parse().unwrap();
        assert_eq!(spec.family, AddressFamily::V6);
        let spec: UpstreamSpec = "a=127.0.0.1/tcp4".parse().unwrap();
        assert_eq!(spec.family, AddressFamily::V4);
        assert_eq!(spec.transport, Transport::Stream);
    }

    #[test]
    fn should_reject_missing_separator() {
        let err = "example.com".parse::<UpstreamSpec>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUpstream { .. }));
    }

    #[test]
    fn should_reject_empty_address() {
        let err = "example.com=/tcp".parse::<UpstreamSpec>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUpstream { .. }));
    }

    #[test]
    fn should_reject_unknown_protocol() {
        let err = "a=127.0.0.1/sctp".parse::<UpstreamSpec>().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedProtocol { .. }));
    }

    #[test]
    fn should_resolve_literal_address() {
        let upstream = "lan=127.0.0.1:5353/tcp"
            .parse::<UpstreamSpec>()
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(upstream.address, "127.0.0.1:5353".parse().unwrap());
        assert_eq!(upstream.to_string(), "TCP upstream 127.0.0.1:5353 for lan.");
    }

    #[test]
    fn should_fail_when_family_does_not_match() {
        let err = "a=127.0.0.1/udp6"
            .parse::<UpstreamSpec>()
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoAddress { family: "IPv6", .. }));
    }
}
