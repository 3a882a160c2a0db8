// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! `DnsServer` is the identity of a single upstream endpoint: its transport,
//! its health label, and its socket address. It is the unit everything else
//! in the workspace (workers, the sender's on-demand map, hosts groups)
//! keys off of.

use crate::error::{MatchError, Result};
use std::net::{IpAddr, SocketAddr};

/// Default port used when a server address omits one.
pub const DEFAULT_PORT: u16 = 53;

/// Transport used to reach an upstream resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Plain UDP datagrams.
    Udp,
    /// Length-prefixed TCP stream.
    Tcp,
}

/// Static trust label attached to an upstream.
///
/// `Trusted` is reserved for synthetic sources: the local hosts engine's
/// direct answers, and the named `[DNS Config]` groups a hosts rule routes
/// a query to (see `original_source/src/hosts/hosts.cc`, which constructs
/// those groups with this same label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Health {
    /// Transport believed uncorrupted (e.g. tunnelled).
    Healthy,
    /// Directly reachable resolver whose answers may be tampered with.
    Poisoned,
    /// Synthetic source: the hosts engine, or a hosts-dedicated group.
    Trusted,
}

/// An upstream endpoint. Equality and hashing are over `(health, transport,
/// addr)`, matching `std::hash<CrDNSServer>` in the original.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsServer {
    /// Health label used by the session state machine.
    pub health: Health,
    /// Transport to use when dialing this server.
    pub transport: Transport,
    /// Socket address of the upstream.
    pub addr: SocketAddr,
}

impl DnsServer {
    /// Build a server directly from its parts.
    pub fn new(health: Health, transport: Transport, addr: SocketAddr) -> Self {
        Self {
            health,
            transport,
            addr,
        }
    }

    /// Parse one `[(udp|tcp)://]A.B.C.D[:port]` (or bracketed IPv6) token.
    pub fn parse_one(token: &str, health: Health) -> Result<Self> {
        let token = token.trim();
        let (transport, rest) = if let Some(rest) = token.strip_prefix("udp://") {
            (Transport::Udp, rest)
        } else if let Some(rest) = token.strip_prefix("tcp://") {
            (Transport::Tcp, rest)
        } else {
            (Transport::Udp, token)
        };

        let addr = parse_addr(rest).ok_or_else(|| MatchError::InvalidServer(token.to_string()))?;
        Ok(Self::new(health, transport, addr))
    }

    /// Parse a comma-separated list of server tokens, all sharing `health`.
    pub fn parse_list(s: &str, health: Health) -> Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Self::parse_one(t, health))
            .collect()
    }
}

/// Parse `A.B.C.D[:port]`, `[v6]:port`, or a bare `v6addr`/`A.B.C.D`,
/// defaulting the port to 53.
fn parse_addr(s: &str) -> Option<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, DEFAULT_PORT));
    }
    // Bracketed IPv6 without a port: `[::1]`.
    if let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return Some(SocketAddr::new(ip, DEFAULT_PORT));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ipv4_defaults() {
        let s = DnsServer::parse_one("1.1.1.1", Health::Healthy).unwrap();
        assert_eq!(s.transport, Transport::Udp);
        assert_eq!(s.addr, "1.1.1.1:53".parse().unwrap());
    }

    #[test]
    fn parses_tcp_prefix_and_port() {
        let s = DnsServer::parse_one("tcp://9.9.9.9:5353", Health::Healthy).unwrap();
        assert_eq!(s.transport, Transport::Tcp);
        assert_eq!(s.addr, "9.9.9.9:5353".parse().unwrap());
    }

    #[test]
    fn parses_bracketed_ipv6_without_port() {
        let s = DnsServer::parse_one("udp://[2001:4860:4860::8888]", Health::Poisoned).unwrap();
        assert_eq!(s.addr.port(), 53);
        assert!(s.addr.is_ipv6());
    }

    #[test]
    fn parses_comma_separated_list() {
        let list = DnsServer::parse_list("1.1.1.1, tcp://9.9.9.9:53", Health::Healthy).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].transport, Transport::Tcp);
    }

    #[test]
    fn rejects_garbage() {
        assert!(DnsServer::parse_one("not-an-address", Health::Healthy).is_err());
    }

    #[test]
    fn equality_is_over_health_transport_addr() {
        let a = DnsServer::parse_one("1.1.1.1", Health::Healthy).unwrap();
        let b = DnsServer::parse_one("1.1.1.1", Health::Healthy).unwrap();
        let c = DnsServer::parse_one("1.1.1.1", Health::Poisoned).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
