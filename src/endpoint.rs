//! Addressing value objects: an [`Endpoint`] is an (address, port, L3
//! family) triple, equivalent to a kernel sockaddr.
//!
//! IPv6 is modeled (`AddressFamily::V6`, `Endpoint::from_v6`) but the only
//! consumer of the family tag that matters for this revision is
//! [`crate::listener::Listener::bind_and_listen`], which rejects it.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::Error;

/// Layer-3 address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Layer-4 transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Protocol-name lookup used by the listener setup protocol. A real
    /// `getprotobyname(3)` call is unnecessary here: `std::net` socket
    /// construction never needs the numeric protocol value, so this is a
    /// plain name match instead.
    pub fn from_name(name: &str) -> Option<Transport> {
        match name {
            "TCP" => Some(Transport::Tcp),
            "UDP" => Some(Transport::Udp),
            _ => None,
        }
    }
}

/// An (address, port, family, transport) value. The family tag and the
/// address always agree by construction: there is no setter that could
/// desynchronize them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    addr: IpAddr,
    port: u16,
    transport: Transport,
}

impl Endpoint {
    /// IPv4 constructor from octets.
    pub fn from_octets(a: u8, b: u8, c: u8, d: u8, port: u16, transport: Transport) -> Endpoint {
        Endpoint {
            addr: IpAddr::V4(Ipv4Addr::new(a, b, c, d)),
            port,
            transport,
        }
    }

    /// IPv6 constructor from segments.
    pub fn from_v6(segments: [u16; 8], port: u16, transport: Transport) -> Endpoint {
        let [a, b, c, d, e, f, g, h] = segments;
        Endpoint {
            addr: IpAddr::V6(Ipv6Addr::new(a, b, c, d, e, f, g, h)),
            port,
            transport,
        }
    }

    /// Builds an endpoint from a kernel-boundary `SocketAddr`, as returned
    /// by `TcpStream::peer_addr`/`local_addr`.
    pub fn from_socket_addr(addr: SocketAddr, transport: Transport) -> Endpoint {
        Endpoint {
            addr: addr.ip(),
            port: addr.port(),
            transport,
        }
    }

    /// Parses `"ip:port"` (IPv4) or `"[ip]:port"` (IPv6) with an explicit
    /// transport, since the textual form alone doesn't carry layer-4
    /// information.
    pub fn parse(text: &str, transport: Transport) -> Result<Endpoint, Error> {
        let addr: SocketAddr = text
            .parse()
            .map_err(|_| Error::Addressing(format!("unparseable endpoint literal: {text}")))?;
        Ok(Endpoint::from_socket_addr(addr, transport))
    }

    pub fn family(&self) -> AddressFamily {
        match self.addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip(&self) -> IpAddr {
        self.addr
    }

    /// Raw kernel sockaddr for syscalls (`std::net` sockets consume this
    /// directly; there's no separate `sockaddr_in`/`sockaddr_in6` type to
    /// expose in safe Rust).
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Defaults to TCP; use [`Endpoint::parse`] to pick UDP explicitly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s, Transport::Tcp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_round_trips_through_display_and_from_str() {
        let e = Endpoint::from_octets(127, 0, 0, 1, 8080, Transport::Tcp);
        let text = e.to_string();
        let parsed: Endpoint = text.parse().unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn family_matches_constructed_variant() {
        let v4 = Endpoint::from_octets(10, 0, 0, 1, 1, Transport::Tcp);
        assert_eq!(v4.family(), AddressFamily::V4);

        let v6 = Endpoint::from_v6([0, 0, 0, 0, 0, 0, 0, 1], 8080, Transport::Tcp);
        assert_eq!(v6.family(), AddressFamily::V6);
    }

    #[test]
    fn unknown_transport_name_is_rejected() {
        assert_eq!(Transport::from_name("SCTP"), None);
        assert_eq!(Transport::from_name("TCP"), Some(Transport::Tcp));
        assert_eq!(Transport::from_name("UDP"), Some(Transport::Udp));
    }

    #[test]
    fn garbage_literal_is_an_addressing_error() {
        let err = Endpoint::parse("not-an-endpoint", Transport::Tcp).unwrap_err();
        match err {
            Error::Addressing(_) => {}
            other => panic!("expected Addressing error, got {other:?}"),
        }
    }
}
