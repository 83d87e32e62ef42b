//! Network endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// An (address, port) pair identifying a datagram source or destination.
///
/// Endpoints are plain values: they compare and hash by address and port,
/// so they can key per-destination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Endpoint {
    address: IpAddr,
    port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    #[must_use]
    pub fn new(address: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Create an IPv4 endpoint.
    #[must_use]
    pub const fn v4(address: Ipv4Addr, port: u16) -> Self {
        Self {
            address: IpAddr::V4(address),
            port,
        }
    }

    /// Get the address.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Get the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check if the address is in the IPv4 multicast range (224.0.0.0/4).
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        matches!(self.address, IpAddr::V4(addr) if addr.is_multicast())
    }

    /// Convert to a socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl From<(Ipv4Addr, u16)> for Endpoint {
    fn from((address, port): (Ipv4Addr, u16)) -> Self {
        Self::v4(address, port)
    }
}

impl From<(IpAddr, u16)> for Endpoint {
    fn from((address, port): (IpAddr, u16)) -> Self {
        Self::new(address, port)
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self::from)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl TryFrom<String> for Endpoint {
    type Error = std::net::AddrParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_endpoint_parse_and_display() {
        let endpoint: Endpoint = "239.255.0.1:8000".parse().unwrap();
        assert_eq!(endpoint.address(), IpAddr::V4(Ipv4Addr::new(239, 255, 0, 1)));
        assert_eq!(endpoint.port(), 8000);
        assert_eq!(endpoint.to_string(), "239.255.0.1:8000");
        assert!("not-an-endpoint".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_value_semantics() {
        let a = Endpoint::v4(Ipv4Addr::LOCALHOST, 9000);
        let b: Endpoint = SocketAddr::from(([127, 0, 0, 1], 9000)).into();
        assert_eq!(a, b);

        let mut per_destination = HashMap::new();
        per_destination.insert(a, 1);
        assert_eq!(per_destination.get(&b), Some(&1));
    }

    #[test]
    fn test_endpoint_multicast() {
        assert!(Endpoint::v4(Ipv4Addr::new(239, 255, 0, 1), 8000).is_multicast());
        assert!(Endpoint::v4(Ipv4Addr::new(224, 0, 0, 1), 8000).is_multicast());
        assert!(!Endpoint::v4(Ipv4Addr::new(10, 0, 0, 1), 8000).is_multicast());
        assert!(!Endpoint::new("::1".parse::<IpAddr>().unwrap(), 8000).is_multicast());
    }
}
