//! Destination configuration entity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default port for datagram receivers.
pub const DEFAULT_UDP_PORT: u16 = 6001;
/// Default port for stream receivers.
pub const DEFAULT_TCP_PORT: u16 = 6000;

/// Wire protocol used to reach a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// One JSON datagram per sample.
    Udp,
    /// Raw JSON body over a short-lived stream.
    Tcp,
    /// JSON body POSTed over HTTP/1.1.
    Http,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Udp => DEFAULT_UDP_PORT,
            Protocol::Tcp | Protocol::Http => DEFAULT_TCP_PORT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            "http" => Ok(Protocol::Http),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// One configured remote endpoint. Never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Stable label used in status reporting.
    pub id: String,
    /// Hostname or literal IP. Hostnames are resolved on every attempt.
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Destination {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            protocol,
        }
    }

    #[cfg(test)]
    pub fn udp(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self::new(id, address, port, Protocol::Udp)
    }

    /// `host:port` form, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}://{})", self.id, self.protocol, self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!("UDP".parse::<Protocol>(), Ok(Protocol::Udp));
        assert_eq!("http".parse::<Protocol>(), Ok(Protocol::Http));
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Protocol::Udp.default_port(), 6001);
        assert_eq!(Protocol::Tcp.default_port(), 6000);
        assert_eq!(Protocol::Http.default_port(), 6000);
    }

    #[test]
    fn test_authority() {
        assert_eq!(Destination::udp("a", "10.0.0.1", 6001).authority(), "10.0.0.1:6001");
        assert_eq!(Destination::udp("b", "::1", 6001).authority(), "[::1]:6001");
        assert_eq!(
            Destination::udp("c", "tracker.example.net", 7000).to_string(),
            "c (udp://tracker.example.net:7000)"
        );
    }
}
