//! Static registry of configured destinations.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{Destination, Protocol};

/// Registry error types.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid destination {0:?}: expected [proto://]host[:port][#label]")]
    InvalidSpec(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
    #[error("duplicate destination id: {0}")]
    DuplicateId(String),
    #[error("failed to read destinations file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid destinations file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Entry of a destinations file. Only the address is required.
#[derive(Debug, Deserialize)]
struct DestinationEntry {
    #[serde(default)]
    id: Option<String>,
    address: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    protocol: Option<Protocol>,
}

/// The fixed set of destinations every sample is sent to.
#[derive(Debug, Clone)]
pub struct DestinationRegistry {
    destinations: Arc<[Destination]>,
}

impl DestinationRegistry {
    /// Build a registry, rejecting duplicate ids.
    pub fn new(destinations: Vec<Destination>) -> Result<Self, RegistryError> {
        for (i, d) in destinations.iter().enumerate() {
            if destinations[..i].iter().any(|other| other.id == d.id) {
                return Err(RegistryError::DuplicateId(d.id.clone()));
            }
        }
        Ok(Self {
            destinations: destinations.into(),
        })
    }

    /// Parse a comma-separated list such as
    /// `udp://tracker-a.example.net:6001#primary, 10.0.0.7`.
    ///
    /// The protocol defaults to UDP, the port to the protocol's default and
    /// the label to `server-<n>` by position.
    pub fn parse_list(spec: &str) -> Result<Self, RegistryError> {
        let destinations = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, s)| parse_destination(s, i))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(destinations)
    }

    /// Load a JSON array of `{"id", "address", "port", "protocol"}` objects.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<DestinationEntry> = serde_json::from_str(&content)?;
        let destinations = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                let protocol = e.protocol.unwrap_or(Protocol::Udp);
                Destination::new(
                    e.id.unwrap_or_else(|| default_label(i)),
                    e.address,
                    e.port.unwrap_or_else(|| protocol.default_port()),
                    protocol,
                )
            })
            .collect();
        Self::new(destinations)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.destinations.iter().map(|d| d.id.clone()).collect()
    }
}

fn default_label(index: usize) -> String {
    format!("server-{}", index + 1)
}

fn parse_destination(spec: &str, index: usize) -> Result<Destination, RegistryError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?P<proto>(?i:udp|tcp|http))://)?(?P<host>\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9._-]+)(?::(?P<port>\d+))?(?:#(?P<label>[A-Za-z0-9._-]+))?$",
        )
        .unwrap()
    });

    let caps = re
        .captures(spec)
        .ok_or_else(|| RegistryError::InvalidSpec(spec.to_string()))?;

    let protocol = match caps.name("proto") {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| RegistryError::InvalidSpec(spec.to_string()))?,
        None => Protocol::Udp,
    };

    let port = match caps.name("port") {
        Some(m) => match m.as_str().parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return Err(RegistryError::InvalidPort(spec.to_string())),
        },
        None => protocol.default_port(),
    };

    let host = &caps["host"];
    let address = host.trim_start_matches('[').trim_end_matches(']');
    let id = caps
        .name("label")
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| default_label(index));

    Ok(Destination::new(id, address, port, protocol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_list() {
        let registry = DestinationRegistry::parse_list(
            "udp://tracker-a.example.net:6001#primary, 10.0.0.7, tcp://[::1]:7000, HTTP://relay.local",
        )
        .unwrap();

        assert_eq!(registry.len(), 4);
        let parsed: Vec<Destination> = registry.iter().cloned().collect();
        assert_eq!(
            parsed[0],
            Destination::udp("primary", "tracker-a.example.net", 6001)
        );
        assert_eq!(parsed[1], Destination::udp("server-2", "10.0.0.7", 6001));
        assert_eq!(
            parsed[2],
            Destination::new("server-3", "::1", 7000, Protocol::Tcp)
        );
        assert_eq!(
            parsed[3],
            Destination::new("server-4", "relay.local", 6000, Protocol::Http)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            DestinationRegistry::parse_list("ftp://host:21"),
            Err(RegistryError::InvalidSpec(_))
        ));
        assert!(matches!(
            DestinationRegistry::parse_list("host:99999"),
            Err(RegistryError::InvalidPort(_))
        ));
        assert!(matches!(
            DestinationRegistry::parse_list("host:0"),
            Err(RegistryError::InvalidPort(_))
        ));
        assert!(matches!(
            DestinationRegistry::parse_list("a.example#x, b.example#x"),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_empty_list() {
        let registry = DestinationRegistry::parse_list(" , ").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "berlin", "address": "203.0.113.10", "port": 6001}},
                {{"address": "tracker.example.org", "protocol": "tcp"}}
            ]"#
        )
        .unwrap();

        let registry = DestinationRegistry::from_json_file(file.path()).unwrap();
        assert_eq!(registry.ids(), vec!["berlin", "server-2"]);
        let second = registry.iter().nth(1).unwrap();
        assert_eq!(second.port, 6000);
        assert_eq!(second.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_from_bad_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            DestinationRegistry::from_json_file(file.path()),
            Err(RegistryError::Json(_))
        ));
    }
}
