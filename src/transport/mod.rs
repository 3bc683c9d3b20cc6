//! Transport module for delivering payloads.
//!
//! Supports UDP datagrams, raw TCP writes and HTTP POSTs. Every call owns
//! its socket for the duration of the attempt and is bounded by a timeout.

mod http;
mod tcp;
mod udp;

pub use http::*;
pub use tcp::*;
pub use udp::*;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Destination, Protocol};

/// Conservative UDP payload ceiling.
pub const DEFAULT_MAX_DATAGRAM: usize = 1024;

/// Ceiling for stream-based protocols.
pub const MAX_STREAM_PAYLOAD: usize = 64 * 1024;

/// Transport error types.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("address resolution failed: {0}")]
    AddressResolution(String),
    #[error("Data too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("socket error: {0}")]
    Socket(String),
}

/// Details of an accepted send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    /// Time from the start of the attempt until the payload was handed off.
    pub elapsed: Duration,
    /// Reply body, when confirmation was requested and one arrived.
    pub response: Option<String>,
}

/// Result of one attempt against one destination.
///
/// `Success` means the payload was handed to the OS, not that the server
/// received it.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Success(SendReceipt),
    Timeout,
    Error(String),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success(_))
    }

    pub fn receipt(&self) -> Option<&SendReceipt> {
        match self {
            SendOutcome::Success(receipt) => Some(receipt),
            _ => None,
        }
    }
}

impl From<TransportError> for SendOutcome {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => SendOutcome::Timeout,
            other => SendOutcome::Error(other.to_string()),
        }
    }
}

impl From<Result<SendReceipt, TransportError>> for SendOutcome {
    fn from(result: Result<SendReceipt, TransportError>) -> Self {
        match result {
            Ok(receipt) => SendOutcome::Success(receipt),
            Err(e) => e.into(),
        }
    }
}

/// Delivers one payload to one destination.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` once, with `timeout` bounding resolution and I/O.
    async fn send(&self, destination: &Destination, payload: &[u8], timeout: Duration) -> SendOutcome;

    /// Reachability heuristic: resolves the address and opens a socket.
    ///
    /// A success here is not proof that anything is listening on the other
    /// end; for UDP nothing is sent at all.
    async fn test_connection(&self, destination: &Destination, timeout: Duration) -> SendOutcome;

    /// Largest payload `send` will attempt for `protocol`.
    fn max_payload(&self, _protocol: Protocol) -> usize {
        usize::MAX
    }
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// UDP payload ceiling in bytes.
    pub max_datagram: usize,
    /// When set, wait this long for a reply datagram after each UDP send.
    pub confirm_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_datagram: DEFAULT_MAX_DATAGRAM,
            confirm_timeout: None,
        }
    }
}

/// Production transport backed by real sockets.
pub struct NetTransport {
    config: TransportConfig,
    http: reqwest::Client,
}

impl NetTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn send(&self, destination: &Destination, payload: &[u8], timeout: Duration) -> SendOutcome {
        // Fail fast before any socket exists.
        let limit = self.max_payload(destination.protocol);
        if payload.len() > limit {
            return TransportError::PayloadTooLarge {
                size: payload.len(),
                limit,
            }
            .into();
        }

        let result = match destination.protocol {
            Protocol::Udp => {
                send_datagram(destination, payload, timeout, self.config.confirm_timeout).await
            }
            Protocol::Tcp => send_stream(destination, payload, timeout).await,
            Protocol::Http => post_payload(&self.http, destination, payload, timeout).await,
        };
        result.into()
    }

    async fn test_connection(&self, destination: &Destination, timeout: Duration) -> SendOutcome {
        let result = match destination.protocol {
            Protocol::Udp => probe_datagram(destination, timeout).await,
            Protocol::Tcp | Protocol::Http => probe_stream(destination, timeout).await,
        };
        result.into()
    }

    fn max_payload(&self, protocol: Protocol) -> usize {
        match protocol {
            Protocol::Udp => self.config.max_datagram,
            Protocol::Tcp | Protocol::Http => MAX_STREAM_PAYLOAD,
        }
    }
}

/// Resolve a destination to a socket address.
///
/// Literal IPs skip DNS. Hostnames are looked up on every call since they
/// may point at dynamic DNS records.
pub async fn resolve(destination: &Destination) -> Result<SocketAddr, TransportError> {
    let host = destination.address.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(TransportError::AddressResolution(format!(
            "invalid address {:?}",
            destination.address
        )));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return routable(SocketAddr::new(ip, destination.port));
    }

    let addr = tokio::net::lookup_host((host, destination.port))
        .await
        .map_err(|e| TransportError::AddressResolution(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| TransportError::AddressResolution(format!("no addresses found for {}", host)))?;
    routable(addr)
}

fn routable(addr: SocketAddr) -> Result<SocketAddr, TransportError> {
    if addr.ip().is_unspecified() || addr.port() == 0 {
        return Err(TransportError::AddressResolution(format!(
            "{} is not a routable address",
            addr
        )));
    }
    Ok(addr)
}

/// Pre-flight check for basic network availability.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn is_available(&self) -> bool;
}

/// Asks the routing table whether a public address is reachable.
///
/// Connecting a UDP socket sends nothing; it only fails when the kernel has
/// no route for the target.
pub struct RouteCheck {
    target: SocketAddr,
}

impl RouteCheck {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for RouteCheck {
    fn default() -> Self {
        Self::new(SocketAddr::from(([8, 8, 8, 8], 53)))
    }
}

#[async_trait]
impl NetworkMonitor for RouteCheck {
    async fn is_available(&self) -> bool {
        let bind: SocketAddr = if self.target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let connected = match tokio::net::UdpSocket::bind(bind).await {
            Ok(socket) => socket.connect(self.target).await,
            Err(e) => Err(e),
        };
        match connected {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Route check to {} failed: {}", self.target, e);
                false
            }
        }
    }
}
