//! UDP datagram transport.
//!
//! Each call opens its own unconnected socket, sends exactly one datagram and
//! drops the socket on return, whichever path it returns by.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::net::UdpSocket;

use super::{resolve, SendReceipt, TransportError};
use crate::model::Destination;

/// Largest reply accepted in confirmation mode.
const MAX_REPLY: usize = 1500;

/// Send one datagram to `destination`.
///
/// `timeout` bounds resolution plus transmission. When `confirm` is set the
/// socket then waits that long for a reply; silence still counts as a
/// successful send since UDP offers no delivery guarantee.
pub async fn send_datagram(
    destination: &Destination,
    payload: &[u8],
    timeout: Duration,
    confirm: Option<Duration>,
) -> Result<SendReceipt, TransportError> {
    let start = Instant::now();

    let socket = tokio::time::timeout(timeout, async {
        let target = resolve(destination).await?;
        let socket = open_socket(target)?;
        let sent = socket
            .send_to(payload, target)
            .await
            .map_err(|e| TransportError::Socket(format!("failed to send: {}", e)))?;
        if sent != payload.len() {
            return Err(TransportError::Socket(format!(
                "short send: {} of {} bytes",
                sent,
                payload.len()
            )));
        }
        Ok(socket)
    })
    .await
    .map_err(|_| TransportError::Timeout(timeout))??;

    let elapsed = start.elapsed();

    let response = match confirm {
        Some(wait) => await_reply(&socket, wait).await,
        None => None,
    };

    Ok(SendReceipt { elapsed, response })
}

/// Resolve the destination and open a socket, sending nothing.
pub async fn probe_datagram(
    destination: &Destination,
    timeout: Duration,
) -> Result<SendReceipt, TransportError> {
    let start = Instant::now();

    tokio::time::timeout(timeout, async {
        let target = resolve(destination).await?;
        let socket = open_socket(target)?;
        // Connecting a datagram socket only checks the route.
        socket
            .connect(target)
            .await
            .map_err(|e| TransportError::Socket(format!("no route to {}: {}", target, e)))
    })
    .await
    .map_err(|_| TransportError::Timeout(timeout))??;

    Ok(SendReceipt {
        elapsed: start.elapsed(),
        response: None,
    })
}

/// Create a non-blocking datagram socket matching the target's address family.
fn open_socket(target: SocketAddr) -> Result<UdpSocket, TransportError> {
    let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(SockProtocol::UDP))
        .map_err(|e| TransportError::Socket(format!("failed to create socket: {}", e)))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::Socket(format!("failed to set non-blocking: {}", e)))?;

    let local: SocketAddr = if target.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    socket
        .bind(&local.into())
        .map_err(|e| TransportError::Socket(format!("failed to bind socket: {}", e)))?;

    UdpSocket::from_std(socket.into())
        .map_err(|e| TransportError::Socket(format!("failed to register socket: {}", e)))
}

async fn await_reply(socket: &UdpSocket, wait: Duration) -> Option<String> {
    let mut buf = [0u8; MAX_REPLY];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, from))) => {
            tracing::debug!("Received {} byte reply from {}", n, from);
            Some(String::from_utf8_lossy(&buf[..n]).into_owned())
        }
        Ok(Err(e)) => {
            tracing::debug!("Reply wait failed: {}", e);
            None
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn receiver() -> (UdpSocket, Destination) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, Destination::udp("local", "127.0.0.1", port))
    }

    #[tokio::test]
    async fn test_datagram_delivered() {
        let (rx, dest) = receiver().await;
        let payload = br#"{"lat":52.5,"lon":13.4,"time":1}"#;

        let receipt = send_datagram(&dest, payload, Duration::from_secs(2), None)
            .await
            .unwrap();
        assert!(receipt.response.is_none());

        let mut buf = [0u8; 256];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), rx.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], payload);
    }

    #[tokio::test]
    async fn test_confirmation_reply() {
        let (rx, dest) = receiver().await;

        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (_, from) = rx.recv_from(&mut buf).await.unwrap();
            rx.send_to(b"ACK", from).await.unwrap();
        });

        let receipt = send_datagram(&dest, b"{}", Duration::from_secs(2), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(receipt.response.as_deref(), Some("ACK"));
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_confirmation_silence_is_success() {
        let (_rx, dest) = receiver().await;

        let receipt = send_datagram(
            &dest,
            b"{}",
            Duration::from_secs(2),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert!(receipt.response.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_without_permission_errors() {
        // SO_BROADCAST is never set, so the kernel refuses the send.
        let dest = Destination::udp("bcast", "255.255.255.255", 6001);
        let result = send_datagram(&dest, b"{}", Duration::from_secs(2), None).await;
        assert!(matches!(result, Err(TransportError::Socket(_))), "{:?}", result);
    }

    #[tokio::test]
    async fn test_probe_loopback() {
        let (_rx, dest) = receiver().await;
        tokio_test::assert_ok!(probe_datagram(&dest, Duration::from_secs(1)).await);
    }
}
