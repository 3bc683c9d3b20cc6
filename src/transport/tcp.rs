//! Raw TCP transport: connect, write the JSON body, close.

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{resolve, SendReceipt, TransportError};
use crate::model::Destination;

/// Write `payload` over a fresh stream with no framing.
pub async fn send_stream(
    destination: &Destination,
    payload: &[u8],
    timeout: Duration,
) -> Result<SendReceipt, TransportError> {
    let start = Instant::now();

    tokio::time::timeout(timeout, async {
        let mut stream = connect(destination).await?;
        stream
            .write_all(payload)
            .await
            .map_err(|e| TransportError::Socket(format!("failed to write: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::Socket(format!("failed to flush: {}", e)))?;
        stream
            .shutdown()
            .await
            .map_err(|e| TransportError::Socket(format!("failed to close: {}", e)))
    })
    .await
    .map_err(|_| TransportError::Timeout(timeout))??;

    Ok(SendReceipt {
        elapsed: start.elapsed(),
        response: None,
    })
}

/// Resolve and connect, then hang up without writing.
pub async fn probe_stream(
    destination: &Destination,
    timeout: Duration,
) -> Result<SendReceipt, TransportError> {
    let start = Instant::now();

    tokio::time::timeout(timeout, connect(destination))
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

    Ok(SendReceipt {
        elapsed: start.elapsed(),
        response: None,
    })
}

async fn connect(destination: &Destination) -> Result<TcpStream, TransportError> {
    let target = resolve(destination).await?;
    TcpStream::connect(target)
        .await
        .map_err(|e| TransportError::Socket(format!("failed to connect to {}: {}", target, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_stream_delivers_raw_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dest = Destination::new("tcp", "127.0.0.1", port, Protocol::Tcp);

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut body = Vec::new();
            conn.read_to_end(&mut body).await.unwrap();
            body
        });

        tokio_test::assert_ok!(send_stream(&dest, b"{\"lat\":1.0}", Duration::from_secs(2)).await);
        assert_eq!(server.await.unwrap(), b"{\"lat\":1.0}");
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        // The peer accepts but never reads, so the write backs up.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dest = Destination::new("tcp", "127.0.0.1", port, Protocol::Tcp);
        let peer = tokio::spawn(async move { listener.accept().await.unwrap() });

        let payload = vec![b'x'; 64 * 1024 * 1024];
        let result = send_stream(&dest, &payload, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))), "{:?}", result);

        drop(peer);
    }

    #[tokio::test]
    async fn test_refused_connection_is_error() {
        // Grab a free port, then close the listener so nothing is there.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dest = Destination::new("tcp", "127.0.0.1", port, Protocol::Tcp);
        let result = send_stream(&dest, b"{}", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Socket(_))), "{:?}", result);
    }
}
