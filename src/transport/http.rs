//! HTTP transport for receivers that only speak HTTP.

use std::time::{Duration, Instant};

use reqwest::header::{CONNECTION, CONTENT_TYPE};

use super::{resolve, SendReceipt, TransportError};
use crate::model::Destination;

/// POST the JSON body to `http://host:port/`.
///
/// The address is resolved up front so lookup failures are reported the same
/// way as for the socket transports. The connection is closed after the
/// exchange. Any non-2xx status is treated as a failed send.
pub async fn post_payload(
    client: &reqwest::Client,
    destination: &Destination,
    payload: &[u8],
    timeout: Duration,
) -> Result<SendReceipt, TransportError> {
    let url = format!("http://{}/", destination.authority());
    let start = Instant::now();

    tokio::time::timeout(timeout, resolve(destination))
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

    let remaining = timeout.saturating_sub(start.elapsed());
    if remaining.is_zero() {
        return Err(TransportError::Timeout(timeout));
    }

    let response = client
        .post(&url)
        .timeout(remaining)
        .header(CONTENT_TYPE, "application/json")
        .header(CONNECTION, "close")
        .body(payload.to_vec())
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Socket(e.to_string())
            }
        })?;

    let elapsed = start.elapsed();
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Socket(format!("server answered {}", status)));
    }

    let body = response
        .text()
        .await
        .ok()
        .filter(|b| !b.is_empty());

    Ok(SendReceipt {
        elapsed,
        response: body,
    })
}
