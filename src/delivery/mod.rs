//! Delivery module: fans each location sample out to every destination.

mod publisher;
mod registry;
mod retry;

pub use publisher::*;
pub use registry::*;
pub use retry::*;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;

use crate::model::{LatencyBook, LatencySummary, LocationSample, ServerStatus};
use crate::transport::{NetworkMonitor, SendOutcome, Transport};

/// Delivery error types.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("all {attempts} attempts failed, last outcome: {last:?}")]
    AllRetriesExhausted { attempts: u32, last: SendOutcome },
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("sample rejected: coordinates or fix time implausible")]
    InvalidSample,
    #[error("failed to encode sample: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sends samples to all registered destinations concurrently and publishes
/// the resulting status.
pub struct Dispatcher {
    registry: DestinationRegistry,
    transport: Arc<dyn Transport>,
    network: Arc<dyn NetworkMonitor>,
    policy: RetryPolicy,
    publisher: StatusPublisher,
    latency: Arc<Mutex<LatencyBook>>,
}

impl Dispatcher {
    pub fn new(
        registry: DestinationRegistry,
        transport: Arc<dyn Transport>,
        network: Arc<dyn NetworkMonitor>,
        policy: RetryPolicy,
    ) -> Self {
        let publisher = StatusPublisher::new(ServerStatus::new(registry.ids(), Utc::now()));
        Self {
            registry,
            transport,
            network,
            policy,
            publisher,
            latency: Arc::new(Mutex::new(LatencyBook::new())),
        }
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn status(&self) -> ServerStatus {
        self.publisher.current()
    }

    pub fn latency_summary(&self) -> BTreeMap<String, LatencySummary> {
        match self.latency.lock() {
            Ok(book) => book.summary(),
            Err(poisoned) => poisoned.into_inner().summary(),
        }
    }

    /// Zero the round counters, keeping per-destination status.
    pub fn reset_counters(&self) -> ServerStatus {
        self.publisher.update(|s| s.reset_counters(Utc::now()))
    }

    /// Fails with `NetworkUnavailable` when the host has no usable network.
    pub async fn preflight(&self) -> Result<(), DeliveryError> {
        if self.network.is_available().await {
            Ok(())
        } else {
            Err(DeliveryError::NetworkUnavailable)
        }
    }

    /// Run one fan-out round for `sample`.
    ///
    /// Every destination is attempted in parallel and the round only
    /// completes once all of them have finished. Without a network the round
    /// publishes an all-disconnected status and performs no I/O.
    pub async fn dispatch(&self, sample: &LocationSample) -> Result<ServerStatus, DeliveryError> {
        if !sample.is_valid() {
            return Err(DeliveryError::InvalidSample);
        }

        if let Err(e) = self.preflight().await {
            tracing::warn!("Skipping round: {}", e);
            return Ok(self.publisher.update(|s| s.with_unreachable_round(Utc::now())));
        }

        let payload: Arc<[u8]> = sample.to_payload()?.into();

        let handles: Vec<_> = self
            .registry
            .iter()
            .cloned()
            .map(|destination| {
                let id = destination.id.clone();
                let transport = self.transport.clone();
                let policy = self.policy.clone();
                let payload = payload.clone();
                let handle = tokio::spawn(async move {
                    send_with_retry(transport.as_ref(), &destination, &payload, &policy).await
                });
                (id, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = match handle.await.map(Delivery::into_result) {
                Ok(Ok(outcome)) => {
                    if let Some(receipt) = outcome.receipt() {
                        self.record_latency(&id, receipt.elapsed);
                        if let Some(reply) = &receipt.response {
                            tracing::debug!("{}: receiver replied {:?}", id, reply);
                        }
                    }
                    outcome
                }
                Ok(Err(e)) => {
                    tracing::warn!("{}: undelivered, {}", id, e);
                    match e {
                        DeliveryError::AllRetriesExhausted { last, .. } => last,
                        other => SendOutcome::Error(other.to_string()),
                    }
                }
                Err(e) => {
                    tracing::error!("{}: send task failed: {}", id, e);
                    SendOutcome::Error(format!("send task failed: {}", e))
                }
            };
            outcomes.push((id, outcome));
        }

        let status = self.publisher.update(|s| s.with_round(&outcomes, Utc::now()));
        tracing::debug!(
            "Round complete: {}/{} destinations connected",
            status.active_connections_count(),
            status.destination_count()
        );
        Ok(status)
    }

    /// Probe every destination without sending sample data.
    ///
    /// Destinations show CONNECTING while the probes run. Round counters are
    /// left untouched.
    pub async fn probe_all(&self) -> ServerStatus {
        if let Err(e) = self.preflight().await {
            tracing::warn!("Skipping probe: {}", e);
            return self.publisher.update(|s| s.all_disconnected(Utc::now()));
        }

        let ids = self.registry.ids();
        self.publisher.update(|s| s.with_connecting(&ids, Utc::now()));

        let timeout = self.policy.attempt_timeout;
        let handles: Vec<_> = self
            .registry
            .iter()
            .cloned()
            .map(|destination| {
                let id = destination.id.clone();
                let transport = self.transport.clone();
                let handle = tokio::spawn(async move {
                    transport.test_connection(&destination, timeout).await
                });
                (id, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                tracing::error!("{}: probe task failed: {}", id, e);
                SendOutcome::Error(format!("probe task failed: {}", e))
            });
            outcomes.push((id, outcome));
        }

        self.publisher
            .update(|s| s.with_probe_results(&outcomes, Utc::now()))
    }

    fn record_latency(&self, id: &str, elapsed: std::time::Duration) {
        match self.latency.lock() {
            Ok(mut book) => book.record(id, elapsed),
            Err(poisoned) => poisoned.into_inner().record(id, elapsed),
        }
    }
}
