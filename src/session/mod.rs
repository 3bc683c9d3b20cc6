//! Tracking session controller.
//!
//! Owns the start/stop lifecycle and wires a [`SampleProducer`] to the
//! [`Dispatcher`]: every sample emitted while active triggers one fan-out
//! round.

mod permissions;
mod producer;

pub use permissions::*;
pub use producer::*;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::delivery::{DeliveryError, Dispatcher};
use crate::model::{now_millis, LocationSample, ServerStatus, StatusReport};

/// Rounds allowed in flight at once before new samples are skipped.
const MAX_ROUNDS_IN_FLIGHT: usize = 4;

/// Session error types.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("permission denied: missing {0:?}")]
    PermissionDenied(Vec<Permission>),
    #[error("no destinations configured")]
    NoDestinations,
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sample_interval: Duration,
    /// Consecutive failed rounds before connectivity loss is reported.
    pub loss_warning_rounds: u32,
    /// Status older than this is flagged stale.
    pub stale_after: Duration,
    /// Fallback position for diagnostic sends when no fix is available.
    pub origin: (f64, f64),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(3),
            loss_warning_rounds: 3,
            stale_after: Duration::from_secs(30),
            origin: (52.52, 13.405),
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    /// Duration of the running session, or of the last one once stopped.
    pub duration_secs: Option<f64>,
    pub rounds_dispatched: u64,
    pub rounds_skipped: u64,
    pub samples_rejected: u64,
}

#[derive(Default)]
struct Counters {
    rounds_dispatched: AtomicU64,
    rounds_skipped: AtomicU64,
    samples_rejected: AtomicU64,
    loss_warned: AtomicBool,
}

struct Inner {
    state: SessionState,
    cancel: Option<CancellationToken>,
    consumer: Option<JoinHandle<()>>,
    started_at: Option<DateTime<Utc>>,
    last_duration: Option<ChronoDuration>,
}

/// Controls one tracking session at a time.
pub struct TrackingSession {
    dispatcher: Arc<Dispatcher>,
    producer: Arc<dyn SampleProducer>,
    permissions: Arc<dyn PermissionGate>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    counters: Arc<Counters>,
}

impl TrackingSession {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        producer: Arc<dyn SampleProducer>,
        permissions: Arc<dyn PermissionGate>,
        config: SessionConfig,
    ) -> Self {
        Self {
            dispatcher,
            producer,
            permissions,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                cancel: None,
                consumer: None,
                started_at: None,
                last_duration: None,
            }),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Start tracking. Succeeds without side effects when already active.
    pub async fn start_tracking(&self) -> Result<SessionSnapshot, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Active {
            return Ok(self.snapshot_of(&inner));
        }

        inner.state = SessionState::Starting;

        let missing = self.permissions.missing();
        if !missing.is_empty() {
            inner.state = SessionState::Idle;
            tracing::warn!("Session: cannot start, missing permissions {:?}", missing);
            return Err(SessionError::PermissionDenied(missing));
        }
        if self.dispatcher.registry().is_empty() {
            inner.state = SessionState::Idle;
            return Err(SessionError::NoDestinations);
        }

        let cancel = CancellationToken::new();
        let rx = self
            .producer
            .subscribe(self.config.sample_interval, cancel.clone());

        let consumer = tokio::spawn(run_session_loop(
            rx,
            self.dispatcher.clone(),
            cancel.clone(),
            self.counters.clone(),
            self.config.loss_warning_rounds,
        ));

        inner.cancel = Some(cancel);
        inner.consumer = Some(consumer);
        inner.started_at = Some(Utc::now());
        inner.last_duration = None;
        inner.state = SessionState::Active;

        tracing::info!(
            "Session: tracking started, {} destinations every {:?}",
            self.dispatcher.registry().len(),
            self.config.sample_interval
        );
        Ok(self.snapshot_of(&inner))
    }

    /// Stop tracking. Rounds already in flight run to completion.
    pub async fn stop_tracking(&self) -> SessionSnapshot {
        let consumer = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Active {
                return self.snapshot_of(&inner);
            }
            inner.state = SessionState::Stopping;
            if let Some(cancel) = inner.cancel.take() {
                cancel.cancel();
            }
            inner.consumer.take()
        };

        // Observers may read the snapshot while the loop winds down.
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                tracing::error!("Session: consumer task failed: {}", e);
            }
        }

        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Stopping {
            // Restarted while the old loop was exiting.
            return self.snapshot_of(&inner);
        }
        inner.last_duration = inner.started_at.map(|t| Utc::now() - t);
        inner.state = SessionState::Idle;

        tracing::info!(
            "Session: tracking stopped after {:.1}s",
            inner
                .last_duration
                .map(|d| d.num_milliseconds() as f64 / 1000.0)
                .unwrap_or_default()
        );
        self.snapshot_of(&inner)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        self.snapshot_of(&inner)
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.state == SessionState::Active
    }

    /// Current aggregate with derived figures.
    pub fn status(&self) -> StatusReport {
        StatusReport::new(
            self.dispatcher.status(),
            ChronoDuration::from_std(self.config.stale_after).unwrap_or_else(|_| ChronoDuration::days(1)),
            self.config.loss_warning_rounds,
            Utc::now(),
        )
    }

    /// Probe all destinations without sending location data.
    pub async fn test_all_destinations(&self) -> ServerStatus {
        self.dispatcher.probe_all().await
    }

    /// Dispatch the latest fix (or the origin when none is valid) once.
    pub async fn send_diagnostic_sample(&self) -> Result<ServerStatus, SessionError> {
        let now = now_millis();
        let sample = self
            .producer
            .current_sample()
            .filter(|s| s.is_valid_at(now))
            .unwrap_or_else(|| {
                let (lat, lon) = self.config.origin;
                LocationSample::new(lat, lon, now).with_provider("diagnostic")
            })
            .refreshed(now);

        let status = self.dispatcher.dispatch(&sample).await?;
        tracing::info!(
            "Session: diagnostic sample reached {}/{} destinations",
            status.active_connections_count(),
            status.destination_count()
        );
        Ok(status)
    }

    fn snapshot_of(&self, inner: &Inner) -> SessionSnapshot {
        let duration = match inner.state {
            SessionState::Active => inner.started_at.map(|t| Utc::now() - t),
            _ => inner.last_duration,
        };
        SessionSnapshot {
            state: inner.state,
            started_at: inner.started_at,
            duration_secs: duration.map(|d| d.num_milliseconds() as f64 / 1000.0),
            rounds_dispatched: self.counters.rounds_dispatched.load(Ordering::Relaxed),
            rounds_skipped: self.counters.rounds_skipped.load(Ordering::Relaxed),
            samples_rejected: self.counters.samples_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Turn each received sample into its own fan-out round.
async fn run_session_loop(
    mut rx: mpsc::Receiver<LocationSample>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    loss_warning_rounds: u32,
) {
    let semaphore = Arc::new(Semaphore::new(MAX_ROUNDS_IN_FLIGHT));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            sample = rx.recv() => {
                let Some(sample) = sample else { break };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        counters.rounds_skipped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Session: skipping sample, {} rounds still in flight", MAX_ROUNDS_IN_FLIGHT);
                        continue;
                    }
                };

                let dispatcher = dispatcher.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    match dispatcher.dispatch(&sample).await {
                        Ok(status) => {
                            counters.rounds_dispatched.fetch_add(1, Ordering::Relaxed);
                            check_connectivity(&status, &counters, loss_warning_rounds);
                        }
                        Err(DeliveryError::InvalidSample) => {
                            counters.samples_rejected.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!("Session: rejected implausible sample");
                        }
                        Err(e) => tracing::error!("Session: round failed: {}", e),
                    }
                });
            }
        }
    }

    tracing::debug!("Session: sample loop exited");
}

/// Warn once per streak of rounds that reached nobody. Tracking carries on.
fn check_connectivity(status: &ServerStatus, counters: &Counters, loss_warning_rounds: u32) {
    if status.has_any_connection() {
        if counters.loss_warned.swap(false, Ordering::Relaxed) {
            tracing::info!(
                "Session: connectivity restored, {}/{} destinations connected",
                status.active_connections_count(),
                status.destination_count()
            );
        }
    } else if status.consecutive_failed_rounds >= loss_warning_rounds
        && !counters.loss_warned.swap(true, Ordering::Relaxed)
    {
        tracing::warn!(
            "Session: no destination reachable for {} consecutive rounds",
            status.consecutive_failed_rounds
        );
    }
}
