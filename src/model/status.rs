//! Connectivity status aggregate.
//!
//! Every operation here returns a new [`ServerStatus`] instead of mutating in
//! place; the publisher swaps whole values so readers never see a partially
//! applied round.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::SendOutcome;

/// Minimum number of simultaneously healthy destinations considered redundant.
pub const MIN_REDUNDANCY: usize = 2;

/// Health of a single destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Error,
    Timeout,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

impl From<&SendOutcome> for ConnectionStatus {
    fn from(outcome: &SendOutcome) -> Self {
        match outcome {
            SendOutcome::Success(_) => ConnectionStatus::Connected,
            SendOutcome::Timeout => ConnectionStatus::Timeout,
            SendOutcome::Error(_) => ConnectionStatus::Error,
        }
    }
}

/// Per-destination entry of the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationHealth {
    pub id: String,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

impl DestinationHealth {
    fn new(id: String) -> Self {
        Self {
            id,
            status: ConnectionStatus::Disconnected,
            last_error: None,
            last_success: None,
        }
    }

    fn apply(&mut self, outcome: &SendOutcome, now: DateTime<Utc>) {
        self.status = outcome.into();
        match outcome {
            SendOutcome::Success(_) => {
                self.last_success = Some(now);
                self.last_error = None;
            }
            SendOutcome::Timeout => self.last_error = Some("timed out".to_string()),
            SendOutcome::Error(msg) => self.last_error = Some(msg.clone()),
        }
    }
}

/// Aggregated view over all destinations plus process-wide round counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    /// One entry per configured destination, in registry order.
    pub destinations: Vec<DestinationHealth>,
    /// Rounds in which at least one destination succeeded.
    pub total_successful_sends: u64,
    /// Rounds in which no destination succeeded.
    pub total_failed_sends: u64,
    /// Length of the current streak of failed rounds.
    pub consecutive_failed_rounds: u32,
    pub last_update: DateTime<Utc>,
    pub last_successful_send: Option<DateTime<Utc>>,
}

impl ServerStatus {
    /// Fresh aggregate with every destination DISCONNECTED and zero counters.
    pub fn new<I, S>(ids: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            destinations: ids.into_iter().map(|id| DestinationHealth::new(id.into())).collect(),
            total_successful_sends: 0,
            total_failed_sends: 0,
            consecutive_failed_rounds: 0,
            last_update: now,
            last_successful_send: None,
        }
    }

    /// Status of one destination, if it is known.
    #[cfg(test)]
    pub fn status_of(&self, id: &str) -> Option<ConnectionStatus> {
        self.destinations.iter().find(|d| d.id == id).map(|d| d.status)
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    /// Fold one fan-out round into a new aggregate.
    ///
    /// Each destination takes its status straight from its outcome. The round
    /// counts as a successful send when any destination succeeded.
    pub fn with_round(&self, outcomes: &[(String, SendOutcome)], now: DateTime<Utc>) -> Self {
        let mut next = self.with_outcomes(outcomes, now);
        if outcomes.iter().any(|(_, o)| o.is_success()) {
            next.total_successful_sends += 1;
            next.consecutive_failed_rounds = 0;
            next.last_successful_send = Some(now);
        } else {
            next.total_failed_sends += 1;
            next.consecutive_failed_rounds = next.consecutive_failed_rounds.saturating_add(1);
        }
        next
    }

    /// Apply probe results without touching the round counters.
    pub fn with_probe_results(&self, outcomes: &[(String, SendOutcome)], now: DateTime<Utc>) -> Self {
        self.with_outcomes(outcomes, now)
    }

    fn with_outcomes(&self, outcomes: &[(String, SendOutcome)], now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        for (id, outcome) in outcomes {
            match next.destinations.iter_mut().find(|d| &d.id == id) {
                Some(entry) => entry.apply(outcome, now),
                None => {
                    let mut entry = DestinationHealth::new(id.clone());
                    entry.apply(outcome, now);
                    next.destinations.push(entry);
                }
            }
        }
        next.last_update = now;
        next
    }

    /// Mark the given destinations as CONNECTING (probe in progress).
    pub fn with_connecting(&self, ids: &[String], now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        for entry in next.destinations.iter_mut().filter(|d| ids.contains(&d.id)) {
            entry.status = ConnectionStatus::Connecting;
        }
        next.last_update = now;
        next
    }

    /// Every destination DISCONNECTED; counters are kept.
    pub fn all_disconnected(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        for entry in next.destinations.iter_mut() {
            entry.status = ConnectionStatus::Disconnected;
            entry.last_error = Some("network unavailable".to_string());
        }
        next.last_update = now;
        next
    }

    /// A round that could not run because the host is offline.
    ///
    /// Every destination goes DISCONNECTED and the round extends the failure
    /// streak. The send tallies are left alone since nothing was attempted.
    pub fn with_unreachable_round(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.all_disconnected(now);
        next.consecutive_failed_rounds = next.consecutive_failed_rounds.saturating_add(1);
        next
    }

    /// Zero the round counters. Per-destination status is left alone.
    pub fn reset_counters(&self, now: DateTime<Utc>) -> Self {
        Self {
            total_successful_sends: 0,
            total_failed_sends: 0,
            consecutive_failed_rounds: 0,
            last_update: now,
            ..self.clone()
        }
    }

    pub fn active_connections_count(&self) -> usize {
        self.destinations.iter().filter(|d| d.status.is_connected()).count()
    }

    pub fn has_any_connection(&self) -> bool {
        self.active_connections_count() > 0
    }

    /// True when every configured destination is connected. An empty
    /// registry has no connections at all, so this is false.
    pub fn has_all_connections(&self) -> bool {
        !self.destinations.is_empty() && self.active_connections_count() == self.destinations.len()
    }

    pub fn has_minimum_redundancy(&self) -> bool {
        self.active_connections_count() >= MIN_REDUNDANCY
    }

    /// Share of destinations currently connected, 0..=100.
    pub fn connectivity_percentage(&self) -> f64 {
        if self.destinations.is_empty() {
            return 0.0;
        }
        self.active_connections_count() as f64 / self.destinations.len() as f64 * 100.0
    }

    /// Share of rounds that reached at least one destination, 0..=100.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_successful_sends + self.total_failed_sends;
        if total == 0 {
            return 0.0;
        }
        self.total_successful_sends as f64 / total as f64 * 100.0
    }

    /// True when the aggregate was updated less than `window` before `now`.
    pub fn has_recent_activity(&self, window: ChronoDuration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_update) < window
    }
}

/// Aggregate plus derived figures, as served to observers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub status: ServerStatus,
    pub active_connections: usize,
    pub connectivity_percentage: f64,
    pub success_rate: f64,
    pub minimum_redundancy: bool,
    pub all_connected: bool,
    pub recent_activity: bool,
    pub connectivity_warning: bool,
}

impl StatusReport {
    pub fn new(
        status: ServerStatus,
        stale_after: ChronoDuration,
        loss_warning_rounds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            active_connections: status.active_connections_count(),
            connectivity_percentage: status.connectivity_percentage(),
            success_rate: status.success_rate(),
            minimum_redundancy: status.has_minimum_redundancy(),
            all_connected: status.has_all_connections(),
            recent_activity: status.has_recent_activity(stale_after, now),
            connectivity_warning: status.consecutive_failed_rounds >= loss_warning_rounds,
            status,
        }
    }
}
