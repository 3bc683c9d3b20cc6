//! Configuration module for GeoTrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::delivery::{Backoff, DestinationRegistry, RegistryError, RetryPolicy};
use crate::session::{SessionConfig, StaticPermissions};
use crate::transport::{TransportConfig, DEFAULT_MAX_DATAGRAM};

/// Config error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("destinations: {0}")]
    Destinations(#[from] RegistryError),
}

/// Tracker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// HTTP port for the observer API (default: 8090)
    pub http_port: u16,
    /// Comma-separated destination specs (default: "udp://127.0.0.1:6001")
    pub destinations: String,
    /// JSON destinations file, takes precedence over `destinations`
    pub destinations_file: Option<PathBuf>,
    pub send_timeout: Duration,
    /// Reply wait after a UDP send; confirmation is off when unset
    pub confirm_timeout: Option<Duration>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub retry_backoff: Backoff,
    pub sample_interval: Duration,
    /// UDP payload ceiling in bytes (default: 1024)
    pub max_datagram: usize,
    pub loss_warning_rounds: u32,
    pub stale_after: Duration,
    /// Start tracking as soon as the process is up (default: true)
    pub autostart: bool,
    pub origin: (f64, f64),
    pub permissions_granted: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            http_port: 8090,
            destinations: "udp://127.0.0.1:6001".to_string(),
            destinations_file: None,
            send_timeout: Duration::from_millis(3000),
            confirm_timeout: None,
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            retry_backoff: Backoff::Fixed,
            sample_interval: Duration::from_millis(3000),
            max_datagram: DEFAULT_MAX_DATAGRAM,
            loss_warning_rounds: 3,
            stale_after: Duration::from_secs(30),
            autostart: true,
            origin: (52.52, 13.405),
            permissions_granted: true,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `GEOTRAIL_HTTP_PORT`: HTTP port (default: 8090)
    /// - `GEOTRAIL_DESTINATIONS`: destination specs (default: "udp://127.0.0.1:6001")
    /// - `GEOTRAIL_DESTINATIONS_FILE`: JSON destinations file (default: unset)
    /// - `GEOTRAIL_SEND_TIMEOUT_MS`: per-attempt timeout (default: 3000)
    /// - `GEOTRAIL_CONFIRM_TIMEOUT_MS`: UDP reply wait (default: unset)
    /// - `GEOTRAIL_MAX_ATTEMPTS`: attempts per destination per round (default: 3)
    /// - `GEOTRAIL_RETRY_DELAY_MS`: delay between attempts (default: 500)
    /// - `GEOTRAIL_RETRY_BACKOFF`: "fixed" or "linear" (default: "fixed")
    /// - `GEOTRAIL_SAMPLE_INTERVAL_MS`: sampling interval (default: 3000)
    /// - `GEOTRAIL_MAX_DATAGRAM`: UDP payload ceiling (default: 1024)
    /// - `GEOTRAIL_LOSS_WARNING_ROUNDS`: failed rounds before warning (default: 3)
    /// - `GEOTRAIL_STALE_AFTER_SECS`: status staleness window (default: 30)
    /// - `GEOTRAIL_AUTOSTART`: start tracking on launch (default: true)
    /// - `GEOTRAIL_ORIGIN`: "lat,lon" of the simulated origin (default: "52.5200,13.4050")
    /// - `GEOTRAIL_PERMISSIONS_GRANTED`: grant location/network access (default: true)
    ///
    /// Malformed values are ignored and the default kept.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(port) = lookup("GEOTRAIL_HTTP_PORT").and_then(|v| v.trim().parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(destinations) = lookup("GEOTRAIL_DESTINATIONS") {
            if !destinations.trim().is_empty() {
                cfg.destinations = destinations;
            }
        }

        if let Some(path) = lookup("GEOTRAIL_DESTINATIONS_FILE") {
            if !path.trim().is_empty() {
                cfg.destinations_file = Some(PathBuf::from(path));
            }
        }

        if let Some(ms) = parsed("GEOTRAIL_SEND_TIMEOUT_MS").filter(|ms| *ms > 0) {
            cfg.send_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parsed("GEOTRAIL_CONFIRM_TIMEOUT_MS").filter(|ms| *ms > 0) {
            cfg.confirm_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(n) = parsed("GEOTRAIL_MAX_ATTEMPTS") {
            cfg.max_attempts = n.clamp(1, u32::MAX as u64) as u32;
        }

        if let Some(ms) = parsed("GEOTRAIL_RETRY_DELAY_MS") {
            cfg.retry_delay = Duration::from_millis(ms);
        }

        if let Some(backoff) = lookup("GEOTRAIL_RETRY_BACKOFF").and_then(|v| Backoff::from_str(v.trim()).ok()) {
            cfg.retry_backoff = backoff;
        }

        if let Some(ms) = parsed("GEOTRAIL_SAMPLE_INTERVAL_MS").filter(|ms| *ms > 0) {
            cfg.sample_interval = Duration::from_millis(ms);
        }

        if let Some(bytes) = parsed("GEOTRAIL_MAX_DATAGRAM").filter(|b| *b > 0) {
            cfg.max_datagram = bytes as usize;
        }

        if let Some(rounds) = parsed("GEOTRAIL_LOSS_WARNING_ROUNDS").filter(|r| *r > 0) {
            cfg.loss_warning_rounds = rounds.min(u32::MAX as u64) as u32;
        }

        if let Some(secs) = parsed("GEOTRAIL_STALE_AFTER_SECS").filter(|s| *s > 0) {
            cfg.stale_after = Duration::from_secs(secs);
        }

        if let Some(autostart) = lookup("GEOTRAIL_AUTOSTART").and_then(|v| parse_bool(&v)) {
            cfg.autostart = autostart;
        }

        if let Some(origin) = lookup("GEOTRAIL_ORIGIN").and_then(|v| parse_origin(&v)) {
            cfg.origin = origin;
        }

        if let Some(granted) = lookup("GEOTRAIL_PERMISSIONS_GRANTED").and_then(|v| parse_bool(&v)) {
            cfg.permissions_granted = granted;
        }

        cfg
    }

    /// Build the destination registry, preferring the destinations file.
    pub fn registry(&self) -> Result<DestinationRegistry, ConfigError> {
        let registry = match &self.destinations_file {
            Some(path) => DestinationRegistry::from_json_file(path)?,
            None => DestinationRegistry::parse_list(&self.destinations)?,
        };
        Ok(registry)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: self.send_timeout,
            delay: self.retry_delay,
            backoff: self.retry_backoff,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_datagram: self.max_datagram,
            confirm_timeout: self.confirm_timeout,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_interval: self.sample_interval,
            loss_warning_rounds: self.loss_warning_rounds,
            stale_after: self.stale_after,
            origin: self.origin,
        }
    }

    pub fn permissions(&self) -> StaticPermissions {
        if self.permissions_granted {
            StaticPermissions::all_granted()
        } else {
            StaticPermissions::none_granted()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_origin(value: &str) -> Option<(f64, f64)> {
    let (lat, lon) = value.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    let plausible = (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon);
    plausible.then_some((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PermissionGate;
    use std::collections::HashMap;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    fn from_pairs(pairs: &[(&str, &str)]) -> TrackerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TrackerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.http_port, 8090);
        assert_eq!(cfg.destinations, "udp://127.0.0.1:6001");
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.retry_backoff, Backoff::Fixed);
        assert!(cfg.confirm_timeout.is_none());
        assert!(cfg.autostart);

        let registry = assert_ok!(cfg.registry());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_overrides() {
        let cfg = from_pairs(&[
            ("GEOTRAIL_HTTP_PORT", "9000"),
            ("GEOTRAIL_DESTINATIONS", "udp://10.0.0.1:6001#a, tcp://10.0.0.2#b"),
            ("GEOTRAIL_CONFIRM_TIMEOUT_MS", "250"),
            ("GEOTRAIL_MAX_ATTEMPTS", "5"),
            ("GEOTRAIL_RETRY_BACKOFF", "Linear"),
            ("GEOTRAIL_AUTOSTART", "off"),
            ("GEOTRAIL_ORIGIN", "48.8566, 2.3522"),
        ]);

        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.confirm_timeout, Some(Duration::from_millis(250)));
        assert_eq!(cfg.retry_policy().max_attempts, 5);
        assert_eq!(cfg.retry_policy().backoff, Backoff::Linear);
        assert!(!cfg.autostart);
        assert_eq!(cfg.origin, (48.8566, 2.3522));

        let registry = assert_ok!(cfg.registry());
        assert_eq!(registry.ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let cfg = from_pairs(&[
            ("GEOTRAIL_HTTP_PORT", "not-a-port"),
            ("GEOTRAIL_SEND_TIMEOUT_MS", "-5"),
            ("GEOTRAIL_MAX_ATTEMPTS", "0"),
            ("GEOTRAIL_RETRY_BACKOFF", "exponential"),
            ("GEOTRAIL_ORIGIN", "200,10"),
            ("GEOTRAIL_PERMISSIONS_GRANTED", "maybe"),
        ]);

        assert_eq!(cfg.http_port, 8090);
        assert_eq!(cfg.send_timeout, Duration::from_millis(3000));
        assert_eq!(cfg.max_attempts, 1);
        assert_eq!(cfg.retry_backoff, Backoff::Fixed);
        assert_eq!(cfg.origin, (52.52, 13.405));
        assert!(cfg.permissions_granted);
    }

    #[test]
    fn test_destinations_file_takes_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "primary", "address": "192.0.2.1"}}, {{"address": "192.0.2.2", "protocol": "tcp"}}]"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cfg = from_pairs(&[
            ("GEOTRAIL_DESTINATIONS", "udp://10.0.0.1:6001"),
            ("GEOTRAIL_DESTINATIONS_FILE", path.as_str()),
        ]);

        let registry = assert_ok!(cfg.registry());
        assert_eq!(registry.len(), 2);
        assert!(registry.ids().contains(&"primary".to_string()));
    }

    #[test]
    fn test_missing_destinations_file() {
        let cfg = from_pairs(&[("GEOTRAIL_DESTINATIONS_FILE", "/nonexistent/geotrail.json")]);
        assert!(matches!(
            assert_err!(cfg.registry()),
            ConfigError::Destinations(RegistryError::Io(_))
        ));
    }

    #[test]
    fn test_permissions_flag() {
        let cfg = from_pairs(&[("GEOTRAIL_PERMISSIONS_GRANTED", "false")]);
        assert_eq!(cfg.permissions().missing().len(), 2);
    }
}
