//! Location samples and their datagram encoding.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// How far a fix timestamp may drift from the local clock before the sample
/// is rejected (one hour, in milliseconds).
pub const PLAUSIBLE_WINDOW_MS: i64 = 60 * 60 * 1000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Fix time reported by the positioning source (epoch ms).
    pub fix_time: i64,
    /// When the device processed the fix (epoch ms).
    pub capture_time: i64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub provider: Option<String>,
}

/// Compact JSON body sent to every destination.
#[derive(Serialize)]
struct WirePayload<'a> {
    lat: f64,
    lon: f64,
    time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    acc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prov: Option<&'a str>,
}

impl LocationSample {
    /// Create a sample with only the required fields; the capture time is
    /// taken from the local clock.
    pub fn new(latitude: f64, longitude: f64, fix_time: i64) -> Self {
        Self {
            latitude,
            longitude,
            fix_time,
            capture_time: now_millis(),
            accuracy: None,
            altitude: None,
            speed: None,
            provider: None,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    pub fn with_altitude(mut self, meters: f64) -> Self {
        self.altitude = Some(meters);
        self
    }

    pub fn with_speed(mut self, meters_per_sec: f64) -> Self {
        self.speed = Some(meters_per_sec);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Check the sample against the local clock.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }

    /// Check the sample against an explicit reference time.
    ///
    /// A sample is rejected when it sits exactly on (0, 0), when either
    /// coordinate is out of range or not finite, or when its fix time lies
    /// more than an hour away from `now_ms`.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return false;
        }
        if self.latitude == 0.0 && self.longitude == 0.0 {
            return false;
        }
        if self.latitude.abs() > 90.0 || self.longitude.abs() > 180.0 {
            return false;
        }
        let earliest = now_ms.saturating_sub(PLAUSIBLE_WINDOW_MS);
        let latest = now_ms.saturating_add(PLAUSIBLE_WINDOW_MS);
        (earliest..=latest).contains(&self.fix_time)
    }

    /// Copy of this sample with a fresh capture time. Used on resend.
    pub fn refreshed(&self, now_ms: i64) -> Self {
        Self {
            capture_time: now_ms,
            ..self.clone()
        }
    }

    /// Encode the sample as the datagram body.
    ///
    /// Absent optional fields are omitted rather than sent as `null`.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WirePayload {
            lat: self.latitude,
            lon: self.longitude,
            time: self.fix_time,
            acc: self.accuracy,
            alt: self.altitude,
            spd: self.speed,
            prov: self.provider.as_deref(),
        })
    }
}
