//! types.rs
//!
//! Run record data model: the persisted record, its two sample sequences,
//! and the position fixes that feed it.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One heart-rate reading taken while a session was running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub bpm: u16,
}

/// One instantaneous speed reading, one per accepted position fix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Meters per second, never negative.
    pub speed_mps: f64,
}

/// A geographic position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A position update as reported by the platform location provider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub position: Position,
    /// Meters above the WGS84 ellipsoid, when the provider reports it.
    pub altitude: Option<f64>,
    /// Instantaneous speed in m/s, when the provider reports it.
    pub speed_mps: Option<f64>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position::new(latitude, longitude),
            altitude: None,
            speed_mps: None,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Reported speed, with missing or negative values read as standing still.
    pub fn speed_or_zero(&self) -> f64 {
        self.speed_mps.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(0.0)
    }
}

/// A completed run.
///
/// Records produced by `RunStore::list` are summaries: both sample
/// sequences are empty regardless of what was saved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// `yyyyMMdd_HHmmss` of the session start, local time.
    pub id: String,
    /// `yyyy-MM-dd HH:mm:ss` of the session start, local time.
    pub start_time: String,
    /// Total distance in meters.
    pub distance_m: f64,
    /// Total running time in whole seconds, pauses excluded.
    pub duration_secs: u64,
    pub heart_rate: Vec<HeartRateSample>,
    pub speed: Vec<SpeedSample>,
}

impl RunRecord {
    /// An empty record for a session that has just started.
    pub fn new(id: impl Into<String>, start_time: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time: start_time.into(),
            distance_m: 0.0,
            duration_secs: 0,
            heart_rate: Vec::new(),
            speed: Vec::new(),
        }
    }

    /// Copy of the header fields with both sample sequences dropped.
    pub fn summary(&self) -> Self {
        Self {
            id: self.id.clone(),
            start_time: self.start_time.clone(),
            distance_m: self.distance_m,
            duration_secs: self.duration_secs,
            heart_rate: Vec::new(),
            speed: Vec::new(),
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
