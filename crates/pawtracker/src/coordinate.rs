//! Location samples and their wire form.
//!
//! A [`Coordinate`] is what the platform reports; a [`DeliveryRecord`] is
//! what a sink sends. Records are derived from coordinates, never the other
//! way round.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single position sample from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// When the provider captured this sample.
    pub captured_at: DateTime<Utc>,
}

impl Coordinate {
    /// Create a coordinate captured at the given instant.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
        }
    }

    /// Create a coordinate captured now.
    #[must_use]
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, Utc::now())
    }

    /// Great-circle distance to `other` in metres (haversine).
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);

        EARTH_RADIUS_M * 2.0 * a.sqrt().asin()
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

impl From<pawtracker_replay::Fix> for Coordinate {
    fn from(fix: pawtracker_replay::Fix) -> Self {
        Self::new(fix.latitude, fix.longitude, fix.captured_at)
    }
}

/// The body a sink sends for one sample.
///
/// Serializes to `{"latitude": .., "longitude": .., "timestamp": ".."}` with
/// an ISO-8601 UTC timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// ISO-8601 timestamp of the sample.
    pub timestamp: String,
}

impl From<&Coordinate> for DeliveryRecord {
    fn from(coordinate: &Coordinate) -> Self {
        Self {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            timestamp: coordinate
                .captured_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
