//! # Tide Conditions Core Library
//!
//! This library caches remotely fetched environmental data (tide extremes and
//! weather samples) per location and derives an instantaneous tide state from a
//! sparse list of high/low tide events.
//!
//! ## Design Philosophy
//!
//! ### Cache First, Network Second
//! - **Fresh cache wins**: a cache entry younger than its kind's TTL is returned
//!   without touching the network
//! - **Stale beats nothing**: when a refresh fails, any cached value (of any age)
//!   is returned and flagged as stale
//! - **Errors are terminal only**: a caller sees an error only when the fetch
//!   failed *and* nothing was ever cached for the query
//!
//! ### Time
//! All timestamps are `DateTime<Utc>`. Day bucketing for forecasts uses the UTC
//! calendar day, which keeps interpolation and tests free of DST effects.
//!
//! ### Data Flow
//! 1. **Check**: [`cache::CacheStore`] lookup by typed [`cache::CacheKey`]
//! 2. **Fetch**: [`fetcher::TideFetcher`] / [`fetcher::WeatherFetcher`] on miss or staleness
//! 3. **Derive**: [`interpolate::tide_state_at`] and [`forecast`] aggregation
//! 4. **Store**: atomic overwrite of the cache entry, stamped with the write time
//!
//! ## Core Types
//! - [`Location`]: validated cache-key component
//! - [`TideExtremePoint`]: one high or low tide event
//! - [`TideState`]: interpolated height, trend and upcoming extremes at an instant
//! - [`WeatherRecord`]: one weather sample
//! - [`Snapshot`]: any value handed to a caller, with its write time and staleness

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

pub mod cache;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod forecast;
pub mod interpolate;
pub mod noaa;
pub mod report;
pub mod service;

#[cfg(test)]
mod tests;

pub use error::{EngineError, FetchError};
pub use service::EnvironmentalService;

/// A place conditions are requested for.
///
/// Only the identifier takes part in equality and hashing; coordinates are
/// carried along for fetchers that need them.
///
/// # Example
/// ```
/// use tide_conditions::Location;
///
/// let portland = Location::new("8418150", 43.658, -70.244).unwrap();
/// assert_eq!(portland.id(), "8418150");
/// assert!(Location::new("", 0.0, 0.0).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct Location {
    id: String,
    latitude: f64,
    longitude: f64,
}

impl Location {
    /// Build a location, rejecting an empty id or out-of-range coordinates.
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "location id must not be empty".to_string(),
            ));
        }
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(EngineError::InvalidInput(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(EngineError::InvalidInput(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self {
            id,
            latitude,
            longitude,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Whether a tide extreme is a high or a low water event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TideKind {
    High,
    Low,
}

/// A single high or low tide event.
///
/// Height is in meters relative to the fetcher's datum and may be negative.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideExtremePoint {
    pub timestamp: DateTime<Utc>,
    pub height: f64,
    pub kind: TideKind,
}

/// Direction of the tide at an instant.
///
/// `High` and `Low` mean "at (or only known relative to) an extreme"; `Rising`
/// and `Falling` mean the instant lies between a low and a high.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Falling,
    High,
    Low,
}

impl From<TideKind> for Trend {
    fn from(kind: TideKind) -> Self {
        match kind {
            TideKind::High => Trend::High,
            TideKind::Low => Trend::Low,
        }
    }
}

/// Tide conditions derived for one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideState {
    pub timestamp: DateTime<Utc>,
    /// Linearly interpolated height in meters
    pub height: f64,
    pub trend: Trend,
    /// First high tide strictly after `timestamp`
    pub next_high_tide: Option<TideExtremePoint>,
    /// First low tide strictly after `timestamp`
    pub next_low_tide: Option<TideExtremePoint>,
}

/// One weather sample.
///
/// Units: temperature in °C, wind speed in m/s, wind direction in degrees,
/// precipitation in mm, cloud cover and humidity in percent, pressure in hPa.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub precipitation: f64,
    pub cloud_cover: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub uv_index: f64,
    pub water_temperature: Option<f64>,
}

/// Anything that sits at a point in time.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for TideExtremePoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for TideState {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for WeatherRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A value returned to a caller together with its provenance.
///
/// `written_at` is the time of the remote fetch that produced the value.
/// `stale` is true when the value was served from an expired cache entry
/// because a refresh failed.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub value: T,
    pub written_at: DateTime<Utc>,
    pub stale: bool,
}

impl<T> Snapshot<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Snapshot<U> {
        Snapshot {
            value: f(self.value),
            written_at: self.written_at,
            stale: self.stale,
        }
    }
}
