//! # Remote Data Sources
//!
//! The engine only talks to the network through these traits. Implementations
//! own their timeout and retry policy; the engine treats every
//! [`FetchError`] as "fetch failed, fall back to cache".

use crate::{FetchError, Location, TideExtremePoint, WeatherRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;

/// Source of tide predictions.
#[async_trait]
pub trait TideFetcher: Send + Sync {
    /// High and low tide events between `start` and `end`, in any order.
    async fn fetch_extremes(
        &self,
        location: &Location,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TideExtremePoint>, FetchError>;
}

/// Source of weather observations and forecasts.
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    /// Conditions right now.
    async fn fetch_current(&self, location: &Location) -> Result<WeatherRecord, FetchError>;

    /// Samples between `start` and `end`, at whatever resolution the source has.
    async fn fetch_range(
        &self,
        location: &Location,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WeatherRecord>, FetchError>;
}

/// A source that has nothing. Queries against it are served from cache only.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl TideFetcher for Unconfigured {
    async fn fetch_extremes(
        &self,
        location: &Location,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<TideExtremePoint>, FetchError> {
        debug!("No tide source configured for {}", location.id());
        Err(FetchError::NoDataAvailable)
    }
}

#[async_trait]
impl WeatherFetcher for Unconfigured {
    async fn fetch_current(&self, location: &Location) -> Result<WeatherRecord, FetchError> {
        debug!("No weather source configured for {}", location.id());
        Err(FetchError::NoDataAvailable)
    }

    async fn fetch_range(
        &self,
        location: &Location,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        debug!("No weather source configured for {}", location.id());
        Err(FetchError::NoDataAvailable)
    }
}
