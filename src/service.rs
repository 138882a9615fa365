//! # Cached Environmental Service
//!
//! Entry point for tide and weather queries. Every query runs the same state
//! machine:
//!
//! ```text
//! CheckCache ──fresh──────────────────────────────▶ Return
//!     │ stale / missing
//!     ▼
//!   Fetch ──ok──▶ UpdateCache ────────────────────▶ Return
//!     │ failed
//!     ▼
//! FallbackToCache ──any entry (any age)──────────▶ Return (stale)
//!     │ nothing cached
//!     ▼
//! PropagateError
//! ```
//!
//! Concurrent queries for the same cache key are coalesced through a
//! [`KeyedGate`]: the first caller fetches, the rest wait and then read the
//! entry it wrote. If that fetch failed, the waiters take its error straight to
//! the fallback steps instead of fetching again. Different keys never wait on
//! each other.
//!
//! Point-in-time queries first try to answer from a fresh cached forecast, then
//! fetch the instant directly, and on failure fall back to the cached forecast
//! record closest in time to the requested instant.

use crate::cache::{CacheKey, CacheStore, DataKind, QueryShape};
use crate::coalesce::KeyedGate;
use crate::fetcher::{TideFetcher, WeatherFetcher};
use crate::forecast::{
    brackets, clamp_days, closest_to, daily_tide_states, daily_weather, MAX_FORECAST_DAYS,
};
use crate::interpolate::{state_from_sorted, tide_state_at};
use crate::{
    EngineError, FetchError, Location, Snapshot, TideExtremePoint, TideState, Timestamped,
    WeatherRecord,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// How far either side of an instant tide extremes are requested.
///
/// A semidiurnal tide has an extreme roughly every 6.2 hours, so a day either
/// way always brackets the instant and contains the next high and low.
const TIDE_LOOKAROUND_HOURS: i64 = 24;

/// Window either side of an instant for weather point queries.
const WEATHER_LOOKAROUND_HOURS: i64 = 12;

/// Cached payload for tide forecasts.
///
/// The raw extremes are kept next to the per-day states so point-in-time
/// queries inside the forecast window can be interpolated exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideForecast {
    /// Every fetched extreme, sorted by timestamp
    pub extremes: Vec<TideExtremePoint>,
    /// One noon state per day
    pub days: Vec<TideState>,
}

/// Tide and weather queries over a cache and two remote sources.
pub struct EnvironmentalService {
    cache: CacheStore,
    tides: Arc<dyn TideFetcher>,
    weather: Arc<dyn WeatherFetcher>,
    inflight: KeyedGate<CacheKey, FetchError>,
}

impl EnvironmentalService {
    pub fn new(
        cache: CacheStore,
        tides: Arc<dyn TideFetcher>,
        weather: Arc<dyn WeatherFetcher>,
    ) -> Self {
        Self {
            cache,
            tides,
            weather,
            inflight: KeyedGate::new(),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Drop cached entries, optionally only those of one kind.
    pub fn clear_cache(&self, kind: Option<DataKind>) -> usize {
        let removed = self.cache.clear(kind);
        info!("Cleared {removed} cached entries");
        removed
    }

    // -- Tide --

    /// Tide state right now.
    pub async fn current_tide(&self, location: &Location) -> Result<Snapshot<TideState>, EngineError> {
        let key = CacheKey::new(DataKind::Tide, QueryShape::Current, location);
        self.resolve(key, self.fetch_tide_state(location, self.cache.now()), || None)
            .await
    }

    /// One noon tide state per day for the next `days` days (clamped to 1..=7).
    pub async fn tide_forecast(
        &self,
        location: &Location,
        days: u32,
    ) -> Result<Snapshot<Vec<TideState>>, EngineError> {
        let days = clamp_requested(days);
        let key = CacheKey::new(DataKind::Tide, QueryShape::Forecast { days }, location);
        let snapshot = self
            .resolve(key, self.fetch_tide_forecast(location, days), || None)
            .await?;
        Ok(snapshot.map(|forecast| forecast.days))
    }

    /// Tide state at an arbitrary instant.
    pub async fn tide_at(
        &self,
        location: &Location,
        instant: DateTime<Utc>,
    ) -> Result<Snapshot<TideState>, EngineError> {
        for (key, entry) in self.cached_forecasts::<TideForecast>(DataKind::Tide, location) {
            if self.cache.is_past(entry.written_at, key.ttl()) {
                continue;
            }
            if brackets(&entry.payload.extremes, instant) {
                debug!("Answering tide at {instant} from {key}");
                return Ok(Snapshot {
                    value: state_from_sorted(&entry.payload.extremes, instant),
                    written_at: entry.written_at,
                    stale: false,
                });
            }
        }

        let key = CacheKey::new(DataKind::Tide, QueryShape::AtTime(instant.timestamp()), location);
        self.resolve(key, self.fetch_tide_state(location, instant), || {
            self.closest_cached(DataKind::Tide, location, instant, |f: TideForecast| f.days)
        })
        .await
    }

    // -- Weather --

    /// Weather right now.
    pub async fn current_weather(
        &self,
        location: &Location,
    ) -> Result<Snapshot<WeatherRecord>, EngineError> {
        let key = CacheKey::new(DataKind::Weather, QueryShape::Current, location);
        let fetch = async { self.weather.fetch_current(location).await };
        self.resolve(key, fetch, || None).await
    }

    /// One weather record per day for the next `days` days (clamped to 1..=7).
    pub async fn weather_forecast(
        &self,
        location: &Location,
        days: u32,
    ) -> Result<Snapshot<Vec<WeatherRecord>>, EngineError> {
        let days = clamp_requested(days);
        let key = CacheKey::new(DataKind::Weather, QueryShape::Forecast { days }, location);
        self.resolve(key, self.fetch_weather_forecast(location, days), || None)
            .await
    }

    /// Weather at an arbitrary instant.
    pub async fn weather_at(
        &self,
        location: &Location,
        instant: DateTime<Utc>,
    ) -> Result<Snapshot<WeatherRecord>, EngineError> {
        let day = instant.date_naive();
        for (key, entry) in self.cached_forecasts::<Vec<WeatherRecord>>(DataKind::Weather, location)
        {
            if self.cache.is_past(entry.written_at, key.ttl()) {
                continue;
            }
            if let Some(record) = entry.payload.iter().find(|r| r.timestamp.date_naive() == day) {
                debug!("Answering weather at {instant} from {key}");
                return Ok(Snapshot {
                    value: record.clone(),
                    written_at: entry.written_at,
                    stale: false,
                });
            }
        }

        let key = CacheKey::new(
            DataKind::Weather,
            QueryShape::AtTime(instant.timestamp()),
            location,
        );
        self.resolve(key, self.fetch_weather_at(location, instant), || {
            self.closest_cached(DataKind::Weather, location, instant, |f: Vec<WeatherRecord>| f)
        })
        .await
    }

    // -- State machine --

    /// Fresh cache → fetch → stale cache → `fallback` → error.
    ///
    /// `fetch` is only polled when the cache cannot answer.
    async fn resolve<T, F>(
        &self,
        key: CacheKey,
        fetch: F,
        fallback: impl FnOnce() -> Option<Snapshot<T>>,
    ) -> Result<Snapshot<T>, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<T, FetchError>>,
    {
        if let Some(hit) = self.fresh(&key) {
            return Ok(hit);
        }

        let mut held = self.inflight.acquire(&key).await;
        if let Some(hit) = self.fresh(&key) {
            debug!("{key} was refreshed while waiting");
            return Ok(hit);
        }

        let previous = held.previous().cloned();
        let outcome = match previous {
            Some(err) => {
                debug!("Reusing failed fetch for {key}: {err}");
                Err(err)
            }
            None => {
                let outcome = fetch.await;
                if let Err(err) = &outcome {
                    warn!("Fetch for {key} failed: {err}");
                    held.leave(Some(err.clone()));
                }
                outcome
            }
        };

        match outcome {
            Ok(value) => {
                let written_at = self.cache.put(&key, &value);
                Ok(Snapshot {
                    value,
                    written_at,
                    stale: false,
                })
            }
            Err(err) => {
                if let Some(entry) = self.cache.get::<T>(&key) {
                    warn!("Serving stale {key} written at {}", entry.written_at);
                    return Ok(Snapshot {
                        value: entry.payload,
                        written_at: entry.written_at,
                        stale: true,
                    });
                }
                if let Some(snapshot) = fallback() {
                    warn!(
                        "Serving closest cached record for {key} written at {}",
                        snapshot.written_at
                    );
                    return Ok(snapshot);
                }
                Err(err.into())
            }
        }
    }

    fn fresh<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<Snapshot<T>> {
        let entry = self.cache.get_fresh::<T>(key)?;
        debug!("Cache hit for {key}");
        Some(Snapshot {
            value: entry.payload,
            written_at: entry.written_at,
            stale: false,
        })
    }

    /// Cached forecasts of any age for `kind`, longest first.
    fn cached_forecasts<T: DeserializeOwned>(
        &self,
        kind: DataKind,
        location: &Location,
    ) -> Vec<(CacheKey, crate::cache::CacheEntry<T>)> {
        (1..=MAX_FORECAST_DAYS)
            .rev()
            .filter_map(|days| {
                let key = CacheKey::new(kind, QueryShape::Forecast { days }, location);
                self.cache.get::<T>(&key).map(|entry| (key, entry))
            })
            .collect()
    }

    /// Record closest to `instant` across every cached forecast of `kind`.
    ///
    /// Ties go to the earlier record. The snapshot carries the stamp of the
    /// forecast the record came from.
    fn closest_cached<P, R>(
        &self,
        kind: DataKind,
        location: &Location,
        instant: DateTime<Utc>,
        records: impl Fn(P) -> Vec<R>,
    ) -> Option<Snapshot<R>>
    where
        P: DeserializeOwned,
        R: Timestamped + Clone,
    {
        self.cached_forecasts::<P>(kind, location)
            .into_iter()
            .filter_map(|(_, entry)| {
                let written_at = entry.written_at;
                let records = records(entry.payload);
                let closest = closest_to(&records, instant)?.clone();
                Some(Snapshot {
                    value: closest,
                    written_at,
                    stale: true,
                })
            })
            .min_by_key(|s| {
                let at = s.value.timestamp();
                ((at - instant).abs(), at)
            })
    }

    // -- Remote fetches --

    async fn fetch_tide_state(
        &self,
        location: &Location,
        instant: DateTime<Utc>,
    ) -> Result<TideState, FetchError> {
        let around = Duration::hours(TIDE_LOOKAROUND_HOURS);
        let extremes = self
            .tides
            .fetch_extremes(location, instant - around, instant + around)
            .await?;
        if extremes.is_empty() {
            return Err(FetchError::NoDataAvailable);
        }
        Ok(tide_state_at(&extremes, instant))
    }

    async fn fetch_tide_forecast(
        &self,
        location: &Location,
        days: u8,
    ) -> Result<TideForecast, FetchError> {
        let today = self.cache.now().date_naive();
        let start = midnight(today) - Duration::days(1);
        let end = midnight(today) + Duration::days(i64::from(days) + 1);

        let mut extremes = self.tides.fetch_extremes(location, start, end).await?;
        extremes.sort_by_key(|e| e.timestamp);
        let daily = daily_tide_states(&extremes, today, u32::from(days));
        if daily.is_empty() {
            return Err(FetchError::NoDataAvailable);
        }
        Ok(TideForecast {
            extremes,
            days: daily,
        })
    }

    async fn fetch_weather_forecast(
        &self,
        location: &Location,
        days: u8,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        let today = self.cache.now().date_naive();
        let start = midnight(today);
        let end = start + Duration::days(i64::from(days));

        let samples = self.weather.fetch_range(location, start, end).await?;
        let daily = daily_weather(&samples, today, u32::from(days));
        if daily.is_empty() {
            return Err(FetchError::NoDataAvailable);
        }
        Ok(daily)
    }

    async fn fetch_weather_at(
        &self,
        location: &Location,
        instant: DateTime<Utc>,
    ) -> Result<WeatherRecord, FetchError> {
        let around = Duration::hours(WEATHER_LOOKAROUND_HOURS);
        let samples = self
            .weather
            .fetch_range(location, instant - around, instant + around)
            .await?;
        closest_to(&samples, instant)
            .cloned()
            .ok_or(FetchError::NoDataAvailable)
    }
}

fn clamp_requested(days: u32) -> u8 {
    let clamped = clamp_days(days);
    if u32::from(clamped) != days {
        debug!("Forecast of {days} days clamped to {clamped}");
    }
    clamped
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}
