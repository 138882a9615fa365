//! # Service Behaviour Tests
//!
//! Drive [`EnvironmentalService`] with scripted sources and a manual clock so
//! freshness boundaries, fallbacks and coalescing can be checked exactly.

use crate::cache::{CacheStore, DataKind, FileBackend};
use crate::clock::ManualClock;
use crate::fetcher::{TideFetcher, WeatherFetcher};
use crate::forecast::noon_utc;
use crate::interpolate::tide_state_at;
use crate::{
    EngineError, EnvironmentalService, FetchError, Location, TideExtremePoint, TideKind, Trend,
    WeatherRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, day, hour, minute, 0).unwrap()
}

fn noon(day: u32) -> DateTime<Utc> {
    noon_utc(NaiveDate::from_ymd_opt(2025, 7, day).unwrap())
}

fn extreme(ts: DateTime<Utc>, height: f64, kind: TideKind) -> TideExtremePoint {
    TideExtremePoint {
        timestamp: ts,
        height,
        kind,
    }
}

/// High 08:00 (3.0 m), low 14:00 (0.5 m), high 20:00 (3.2 m) on July 24th.
fn one_day_of_extremes() -> Vec<TideExtremePoint> {
    vec![
        extreme(at(24, 14, 0), 0.5, TideKind::Low),
        extreme(at(24, 8, 0), 3.0, TideKind::High),
        extreme(at(24, 20, 0), 3.2, TideKind::High),
    ]
}

/// Four extremes a day from July 23rd through July 31st.
fn many_days_of_extremes() -> Vec<TideExtremePoint> {
    (23..=31)
        .flat_map(|d| {
            [
                extreme(at(d, 2, 0), 3.1, TideKind::High),
                extreme(at(d, 8, 10), 0.4, TideKind::Low),
                extreme(at(d, 14, 25), 2.9, TideKind::High),
                extreme(at(d, 20, 35), 0.6, TideKind::Low),
            ]
        })
        .collect()
}

fn weather(ts: DateTime<Utc>, temperature: f64) -> WeatherRecord {
    WeatherRecord {
        timestamp: ts,
        temperature,
        wind_speed: 5.5,
        wind_direction: 200.0,
        precipitation: 0.0,
        cloud_cover: 40.0,
        pressure: 1013.0,
        humidity: 75.0,
        uv_index: 6.0,
        water_temperature: Some(17.5),
    }
}

struct ScriptedTides {
    outcome: Mutex<Result<Vec<TideExtremePoint>, FetchError>>,
    delay: Option<std::time::Duration>,
    calls: AtomicUsize,
}

impl ScriptedTides {
    fn new(outcome: Result<Vec<TideExtremePoint>, FetchError>) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn set(&self, outcome: Result<Vec<TideExtremePoint>, FetchError>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TideFetcher for ScriptedTides {
    async fn fetch_extremes(
        &self,
        _location: &Location,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<TideExtremePoint>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.lock().unwrap().clone()
    }
}

struct ScriptedWeather {
    current: Mutex<Result<WeatherRecord, FetchError>>,
    range: Mutex<Result<Vec<WeatherRecord>, FetchError>>,
    calls: AtomicUsize,
}

impl ScriptedWeather {
    fn new(
        current: Result<WeatherRecord, FetchError>,
        range: Result<Vec<WeatherRecord>, FetchError>,
    ) -> Self {
        Self {
            current: Mutex::new(current),
            range: Mutex::new(range),
            calls: AtomicUsize::new(0),
        }
    }

    fn fail_everything(&self, err: FetchError) {
        *self.current.lock().unwrap() = Err(err.clone());
        *self.range.lock().unwrap() = Err(err);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherFetcher for ScriptedWeather {
    async fn fetch_current(&self, _location: &Location) -> Result<WeatherRecord, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().clone()
    }

    async fn fetch_range(
        &self,
        _location: &Location,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let samples = self.range.lock().unwrap().clone()?;
        Ok(samples
            .into_iter()
            .filter(|s| start <= s.timestamp && s.timestamp <= end)
            .collect())
    }
}

struct Harness {
    service: Arc<EnvironmentalService>,
    clock: Arc<ManualClock>,
    tides: Arc<ScriptedTides>,
    weather: Arc<ScriptedWeather>,
    location: Location,
}

fn harness_with(tides: ScriptedTides, weather: ScriptedWeather) -> Harness {
    let clock = Arc::new(ManualClock::new(at(24, 11, 0)));
    let tides = Arc::new(tides);
    let weather = Arc::new(weather);
    let service = EnvironmentalService::new(
        CacheStore::in_memory(clock.clone()),
        tides.clone(),
        weather.clone(),
    );
    Harness {
        service: Arc::new(service),
        clock,
        tides,
        weather,
        location: Location::new("8418150", 43.658, -70.244).unwrap(),
    }
}

fn harness(tides: Result<Vec<TideExtremePoint>, FetchError>) -> Harness {
    harness_with(
        ScriptedTides::new(tides),
        ScriptedWeather::new(
            Ok(weather(at(24, 11, 0), 21.0)),
            Ok((24..=30).map(|d| weather(noon(d), 15.0 + d as f64 - 24.0)).collect()),
        ),
    )
}

// -- Current tide --

/// Halfway between a 3.0 m high and a 0.5 m low the tide is 1.75 m and falling.
#[tokio::test]
async fn current_tide_mid_ebb_scenario() {
    let h = harness(Ok(one_day_of_extremes()));

    let snapshot = h.service.current_tide(&h.location).await.unwrap();
    let state = snapshot.value;
    assert_eq!(state.timestamp, at(24, 11, 0));
    assert!((state.height - 1.75).abs() < 1e-12);
    assert_eq!(state.trend, Trend::Falling);
    assert_eq!(state.next_low_tide.unwrap().timestamp, at(24, 14, 0));
    assert_eq!(state.next_high_tide.unwrap().timestamp, at(24, 20, 0));
    assert!(!snapshot.stale);
    assert_eq!(snapshot.written_at, at(24, 11, 0));
}

/// A current-state entry younger than 30 minutes is served without a fetch.
#[tokio::test]
async fn fresh_entry_is_returned_without_fetching() {
    let h = harness(Ok(one_day_of_extremes()));

    h.service.current_tide(&h.location).await.unwrap();
    h.clock.advance(Duration::seconds(1799));
    let again = h.service.current_tide(&h.location).await.unwrap();

    assert_eq!(h.tides.calls(), 1);
    // Served unchanged, still describing the original instant
    assert_eq!(again.value.timestamp, at(24, 11, 0));
    assert!(!again.stale);
}

/// One second past the 30 minute TTL the remote is queried again.
#[tokio::test]
async fn expired_entry_triggers_refetch() {
    let h = harness(Ok(one_day_of_extremes()));

    h.service.current_tide(&h.location).await.unwrap();
    h.clock.advance(Duration::seconds(1801));
    let refreshed = h.service.current_tide(&h.location).await.unwrap();

    assert_eq!(h.tides.calls(), 2);
    assert_eq!(refreshed.written_at, at(24, 11, 0) + Duration::seconds(1801));
    assert_eq!(refreshed.value.timestamp, refreshed.written_at);
}

/// A failed refresh serves the expired entry, flagged stale.
#[tokio::test]
async fn stale_value_served_when_refresh_fails() {
    let h = harness(Ok(one_day_of_extremes()));

    let first = h.service.current_tide(&h.location).await.unwrap();
    h.clock.advance(Duration::hours(5));
    h.tides.set(Err(FetchError::Server(503)));

    let fallback = h.service.current_tide(&h.location).await.unwrap();
    assert_eq!(h.tides.calls(), 2);
    assert!(fallback.stale);
    assert_eq!(fallback.value, first.value);
    assert_eq!(fallback.written_at, at(24, 11, 0));
}

/// With nothing cached the fetch error reaches the caller.
#[tokio::test]
async fn error_surfaces_when_nothing_is_cached() {
    let h = harness(Err(FetchError::Network("connection refused".to_string())));

    let err = h.service.current_tide(&h.location).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Fetch(FetchError::Network("connection refused".to_string()))
    );
}

/// A successful fetch with no extremes is reported as missing data.
#[tokio::test]
async fn empty_extremes_count_as_no_data() {
    let h = harness(Ok(Vec::new()));

    let err = h.service.current_tide(&h.location).await.unwrap_err();
    assert_eq!(err, EngineError::Fetch(FetchError::NoDataAvailable));
}

/// Clearing tide entries leaves weather entries in place.
#[tokio::test]
async fn clearing_the_cache_forces_a_fetch() {
    let h = harness(Ok(one_day_of_extremes()));

    h.service.current_tide(&h.location).await.unwrap();
    h.service.current_weather(&h.location).await.unwrap();
    assert_eq!(h.service.clear_cache(Some(DataKind::Tide)), 1);

    h.service.current_tide(&h.location).await.unwrap();
    h.service.current_weather(&h.location).await.unwrap();
    assert_eq!(h.tides.calls(), 2);
    assert_eq!(h.weather.calls(), 1);
}

/// Simultaneous queries for one key trigger a single fetch.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_share_one_fetch() {
    let mut tides = ScriptedTides::new(Ok(one_day_of_extremes()));
    tides.delay = Some(std::time::Duration::from_millis(50));
    let h = harness_with(
        tides,
        ScriptedWeather::new(Err(FetchError::NoDataAvailable), Ok(Vec::new())),
    );

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let service = h.service.clone();
        let location = h.location.clone();
        tasks.push(tokio::spawn(async move {
            service.current_tide(&location).await
        }));
    }
    for task in tasks {
        let snapshot = task.await.unwrap().unwrap();
        assert!((snapshot.value.height - 1.75).abs() < 1e-12);
    }

    assert_eq!(h.tides.calls(), 1);
}

/// Callers queued behind a failed fetch get its error without fetching again.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_share_one_failure() {
    let mut tides = ScriptedTides::new(Err(FetchError::Server(503)));
    tides.delay = Some(std::time::Duration::from_millis(100));
    let h = harness_with(
        tides,
        ScriptedWeather::new(Err(FetchError::NoDataAvailable), Ok(Vec::new())),
    );

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let service = h.service.clone();
        let location = h.location.clone();
        tasks.push(tokio::spawn(async move {
            service.current_tide(&location).await
        }));
    }
    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, EngineError::Fetch(FetchError::Server(503)));
    }

    assert_eq!(h.tides.calls(), 1);

    // Once nobody is waiting, the next query tries the remote again
    h.service.current_tide(&h.location).await.unwrap_err();
    assert_eq!(h.tides.calls(), 2);
}

// -- Tide forecast and point queries --

/// Forecast lengths outside 1 to 7 days are clamped, not rejected.
#[tokio::test]
async fn tide_forecast_is_clamped_to_a_week() {
    let h = harness(Ok(many_days_of_extremes()));

    let week = h.service.tide_forecast(&h.location, 10).await.unwrap();
    assert_eq!(week.value.len(), 7);
    assert_eq!(week.value[0].timestamp, noon(24));
    assert_eq!(week.value[6].timestamp, noon(30));
    assert!(week.value.iter().all(|s| s.trend == Trend::Rising));

    // 10 and 7 share one cache entry
    h.service.tide_forecast(&h.location, 7).await.unwrap();
    assert_eq!(h.tides.calls(), 1);

    let one = h.service.tide_forecast(&h.location, 0).await.unwrap();
    assert_eq!(one.value.len(), 1);
    assert_eq!(one.value[0].timestamp, noon(24));
}

/// An expired tide forecast is served stale when the refresh fails.
#[tokio::test]
async fn tide_forecast_falls_back_to_stale_entry() {
    let h = harness(Ok(many_days_of_extremes()));
    let first = h.service.tide_forecast(&h.location, 7).await.unwrap();
    h.clock.advance(Duration::hours(7));
    h.tides.set(Err(FetchError::Network("offline".to_string())));

    let fallback = h.service.tide_forecast(&h.location, 7).await.unwrap();
    assert_eq!(h.tides.calls(), 2);
    assert!(fallback.stale);
    assert_eq!(fallback.value, first.value);
    assert_eq!(fallback.written_at, at(24, 11, 0));
}

/// Instants inside a fresh forecast are interpolated from its extremes.
#[tokio::test]
async fn tide_at_is_answered_from_fresh_forecast() {
    let h = harness(Ok(many_days_of_extremes()));
    h.service.tide_forecast(&h.location, 7).await.unwrap();

    let instant = at(26, 15, 30);
    let snapshot = h.service.tide_at(&h.location, instant).await.unwrap();

    assert_eq!(h.tides.calls(), 1);
    assert!(!snapshot.stale);
    assert_eq!(snapshot.value, tide_state_at(&many_days_of_extremes(), instant));
}

/// Instants beyond the forecast are fetched and cached under their own key.
#[tokio::test]
async fn tide_at_outside_forecast_queries_remote() {
    let h = harness(Ok(many_days_of_extremes()));
    h.service.tide_forecast(&h.location, 7).await.unwrap();

    let instant = Utc.with_ymd_and_hms(2025, 8, 20, 9, 0, 0).unwrap();
    let snapshot = h.service.tide_at(&h.location, instant).await.unwrap();

    assert_eq!(h.tides.calls(), 2);
    assert_eq!(snapshot.value.timestamp, instant);

    // The point answer is cached under its own key
    h.service.tide_at(&h.location, instant).await.unwrap();
    assert_eq!(h.tides.calls(), 2);
}

/// An expired forecast does not answer point queries while the remote works.
#[tokio::test]
async fn tide_at_stale_forecast_refetches_point() {
    let h = harness(Ok(many_days_of_extremes()));
    h.service.tide_forecast(&h.location, 7).await.unwrap();
    h.clock.advance(Duration::hours(7));

    h.service.tide_at(&h.location, at(26, 15, 30)).await.unwrap();
    assert_eq!(h.tides.calls(), 2);
}

/// Offline point queries use the closest cached day, earlier one on a tie.
#[tokio::test]
async fn tide_at_falls_back_to_closest_forecast_day() {
    let h = harness(Ok(many_days_of_extremes()));
    h.service.tide_forecast(&h.location, 7).await.unwrap();
    h.clock.advance(Duration::hours(7));
    h.tides.set(Err(FetchError::Network("offline".to_string())));

    // Day 3 of the forecast at 18:00 is closest to day 3 noon
    let snapshot = h.service.tide_at(&h.location, at(27, 18, 0)).await.unwrap();
    assert!(snapshot.stale);
    assert_eq!(snapshot.value.timestamp, noon(27));
    assert_eq!(snapshot.written_at, at(24, 11, 0));

    // Midnight is equidistant: the earlier noon wins
    let tie = h.service.tide_at(&h.location, at(28, 0, 0)).await.unwrap();
    assert_eq!(tie.value.timestamp, noon(27));

    let later = h.service.tide_at(&h.location, at(28, 0, 1)).await.unwrap();
    assert_eq!(later.value.timestamp, noon(28));
}

/// The closest record is picked across all cached forecasts, not just the longest.
#[tokio::test]
async fn tide_at_fallback_searches_every_cached_forecast() {
    let h = harness(Ok(many_days_of_extremes()));
    // A week from July 24th, then a single day from July 31st
    h.service.tide_forecast(&h.location, 7).await.unwrap();
    h.clock.set(at(31, 11, 0));
    h.service.tide_forecast(&h.location, 1).await.unwrap();
    h.clock.advance(Duration::hours(7));
    h.tides.set(Err(FetchError::Network("offline".to_string())));

    let snapshot = h.service.tide_at(&h.location, at(31, 23, 30)).await.unwrap();
    assert!(snapshot.stale);
    assert_eq!(snapshot.value.timestamp, noon(31));
    assert_eq!(snapshot.written_at, at(31, 11, 0));

    // The week-long forecast still answers for its own days
    let earlier = h.service.tide_at(&h.location, at(26, 13, 0)).await.unwrap();
    assert_eq!(earlier.value.timestamp, noon(26));
    assert_eq!(earlier.written_at, at(24, 11, 0));
}

/// An expired entry for the exact instant beats the closest forecast day.
#[tokio::test]
async fn tide_at_prefers_stale_point_entry_over_forecast() {
    let h = harness(Ok(many_days_of_extremes()));
    h.service.tide_forecast(&h.location, 7).await.unwrap();
    let instant = Utc.with_ymd_and_hms(2025, 8, 20, 9, 0, 0).unwrap();
    let first = h.service.tide_at(&h.location, instant).await.unwrap();

    h.clock.advance(Duration::hours(7));
    h.tides.set(Err(FetchError::Server(502)));
    let snapshot = h.service.tide_at(&h.location, instant).await.unwrap();

    assert_eq!(h.tides.calls(), 3);
    assert!(snapshot.stale);
    assert_eq!(snapshot.value, first.value);
    assert_eq!(snapshot.value.timestamp, instant);
    assert_eq!(snapshot.written_at, at(24, 11, 0));
}

/// Without any cached data a point query returns the fetch error.
#[tokio::test]
async fn tide_at_without_forecast_propagates_error() {
    let h = harness(Err(FetchError::InvalidLocation));

    let err = h.service.tide_at(&h.location, at(27, 18, 0)).await.unwrap_err();
    assert_eq!(err, EngineError::Fetch(FetchError::InvalidLocation));
}

// -- Weather --

/// Current weather follows the same stale fallback as tides.
#[tokio::test]
async fn current_weather_falls_back_to_stale_entry() {
    let h = harness(Ok(Vec::new()));

    let first = h.service.current_weather(&h.location).await.unwrap();
    assert_eq!(first.value.temperature, 21.0);

    h.clock.advance(Duration::minutes(31));
    h.weather.fail_everything(FetchError::Decoding("truncated body".to_string()));
    let second = h.service.current_weather(&h.location).await.unwrap();

    assert_eq!(h.weather.calls(), 2);
    assert!(second.stale);
    assert_eq!(second.value, first.value);
}

/// The weather forecast holds one record per day, clamped to a week.
#[tokio::test]
async fn weather_forecast_one_record_per_day() {
    let h = harness(Ok(Vec::new()));

    let week = h.service.weather_forecast(&h.location, 9).await.unwrap();
    assert_eq!(week.value.len(), 7);
    let stamps: Vec<_> = week.value.iter().map(|w| w.timestamp).collect();
    assert_eq!(stamps, (24..=30).map(noon).collect::<Vec<_>>());

    let one = h.service.weather_forecast(&h.location, 0).await.unwrap();
    assert_eq!(one.value.len(), 1);
}

/// An expired weather forecast is served stale when the refresh fails.
#[tokio::test]
async fn weather_forecast_falls_back_to_stale_entry() {
    let h = harness(Ok(Vec::new()));
    let first = h.service.weather_forecast(&h.location, 3).await.unwrap();
    h.clock.advance(Duration::hours(4));
    h.weather.fail_everything(FetchError::Server(500));

    let fallback = h.service.weather_forecast(&h.location, 3).await.unwrap();
    assert_eq!(h.weather.calls(), 2);
    assert!(fallback.stale);
    assert_eq!(fallback.value, first.value);
    assert_eq!(fallback.written_at, at(24, 11, 0));
}

/// Weather forecasts stay fresh for exactly three hours.
#[tokio::test]
async fn weather_forecast_ttl_is_three_hours() {
    let h = harness(Ok(Vec::new()));

    h.service.weather_forecast(&h.location, 7).await.unwrap();
    h.clock.advance(Duration::hours(3));
    h.service.weather_forecast(&h.location, 7).await.unwrap();
    assert_eq!(h.weather.calls(), 1);

    h.clock.advance(Duration::seconds(1));
    h.service.weather_forecast(&h.location, 7).await.unwrap();
    assert_eq!(h.weather.calls(), 2);
}

/// A fresh weather forecast answers point queries for the same day.
#[tokio::test]
async fn weather_at_matches_day_in_fresh_forecast() {
    let h = harness(Ok(Vec::new()));
    h.service.weather_forecast(&h.location, 7).await.unwrap();

    let snapshot = h.service.weather_at(&h.location, at(26, 7, 0)).await.unwrap();
    assert_eq!(h.weather.calls(), 1);
    assert_eq!(snapshot.value.timestamp, noon(26));
    assert!(!snapshot.stale);
}

/// Offline weather point queries use the closest cached forecast record.
#[tokio::test]
async fn weather_at_closest_match_fallback() {
    let h = harness(Ok(Vec::new()));
    h.service.weather_forecast(&h.location, 7).await.unwrap();
    h.clock.advance(Duration::hours(4));
    h.weather.fail_everything(FetchError::Server(500));

    let snapshot = h.service.weather_at(&h.location, at(27, 18, 0)).await.unwrap();
    assert!(snapshot.stale);
    assert_eq!(snapshot.value.timestamp, noon(27));

    let later = h.service.weather_at(&h.location, at(28, 0, 1)).await.unwrap();
    assert_eq!(later.value.timestamp, noon(28));
}

/// Point queries keep the fetched sample closest to the instant.
#[tokio::test]
async fn weather_at_point_query_picks_closest_sample() {
    let h = harness(Ok(Vec::new()));

    let snapshot = h.service.weather_at(&h.location, at(27, 15, 0)).await.unwrap();
    assert_eq!(snapshot.value.timestamp, noon(27));
    assert!(!snapshot.stale);
    assert_eq!(h.weather.calls(), 1);
}

// -- Persistence --

/// Entries written to disk survive a restart and serve as a stale fallback.
#[tokio::test]
async fn file_cache_serves_stale_data_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let location = Location::new("8418150", 43.658, -70.244).unwrap();
    let clock = Arc::new(ManualClock::new(at(24, 11, 0)));

    let online = EnvironmentalService::new(
        CacheStore::new(Box::new(FileBackend::new(temp_dir.path())), clock.clone()),
        Arc::new(ScriptedTides::new(Ok(one_day_of_extremes()))),
        Arc::new(ScriptedWeather::new(Err(FetchError::NoDataAvailable), Ok(Vec::new()))),
    );
    let first = online.current_tide(&location).await.unwrap();
    drop(online);

    clock.advance(Duration::days(1));
    let offline = EnvironmentalService::new(
        CacheStore::new(Box::new(FileBackend::new(temp_dir.path())), clock),
        Arc::new(ScriptedTides::new(Err(FetchError::Network("offline".to_string())))),
        Arc::new(ScriptedWeather::new(Err(FetchError::NoDataAvailable), Ok(Vec::new()))),
    );
    let restored = offline.current_tide(&location).await.unwrap();

    assert!(restored.stale);
    assert_eq!(restored.value, first.value);
    assert_eq!(restored.written_at, at(24, 11, 0));
}
