//! # Forecast Aggregation
//!
//! Reduces multi-day extremes or weather samples to one representative record
//! per UTC calendar day.
//!
//! Tide days are represented by the interpolated state at 12:00:00 UTC. The
//! full extreme list is used for each noon, so a noon that falls between the
//! last extreme of one day and the first of the next still interpolates
//! correctly. Weather days are represented by the first sample the source
//! provided for that day, unchanged.

use crate::interpolate::state_from_sorted;
use crate::{TideExtremePoint, TideState, Timestamped, WeatherRecord};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeSet;

/// Upper bound on forecast length in days.
pub const MAX_FORECAST_DAYS: u8 = 7;

/// Clamp a requested day count into `1..=MAX_FORECAST_DAYS`.
///
/// ```
/// use tide_conditions::forecast::clamp_days;
///
/// assert_eq!(clamp_days(0), 1);
/// assert_eq!(clamp_days(3), 3);
/// assert_eq!(clamp_days(10), 7);
/// ```
pub fn clamp_days(days: u32) -> u8 {
    days.clamp(1, u32::from(MAX_FORECAST_DAYS)) as u8
}

/// 12:00:00 UTC on `day`.
pub fn noon_utc(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN))
        .and_utc()
}

/// One noon tide state per UTC day that has extremes, starting at `from`.
///
/// `days` is clamped with [`clamp_days`]. Days before `from` only serve as
/// interpolation neighbours.
pub fn daily_tide_states(
    extremes: &[TideExtremePoint],
    from: NaiveDate,
    days: u32,
) -> Vec<TideState> {
    let mut sorted = extremes.to_vec();
    sorted.sort_by_key(|e| e.timestamp);

    let day_set: BTreeSet<NaiveDate> = sorted
        .iter()
        .map(|e| e.timestamp.date_naive())
        .filter(|day| *day >= from)
        .collect();

    day_set
        .into_iter()
        .take(usize::from(clamp_days(days)))
        .map(|day| state_from_sorted(&sorted, noon_utc(day)))
        .collect()
}

/// First sample of each UTC day starting at `from`, in time order.
pub fn daily_weather(samples: &[WeatherRecord], from: NaiveDate, days: u32) -> Vec<WeatherRecord> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    let mut seen = BTreeSet::new();
    sorted
        .into_iter()
        .filter(|s| s.timestamp.date_naive() >= from)
        .filter(|s| seen.insert(s.timestamp.date_naive()))
        .take(usize::from(clamp_days(days)))
        .collect()
}

/// The item nearest to `instant`; on a tie the earlier one wins.
pub fn closest_to<T: Timestamped>(items: &[T], instant: DateTime<Utc>) -> Option<&T> {
    items
        .iter()
        .min_by_key(|item| ((item.timestamp() - instant).abs(), item.timestamp()))
}

/// True if sorted `extremes` have one at or before `instant` and one after it.
pub fn brackets(sorted: &[TideExtremePoint], instant: DateTime<Utc>) -> bool {
    match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => first.timestamp <= instant && instant < last.timestamp,
        _ => false,
    }
}
