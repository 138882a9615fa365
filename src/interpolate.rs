//! # Tide State Interpolation
//!
//! Turns a sparse list of high/low tide events into a tide state at any
//! instant.
//!
//! ## Algorithm
//! 1. Stable-sort the extremes by timestamp
//! 2. `previous` = last extreme at or before the instant, `next` = first
//!    extreme strictly after it
//! 3. Linear interpolation between the two:
//!    ```text
//!    ratio  = (t - t_prev) / (t_next - t_prev)
//!    height = h_prev + (h_next - h_prev) * ratio
//!    ```
//! 4. Trend from the `(previous, next)` kinds: High→Low is falling, Low→High is
//!    rising. Two consecutive extremes of the same kind are a source anomaly
//!    and the trend falls back to the previous extreme's kind.
//!
//! ## Degenerate Input
//! - Instant before every extreme: height and trend come from the earliest one
//! - Instant after every extreme: height and trend come from the latest one
//! - No extremes at all: height 0.0, trend `Low`. Callers must read this as
//!   "no data", not as a real tide.
//!
//! Linear interpolation only approximates the roughly sinusoidal tide curve,
//! which is close near mid-tide and least accurate near the extremes.

use crate::{TideExtremePoint, TideKind, TideState, Trend};
use chrono::{DateTime, Utc};

/// Tide state at `instant` given extremes in any order.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use tide_conditions::{interpolate::tide_state_at, TideExtremePoint, TideKind, Trend};
///
/// let at = |h| Utc.with_ymd_and_hms(2025, 7, 24, h, 0, 0).unwrap();
/// let extremes = [
///     TideExtremePoint { timestamp: at(14), height: 0.5, kind: TideKind::Low },
///     TideExtremePoint { timestamp: at(8), height: 3.0, kind: TideKind::High },
/// ];
///
/// let state = tide_state_at(&extremes, at(11));
/// assert_eq!(state.height, 1.75);
/// assert_eq!(state.trend, Trend::Falling);
/// ```
pub fn tide_state_at(extremes: &[TideExtremePoint], instant: DateTime<Utc>) -> TideState {
    let mut sorted = extremes.to_vec();
    sorted.sort_by_key(|e| e.timestamp);
    state_from_sorted(&sorted, instant)
}

/// Same as [`tide_state_at`] for input already sorted by timestamp.
pub(crate) fn state_from_sorted(sorted: &[TideExtremePoint], instant: DateTime<Utc>) -> TideState {
    // Index of the first extreme strictly after the instant
    let split = sorted.partition_point(|e| e.timestamp <= instant);
    let previous = split.checked_sub(1).map(|i| &sorted[i]);
    let next = sorted.get(split);

    let (height, trend) = match (previous, next) {
        (Some(prev), Some(next)) => interpolate(prev, next, instant),
        (None, Some(earliest)) => (earliest.height, Trend::from(earliest.kind)),
        (Some(latest), None) => (latest.height, Trend::from(latest.kind)),
        (None, None) => (0.0, Trend::Low),
    };

    let upcoming = &sorted[split..];
    TideState {
        timestamp: instant,
        height,
        trend,
        next_high_tide: upcoming.iter().find(|e| e.kind == TideKind::High).copied(),
        next_low_tide: upcoming.iter().find(|e| e.kind == TideKind::Low).copied(),
    }
}

fn interpolate(
    prev: &TideExtremePoint,
    next: &TideExtremePoint,
    instant: DateTime<Utc>,
) -> (f64, Trend) {
    // Sitting exactly on an extreme reports that extreme as-is
    if instant == prev.timestamp {
        return (prev.height, Trend::from(prev.kind));
    }

    let span = (next.timestamp - prev.timestamp).num_milliseconds() as f64;
    let elapsed = (instant - prev.timestamp).num_milliseconds() as f64;
    let ratio = elapsed / span;
    let height = prev.height + (next.height - prev.height) * ratio;

    (height, trend_between(prev.kind, next.kind))
}

/// Trend while moving from a `prev` extreme towards a `next` extreme.
pub fn trend_between(prev: TideKind, next: TideKind) -> Trend {
    match (prev, next) {
        (TideKind::High, TideKind::Low) => Trend::Falling,
        (TideKind::Low, TideKind::High) => Trend::Rising,
        // Same-kind neighbours: keep what the last extreme said
        (kind, _) => Trend::from(kind),
    }
}
