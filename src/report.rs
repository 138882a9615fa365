//! # Terminal Reports
//!
//! Plain-text rendering of tide and weather snapshots for the CLI. Every
//! function returns a `String` so output can be tested without a terminal.
//! Values served from an expired cache carry a `⚠ STALE` banner with the time
//! they were fetched.

use crate::{Snapshot, TideExtremePoint, TideState, Trend, WeatherRecord};
use std::fmt::Write;

/// Width of the forecast height bars in characters
const BAR_WIDTH: usize = 30;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

fn trend_label(trend: Trend) -> &'static str {
    match trend {
        Trend::Rising => "↑ rising",
        Trend::Falling => "↓ falling",
        Trend::High => "▲ high",
        Trend::Low => "▼ low",
    }
}

fn banner<T>(out: &mut String, snapshot: &Snapshot<T>) {
    if snapshot.stale {
        let _ = writeln!(
            out,
            "⚠ STALE (fetched {})",
            snapshot.written_at.format(TIME_FORMAT)
        );
    }
}

fn extreme_line(label: &str, extreme: Option<&TideExtremePoint>) -> String {
    match extreme {
        Some(e) => format!("{label}: {:.2} m at {}", e.height, e.timestamp.format(TIME_FORMAT)),
        None => format!("{label}: unknown"),
    }
}

/// Current or point-in-time tide state.
pub fn render_tide_state(snapshot: &Snapshot<TideState>) -> String {
    let mut out = String::new();
    banner(&mut out, snapshot);
    let state = &snapshot.value;
    let _ = writeln!(out, "Tide at {}", state.timestamp.format(TIME_FORMAT));
    let _ = writeln!(out, "  Height: {:.2} m ({})", state.height, trend_label(state.trend));
    let _ = writeln!(out, "  {}", extreme_line("Next high", state.next_high_tide.as_ref()));
    let _ = writeln!(out, "  {}", extreme_line("Next low", state.next_low_tide.as_ref()));
    out
}

/// Per-day tide forecast with a height bar for each day.
pub fn render_tide_forecast(snapshot: &Snapshot<Vec<TideState>>) -> String {
    let mut out = String::new();
    banner(&mut out, snapshot);
    let days = &snapshot.value;
    if days.is_empty() {
        out.push_str("No forecast data\n");
        return out;
    }

    let (min, max) = days.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s.height), hi.max(s.height))
    });
    let span = max - min;

    for state in days {
        // A flat forecast gets half-width bars
        let fraction = if span > 0.0 { (state.height - min) / span } else { 0.5 };
        let filled = 1 + (fraction * (BAR_WIDTH - 1) as f64).round() as usize;
        let _ = writeln!(
            out,
            "{}  {:>6.2} m  {:<width$}  {}",
            state.timestamp.format("%a %m-%d"),
            state.height,
            "█".repeat(filled),
            trend_label(state.trend),
            width = BAR_WIDTH
        );
    }
    out
}

/// A single weather record.
pub fn render_weather(snapshot: &Snapshot<WeatherRecord>) -> String {
    let mut out = String::new();
    banner(&mut out, snapshot);
    let w = &snapshot.value;
    let _ = writeln!(out, "Weather at {}", w.timestamp.format(TIME_FORMAT));
    let _ = writeln!(out, "  Temperature: {:.1} °C", w.temperature);
    let _ = writeln!(out, "  Wind: {:.1} m/s from {:.0}°", w.wind_speed, w.wind_direction);
    let _ = writeln!(
        out,
        "  Precipitation: {:.1} mm, cloud {:.0}%, humidity {:.0}%",
        w.precipitation, w.cloud_cover, w.humidity
    );
    let _ = writeln!(out, "  Pressure: {:.0} hPa, UV {:.1}", w.pressure, w.uv_index);
    if let Some(water) = w.water_temperature {
        let _ = writeln!(out, "  Water: {water:.1} °C");
    }
    out
}

/// Per-day weather forecast, one line per day.
pub fn render_weather_forecast(snapshot: &Snapshot<Vec<WeatherRecord>>) -> String {
    let mut out = String::new();
    banner(&mut out, snapshot);
    if snapshot.value.is_empty() {
        out.push_str("No forecast data\n");
        return out;
    }
    for w in &snapshot.value {
        let _ = writeln!(
            out,
            "{}  {:>5.1} °C  {:>4.1} m/s  {:>5.1} mm  UV {:.0}",
            w.timestamp.format("%a %m-%d"),
            w.temperature,
            w.wind_speed,
            w.precipitation,
            w.uv_index
        );
    }
    out
}
