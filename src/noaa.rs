//! # NOAA Tide Predictions
//!
//! [`TideFetcher`] backed by the NOAA CO-OPS data API. The location id is used
//! as the NOAA station id (e.g. `8418150` for Portland, ME).
//!
//! ## Request
//! ```text
//! GET {base_url}?product=predictions&interval=hilo&time_zone=gmt
//!     &datum=MLLW&units=metric&format=json
//!     &station=8418150&begin_date=20250724 00:00&end_date=20250731 00:00
//! ```
//!
//! ## Response
//! ```json
//! {"predictions": [
//!   {"t": "2025-07-24 02:13", "v": "3.012", "type": "H"},
//!   {"t": "2025-07-24 08:27", "v": "-0.104", "type": "L"}
//! ]}
//! ```
//! or, on failure, `{"error": {"message": "..."}}` with HTTP 200.
//!
//! Times are requested in GMT so no timezone conversion happens on this side.

use crate::config::NoaaConfig;
use crate::fetcher::TideFetcher;
use crate::{FetchError, Location, TideExtremePoint, TideKind};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;

/// Timestamp format of the `t` field and of `begin_date`/`end_date`.
const NOAA_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const NOAA_QUERY_FORMAT: &str = "%Y%m%d %H:%M";

#[derive(Debug, Deserialize)]
struct PredictionsResponse {
    predictions: Option<Vec<RawPrediction>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct RawPrediction {
    t: String,
    v: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// HTTP client for NOAA high/low predictions.
#[derive(Debug, Clone)]
pub struct NoaaTideFetcher {
    client: reqwest::Client,
    config: NoaaConfig,
}

impl NoaaTideFetcher {
    pub fn new(config: NoaaConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TideFetcher for NoaaTideFetcher {
    async fn fetch_extremes(
        &self,
        location: &Location,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TideExtremePoint>, FetchError> {
        let station = location.id();
        if !is_station_id(station) {
            return Err(FetchError::InvalidLocation);
        }

        let begin = start.format(NOAA_QUERY_FORMAT).to_string();
        let end = end.format(NOAA_QUERY_FORMAT).to_string();
        debug!("Requesting NOAA hi/lo predictions for {station} from {begin} to {end}");

        let body = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("product", "predictions"),
                ("application", "tide-conditions"),
                ("interval", "hilo"),
                ("time_zone", "gmt"),
                ("format", "json"),
                ("datum", self.config.datum.as_str()),
                ("units", self.config.units.as_str()),
                ("station", station),
                ("begin_date", begin.as_str()),
                ("end_date", end.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let extremes = parse_predictions(&body)?;
        debug!("NOAA returned {} extremes for {station}", extremes.len());
        Ok(extremes)
    }
}

/// NOAA station ids are seven digits.
fn is_station_id(id: &str) -> bool {
    id.len() == 7 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Decode a hi/lo predictions body into extremes.
pub fn parse_predictions(body: &str) -> Result<Vec<TideExtremePoint>, FetchError> {
    let response: PredictionsResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Decoding(e.to_string()))?;

    if let Some(error) = response.error {
        warn!("NOAA rejected request: {}", error.message);
        return Err(if error.message.to_lowercase().contains("station") {
            FetchError::InvalidLocation
        } else {
            FetchError::NoDataAvailable
        });
    }

    let raw = response.predictions.unwrap_or_default();
    if raw.is_empty() {
        return Err(FetchError::NoDataAvailable);
    }

    raw.iter().map(parse_prediction).collect()
}

fn parse_prediction(raw: &RawPrediction) -> Result<TideExtremePoint, FetchError> {
    let timestamp = NaiveDateTime::parse_from_str(raw.t.trim(), NOAA_TIME_FORMAT)
        .map_err(|e| FetchError::Decoding(format!("bad time {:?}: {e}", raw.t)))?
        .and_utc();

    let height: f64 = raw
        .v
        .trim()
        .parse()
        .map_err(|_| FetchError::Decoding(format!("bad height {:?}", raw.v)))?;

    // Mixed-tide stations report HH/LH (higher/lower high) and LL/HL
    let kind = match raw.kind.trim() {
        k if k.ends_with('H') => TideKind::High,
        k if k.ends_with('L') => TideKind::Low,
        other => return Err(FetchError::Decoding(format!("bad type {other:?}"))),
    };

    Ok(TideExtremePoint {
        timestamp,
        height,
        kind,
    })
}
