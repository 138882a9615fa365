//! # Tide Conditions Command Line
//!
//! Prints the current tide state, an N-day tide forecast, or the tide at a given
//! instant for the configured NOAA station, served through the on-disk cache.
//! When NOAA cannot be reached the last cached answer is shown with a staleness
//! banner instead of an error.
//!
//! Weather has no remote source here, so `--weather` only ever reports what an
//! earlier process left in the cache.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tide_conditions::cache::{CacheStore, FileBackend};
use tide_conditions::clock::{Clock, SystemClock};
use tide_conditions::config::{Config, CONFIG_FILE};
use tide_conditions::fetcher::Unconfigured;
use tide_conditions::noaa::NoaaTideFetcher;
use tide_conditions::{report, EngineError, EnvironmentalService, Location};

#[derive(Parser, Debug)]
#[command(name = "tide-conditions", version, about = "Cached tide and weather conditions")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Show a per-day forecast instead of current conditions
    #[arg(long, conflicts_with = "at")]
    forecast: bool,

    /// Forecast length in days, clamped to 1-7 (implies --forecast)
    #[arg(long, conflicts_with = "at")]
    days: Option<u32>,

    /// Show conditions at an RFC 3339 instant, e.g. 2025-07-24T18:00:00Z
    #[arg(long)]
    at: Option<DateTime<Utc>>,

    /// Report weather instead of tide
    #[arg(long)]
    weather: bool,

    /// Drop every cached entry before querying
    #[arg(long)]
    clear_cache: bool,
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = Config::load_from_path(&cli.config);
    let location = config.location().context("invalid [location] in config")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = match &config.cache.dir {
        Some(dir) => {
            let backend = FileBackend::new(dir.clone());
            info!("Caching under {}", backend.dir().display());
            CacheStore::new(Box::new(backend), clock)
        }
        None => CacheStore::in_memory(clock),
    };
    let purged = store.purge_older_than(Duration::from_secs(config.cache.purge_after_hours * 3600));
    if purged > 0 {
        info!("Purged {purged} old cache entries");
    }

    let tides = NoaaTideFetcher::new(config.noaa.clone()).context("build NOAA client")?;
    let service = EnvironmentalService::new(store, Arc::new(tides), Arc::new(Unconfigured));
    if cli.clear_cache {
        service.clear_cache(None);
    }

    // Create Tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;
    let output = rt
        .block_on(run(&service, &location, &cli, &config))
        .with_context(|| format!("conditions unavailable for {}", config.location.name))?;

    println!("{} ({})", config.location.name, location.id());
    print!("{output}");
    Ok(())
}

async fn run(
    service: &EnvironmentalService,
    location: &Location,
    cli: &Cli,
    config: &Config,
) -> Result<String, EngineError> {
    let days = cli.days.unwrap_or(config.forecast.days);
    let forecast = cli.forecast || cli.days.is_some();

    let text = match (cli.weather, cli.at) {
        (false, Some(instant)) => {
            report::render_tide_state(&service.tide_at(location, instant).await?)
        }
        (false, None) if forecast => {
            report::render_tide_forecast(&service.tide_forecast(location, days).await?)
        }
        (false, None) => report::render_tide_state(&service.current_tide(location).await?),
        (true, Some(instant)) => {
            report::render_weather(&service.weather_at(location, instant).await?)
        }
        (true, None) if forecast => {
            report::render_weather_forecast(&service.weather_forecast(location, days).await?)
        }
        (true, None) => report::render_weather(&service.current_weather(location).await?),
    };
    Ok(text)
}
