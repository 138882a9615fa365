//! # Configuration Management
//!
//! This module loads runtime settings from `tide-conditions.toml`: the location
//! to query, where the cache lives, and how to reach NOAA. Cache TTLs are fixed
//! per data kind and deliberately absent from this file.

use crate::{EngineError, Location};
use anyhow::Context;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file name, resolved against the working directory
pub const CONFIG_FILE: &str = "tide-conditions.toml";

/// Application configuration loaded from tide-conditions.toml
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub cache: CacheConfig,
    pub noaa: NoaaConfig,
    pub forecast: ForecastConfig,
}

/// Location the CLI reports on
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Stable id; for the NOAA source this is the station id (e.g. "8418150")
    pub id: String,
    /// Human-readable name for reference
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        LocationConfig {
            id: "8418150".to_string(),
            name: "Portland, ME".to_string(),
            latitude: 43.6567,
            longitude: -70.2467,
        }
    }
}

/// Cache placement
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for the file cache; unset keeps the cache in memory
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Entries older than this many hours are purged at startup
    pub purge_after_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: Some(PathBuf::from("/tmp/tide-conditions")),
            purge_after_hours: 7 * 24,
        }
    }
}

/// NOAA CO-OPS API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NoaaConfig {
    pub base_url: String,
    /// Vertical datum heights are reported against
    pub datum: String,
    /// "metric" (meters) or "english" (feet)
    pub units: String,
    /// Whole-request timeout
    pub timeout_secs: u64,
}

impl Default for NoaaConfig {
    fn default() -> Self {
        NoaaConfig {
            base_url: "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter".to_string(),
            datum: "MLLW".to_string(),
            units: "metric".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Forecast defaults for the CLI
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Days shown when `--days` is not given (clamped to 1..=7)
    pub days: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig { days: 3 }
    }
}

impl Config {
    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!("Loaded configuration for location: {}", config.location.name);
                    config
                }
                Err(e) => {
                    warn!("Invalid config file {}: {}", path.display(), e);
                    warn!("Using default configuration (Portland, ME)");
                    Self::default()
                }
            },
            Err(_) => {
                info!(
                    "No config file at {}, using default configuration (Portland, ME)",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Write this configuration as TOML
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self).context("serialize config")?;
        fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validated [`Location`] for the configured place
    pub fn location(&self) -> Result<Location, EngineError> {
        Location::new(
            self.location.id.clone(),
            self.location.latitude,
            self.location.longitude,
        )
    }
}
