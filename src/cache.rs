//! # Environmental Data Cache
//!
//! TTL-aware storage of serialized payloads keyed by data kind, query shape and
//! location. The store never fails a caller: missing or undecodable entries read
//! as absent and write failures are logged and dropped, so the worst case is a
//! redundant network fetch on the next query.
//!
//! ## Keys
//! Keys are typed ([`CacheKey`]) and only rendered to strings at the storage
//! boundary, in the form `{kind}_{shape}_{location}`:
//! - `tide_current_8418150`
//! - `weather_forecast7_8418150`
//! - `tide_at1753358400_8418150`
//!
//! ## TTL Policy
//! | Kind | Shape | TTL |
//! |---|---|---|
//! | tide | current | 30 min |
//! | tide | forecast / point | 6 h |
//! | weather | current | 30 min |
//! | weather | forecast / point | 3 h |
//!
//! An entry is expired when `now - written_at > ttl`; an entry exactly `ttl`
//! old is still fresh.
//!
//! ## Backends
//! - [`MemoryBackend`]: process-local map, the default
//! - [`FileBackend`]: one JSON file per key, replaced with temp-file + rename so
//!   a reader never observes a half-written entry

use crate::clock::Clock;
use crate::Location;
use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// TTL for "current" tide and weather snapshots (30 minutes)
pub const CURRENT_TTL: Duration = Duration::from_secs(30 * 60);

/// TTL for tide forecasts and tide point queries (6 hours)
pub const TIDE_FORECAST_TTL: Duration = Duration::from_secs(6 * 3600);

/// TTL for weather forecasts and weather point queries (3 hours)
pub const WEATHER_FORECAST_TTL: Duration = Duration::from_secs(3 * 3600);

/// Which family of data an entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    Tide,
    Weather,
}

impl DataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Tide => "tide",
            DataKind::Weather => "weather",
        }
    }
}

/// The shape of the query an entry answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryShape {
    /// Conditions right now
    Current,
    /// Per-day records for the next `days` days
    Forecast { days: u8 },
    /// Conditions at one instant, in epoch seconds
    AtTime(i64),
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryShape::Current => write!(f, "current"),
            QueryShape::Forecast { days } => write!(f, "forecast{days}"),
            QueryShape::AtTime(epoch) => write!(f, "at{epoch}"),
        }
    }
}

/// Composite cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: DataKind,
    pub shape: QueryShape,
    pub location_id: String,
}

impl CacheKey {
    pub fn new(kind: DataKind, shape: QueryShape, location: &Location) -> Self {
        Self {
            kind,
            shape,
            location_id: location.id().to_string(),
        }
    }

    /// Fixed time-to-live for this key's kind and shape.
    pub fn ttl(&self) -> Duration {
        match (self.kind, self.shape) {
            (_, QueryShape::Current) => CURRENT_TTL,
            (DataKind::Tide, _) => TIDE_FORECAST_TTL,
            (DataKind::Weather, _) => WEATHER_FORECAST_TTL,
        }
    }

    /// String form used by storage backends.
    ///
    /// Characters outside `[A-Za-z0-9._-]` in the location id are
    /// percent-escaped so the key is always a safe file name and two distinct
    /// ids never render to the same string.
    pub fn storage_key(&self) -> String {
        let mut out = format!("{}_{}_", self.kind.as_str(), self.shape);
        for byte in self.location_id.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                    out.push(byte as char)
                }
                other => out.push_str(&format!("%{other:02X}")),
            }
        }
        out
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A decoded cache entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry<T> {
    pub payload: T,
    /// Time of the successful fetch that produced `payload`
    pub written_at: DateTime<Utc>,
}

/// Serialized form handed to backends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredEntry {
    pub payload: serde_json::Value,
    /// Epoch seconds, microsecond resolution
    pub written_at: f64,
}

impl StoredEntry {
    fn written_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros((self.written_at * 1e6).round() as i64)
    }
}

fn epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp_micros() as f64 / 1e6
}

/// Raw key-value persistence used by [`CacheStore`].
///
/// `store` must replace the whole entry for `key` atomically.
pub trait StorageBackend: Send + Sync {
    fn load(&self, key: &str) -> Option<StoredEntry>;
    fn store(&self, key: &str, entry: &StoredEntry) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<bool>;
    fn keys(&self) -> Vec<String>;
}

/// In-process backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self, key: &str) -> Option<StoredEntry> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(key).cloned()
    }

    fn store(&self, key: &str, entry: &StoredEntry) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<bool> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        Ok(entries.remove(key).is_some())
    }

    fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.keys().cloned().collect()
    }
}

/// Directory-backed backend: `<dir>/<storage key>.json`.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileBackend {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn load(&self, key: &str) -> Option<StoredEntry> {
        let data = fs::read(self.path(key)).ok()?;
        match serde_json::from_slice(&data) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Ignoring corrupt cache file for {key}: {err}");
                None
            }
        }
    }

    fn store(&self, key: &str, entry: &StoredEntry) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_vec(entry)?;
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{key}.{}.{seq}.tmp", std::process::id()));
        fs::write(&tmp, data)?;
        if let Err(err) = fs::rename(&tmp, self.path(key)) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<bool> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn keys(&self) -> Vec<String> {
        let Ok(dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        dir.filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect()
    }
}

/// Typed, clock-aware facade over a [`StorageBackend`].
pub struct CacheStore {
    backend: Box<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(backend: Box<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Box::new(MemoryBackend::new()), clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Entry for `key` regardless of freshness.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let storage_key = key.storage_key();
        let stored = self.backend.load(&storage_key)?;
        let Some(written_at) = stored.written_at() else {
            warn!("Cache entry {storage_key} has an invalid timestamp");
            return None;
        };
        match serde_json::from_value(stored.payload) {
            Ok(payload) => Some(CacheEntry {
                payload,
                written_at,
            }),
            Err(err) => {
                warn!("Cache entry {storage_key} does not decode: {err}");
                None
            }
        }
    }

    /// Entry for `key` only if it is within its TTL.
    pub fn get_fresh<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.get(key)
            .filter(|entry| !self.is_past(entry.written_at, key.ttl()))
    }

    /// Overwrite the entry for `key`, stamped with the current time.
    ///
    /// Returns the stamp, truncated to the microseconds an `f64` epoch keeps so
    /// it equals what a later `get` reads back. Failures are logged, never raised.
    pub fn put<T: Serialize>(&self, key: &CacheKey, payload: &T) -> DateTime<Utc> {
        let written_at = self.clock.now().trunc_subsecs(6);
        let storage_key = key.storage_key();
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                warn!("Cannot serialize payload for {storage_key}: {err}");
                return written_at;
            }
        };
        let entry = StoredEntry {
            payload,
            written_at: epoch_seconds(written_at),
        };
        match self.backend.store(&storage_key, &entry) {
            Ok(()) => debug!("Cached {storage_key} at {written_at}"),
            Err(err) => warn!("Cache write for {storage_key} failed: {err}"),
        }
        written_at
    }

    /// True if there is no entry or it is older than the key's TTL.
    pub fn is_expired(&self, key: &CacheKey) -> bool {
        self.is_expired_with(key, key.ttl())
    }

    /// True if there is no entry or it is older than `ttl`.
    pub fn is_expired_with(&self, key: &CacheKey, ttl: Duration) -> bool {
        match self.backend.load(&key.storage_key()).and_then(|s| s.written_at()) {
            Some(written_at) => self.is_past(written_at, ttl),
            None => true,
        }
    }

    /// Whether an entry written at `written_at` has outlived `ttl`.
    pub fn is_past(&self, written_at: DateTime<Utc>, ttl: Duration) -> bool {
        // A write stamped in the future (clock stepped back) counts as age zero
        match (self.clock.now() - written_at).to_std() {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }

    /// Remove every entry, or only those of `kind`. Returns how many went.
    pub fn clear(&self, kind: Option<DataKind>) -> usize {
        let prefix = kind.map(|k| format!("{}_", k.as_str()));
        let mut removed = 0;
        for key in self.backend.keys() {
            if prefix.as_ref().is_some_and(|p| !key.starts_with(p.as_str())) {
                continue;
            }
            match self.backend.remove(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => warn!("Cannot remove cache entry {key}: {err}"),
            }
        }
        debug!("Cleared {removed} cache entries");
        removed
    }

    /// Remove entries written more than `max_age` ago. Returns how many went.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        for key in self.backend.keys() {
            let expired = self
                .backend
                .load(&key)
                .and_then(|s| s.written_at())
                .map_or(true, |written_at| self.is_past(written_at, max_age));
            if !expired {
                continue;
            }
            match self.backend.remove(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => warn!("Cannot remove cache entry {key}: {err}"),
            }
        }
        removed
    }
}
