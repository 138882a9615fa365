//! Per-key request coalescing.
//!
//! Callers for the same key take turns through an async mutex. The service
//! re-checks the cache after acquiring the gate, so while one caller fetches
//! the others wait and then read what it wrote instead of fetching again.
//! Writes for one key are therefore never reordered.
//!
//! A holder can also leave an outcome in the gate, such as the error of a
//! failed fetch. Callers queued behind it see that outcome instead of repeating
//! the fetch. The outcome lives only as long as the gate does: once nobody
//! holds or waits on a key its gate is dropped, and the next caller starts
//! clean.

use log::debug;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Gate<V> = Arc<AsyncMutex<Option<V>>>;

#[derive(Debug)]
pub struct KeyedGate<K, V> {
    gates: Mutex<HashMap<K, Gate<V>>>,
}

impl<K, V> Default for KeyedGate<K, V> {
    fn default() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone + Display, V> KeyedGate<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder of `key` is active, then hold it.
    pub async fn acquire(&self, key: &K) -> GateGuard<'_, K, V> {
        let gate = {
            let mut gates = self.lock_map();
            gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
                .clone()
        };

        let guard = match gate.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Waiting on in-flight fetch for {key}");
                gate.clone().lock_owned().await
            }
        };

        GateGuard {
            owner: self,
            key: key.clone(),
            gate,
            guard: Some(guard),
        }
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<K, Gate<V>>> {
        self.gates.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Held while a caller owns a key. Releases on drop.
pub struct GateGuard<'a, K: Eq + Hash, V> {
    owner: &'a KeyedGate<K, V>,
    key: K,
    gate: Gate<V>,
    guard: Option<OwnedMutexGuard<Option<V>>>,
}

impl<K: Eq + Hash, V> GateGuard<'_, K, V> {
    /// Outcome left by an earlier holder that callers were queued behind.
    pub fn previous(&self) -> Option<&V> {
        self.guard.as_ref().and_then(|guard| guard.as_ref())
    }

    /// Leave `outcome` for callers queued behind this one.
    pub fn leave(&mut self, outcome: Option<V>) {
        if let Some(guard) = self.guard.as_mut() {
            **guard = outcome;
        }
    }
}

impl<K: Eq + Hash, V> Drop for GateGuard<'_, K, V> {
    fn drop(&mut self) {
        self.guard.take();
        let mut gates = self.owner.gates.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map and this guard still reference the gate: nobody waits
        let idle = Arc::strong_count(&self.gate) <= 2;
        let ours = gates
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.gate));
        if idle && ours {
            gates.remove(&self.key);
        }
    }
}
