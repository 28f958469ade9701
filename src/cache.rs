//! Short-lived memoization of idempotent provider lookups.
//!
//! Entries are stored as JSON values and expire passively: a read past the
//! deadline behaves exactly like a miss, and the stale entry is simply
//! overwritten by the next write. There is no background sweep and no
//! capacity bound.
//!
//! [`ResultCache::get_or_fetch`] is single-flight: concurrent misses on one
//! key queue behind a per-key gate, so only the first runs the fetch and the
//! rest read its result from the cache.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{sync::Mutex as Gate, time::Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    flights: Mutex<HashMap<String, Arc<Gate<()>>>>,
    ttl: Duration,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Builds `<operation>.<json parameters>`. Parameter structs serialize
    /// their fields in declaration order, so equal requests share a key.
    pub fn key<P: Serialize>(operation: &str, params: &P) -> String {
        let params = serde_json::to_string(params).unwrap_or_default();
        format!("{operation}.{params}")
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = {
            let entries = self.entries.read();
            let entry = entries.get(key)?;
            if Instant::now() >= entry.expires_at {
                return None;
            }
            entry.value.clone()
        };
        serde_json::from_value(value).ok()
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        self.set_with_ttl(key, value, self.ttl);
    }

    pub fn set_with_ttl<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Duration) {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(%key, %err, "skipping cache write for unserializable value");
                return;
            }
        };
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its
    /// success. Failures are not cached; a waiter that finds no value after
    /// the leader failed runs `fetch` itself.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: String, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let flight = self.join_flight(key);
        let _turn = flight.gate.lock().await;
        if let Some(value) = self.get(&flight.key) {
            return Ok(value);
        }

        let value = fetch().await?;
        self.set(flight.key.clone(), &value);
        Ok(value)
    }

    fn join_flight(&self, key: String) -> Flight<'_> {
        let gate = self.flights.lock().entry(key.clone()).or_default().clone();
        Flight {
            cache: self,
            key,
            gate,
        }
    }

    #[cfg(test)]
    fn flights_in_progress(&self) -> usize {
        self.flights.lock().len()
    }
}

/// A caller's membership in the in-flight set for one key. The last member
/// to leave removes the gate, whether it finished, failed, or was cancelled.
struct Flight<'a> {
    cache: &'a ResultCache,
    key: String,
    gate: Arc<Gate<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut flights = self.cache.flights.lock();
        let last = flights
            .get(&self.key)
            .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2);
        if last {
            flights.remove(&self.key);
        }
    }
}
