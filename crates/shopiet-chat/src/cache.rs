use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Cache key for a room history fetched under `first_second` path order.
pub fn history_key(first: &str, second: &str) -> String {
    format!("messages_{first}_{second}")
}

/// Cache key for a user's conversation list.
pub fn conversations_key(username: &str) -> String {
    format!("conversations_{username}")
}

struct Slot {
    /// Stamp of the last invalidation of this key; 0 if never invalidated.
    invalidated_at: u64,
    body: Option<Bytes>,
    expires_at: Instant,
}

/// Serialized response cache with a TTL backstop.
///
/// Entries are whole JSON bodies, never patched in place. Invalidations are
/// stamped from one monotone clock: a loader takes a stamp with
/// [`ResponseCache::generation`] before querying the store and installs its
/// result through [`ResponseCache::insert_if_current`], which refuses the
/// write if the key was invalidated after that stamp. Purging an expired slot
/// raises a floor instead of forgetting the stamp. Loaders for the same key
/// are serialized with [`ResponseCache::lock`].
pub struct ResponseCache {
    entries: DashMap<String, Slot>,
    flights: DashMap<String, Arc<Mutex<()>>>,
    clock: AtomicU64,
    /// Highest invalidation stamp among purged slots.
    purged_floor: AtomicU64,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            clock: AtomicU64::new(0),
            purged_floor: AtomicU64::new(0),
            ttl,
        }
    }

    /// Cached body for `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let slot = self.entries.get(key)?;
        if slot.expires_at <= Instant::now() {
            return None;
        }
        slot.body.clone()
    }

    /// Stamp to pass to [`ResponseCache::insert_if_current`]. Never goes
    /// backwards.
    pub fn generation(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Store `body` unless `key` was invalidated after `generation` was read.
    pub fn insert_if_current(&self, key: &str, generation: u64, body: Bytes) -> bool {
        let expires_at = Instant::now() + self.ttl;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                if slot.invalidated_at > generation {
                    return false;
                }
                slot.body = Some(body);
                slot.expires_at = expires_at;
                true
            }
            Entry::Vacant(entry) => {
                if self.purged_floor.load(Ordering::SeqCst) > generation {
                    return false;
                }
                entry.insert(Slot {
                    invalidated_at: 0,
                    body: Some(body),
                    expires_at,
                });
                true
            }
        }
    }

    /// Drop the body for `key` and retire any in-flight load of it.
    pub fn invalidate(&self, key: &str) {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .entry(key.to_string())
            .and_modify(|slot| {
                slot.invalidated_at = slot.invalidated_at.max(stamp);
                slot.body = None;
                slot.expires_at = expires_at;
            })
            .or_insert(Slot {
                invalidated_at: stamp,
                body: None,
                expires_at,
            });
    }

    /// Per-key load lock. Concurrent misses for one key queue here and
    /// re-check the cache once they hold it.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let flight = self.flights.entry(key.to_string()).or_default().clone();
        flight.lock_owned().await
    }

    /// Remove expired slots and idle load locks. Returns the number of slots
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, slot| {
            if slot.expires_at > now {
                return true;
            }
            self.purged_floor
                .fetch_max(slot.invalidated_at, Ordering::SeqCst);
            removed += 1;
            false
        });
        self.flights.retain(|_, flight| Arc::strong_count(flight) > 1);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
