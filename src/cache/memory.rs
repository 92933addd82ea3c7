use chrono::{DateTime, Utc};
use std::collections::{hash_map::Entry, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// A cached value and the time it was produced.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: Arc<V>,
    pub stored_at: DateTime<Utc>,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            stored_at: self.stored_at,
        }
    }
}

impl<V> CacheEntry<V> {
    pub fn new(value: V) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc(value: Arc<V>) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
        }
    }

    /// An entry stored in the future (clock skew) counts as fresh.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        match (Utc::now() - self.stored_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }
}

/// In-memory cache tier.
///
/// Entries are replaced whole under a short write lock; readers clone the
/// entry's `Arc` and never observe a partial value. With a capacity set, the
/// least recently used entry is evicted to make room. Use is tracked apart
/// from `stored_at`, which only decides freshness.
pub struct MemoryTier<K, V> {
    entries: RwLock<HashMap<K, Slot<V>>>,
    capacity: Option<usize>,
    clock: AtomicU64,
}

struct Slot<V> {
    entry: CacheEntry<V>,
    last_used: AtomicU64,
}

impl<K: Eq + Hash + Clone, V> MemoryTier<K, V> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        let entries = self.entries.read().await;
        let slot = entries.get(key)?;
        slot.last_used.store(self.tick(), Ordering::Relaxed);
        Some(slot.entry.clone())
    }

    /// Stores `entry` unless a newer entry for `key` landed meanwhile.
    /// Returns whichever entry is now cached.
    pub async fn insert(&self, key: K, entry: CacheEntry<V>) -> CacheEntry<V> {
        let mut entries = self.entries.write().await;
        if let Some(capacity) = self.capacity {
            if !entries.contains_key(&key) && entries.len() >= capacity.max(1) {
                let least_recent = entries
                    .iter()
                    .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
                    .map(|(k, _)| k.clone());
                if let Some(least_recent) = least_recent {
                    entries.remove(&least_recent);
                }
            }
        }
        let now = self.tick();
        match entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                *slot.last_used.get_mut() = now;
                if slot.entry.stored_at > entry.stored_at {
                    slot.entry.clone()
                } else {
                    slot.entry = entry.clone();
                    entry
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    entry: entry.clone(),
                    last_used: AtomicU64::new(now),
                });
                entry
            }
        }
    }

    pub async fn remove(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.write().await.remove(key).map(|slot| slot.entry)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// One async lock per key, so a single task loads a missing entry while
/// concurrent callers for the same key wait for it.
///
/// Locks nobody holds or waits for are pruned on the next acquisition.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }
}
