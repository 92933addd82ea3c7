//! Two-tier read-through cache in front of an [`ObservationSource`].
//!
//! Every entry lives in memory and in the persisted tier, each with the
//! timestamp it was produced at. A stale or missing entry is refetched (roster,
//! raw observations) or recomputed (aggregates) and written through to both
//! tiers. Persisted-tier failures are logged and never fail a read.

pub mod disk;
pub mod error;
pub mod memory;

use crate::aggregate::aggregate;
use crate::cache::disk::DiskTier;
use crate::cache::memory::{CacheEntry, KeyedLocks, MemoryTier};
use crate::config::EngineConfig;
use crate::source::error::SourceError;
use crate::source::ObservationSource;
use crate::stations::roster::RosterSnapshot;
use crate::types::bucket::StationAggregate;
use crate::types::observation::RawObservation;
use crate::types::resolution::Resolution;
use crate::types::station::Station;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub struct CacheLayer {
    source: Arc<dyn ObservationSource>,
    disk: DiskTier,
    roster: RwLock<Option<CacheEntry<RosterSnapshot>>>,
    roster_refresh: Mutex<()>,
    raw: MemoryTier<String, Vec<RawObservation>>,
    raw_loads: KeyedLocks<String>,
    aggregates: MemoryTier<(String, Resolution), StationAggregate>,
    aggregate_loads: KeyedLocks<(String, Resolution)>,
    roster_ttl: Duration,
    data_ttl: Duration,
}

impl CacheLayer {
    pub fn new(source: Arc<dyn ObservationSource>, cache_dir: &Path, config: &EngineConfig) -> Self {
        Self {
            source,
            disk: DiskTier::new(cache_dir),
            roster: RwLock::new(None),
            roster_refresh: Mutex::new(()),
            raw: MemoryTier::new(Some(config.raw_memory_capacity)),
            raw_loads: KeyedLocks::default(),
            aggregates: MemoryTier::new(None),
            aggregate_loads: KeyedLocks::default(),
            roster_ttl: config.roster_ttl,
            data_ttl: config.data_ttl,
        }
    }

    /// The current roster snapshot, refreshed when older than the roster TTL.
    ///
    /// If the refresh fails but an older roster is known, the older roster is
    /// served.
    pub async fn get_roster(&self) -> Result<Arc<RosterSnapshot>, SourceError> {
        if let Some(snapshot) = self.fresh_roster().await {
            return Ok(snapshot);
        }

        // one refresh at a time; waiters pick up its result
        let _refresh = self.roster_refresh.lock().await;
        if let Some(snapshot) = self.fresh_roster().await {
            return Ok(snapshot);
        }

        let persisted = self
            .read_persisted::<Vec<Station>>(self.disk.roster_path())
            .await;
        if let Some(entry) = persisted.as_ref().filter(|e| e.is_fresh(self.roster_ttl)) {
            info!("Cache hit for station roster at {:?}", self.disk.roster_path());
            return Ok(self.publish_roster(entry.clone()).await);
        }

        warn!("Cache miss for station roster. Fetching from source.");
        match self.source.fetch_roster().await {
            Ok(stations) => {
                let entry = CacheEntry::new(stations);
                self.write_persisted(self.disk.roster_path(), &entry).await;
                Ok(self.publish_roster(entry).await)
            }
            Err(e) => {
                if let Some(current) = self.roster.read().await.as_ref() {
                    warn!("Roster refresh failed ({}), serving the previous roster", e);
                    return Ok(Arc::clone(&current.value));
                }
                if let Some(entry) = persisted {
                    warn!("Roster refresh failed ({}), serving the stale persisted roster", e);
                    return Ok(self.publish_roster(entry).await);
                }
                Err(e)
            }
        }
    }

    /// Forces the next [`get_roster`](Self::get_roster) to reload the roster,
    /// which also restores dropped stations.
    pub async fn expire_roster(&self) {
        if let Some(entry) = self.roster.write().await.as_mut() {
            entry.stored_at = chrono::DateTime::<chrono::Utc>::MIN_UTC;
        }
    }

    /// Publishes a roster snapshot without `station_id`.
    ///
    /// The station stays out until the roster is next refreshed.
    pub async fn drop_station(&self, station_id: &str) {
        let mut roster = self.roster.write().await;
        if let Some(entry) = roster.as_mut() {
            if entry.value.get(station_id).is_some() {
                let next = entry.value.without(station_id);
                warn!(
                    "Dropped station {} from roster (generation {})",
                    station_id,
                    next.generation()
                );
                entry.value = Arc::new(next);
            }
        }
    }

    /// Removes every cached raw series and aggregate of `station_id` from both tiers.
    pub async fn invalidate_station(&self, station_id: &str) {
        let key = station_id.to_string();
        self.raw.remove(&key).await;
        self.remove_persisted(self.disk.raw_path(station_id)).await;
        for resolution in Resolution::ALL {
            self.aggregates.remove(&(key.clone(), resolution)).await;
            self.remove_persisted(self.disk.aggregate_path(station_id, resolution))
                .await;
        }
    }

    /// Drops `station_id` from the roster and removes its cached data, after
    /// the provider reported it gone.
    pub async fn forget_station(&self, station_id: &str) {
        self.drop_station(station_id).await;
        self.invalidate_station(station_id).await;
    }

    pub async fn get_raw(&self, station_id: &str) -> Result<Arc<Vec<RawObservation>>, SourceError> {
        Ok(self.get_raw_entry(station_id).await?.value)
    }

    /// The aggregate of `station_id` at `resolution`.
    ///
    /// An aggregate inherits the timestamp of the raw series it was computed
    /// from, so it expires together with that series.
    pub async fn get_aggregate(
        &self,
        station_id: &str,
        resolution: Resolution,
    ) -> Result<Arc<StationAggregate>, SourceError> {
        let key = (station_id.to_string(), resolution);
        if let Some(entry) = self.fresh(&self.aggregates, &key).await {
            return Ok(entry.value);
        }

        // one load per key; waiters find the loaded entry in memory
        let _loading = self.aggregate_loads.lock(&key).await;
        if let Some(entry) = self.fresh(&self.aggregates, &key).await {
            return Ok(entry.value);
        }

        let path = self.disk.aggregate_path(station_id, resolution);
        if let Some(entry) = self.read_persisted::<StationAggregate>(path.clone()).await {
            if entry.is_fresh(self.data_ttl) {
                info!(
                    "Cache hit for {} aggregate of station {} at {:?}",
                    resolution, station_id, path
                );
                return Ok(self.aggregates.insert(key, entry).await.value);
            }
        }

        let raw = self.get_raw_entry(station_id).await?;
        let observations = Arc::clone(&raw.value);
        let station = station_id.to_string();
        let computed =
            tokio::task::spawn_blocking(move || aggregate(&station, &observations, resolution))
                .await?;
        let entry = CacheEntry {
            value: Arc::new(computed),
            stored_at: raw.stored_at,
        };
        self.write_persisted(path, &entry).await;
        info!("Computed {} aggregate of station {}", resolution, station_id);
        Ok(self.aggregates.insert(key, entry).await.value)
    }

    async fn get_raw_entry(
        &self,
        station_id: &str,
    ) -> Result<CacheEntry<Vec<RawObservation>>, SourceError> {
        let key = station_id.to_string();
        if let Some(entry) = self.fresh(&self.raw, &key).await {
            return Ok(entry);
        }

        let _loading = self.raw_loads.lock(&key).await;
        if let Some(entry) = self.fresh(&self.raw, &key).await {
            return Ok(entry);
        }

        let path = self.disk.raw_path(station_id);
        if let Some(entry) = self.read_persisted::<Vec<RawObservation>>(path.clone()).await {
            if entry.is_fresh(self.data_ttl) {
                info!("Cache hit for raw observations of station {} at {:?}", station_id, path);
                return Ok(self.raw.insert(key, entry).await);
            }
        }

        warn!(
            "Cache miss for raw observations of station {}. Fetching from source.",
            station_id
        );
        let entry = CacheEntry::new(self.source.fetch_raw(station_id).await?);
        self.write_persisted(path, &entry).await;
        Ok(self.raw.insert(key, entry).await)
    }

    async fn fresh<K, V>(&self, tier: &MemoryTier<K, V>, key: &K) -> Option<CacheEntry<V>>
    where
        K: Eq + Hash + Clone,
    {
        tier.get(key)
            .await
            .filter(|entry| entry.is_fresh(self.data_ttl))
    }

    async fn fresh_roster(&self) -> Option<Arc<RosterSnapshot>> {
        self.roster
            .read()
            .await
            .as_ref()
            .filter(|entry| entry.is_fresh(self.roster_ttl))
            .map(|entry| Arc::clone(&entry.value))
    }

    async fn publish_roster(&self, entry: CacheEntry<Vec<Station>>) -> Arc<RosterSnapshot> {
        let mut roster = self.roster.write().await;
        let generation = roster.as_ref().map_or(1, |e| e.value.generation() + 1);
        let snapshot = Arc::new(RosterSnapshot::new(entry.value.as_ref().clone(), generation));
        info!(
            "Loaded roster of {} stations (generation {})",
            snapshot.len(),
            generation
        );
        *roster = Some(CacheEntry {
            value: Arc::clone(&snapshot),
            stored_at: entry.stored_at,
        });
        snapshot
    }

    async fn read_persisted<V>(&self, path: PathBuf) -> Option<CacheEntry<V>>
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        match self.disk.read(path).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read persisted cache entry: {}", e);
                None
            }
        }
    }

    async fn write_persisted<V>(&self, path: PathBuf, entry: &CacheEntry<V>)
    where
        V: Serialize + Send + Sync + 'static,
    {
        if let Err(e) = self.disk.write(path, entry).await {
            warn!("Failed to persist cache entry: {}", e);
        }
    }

    async fn remove_persisted(&self, path: PathBuf) {
        if let Err(e) = self.disk.remove(path).await {
            warn!("Failed to remove persisted cache entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{cloud_obs, weather_obs};
    use crate::source::fake::FakeSource;
    use crate::types::station::test_station;
    use tempfile::TempDir;

    fn source() -> Arc<FakeSource> {
        Arc::new(
            FakeSource::new(vec![test_station("1", 59.0, 18.0), test_station("2", 59.5, 18.0)])
                .with_observations(
                    "1",
                    vec![cloud_obs("1", 2010, 1, 1, 50.0), weather_obs("1", 2010, 7, 1, 95)],
                ),
        )
    }

    fn layer(source: &Arc<FakeSource>, dir: &TempDir, config: &EngineConfig) -> CacheLayer {
        let source: Arc<dyn ObservationSource> = source.clone();
        CacheLayer::new(source, dir.path(), config)
    }

    #[tokio::test]
    async fn roster_is_fetched_once_and_persisted() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let config = EngineConfig::default();

        let cache = layer(&source, &dir, &config);
        let first = cache.get_roster().await.unwrap();
        let second = cache.get_roster().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.generation(), second.generation());
        assert_eq!(source.roster_calls(), 1);

        // a new layer over the same directory starts from the persisted tier
        let restarted = layer(&source, &dir, &config);
        assert_eq!(restarted.get_roster().await.unwrap().len(), 2);
        assert_eq!(source.roster_calls(), 1);
    }

    #[tokio::test]
    async fn stale_roster_is_refetched_with_new_generation() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let config = EngineConfig::builder().roster_ttl(Duration::ZERO).build();
        let cache = layer(&source, &dir, &config);

        let first = cache.get_roster().await.unwrap();
        let second = cache.get_roster().await.unwrap();
        assert_eq!(source.roster_calls(), 2);
        assert!(second.generation() > first.generation());
    }

    #[tokio::test]
    async fn aggregates_share_one_raw_fetch() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let cache = layer(&source, &dir, &EngineConfig::default());

        let monthly = cache.get_aggregate("1", Resolution::Month).await.unwrap();
        let again = cache.get_aggregate("1", Resolution::Month).await.unwrap();
        let yearly = cache.get_aggregate("1", Resolution::Year).await.unwrap();
        assert!(Arc::ptr_eq(&monthly, &again));
        assert_eq!(yearly.observed_years(), Some(2010..=2010));
        assert_eq!(source.raw_calls(), 1);

        let restarted = layer(&source, &dir, &EngineConfig::default());
        let persisted = restarted.get_aggregate("1", Resolution::Month).await.unwrap();
        assert_eq!(*persisted, *monthly);
        assert_eq!(source.raw_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let cache = layer(&source, &dir, &EngineConfig::default());

        let (first, second, daily, yearly) = tokio::join!(
            cache.get_aggregate("1", Resolution::Month),
            cache.get_aggregate("1", Resolution::Month),
            cache.get_aggregate("1", Resolution::Day),
            cache.get_aggregate("1", Resolution::Year),
        );
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert!(daily.is_ok());
        assert!(yearly.is_ok());
        assert_eq!(source.raw_calls(), 1);
    }

    #[tokio::test]
    async fn corrupt_aggregate_is_recomputed() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let cache = layer(&source, &dir, &EngineConfig::default());
        let expected = cache.get_aggregate("1", Resolution::Month).await.unwrap();

        let path = DiskTier::new(dir.path()).aggregate_path("1", Resolution::Month);
        std::fs::write(&path, b"garbage").unwrap();

        let restarted = layer(&source, &dir, &EngineConfig::default());
        let recomputed = restarted.get_aggregate("1", Resolution::Month).await.unwrap();
        assert_eq!(*recomputed, *expected);
        // raw series came from the persisted tier
        assert_eq!(source.raw_calls(), 1);
    }

    #[tokio::test]
    async fn not_found_propagates() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let cache = layer(&source, &dir, &EngineConfig::default());
        let err = cache.get_aggregate("2", Resolution::Day).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn dropped_station_returns_after_refresh() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let cache = layer(&source, &dir, &EngineConfig::default());
        let before = cache.get_roster().await.unwrap();

        cache.drop_station("2").await;
        let dropped = cache.get_roster().await.unwrap();
        assert!(dropped.get("2").is_none());
        assert_eq!(dropped.generation(), before.generation() + 1);
        assert!(before.get("2").is_some());

        cache.expire_roster().await;
        let refreshed = cache.get_roster().await.unwrap();
        assert!(refreshed.get("2").is_some());
        assert!(refreshed.generation() > dropped.generation());
    }

    #[tokio::test]
    async fn invalidate_removes_both_tiers() {
        let dir = TempDir::new().unwrap();
        let source = source();
        let cache = layer(&source, &dir, &EngineConfig::default());
        cache.get_aggregate("1", Resolution::Month).await.unwrap();

        cache.invalidate_station("1").await;
        let disk = DiskTier::new(dir.path());
        assert!(!disk.raw_path("1").exists());
        assert!(!disk.aggregate_path("1", Resolution::Month).exists());

        cache.get_aggregate("1", Resolution::Month).await.unwrap();
        assert_eq!(source.raw_calls(), 2);
    }
}
