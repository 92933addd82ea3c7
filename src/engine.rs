//! The main entry point: climate estimates for arbitrary locations, blended
//! from the nearest stations of the observation network.

use crate::blend::blend;
use crate::cache::CacheLayer;
use crate::config::EngineConfig;
use crate::error::ClimateError;
use crate::geo::LatLon;
use crate::preload::{PreloadStatus, Preloader};
use crate::quality::{overall_level, QualityScorer};
use crate::source::smhi::SmhiSource;
use crate::source::ObservationSource;
use crate::stations::selector::{select_stations, Selection};
use crate::types::bucket::AggregateSet;
use crate::types::climate::{LocationClimate, StationClimate, StationPoint};
use crate::types::resolution::Resolution;
use crate::types::station::{Capability, NearbyStation, Station};
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use bon::bon;
use futures_util::future::join_all;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_NEARBY_LIMIT: usize = 10;

/// A pool's final selection and the aggregates of every selected station.
struct ResolvedPool {
    selection: Selection,
    aggregates: AggregateSet,
}

/// Climate estimation engine.
///
/// Construct one per process. The engine owns the cache layer and the
/// preloader; every query reads through the same cache, so queries issued
/// while a preload runs share its work.
///
/// # Examples
///
/// ```rust,no_run
/// # use station_climate::{ClimateEngine, ClimateError, EngineConfig, LatLon, Resolution};
/// # #[tokio::main]
/// # async fn main() -> Result<(), ClimateError> {
/// let engine = ClimateEngine::new(EngineConfig::default()).await?;
/// let climate = engine
///     .select_and_blend()
///     .location(LatLon(59.33, 18.07))
///     .resolution(Resolution::Month)
///     .call()
///     .await?;
/// for point in &climate.points {
///     println!("{}: {:?}% cloud", point.label, point.cloud_coverage);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ClimateEngine {
    config: EngineConfig,
    cache: Arc<CacheLayer>,
    preloader: Preloader,
    scorer: QualityScorer,
}

#[bon]
impl ClimateEngine {
    /// Creates an engine backed by the SMHI open data API.
    ///
    /// # Errors
    ///
    /// Returns [`ClimateError::CacheDirResolution`] if no cache directory is
    /// configured and the system cache directory cannot be found, and
    /// [`ClimateError::CacheDirCreation`] if the cache directory cannot be created.
    pub async fn new(config: EngineConfig) -> Result<Self, ClimateError> {
        let source = SmhiSource::new(&config.source)?;
        Self::with_source(config, Arc::new(source)).await
    }

    /// Creates an engine reading from a custom observation source.
    pub async fn with_source(
        config: EngineConfig,
        source: Arc<dyn ObservationSource>,
    ) -> Result<Self, ClimateError> {
        let cache_dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => get_cache_dir()?,
        };
        ensure_cache_dir_exists(&cache_dir).await?;
        info!("Using cache directory {}", cache_dir.display());

        let cache = Arc::new(CacheLayer::new(source, &cache_dir, &config));
        Ok(Self {
            preloader: Preloader::new(Arc::clone(&cache), config.preload_workers),
            scorer: QualityScorer::new(config.quality.clone()),
            cache,
            config,
        })
    }

    /// Estimates the climate at `location` by blending nearby stations.
    ///
    /// Cloud and lightning are estimated from separate station pools, each
    /// selected among the active stations reporting that signal. A station
    /// whose data cannot be loaded is left out of its pool and the pool is
    /// selected again without it.
    ///
    /// # Arguments
    ///
    /// * `.location(LatLon)`: **Required.** The point to estimate.
    /// * `.resolution(Resolution)`: Optional. Bucket granularity, defaults to [`Resolution::Month`].
    ///
    /// # Errors
    ///
    /// Returns [`ClimateError::NoDataAvailable`] if neither pool has a single
    /// usable station, and [`ClimateError::Source`] if the roster cannot be loaded.
    #[builder]
    pub async fn select_and_blend(
        &self,
        location: LatLon,
        #[builder(default = Resolution::Month)] resolution: Resolution,
    ) -> Result<LocationClimate, ClimateError> {
        let roster = self.cache.get_roster().await?;
        let (cloud, lightning) = tokio::join!(
            self.resolve_pool(
                location,
                resolution,
                Capability::Cloud,
                roster.candidates(Capability::Cloud)
            ),
            self.resolve_pool(
                location,
                resolution,
                Capability::Lightning,
                roster.candidates(Capability::Lightning)
            ),
        );

        if cloud.selection.is_empty() && lightning.selection.is_empty() {
            return Err(ClimateError::NoDataAvailable {
                latitude: location.latitude(),
                longitude: location.longitude(),
            });
        }

        let mut aggregates = cloud.aggregates;
        aggregates.extend(lightning.aggregates);
        let cloud_weights = &cloud.selection.weights;
        let lightning_weights = &lightning.selection.weights;

        let output = blend(
            resolution,
            cloud_weights,
            lightning_weights,
            &aggregates,
            self.config.min_ci_observations,
        );
        let quality = self.scorer.score(
            location,
            resolution,
            cloud_weights,
            lightning_weights,
            &aggregates,
        );
        let lightning_quality = (!lightning_weights.is_empty()).then(|| {
            self.scorer.score_lightning(
                location,
                resolution,
                cloud_weights,
                lightning_weights,
                &aggregates,
            )
        });

        Ok(LocationClimate {
            target: location,
            resolution,
            points: output.points,
            cloud_stations: cloud.selection.weights,
            lightning_stations: lightning.selection.weights,
            cloud_distance_constrained: cloud.selection.distance_constrained,
            lightning_distance_constrained: lightning.selection.distance_constrained,
            has_lightning_data: output.has_lightning_data,
            overall_quality: overall_level(&quality, lightning_quality.as_ref()),
            quality,
            lightning_quality,
        })
    }

    /// Every active station, sorted by name.
    pub async fn list_roster(&self) -> Result<Vec<Station>, ClimateError> {
        Ok(self.cache.get_roster().await?.sorted_by_name())
    }

    /// Finds the active stations closest to `location`, nearest first.
    ///
    /// # Arguments
    ///
    /// * `.location(LatLon)`: **Required.** The search center.
    /// * `.capability(Capability)`: Optional. Only stations reporting this signal.
    /// * `.limit(usize)`: Optional. Maximum number of stations, defaults to `10`.
    #[builder]
    pub async fn nearby_stations(
        &self,
        location: LatLon,
        capability: Option<Capability>,
        limit: Option<usize>,
    ) -> Result<Vec<NearbyStation>, ClimateError> {
        let roster = self.cache.get_roster().await?;
        Ok(roster
            .nearest(location, limit.unwrap_or(DEFAULT_NEARBY_LIMIT), capability)
            .into_iter()
            .map(|(station, distance_km)| NearbyStation {
                station,
                distance_km,
            })
            .collect())
    }

    /// One station's own series at `resolution`, without any blending.
    ///
    /// Year series run from the first to the last observed year; years in
    /// between without observations are included as empty buckets.
    pub async fn station_climate(
        &self,
        station_id: &str,
        resolution: Resolution,
    ) -> Result<StationClimate, ClimateError> {
        let roster = self.cache.get_roster().await?;
        if roster.get(station_id).is_none() {
            return Err(ClimateError::UnknownStation(station_id.to_string()));
        }

        let aggregate = match self.cache.get_aggregate(station_id, resolution).await {
            Ok(aggregate) => aggregate,
            Err(e) => {
                if e.is_not_found() {
                    self.cache.forget_station(station_id).await;
                }
                return Err(e.into());
            }
        };

        let points = resolution
            .canonical_buckets(aggregate.observed_years())
            .into_iter()
            .map(|key| StationPoint {
                label: key.label(),
                index: key.index,
                stat: aggregate.stat(&key),
            })
            .collect();

        Ok(StationClimate {
            station_id: station_id.to_string(),
            resolution,
            has_lightning_data: aggregate.has_lightning_data(),
            points,
        })
    }

    /// Starts warming the cache in the background. Returns `false` if a
    /// preload was already started.
    pub fn start_preload(&self) -> bool {
        self.preloader.start()
    }

    pub fn preload_status(&self) -> PreloadStatus {
        self.preloader.status()
    }

    /// Waits for a started preload to finish.
    pub async fn wait_for_preload(&self) -> PreloadStatus {
        self.preloader.wait().await
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Selects a pool and loads the aggregate of every selected station.
    ///
    /// Stations whose aggregate cannot be loaded are removed from the
    /// candidates and the pool is selected again, until every selected
    /// station has an aggregate or no candidate is left.
    async fn resolve_pool(
        &self,
        target: LatLon,
        resolution: Resolution,
        capability: Capability,
        mut candidates: Vec<Station>,
    ) -> ResolvedPool {
        let mut aggregates = AggregateSet::new();
        loop {
            let selection = select_stations(
                target,
                &candidates,
                self.config.min_station_count,
                self.config.weight_threshold,
                self.config.min_distance_km,
            );
            let missing: Vec<String> = selection
                .station_ids()
                .filter(|id| !aggregates.contains_key(*id))
                .map(str::to_string)
                .collect();
            if missing.is_empty() {
                let selected: HashSet<&str> = selection.station_ids().collect();
                aggregates.retain(|id, _| selected.contains(id.as_str()));
                return ResolvedPool {
                    selection,
                    aggregates,
                };
            }

            let results = join_all(
                missing
                    .iter()
                    .map(|id| self.cache.get_aggregate(id, resolution)),
            )
            .await;

            let mut failed = HashSet::new();
            for (station_id, result) in missing.into_iter().zip(results) {
                match result {
                    Ok(aggregate) => {
                        aggregates.insert(station_id, aggregate);
                    }
                    Err(e) => {
                        if e.is_not_found() {
                            warn!(
                                "Station {} is gone upstream, removing it from the roster: {}",
                                station_id, e
                            );
                            self.cache.forget_station(&station_id).await;
                        } else if e.is_unavailable() {
                            warn!(
                                "Station {} is unreachable, leaving it out of the {} pool for this query: {}",
                                station_id, capability, e
                            );
                        } else {
                            warn!(
                                "Dropping station {} from the {} pool: {}",
                                station_id, capability, e
                            );
                        }
                        failed.insert(station_id);
                    }
                }
            }
            candidates.retain(|s| !failed.contains(&s.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::aggregate::tests::{cloud_obs, weather_obs};
    use crate::config::QualityConfig;
    use crate::preload::PreloadState;
    use crate::quality::Level;
    use crate::source::fake::FakeSource;
    use crate::types::observation::RawObservation;
    use crate::types::station::test_station;
    use tempfile::TempDir;

    const TARGET: LatLon = LatLon(59.0, 18.0);

    fn north_of_target(id: &str, km: f64) -> Station {
        test_station(id, 59.0 + km / 111.195, 18.0)
    }

    fn history(id: &str, cloud: f64) -> Vec<RawObservation> {
        (1..=12)
            .flat_map(|m| {
                [
                    cloud_obs(id, 2015, m, 10, cloud),
                    weather_obs(id, 2015, m, 10, if m == 7 { 95 } else { 0 }),
                ]
            })
            .collect()
    }

    async fn engine(source: FakeSource, dir: &TempDir) -> (ClimateEngine, Arc<FakeSource>) {
        let config = EngineConfig::builder()
            .cache_dir(dir.path().to_path_buf())
            .build();
        engine_with(source, config).await
    }

    async fn engine_with(
        source: FakeSource,
        config: EngineConfig,
    ) -> (ClimateEngine, Arc<FakeSource>) {
        let source = Arc::new(source);
        let engine = ClimateEngine::with_source(config, source.clone())
            .await
            .unwrap();
        (engine, source)
    }

    fn with_signals(mut station: Station, has_cloud: bool, has_lightning: bool) -> Station {
        station.has_cloud = has_cloud;
        station.has_lightning = has_lightning;
        station
    }

    /// Four cloud-only stations about 5 km north, east, south and west of the target.
    fn surrounding_cloud_stations() -> FakeSource {
        let offsets = [
            ("N", 0.045, 0.0),
            ("E", 0.0, 0.087),
            ("S", -0.045, 0.0),
            ("W", 0.0, -0.087),
        ];
        let stations = offsets
            .iter()
            .map(|(id, dlat, dlon)| {
                with_signals(test_station(id, 59.0 + dlat, 18.0 + dlon), true, false)
            })
            .collect();
        offsets.iter().fold(FakeSource::new(stations), |source, (id, _, _)| {
            let observations = (1..=12).map(|m| cloud_obs(id, 2015, m, 10, 50.0)).collect();
            source.with_observations(id, observations)
        })
    }

    fn deep_enough_config(dir: &TempDir) -> EngineConfig {
        EngineConfig::builder()
            .cache_dir(dir.path().to_path_buf())
            .quality(QualityConfig::builder().depth_baseline_month(1.0).build())
            .build()
    }

    #[tokio::test]
    async fn unavailable_station_is_replaced_by_next_candidate() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(vec![
            north_of_target("A", 5.0),
            north_of_target("B", 10.0),
            north_of_target("C", 20.0),
        ])
        .with_observations("B", history("B", 40.0))
        .with_observations("C", history("C", 80.0))
        .failing("A");
        let (engine, _) = engine(source, &dir).await;

        let climate = engine
            .select_and_blend()
            .location(TARGET)
            .call()
            .await
            .unwrap();
        let ids: Vec<&str> = climate
            .cloud_stations
            .iter()
            .map(|w| w.station_id.as_str())
            .collect();
        assert_eq!(ids, vec!["B", "C"]);
        assert!(!climate.cloud_distance_constrained);
        assert_eq!(climate.points.len(), 12);

        // a transient failure does not remove the station from the roster
        let roster = engine.list_roster().await.unwrap();
        assert!(roster.iter().any(|s| s.id == "A"));
    }

    #[tokio::test]
    async fn station_gone_upstream_leaves_the_roster() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(vec![
            north_of_target("A", 5.0),
            north_of_target("B", 10.0),
        ])
        .with_observations("B", history("B", 40.0));
        let (engine, _) = engine(source, &dir).await;

        let climate = engine
            .select_and_blend()
            .location(TARGET)
            .call()
            .await
            .unwrap();
        assert_eq!(climate.cloud_stations.len(), 1);
        assert!(climate.cloud_distance_constrained);
        assert!((climate.cloud_stations[0].weight - 1.0).abs() < 1e-12);

        let roster = engine.list_roster().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, "B");
    }

    #[tokio::test]
    async fn no_usable_station_is_an_explicit_error() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(vec![north_of_target("A", 5.0)]).failing("A");
        let (engine, _) = engine(source, &dir).await;

        let err = engine
            .select_and_blend()
            .location(TARGET)
            .call()
            .await
            .unwrap_err();
        assert!(matches!(err, ClimateError::NoDataAvailable { .. }));
    }

    #[tokio::test]
    async fn station_climate_lists_every_bucket() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(vec![north_of_target("B", 10.0)])
            .with_observations(
                "B",
                vec![cloud_obs("B", 2001, 3, 1, 20.0), cloud_obs("B", 2004, 3, 1, 60.0)],
            );
        let (engine, _) = engine(source, &dir).await;

        let yearly = engine.station_climate("B", Resolution::Year).await.unwrap();
        let labels: Vec<&str> = yearly.points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["2001", "2002", "2003", "2004"]);
        assert_eq!(yearly.points[1].stat.cloud_mean, None);
        assert!(!yearly.has_lightning_data);

        let daily = engine.station_climate("B", Resolution::Day).await.unwrap();
        assert_eq!(daily.points.len(), 366);

        let err = engine
            .station_climate("nope", Resolution::Month)
            .await
            .unwrap_err();
        assert!(matches!(err, ClimateError::UnknownStation(_)));
    }

    #[tokio::test]
    async fn nearby_stations_respect_capability_and_limit() {
        let dir = TempDir::new().unwrap();
        let mut cloud_only = north_of_target("B", 10.0);
        cloud_only.has_lightning = false;
        let source = FakeSource::new(vec![
            north_of_target("A", 30.0),
            cloud_only,
            north_of_target("C", 20.0),
        ]);
        let (engine, _) = engine(source, &dir).await;

        let nearest = engine
            .nearby_stations()
            .location(TARGET)
            .limit(2)
            .call()
            .await
            .unwrap();
        let ids: Vec<&str> = nearest.iter().map(|n| n.station.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
        assert!((nearest[0].distance_km - 10.0).abs() < 0.01);

        let lightning = engine
            .nearby_stations()
            .location(TARGET)
            .capability(Capability::Lightning)
            .call()
            .await
            .unwrap();
        let ids: Vec<&str> = lightning.iter().map(|n| n.station.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A"]);
    }

    #[tokio::test]
    async fn stations_in_both_pools_are_fetched_once() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(vec![
            north_of_target("A", 5.0),
            north_of_target("B", 10.0),
        ])
        .with_observations("A", history("A", 40.0))
        .with_observations("B", history("B", 60.0));
        let (engine, source) = engine(source, &dir).await;

        let climate = engine
            .select_and_blend()
            .location(TARGET)
            .call()
            .await
            .unwrap();
        assert_eq!(climate.cloud_stations.len(), 2);
        assert_eq!(climate.lightning_stations.len(), 2);
        assert_eq!(source.raw_calls(), 2);
    }

    #[tokio::test]
    async fn poor_lightning_pool_lowers_overall_quality() {
        let dir = TempDir::new().unwrap();
        let mut source = surrounding_cloud_stations();
        for (id, km) in [("L1", 150.0), ("L2", 160.0)] {
            source.stations.push(with_signals(north_of_target(id, km), false, true));
            let observations = (1..=12).map(|m| weather_obs(id, 2015, m, 10, 0)).collect();
            source = source.with_observations(id, observations);
        }
        let (engine, _) = engine_with(source, deep_enough_config(&dir)).await;

        let climate = engine
            .select_and_blend()
            .location(TARGET)
            .call()
            .await
            .unwrap();
        assert_eq!(climate.cloud_stations.len(), 4);
        assert_eq!(climate.quality.level, Level::Good);
        let lightning = climate.lightning_quality.as_ref().unwrap();
        assert_eq!(lightning.proximity.level, Level::Poor);
        assert_eq!(lightning.level, Level::Poor);
        assert_eq!(climate.overall_quality, Level::Poor);
    }

    #[tokio::test]
    async fn missing_lightning_pool_caps_overall_quality_at_fair() {
        let dir = TempDir::new().unwrap();
        let (engine, _) =
            engine_with(surrounding_cloud_stations(), deep_enough_config(&dir)).await;

        let climate = engine
            .select_and_blend()
            .location(TARGET)
            .call()
            .await
            .unwrap();
        assert_eq!(climate.quality.level, Level::Good);
        assert!(climate.lightning_quality.is_none());
        assert!(!climate.has_lightning_data);
        assert_eq!(climate.overall_quality, Level::Fair);
    }

    const SPREAD: [(&str, f64, f64); 6] = [
        ("A", 4.0, 10.0),
        ("B", 9.0, 30.0),
        ("C", 15.0, 50.0),
        ("D", 22.0, 70.0),
        ("E", 31.0, 90.0),
        ("F", 45.0, 20.0),
    ];

    fn spread_source() -> FakeSource {
        let stations = SPREAD.iter().map(|(id, km, _)| north_of_target(id, *km)).collect();
        SPREAD
            .iter()
            .fold(FakeSource::new(stations), |source, (id, _, cloud)| {
                source.with_observations(id, history(id, *cloud))
            })
    }

    async fn all_resolutions(engine: &ClimateEngine) -> Vec<LocationClimate> {
        let mut results = Vec::new();
        for resolution in Resolution::ALL {
            let climate = engine
                .select_and_blend()
                .location(TARGET)
                .resolution(resolution)
                .call()
                .await
                .unwrap();
            results.push(climate);
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queries_during_preload_see_complete_entries() {
        let dir = TempDir::new().unwrap();
        let (preloading, source) = engine(spread_source(), &dir).await;
        let preloading = Arc::new(preloading);

        assert!(preloading.start_preload());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&preloading);
                tokio::spawn(async move {
                    let results = all_resolutions(&shared).await;
                    for (id, _, cloud) in SPREAD {
                        for resolution in Resolution::ALL {
                            let cached =
                                shared.cache().get_aggregate(id, resolution).await.unwrap();
                            assert_eq!(*cached, aggregate(id, &history(id, cloud), resolution));
                        }
                    }
                    results
                })
            })
            .collect();
        let concurrent: Vec<Vec<LocationClimate>> = join_all(readers)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let status = preloading.wait_for_preload().await;
        assert_eq!(status.state, PreloadState::Finished);
        assert_eq!(status.completed, SPREAD.len());
        assert_eq!(status.failed, 0);
        assert_eq!(source.raw_calls(), SPREAD.len());

        let sequential_dir = TempDir::new().unwrap();
        let (sequential_engine, _) = engine(spread_source(), &sequential_dir).await;
        let sequential = all_resolutions(&sequential_engine).await;

        for results in concurrent {
            for (got, want) in results.iter().zip(&sequential) {
                assert_eq!(got.points, want.points);
                assert_eq!(got.cloud_stations, want.cloud_stations);
                assert_eq!(got.lightning_stations, want.lightning_stations);
                assert_eq!(got.quality, want.quality);
                assert_eq!(got.overall_quality, want.overall_quality);
            }
        }
    }
}
