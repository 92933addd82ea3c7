//! Engine configuration.
//!
//! Every policy constant of the engine lives here rather than in the modules
//! that use it. Configs are built with `bon` builders and can also be read
//! from JSON; absent fields take their defaults.

use crate::error::ClimateError;
use crate::types::resolution::Resolution;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SMHI_BASE_URL: &str = "https://opendata-download-metobs.smhi.se/api/version/1.0";

/// Top-level configuration of a [`crate::ClimateEngine`].
///
/// # Examples
///
/// ```
/// use station_climate::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .min_station_count(3)
///     .weight_threshold(0.05)
///     .build();
/// assert_eq!(config.min_station_count, 3);
/// assert_eq!(config.preload_workers, 4);
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of the persisted cache tier. Defaults to the system cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Stations always kept per pool regardless of their weight.
    #[builder(default = 2)]
    pub min_station_count: usize,
    /// Minimum normalized weight a station beyond the minimum count must carry.
    #[builder(default = 0.02)]
    pub weight_threshold: f64,
    /// Distances are clamped to at least this many kilometers before weighting.
    #[builder(default = 0.1)]
    pub min_distance_km: f64,
    /// Effective sample size below which lightning bounds are suppressed.
    #[builder(default = 30.0)]
    pub min_ci_observations: f64,
    /// Freshness of the station roster.
    #[builder(default = Duration::from_secs(24 * 60 * 60))]
    #[serde(with = "duration_secs")]
    pub roster_ttl: Duration,
    /// Freshness of raw observations and aggregates; the provider's archive
    /// updates about as often.
    #[builder(default = Duration::from_secs(7 * 24 * 60 * 60))]
    #[serde(with = "duration_secs")]
    pub data_ttl: Duration,
    /// Raw observation series kept in memory at once.
    #[builder(default = 32)]
    pub raw_memory_capacity: usize,
    /// Concurrent stations processed by the preloader.
    #[builder(default = 4)]
    pub preload_workers: usize,
    #[builder(default)]
    pub quality: QualityConfig,
    #[builder(default)]
    pub source: SourceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Reads a config from a JSON file. Missing fields fall back to their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ClimateError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ClimateError::ConfigRead(path.to_path_buf(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| ClimateError::ConfigParse(path.to_path_buf(), e))
    }
}

/// Policy constants of the quality scorer.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Median effective observations per day bucket that scores 100 depth.
    #[builder(default = 30.0)]
    pub depth_baseline_day: f64,
    /// Median effective observations per month bucket that scores 100 depth.
    #[builder(default = 500.0)]
    pub depth_baseline_month: f64,
    /// Median effective observations per year bucket that scores 100 depth.
    #[builder(default = 2000.0)]
    pub depth_baseline_year: f64,
    /// Weighted mean station distance at which proximity reaches 0.
    #[builder(default = 150.0)]
    pub max_useful_radius_km: f64,
    /// Stations closer than this carry no bearing information.
    #[builder(default = 0.05)]
    pub colocated_km: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl QualityConfig {
    pub fn depth_baseline(&self, resolution: Resolution) -> f64 {
        match resolution {
            Resolution::Day => self.depth_baseline_day,
            Resolution::Month => self.depth_baseline_month,
            Resolution::Year => self.depth_baseline_year,
        }
    }
}

/// Settings of the HTTP observation source.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    #[builder(default = SMHI_BASE_URL.to_string(), into)]
    pub base_url: String,
    #[builder(default = Duration::from_secs(30))]
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Retries of a transient failure before the request is given up.
    #[builder(default = 3)]
    pub max_retries: u32,
    #[builder(default = Duration::from_millis(500))]
    #[serde(with = "duration_millis")]
    pub retry_min_backoff: Duration,
    #[builder(default = Duration::from_secs(10))]
    #[serde(with = "duration_millis")]
    pub retry_max_backoff: Duration,
    /// Burst size of the request rate limiter.
    #[builder(default = 4)]
    pub rate_limit_capacity: u32,
    /// Sustained requests per second.
    #[builder(default = 2.0)]
    pub rate_limit_refill_per_sec: f64,
    #[builder(default = concat!("station_climate/", env!("CARGO_PKG_VERSION")).to_string(), into)]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
