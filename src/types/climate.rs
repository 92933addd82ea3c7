//! Result types returned to callers of the engine.

use crate::geo::LatLon;
use crate::quality::{Level, QualityReport};
use crate::types::bucket::BucketStat;
use crate::types::resolution::Resolution;
use crate::types::station::StationWeight;
use serde::Serialize;

/// The blended estimate for one time bucket at the query location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlendedPoint {
    /// Bucket label (`"03-14"`, `"Mar"`, `"1998"`).
    pub label: String,
    /// Bucket index within its resolution.
    pub index: i32,
    /// Blended mean cloud coverage in percent.
    pub cloud_coverage: Option<f64>,
    /// Blended probability that a present-weather observation reports lightning.
    pub lightning_probability: Option<f64>,
    /// Lower bound of the 95% Wilson interval, when the sample supports one.
    pub lightning_lower: Option<f64>,
    /// Upper bound of the 95% Wilson interval, when the sample supports one.
    pub lightning_upper: Option<f64>,
    /// Effective number of cloud observations behind `cloud_coverage`.
    pub cloud_obs_count: u32,
    /// Effective number of present-weather observations behind `lightning_probability`.
    pub lightning_obs_count: u32,
    /// No selected station contributed an observation to this bucket.
    ///
    /// Gaps are reported as-is; filling them for display is up to the caller.
    pub no_data: bool,
}

/// Everything the engine knows about the climate at one location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationClimate {
    pub target: LatLon,
    pub resolution: Resolution,
    pub points: Vec<BlendedPoint>,
    pub cloud_stations: Vec<StationWeight>,
    pub lightning_stations: Vec<StationWeight>,
    /// Fewer cloud stations than the configured minimum existed at all.
    pub cloud_distance_constrained: bool,
    /// Fewer lightning stations than the configured minimum existed at all.
    pub lightning_distance_constrained: bool,
    /// The lightning series is present in `points`.
    ///
    /// When `false`, every lightning field of every point is `None`.
    pub has_lightning_data: bool,
    /// Grade of the whole estimate: the worst of the cloud and lightning
    /// grades, and at best fair when no station reports lightning.
    pub overall_quality: Level,
    /// Grade of the cloud estimate.
    pub quality: QualityReport,
    /// Grade of the lightning estimate, when a lightning pool exists.
    pub lightning_quality: Option<QualityReport>,
}

/// One labelled bucket of a single station's aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationPoint {
    pub label: String,
    pub index: i32,
    #[serde(flatten)]
    pub stat: BucketStat,
}

/// A single station's un-blended series at one resolution.
#[derive(Debug, Clone, Serialize)]
pub struct StationClimate {
    pub station_id: String,
    pub resolution: Resolution,
    pub has_lightning_data: bool,
    pub points: Vec<StationPoint>,
}
