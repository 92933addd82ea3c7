mod aggregate;
mod blend;
pub mod cache;
mod config;
mod engine;
mod error;
mod geo;
mod preload;
mod quality;
pub mod source;
mod stations;
mod types;
mod utils;

pub use config::{EngineConfig, QualityConfig, SourceConfig, SMHI_BASE_URL};
pub use engine::ClimateEngine;
pub use error::ClimateError;
pub use geo::{bearing_deg, distance_km, largest_angular_gap, LatLon};

pub use aggregate::aggregate;
pub use blend::{blend, wilson_interval, BlendOutput};
pub use preload::{PreloadState, PreloadStatus};
pub use quality::{overall_level, FactorScore, Level, QualityReport, QualityScorer};
pub use stations::roster::RosterSnapshot;
pub use stations::selector::{select_stations, Selection};

pub use types::bucket::{AggregateSet, BucketStat, StationAggregate};
pub use types::climate::{BlendedPoint, LocationClimate, StationClimate, StationPoint};
pub use types::observation::{is_lightning_code, RawObservation, LIGHTNING_CODES};
pub use types::resolution::{BucketKey, Resolution};
pub use types::station::{Capability, NearbyStation, Station, StationWeight};

pub use cache::error::CacheError;
pub use source::error::SourceError;
pub use source::smhi::SmhiSource;
pub use source::ObservationSource;
