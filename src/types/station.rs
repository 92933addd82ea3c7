//! Defines the weather station record held in the roster and the per-query
//! weight assigned to a station when it is blended into a location estimate.
//! Also includes the implementations needed to index stations in an `rstar` R-tree.

use rstar::{PointDistance, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

/// A single weather station as published in the upstream roster.
///
/// Stations are immutable once loaded. A roster refresh replaces every station
/// at once; fields are never patched in place.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Station {
    /// The provider's station identifier (e.g., "98230").
    pub id: String,
    /// Human readable station name.
    pub name: String,
    /// Latitude in decimal degrees (positive for North).
    pub latitude: f64,
    /// Longitude in decimal degrees (positive for East).
    pub longitude: f64,
    /// The station reports total cloud coverage.
    pub has_cloud: bool,
    /// The station reports present weather, from which lightning is derived.
    pub has_lightning: bool,
    /// Whether the provider lists the station as currently active.
    pub active: bool,
}

impl Station {
    /// Returns `true` if the station reports the given signal.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Cloud => self.has_cloud,
            Capability::Lightning => self.has_lightning,
        }
    }
}

/// The observed signal a station pool is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Cloud,
    Lightning,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Cloud => write!(f, "cloud"),
            Capability::Lightning => write!(f, "lightning"),
        }
    }
}

/// A station chosen for a location query, with its normalized blending weight.
///
/// Weights of one selection sum to 1.0. Created per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationWeight {
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Normalized weight in `[0, 1]`.
    pub weight: f64,
    /// Great-circle distance from the query target in kilometers.
    pub distance_km: f64,
}

impl StationWeight {
    /// The weight as a percentage rounded to one decimal, as shown to users.
    pub fn weight_pct(&self) -> f64 {
        (self.weight * 1000.0).round() / 10.0
    }
}

/// A roster station and its great-circle distance from a query location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyStation {
    #[serde(flatten)]
    pub station: Station,
    pub distance_km: f64,
}

// --- R-Tree Implementations ---

/// Lets a `Station` live in an R-tree keyed on `[latitude, longitude]`.
impl RTreeObject for Station {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.latitude, self.longitude])
    }
}

/// Squared planar distance in degree space.
///
/// Only used to order R-tree candidates; exact distances are always recomputed
/// on the sphere afterwards.
impl PointDistance for Station {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.latitude - point[0];
        let dy = self.longitude - point[1];
        dx * dx + dy * dy
    }
}

#[cfg(test)]
pub(crate) fn test_station(id: &str, latitude: f64, longitude: f64) -> Station {
    Station {
        id: id.to_string(),
        name: format!("Station {id}"),
        latitude,
        longitude,
        has_cloud: true,
        has_lightning: true,
        active: true,
    }
}
