//! Spherical geometry helpers: great-circle distance, initial bearing and
//! angular gap analysis of a set of bearings.

use haversine::{distance, Location as HaversineLocation, Units};
use serde::{Deserialize, Serialize};

/// Represents a geographical coordinate using latitude and longitude.
///
/// Latitude is the first element (index 0), and longitude is the second (index 1).
///
/// # Examples
///
/// ```
/// use station_climate::LatLon;
///
/// let stockholm = LatLon(59.33, 18.07);
/// assert_eq!(stockholm.0, 59.33); // Latitude
/// assert_eq!(stockholm.1, 18.07); // Longitude
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon(pub f64, pub f64);

impl LatLon {
    pub fn latitude(&self) -> f64 {
        self.0
    }

    pub fn longitude(&self) -> f64 {
        self.1
    }
}

/// Great-circle distance between two coordinates in kilometers.
pub fn distance_km(from: LatLon, to: LatLon) -> f64 {
    distance(
        HaversineLocation {
            latitude: from.0,
            longitude: from.1,
        },
        HaversineLocation {
            latitude: to.0,
            longitude: to.1,
        },
        Units::Kilometers,
    )
}

/// Initial compass bearing from `from` to `to`, in degrees within `[0, 360)`.
pub fn bearing_deg(from: LatLon, to: LatLon) -> f64 {
    let lat1 = from.0.to_radians();
    let lat2 = to.0.to_radians();
    let d_lng = (to.1 - from.1).to_radians();
    let x = d_lng.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    x.atan2(y).to_degrees().rem_euclid(360.0)
}

/// The widest angle between two consecutive bearings, wrapping at 360°.
///
/// A single bearing leaves the full circle uncovered (360°). Returns `None`
/// when there are no bearings at all.
pub fn largest_angular_gap(bearings: &[f64]) -> Option<f64> {
    if bearings.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = bearings.iter().map(|b| b.rem_euclid(360.0)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let first = sorted[0];
    let last = sorted[sorted.len() - 1];
    let wrap_gap = 360.0 - last + first;
    let max_inner = sorted
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .fold(0.0_f64, f64::max);
    Some(wrap_gap.max(max_inner))
}
