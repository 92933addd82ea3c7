//! Adaptive inverse-distance station selection.
//!
//! Candidates are taken nearest-first and kept while each newcomer would still
//! carry at least `weight_threshold` of the normalized inverse-square weight.

use crate::geo::{distance_km, LatLon};
use crate::types::station::{Station, StationWeight};
use ordered_float::OrderedFloat;

/// The stations chosen for one signal at one location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Selected stations in ascending distance order. Weights sum to 1.0.
    pub weights: Vec<StationWeight>,
    /// Fewer candidates than the requested minimum existed; all of them were used.
    pub distance_constrained: bool,
}

impl Selection {
    /// An empty selection means the signal is unavailable at this location.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn station_ids(&self) -> impl Iterator<Item = &str> {
        self.weights.iter().map(|w| w.station_id.as_str())
    }
}

/// Selects a weighted subset of `candidates` around `target`.
///
/// The first `min_count` stations by distance are always kept. Every further
/// station is accepted only if its share of the normalized weight, computed
/// over the tentative set including itself, is at least `weight_threshold`.
/// Raw scores never increase with distance, so selection stops at the first
/// rejection. Ties in distance are broken by station id.
///
/// Distances below `min_distance_km` are clamped so that a station sitting on
/// the target cannot take an unbounded weight.
pub fn select_stations(
    target: LatLon,
    candidates: &[Station],
    min_count: usize,
    weight_threshold: f64,
    min_distance_km: f64,
) -> Selection {
    if candidates.is_empty() {
        return Selection::default();
    }

    let mut ranked: Vec<(&Station, f64)> = candidates
        .iter()
        .map(|station| {
            let dist = distance_km(target, LatLon(station.latitude, station.longitude));
            (station, dist)
        })
        .collect();
    ranked.sort_by(|a, b| {
        OrderedFloat(a.1)
            .cmp(&OrderedFloat(b.1))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    let floor = min_distance_km.max(f64::MIN_POSITIVE);
    let mut selected: Vec<(&Station, f64, f64)> = Vec::new();
    let mut raw_total = 0.0;

    for (i, &(station, dist)) in ranked.iter().enumerate() {
        let raw = 1.0 / dist.max(floor).powi(2);
        if i >= min_count && raw / (raw_total + raw) < weight_threshold {
            break;
        }
        raw_total += raw;
        selected.push((station, dist, raw));
    }

    let weights = selected
        .into_iter()
        .map(|(station, dist, raw)| StationWeight {
            station_id: station.id.clone(),
            name: station.name.clone(),
            latitude: station.latitude,
            longitude: station.longitude,
            weight: raw / raw_total,
            distance_km: dist,
        })
        .collect();

    Selection {
        weights,
        distance_constrained: candidates.len() < min_count,
    }
}
