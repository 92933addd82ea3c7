use crate::geo::{distance_km, LatLon};
use crate::types::station::{Capability, Station};
use ordered_float::OrderedFloat;
use rstar::RTree;

/// An immutable view of the station roster.
///
/// Readers hold an `Arc<RosterSnapshot>` and always see one consistent roster.
/// Changes never touch a published snapshot: they build a new one with a higher
/// generation and swap it in.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    generation: u64,
    stations: Vec<Station>,
    rtree: RTree<Station>,
}

impl RosterSnapshot {
    pub fn new(stations: Vec<Station>, generation: u64) -> Self {
        let rtree = RTree::bulk_load(stations.clone());
        Self {
            generation,
            stations,
            rtree,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, station_id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == station_id)
    }

    /// Every active station, in roster order.
    pub fn active(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter().filter(|s| s.active)
    }

    /// Active stations sorted by name, then id.
    pub fn sorted_by_name(&self) -> Vec<Station> {
        let mut stations: Vec<Station> = self.active().cloned().collect();
        stations.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        stations
    }

    /// The active stations that report `capability`: the candidate pool for that signal.
    pub fn candidates(&self, capability: Capability) -> Vec<Station> {
        self.active()
            .filter(|s| s.supports(capability))
            .cloned()
            .collect()
    }

    /// A copy of this roster without `station_id`, one generation later.
    pub fn without(&self, station_id: &str) -> Self {
        let stations = self
            .stations
            .iter()
            .filter(|s| s.id != station_id)
            .cloned()
            .collect();
        Self::new(stations, self.generation + 1)
    }

    /// Finds up to `n_results` nearest active stations, optionally restricted to a capability.
    ///
    /// The R-tree orders candidates by planar degree distance, which drifts from
    /// great-circle order away from the equator. To compensate, a few more
    /// candidates than requested are pulled from the tree and re-sorted by their
    /// haversine distance.
    pub fn nearest(
        &self,
        target: LatLon,
        n_results: usize,
        capability: Option<Capability>,
    ) -> Vec<(Station, f64)> {
        if n_results == 0 {
            return vec![];
        }
        let candidate_limit = (n_results * 2).max(20);

        let mut stations_with_dist: Vec<(Station, f64)> = self
            .rtree
            .nearest_neighbor_iter(&[target.0, target.1])
            .filter(|s| s.active && capability.map_or(true, |c| s.supports(c)))
            .take(candidate_limit)
            .map(|s| {
                let dist = distance_km(target, LatLon(s.latitude, s.longitude));
                (s.clone(), dist)
            })
            .collect();

        stations_with_dist.sort_by(|a, b| {
            OrderedFloat(a.1)
                .cmp(&OrderedFloat(b.1))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        stations_with_dist.truncate(n_results);
        stations_with_dist
    }
}
