//! Per-bucket statistics produced by the aggregator for one station.

use crate::types::resolution::{BucketKey, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Statistics of one station in one time bucket.
///
/// A bucket without observations has `None` means/fractions and zero counts,
/// never zeros masquerading as measurements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BucketStat {
    /// Mean cloud coverage in percent.
    pub cloud_mean: Option<f64>,
    /// Number of cloud coverage observations.
    pub cloud_count: u32,
    /// Share of present-weather observations that reported lightning or thunder.
    pub lightning_fraction: Option<f64>,
    /// Present-weather observations that reported lightning or thunder.
    pub lightning_hits: u32,
    /// Number of present-weather observations.
    pub lightning_count: u32,
}

impl BucketStat {
    pub const EMPTY: BucketStat = BucketStat {
        cloud_mean: None,
        cloud_count: 0,
        lightning_fraction: None,
        lightning_hits: 0,
        lightning_count: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.cloud_count == 0 && self.lightning_count == 0
    }
}

/// The aggregator's output for one `(station, resolution)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationAggregate {
    pub station_id: String,
    pub resolution: Resolution,
    pub buckets: BTreeMap<BucketKey, BucketStat>,
}

impl StationAggregate {
    /// The stat for `key`; buckets the station never observed read as empty.
    pub fn stat(&self, key: &BucketKey) -> BucketStat {
        self.buckets.get(key).copied().unwrap_or(BucketStat::EMPTY)
    }

    /// Inclusive range of years with at least one observation.
    pub fn observed_years(&self) -> Option<RangeInclusive<i32>> {
        if self.resolution != Resolution::Year {
            return None;
        }
        let mut observed = self
            .buckets
            .iter()
            .filter(|(_, stat)| !stat.is_empty())
            .map(|(key, _)| key.index);
        let first = observed.next()?;
        let last = observed.last().unwrap_or(first);
        Some(first..=last)
    }

    /// Returns `true` if any bucket holds a lightning observation.
    pub fn has_lightning_data(&self) -> bool {
        self.buckets.values().any(|stat| stat.lightning_count > 0)
    }
}

/// Aggregates of the stations taking part in one blend, keyed by station id.
pub type AggregateSet = HashMap<String, Arc<StationAggregate>>;
