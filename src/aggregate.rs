//! Turns one station's raw observations into per-bucket statistics.
//!
//! Aggregation is a single pass over the observations in their given order,
//! so aggregating the same series twice produces bit-identical output.

use crate::types::bucket::{BucketStat, StationAggregate};
use crate::types::observation::RawObservation;
use crate::types::resolution::{BucketKey, Resolution};
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    cloud_sum: f64,
    cloud_count: u32,
    lightning_hits: u32,
    lightning_count: u32,
}

impl Accumulator {
    fn push(&mut self, observation: &RawObservation) {
        if let Some(cloud) = observation.cloud_coverage.filter(|c| c.is_finite()) {
            self.cloud_sum += cloud;
            self.cloud_count += 1;
        }
        if let Some(lightning) = observation.lightning() {
            self.lightning_count += 1;
            if lightning {
                self.lightning_hits += 1;
            }
        }
    }

    fn finish(self) -> BucketStat {
        BucketStat {
            cloud_mean: (self.cloud_count > 0).then(|| self.cloud_sum / self.cloud_count as f64),
            cloud_count: self.cloud_count,
            lightning_fraction: (self.lightning_count > 0)
                .then(|| self.lightning_hits as f64 / self.lightning_count as f64),
            lightning_hits: self.lightning_hits,
            lightning_count: self.lightning_count,
        }
    }
}

/// Aggregates `observations` of `station_id` into buckets of `resolution`.
///
/// Day and month aggregates contain every canonical bucket; buckets without
/// observations hold [`BucketStat::EMPTY`]. Year aggregates only contain years
/// with at least one observation.
pub fn aggregate(
    station_id: &str,
    observations: &[RawObservation],
    resolution: Resolution,
) -> StationAggregate {
    let mut accumulators: BTreeMap<BucketKey, Accumulator> = resolution
        .canonical_buckets(None)
        .into_iter()
        .map(|key| (key, Accumulator::default()))
        .collect();

    for observation in observations {
        let key = resolution.bucket_for(observation.timestamp.date());
        accumulators.entry(key).or_default().push(observation);
    }

    StationAggregate {
        station_id: station_id.to_string(),
        resolution,
        buckets: accumulators
            .into_iter()
            .map(|(key, acc)| (key, acc.finish()))
            .collect(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn cloud_obs(station: &str, y: i32, m: u32, d: u32, value: f64) -> RawObservation {
        RawObservation {
            station_id: station.to_string(),
            timestamp: NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            cloud_coverage: Some(value),
            present_weather: None,
        }
    }

    pub(crate) fn weather_obs(station: &str, y: i32, m: u32, d: u32, code: u16) -> RawObservation {
        RawObservation {
            station_id: station.to_string(),
            timestamp: NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            cloud_coverage: None,
            present_weather: Some(code),
        }
    }

    fn month(aggregate: &StationAggregate, m: i32) -> BucketStat {
        aggregate.stat(&BucketKey {
            resolution: Resolution::Month,
            index: m,
        })
    }

    #[test]
    fn monthly_means_and_fractions() {
        let observations = vec![
            cloud_obs("1", 2010, 1, 1, 40.0),
            cloud_obs("1", 2011, 1, 15, 80.0),
            weather_obs("1", 2010, 1, 2, 95),
            weather_obs("1", 2010, 1, 3, 0),
            weather_obs("1", 2010, 1, 4, 0),
            weather_obs("1", 2010, 1, 5, 0),
        ];
        let agg = aggregate("1", &observations, Resolution::Month);
        assert_eq!(agg.buckets.len(), 12);

        let jan = month(&agg, 1);
        assert_eq!(jan.cloud_mean, Some(60.0));
        assert_eq!(jan.cloud_count, 2);
        assert_eq!(jan.lightning_fraction, Some(0.25));
        assert_eq!(jan.lightning_hits, 1);
        assert_eq!(jan.lightning_count, 4);
    }

    #[test]
    fn empty_bucket_is_null_not_zero() {
        let agg = aggregate("1", &[cloud_obs("1", 2010, 1, 1, 40.0)], Resolution::Month);
        let feb = month(&agg, 2);
        assert_eq!(feb.cloud_mean, None);
        assert_eq!(feb.cloud_count, 0);
        assert_eq!(feb.lightning_fraction, None);
        assert_eq!(feb.lightning_count, 0);
    }

    #[test]
    fn lightning_total_is_independent_of_cloud_count() {
        let observations = vec![
            cloud_obs("1", 2010, 3, 1, 10.0),
            cloud_obs("1", 2010, 3, 2, 20.0),
            cloud_obs("1", 2010, 3, 3, 30.0),
        ];
        let mar = month(&aggregate("1", &observations, Resolution::Month), 3);
        assert_eq!(mar.cloud_count, 3);
        assert_eq!(mar.lightning_count, 0);
        assert_eq!(mar.lightning_fraction, None);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let observations: Vec<RawObservation> = (0..500)
            .map(|i| {
                let day = 1 + (i % 28) as u32;
                let m = 1 + (i % 12) as u32;
                cloud_obs("1", 2000 + (i % 7), m, day, (i as f64 * 7.3) % 100.0)
            })
            .collect();
        for resolution in Resolution::ALL {
            let a = aggregate("1", &observations, resolution);
            let b = aggregate("1", &observations, resolution);
            assert_eq!(a, b);
            for (key, stat) in &a.buckets {
                let other = b.stat(key);
                assert_eq!(
                    stat.cloud_mean.map(f64::to_bits),
                    other.cloud_mean.map(f64::to_bits)
                );
            }
        }
    }

    #[test]
    fn leap_day_bucket_is_sparse_but_present() {
        let observations = vec![
            cloud_obs("1", 2020, 2, 29, 90.0),
            cloud_obs("1", 2019, 2, 28, 10.0),
            cloud_obs("1", 2020, 2, 28, 30.0),
        ];
        let agg = aggregate("1", &observations, Resolution::Day);
        assert_eq!(agg.buckets.len(), 366);
        let leap = agg.stat(&BucketKey {
            resolution: Resolution::Day,
            index: 366,
        });
        assert_eq!(leap.cloud_count, 1);
        assert_eq!(leap.cloud_mean, Some(90.0));
        let feb28 = agg.stat(&BucketKey {
            resolution: Resolution::Day,
            index: 59,
        });
        assert_eq!(feb28.cloud_count, 2);
        assert_eq!(feb28.cloud_mean, Some(20.0));
    }

    #[test]
    fn yearly_aggregate_only_lists_observed_years() {
        let observations = vec![
            cloud_obs("1", 1999, 5, 1, 50.0),
            cloud_obs("1", 2003, 5, 1, 70.0),
        ];
        let agg = aggregate("1", &observations, Resolution::Year);
        let years: Vec<i32> = agg.buckets.keys().map(|k| k.index).collect();
        assert_eq!(years, vec![1999, 2003]);
        assert_eq!(agg.observed_years(), Some(1999..=2003));
    }
}
