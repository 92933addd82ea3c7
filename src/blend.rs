//! Inverse-distance blending of several stations' aggregates into one series.
//!
//! Cloud and lightning are blended by the same routine, each over its own
//! station pool and weights, and differ only in which statistic they extract.

use crate::types::bucket::{AggregateSet, BucketStat};
use crate::types::climate::BlendedPoint;
use crate::types::resolution::{BucketKey, Resolution};
use crate::types::station::StationWeight;
use std::ops::RangeInclusive;

/// z-score of a two-sided 95% confidence level.
pub const Z_95: f64 = 1.96;

/// A blended value and the weighted number of observations behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedValue {
    pub value: f64,
    /// Sum of contributing stations' observation counts, weighted by their
    /// renormalized weights.
    pub effective_n: f64,
}

/// Pulls one signal's value and observation count out of a bucket.
pub type SignalExtractor = fn(&BucketStat) -> Option<(f64, u32)>;

pub fn cloud_signal(stat: &BucketStat) -> Option<(f64, u32)> {
    stat.cloud_mean.map(|mean| (mean, stat.cloud_count))
}

pub fn lightning_signal(stat: &BucketStat) -> Option<(f64, u32)> {
    stat.lightning_fraction
        .map(|fraction| (fraction, stat.lightning_count))
}

/// Weighted mean of one signal in one bucket.
///
/// Only stations with a value for the bucket contribute, and their weights are
/// renormalized among themselves, so a station missing the bucket does not drag
/// the estimate toward zero. Returns `None` if no station has a value.
pub fn weighted_blend(
    weights: &[StationWeight],
    aggregates: &AggregateSet,
    key: &BucketKey,
    extract: SignalExtractor,
) -> Option<WeightedValue> {
    let contributions: Vec<(f64, f64, u32)> = weights
        .iter()
        .filter_map(|w| {
            let aggregate = aggregates.get(&w.station_id)?;
            let (value, n) = extract(&aggregate.stat(key))?;
            Some((w.weight, value, n))
        })
        .collect();

    let total_weight: f64 = contributions.iter().map(|(w, _, _)| w).sum();
    if contributions.is_empty() || total_weight <= 0.0 {
        return None;
    }

    let mut value = 0.0;
    let mut effective_n = 0.0;
    for (weight, v, n) in contributions {
        let share = weight / total_weight;
        value += share * v;
        effective_n += share * n as f64;
    }
    Some(WeightedValue { value, effective_n })
}

/// 95% Wilson score interval for proportion `p` observed over `n` trials.
///
/// Returns `None` when `n` is below `min_n`: small samples get no bounds
/// rather than misleadingly tight ones.
pub fn wilson_interval(p: f64, n: f64, min_n: f64) -> Option<(f64, f64)> {
    if n <= 0.0 || n < min_n {
        return None;
    }
    let z2 = Z_95 * Z_95;
    let denominator = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denominator;
    let half_width = Z_95 * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denominator;
    Some((
        (center - half_width).clamp(0.0, 1.0),
        (center + half_width).clamp(0.0, 1.0),
    ))
}

/// The blended series for one location.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendOutput {
    pub points: Vec<BlendedPoint>,
    /// The lightning pool was non-empty and at least one bucket has a blended
    /// lightning value. When `false` no point carries lightning values.
    pub has_lightning_data: bool,
}

/// Years spanned by any station of either pool, for year-resolution series.
pub fn observed_year_span(
    cloud: &[StationWeight],
    lightning: &[StationWeight],
    aggregates: &AggregateSet,
) -> Option<RangeInclusive<i32>> {
    cloud
        .iter()
        .chain(lightning)
        .filter_map(|w| aggregates.get(&w.station_id)?.observed_years())
        .fold(None, |span: Option<RangeInclusive<i32>>, years| match span {
            None => Some(years),
            Some(span) => Some(
                (*span.start()).min(*years.start())..=(*span.end()).max(*years.end()),
            ),
        })
}

/// Blends the aggregates of the cloud and lightning pools into one point per
/// canonical bucket of `resolution`.
///
/// Year series span every year observed by any selected station; years no
/// station observed come out as no-data points.
pub fn blend(
    resolution: Resolution,
    cloud: &[StationWeight],
    lightning: &[StationWeight],
    aggregates: &AggregateSet,
    min_ci_observations: f64,
) -> BlendOutput {
    let years = observed_year_span(cloud, lightning, aggregates);
    let mut points: Vec<BlendedPoint> = resolution
        .canonical_buckets(years)
        .into_iter()
        .map(|key| {
            let cloud_value = weighted_blend(cloud, aggregates, &key, cloud_signal);
            let lightning_value = weighted_blend(lightning, aggregates, &key, lightning_signal);
            let bounds = lightning_value
                .and_then(|l| wilson_interval(l.value, l.effective_n, min_ci_observations));

            BlendedPoint {
                label: key.label(),
                index: key.index,
                cloud_coverage: cloud_value.map(|c| c.value),
                lightning_probability: lightning_value.map(|l| l.value),
                lightning_lower: bounds.map(|(lower, _)| lower),
                lightning_upper: bounds.map(|(_, upper)| upper),
                cloud_obs_count: cloud_value.map_or(0, |c| c.effective_n.round() as u32),
                lightning_obs_count: lightning_value.map_or(0, |l| l.effective_n.round() as u32),
                no_data: cloud_value.is_none() && lightning_value.is_none(),
            }
        })
        .collect();

    let has_lightning_data =
        !lightning.is_empty() && points.iter().any(|p| p.lightning_probability.is_some());
    if !has_lightning_data {
        for point in &mut points {
            point.lightning_probability = None;
            point.lightning_lower = None;
            point.lightning_upper = None;
            point.lightning_obs_count = 0;
            point.no_data = point.cloud_coverage.is_none();
        }
    }

    BlendOutput {
        points,
        has_lightning_data,
    }
}
