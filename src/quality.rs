//! Grades how trustworthy a blended estimate is.
//!
//! Four factors are scored on 0-100 and graded independently. The overall
//! level is the worst factor level: one weak factor is enough to make the
//! estimate weak.

use crate::blend::{cloud_signal, lightning_signal, observed_year_span, weighted_blend, SignalExtractor};
use crate::config::QualityConfig;
use crate::geo::{bearing_deg, largest_angular_gap, LatLon};
use crate::types::bucket::AggregateSet;
use crate::types::resolution::Resolution;
use crate::types::station::StationWeight;
use ordered_float::OrderedFloat;
use serde::Serialize;

pub const GOOD_THRESHOLD: f64 = 70.0;
pub const FAIR_THRESHOLD: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Poor,
    Fair,
    Good,
}

impl Level {
    pub fn from_score(score: f64) -> Self {
        if score >= GOOD_THRESHOLD {
            Level::Good
        } else if score >= FAIR_THRESHOLD {
            Level::Fair
        } else {
            Level::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorScore {
    pub score: f64,
    pub level: Level,
}

impl FactorScore {
    pub fn new(score: f64) -> Self {
        let score = score.clamp(0.0, 100.0);
        Self {
            score,
            level: Level::from_score(score),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Share of canonical buckets with a blended value.
    pub coverage: FactorScore,
    /// Median effective observations per bucket against the resolution's baseline.
    pub depth: FactorScore,
    /// Weighted mean station distance, decaying linearly to the useful radius.
    pub proximity: FactorScore,
    /// How evenly the stations surround the target.
    pub direction: FactorScore,
    /// The worst of the four factor levels.
    pub level: Level,
}

impl QualityReport {
    pub fn from_factors(
        coverage: FactorScore,
        depth: FactorScore,
        proximity: FactorScore,
        direction: FactorScore,
    ) -> Self {
        let level = [coverage.level, depth.level, proximity.level, direction.level]
            .into_iter()
            .min()
            .unwrap_or(Level::Poor);
        Self {
            coverage,
            depth,
            proximity,
            direction,
            level,
        }
    }

    /// The report of a pool without stations.
    pub fn empty() -> Self {
        let zero = FactorScore::new(0.0);
        Self::from_factors(zero, zero, zero, zero)
    }
}

/// The grade of a whole location estimate: the worst of the cloud and
/// lightning levels.
///
/// Without a lightning pool the lightning side is unknown, so the estimate is
/// at best fair.
pub fn overall_level(cloud: &QualityReport, lightning: Option<&QualityReport>) -> Level {
    let lightning = lightning.map_or(Level::Fair, |report| report.level);
    cloud.level.min(lightning)
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Grades the cloud estimate of a blend.
    ///
    /// The lightning pool only matters for year resolution, where the span of
    /// canonical buckets is the union of both pools' observed years.
    pub fn score(
        &self,
        target: LatLon,
        resolution: Resolution,
        cloud: &[StationWeight],
        lightning: &[StationWeight],
        aggregates: &AggregateSet,
    ) -> QualityReport {
        self.score_signal(target, resolution, cloud, lightning, aggregates, cloud_signal)
    }

    /// Grades the lightning estimate of a blend.
    pub fn score_lightning(
        &self,
        target: LatLon,
        resolution: Resolution,
        cloud: &[StationWeight],
        lightning: &[StationWeight],
        aggregates: &AggregateSet,
    ) -> QualityReport {
        self.score_signal(target, resolution, lightning, cloud, aggregates, lightning_signal)
    }

    fn score_signal(
        &self,
        target: LatLon,
        resolution: Resolution,
        pool: &[StationWeight],
        other_pool: &[StationWeight],
        aggregates: &AggregateSet,
        extract: SignalExtractor,
    ) -> QualityReport {
        if pool.is_empty() {
            return QualityReport::empty();
        }
        let years = observed_year_span(pool, other_pool, aggregates);
        let buckets = resolution.canonical_buckets(years);
        let blended: Vec<f64> = buckets
            .iter()
            .filter_map(|key| weighted_blend(pool, aggregates, key, extract))
            .map(|v| v.effective_n)
            .collect();

        let coverage = if buckets.is_empty() {
            0.0
        } else {
            100.0 * blended.len() as f64 / buckets.len() as f64
        };

        QualityReport::from_factors(
            FactorScore::new(coverage),
            FactorScore::new(self.depth(resolution, blended)),
            FactorScore::new(self.proximity(pool)),
            FactorScore::new(self.direction(target, pool)),
        )
    }

    fn depth(&self, resolution: Resolution, effective_counts: Vec<f64>) -> f64 {
        let Some(median) = median(effective_counts) else {
            return 0.0;
        };
        let baseline = self.config.depth_baseline(resolution);
        if baseline <= 0.0 {
            return 100.0;
        }
        (100.0 * median / baseline).min(100.0)
    }

    fn proximity(&self, pool: &[StationWeight]) -> f64 {
        let total_weight: f64 = pool.iter().map(|w| w.weight).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let mean_distance =
            pool.iter().map(|w| w.weight * w.distance_km).sum::<f64>() / total_weight;
        100.0 * (1.0 - mean_distance / self.config.max_useful_radius_km)
    }

    fn direction(&self, target: LatLon, pool: &[StationWeight]) -> f64 {
        let bearings: Vec<f64> = pool
            .iter()
            .filter(|w| w.distance_km > self.config.colocated_km)
            .map(|w| bearing_deg(target, LatLon(w.latitude, w.longitude)))
            .collect();
        match largest_angular_gap(&bearings) {
            Some(gap) => 100.0 * (1.0 - gap / 360.0),
            // every station sits on the target
            None if !pool.is_empty() => 100.0,
            None => 0.0,
        }
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by_key(|v| OrderedFloat(*v));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
