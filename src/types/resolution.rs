//! Defines the time resolutions observations are bucketed into, and the
//! bucket keys derived from observation dates.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Non-leap reference year used to number day buckets.
const REFERENCE_YEAR: i32 = 2001;

/// Day bucket reserved for February 29th.
pub const LEAP_DAY_BUCKET: i32 = 366;

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// The time granularity of an aggregate or a blended series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Calendar day of year, pooled across all years of history.
    Day,
    /// Calendar month, pooled across all years of history.
    Month,
    /// Individual calendar years.
    Year,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Day, Resolution::Month, Resolution::Year];

    pub(crate) fn path_segment(&self) -> &'static str {
        match self {
            Resolution::Day => "day",
            Resolution::Month => "month",
            Resolution::Year => "year",
        }
    }

    /// Computes the bucket an observation taken on `date` falls into.
    ///
    /// Day buckets ignore the year: every date maps to its day number in a
    /// non-leap year (1..=365) and February 29th gets its own bucket 366.
    pub fn bucket_for(&self, date: NaiveDate) -> BucketKey {
        let index = match self {
            Resolution::Day => {
                if date.month() == 2 && date.day() == 29 {
                    LEAP_DAY_BUCKET
                } else {
                    NaiveDate::from_ymd_opt(REFERENCE_YEAR, date.month(), date.day())
                        .map(|d| d.ordinal() as i32)
                        .unwrap_or(LEAP_DAY_BUCKET)
                }
            }
            Resolution::Month => date.month() as i32,
            Resolution::Year => date.year(),
        };
        BucketKey {
            resolution: *self,
            index,
        }
    }

    /// Lists the buckets of this resolution in canonical order.
    ///
    /// Day and month buckets are fixed (1..=366, 1..=12). Year buckets span
    /// `years`; with no observed years there are no year buckets.
    pub fn canonical_buckets(&self, years: Option<RangeInclusive<i32>>) -> Vec<BucketKey> {
        let indices: Vec<i32> = match self {
            Resolution::Day => (1..=LEAP_DAY_BUCKET).collect(),
            Resolution::Month => (1..=12).collect(),
            Resolution::Year => years.map(|r| r.collect()).unwrap_or_default(),
        };
        indices
            .into_iter()
            .map(|index| BucketKey {
                resolution: *self,
                index,
            })
            .collect()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Resolution::Day),
            "month" => Ok(Resolution::Month),
            "year" => Ok(Resolution::Year),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// A discrete time slot: day-of-year (1..=366), month (1..=12) or calendar year.
///
/// Buckets are derived from observation timestamps and never stored on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub resolution: Resolution,
    pub index: i32,
}

impl BucketKey {
    /// Display label: `"MM-DD"` for days, `"Jan"`..`"Dec"` for months, the year otherwise.
    pub fn label(&self) -> String {
        match self.resolution {
            Resolution::Day if self.index == LEAP_DAY_BUCKET => "02-29".to_string(),
            Resolution::Day => NaiveDate::from_yo_opt(REFERENCE_YEAR, self.index as u32)
                .map(|d| d.format("%m-%d").to_string())
                .unwrap_or_else(|| self.index.to_string()),
            Resolution::Month => usize::try_from(self.index - 1)
                .ok()
                .and_then(|i| MONTH_NAMES.get(i))
                .map(|name| name.to_string())
                .unwrap_or_else(|| self.index.to_string()),
            Resolution::Year => self.index.to_string(),
        }
    }
}
