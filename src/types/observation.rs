//! Raw per-station observations and the mapping from WMO present-weather codes
//! to the binary lightning/thunder indicator.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// WMO present-weather codes reported by the provider that indicate lightning or thunder.
///
/// Covers heat lightning, thunder with and without precipitation, thunderstorm
/// variants from both the manned (91-99) and automatic (190-196) code tables,
/// distant and cloud-to-ground lightning, and "showers or thunder" codes.
pub const LIGHTNING_CODES: &[u16] = &[
    13, 17, 29, 91, 92, 93, 94, 95, 96, 97, 98, 99, 112, 126, 190, 191, 192, 193, 194, 195, 196,
    213, 217, 292, 293,
];

/// Returns `true` if a present-weather code counts as a lightning/thunder observation.
pub fn is_lightning_code(code: u16) -> bool {
    LIGHTNING_CODES.contains(&code)
}

/// A single observation as delivered by the upstream provider.
///
/// The provider publishes cloud coverage and present weather as separate series,
/// so usually only one of the two values is set. Observation arrays are
/// immutable and replaced wholesale when a station is refetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub station_id: String,
    /// Observation time (UTC).
    pub timestamp: NaiveDateTime,
    /// Total cloud coverage in percent (0-100).
    pub cloud_coverage: Option<f64>,
    /// WMO present-weather code.
    pub present_weather: Option<u16>,
}

impl RawObservation {
    /// The lightning indicator, or `None` if present weather was not recorded.
    pub fn lightning(&self) -> Option<bool> {
        self.present_weather.map(is_lightning_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn lightning_derivation() {
        let ts = NaiveDate::from_ymd_opt(2020, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let mut obs = RawObservation {
            station_id: "1".into(),
            timestamp: ts,
            cloud_coverage: None,
            present_weather: Some(95),
        };
        assert_eq!(obs.lightning(), Some(true));
        obs.present_weather = Some(61);
        assert_eq!(obs.lightning(), Some(false));
        obs.present_weather = None;
        assert_eq!(obs.lightning(), None);
    }

    #[test]
    fn code_table_edges() {
        assert!(is_lightning_code(91));
        assert!(is_lightning_code(99));
        assert!(!is_lightning_code(100));
        assert!(is_lightning_code(293));
        assert!(!is_lightning_code(0));
    }
}
