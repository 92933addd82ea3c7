//! Where station metadata and raw observations come from.

pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod rate_limit;
pub mod smhi;

use crate::source::error::SourceError;
use crate::types::observation::RawObservation;
use crate::types::station::Station;
use async_trait::async_trait;

/// An upstream provider of stations and their observation history.
///
/// Implementations do no caching of their own; the cache layer decides when
/// to call them.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Every station the provider knows about, active or not.
    async fn fetch_roster(&self) -> Result<Vec<Station>, SourceError>;

    /// The full observation history of one station, in provider order.
    ///
    /// Returns [`SourceError::NotFound`] if the provider publishes no data at
    /// all for the station.
    async fn fetch_raw(&self, station_id: &str) -> Result<Vec<RawObservation>, SourceError>;
}
