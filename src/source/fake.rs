use crate::source::error::SourceError;
use crate::source::ObservationSource;
use crate::types::observation::RawObservation;
use crate::types::station::Station;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory source that counts its calls.
#[derive(Default)]
pub(crate) struct FakeSource {
    pub stations: Vec<Station>,
    pub observations: HashMap<String, Vec<RawObservation>>,
    /// Stations whose fetch fails as if the provider were unreachable.
    pub failing: HashSet<String>,
    pub roster_calls: AtomicUsize,
    pub raw_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            stations,
            ..Default::default()
        }
    }

    pub fn with_observations(mut self, station_id: &str, observations: Vec<RawObservation>) -> Self {
        self.observations.insert(station_id.to_string(), observations);
        self
    }

    pub fn failing(mut self, station_id: &str) -> Self {
        self.failing.insert(station_id.to_string());
        self
    }

    pub fn raw_calls(&self) -> usize {
        self.raw_calls.load(Ordering::SeqCst)
    }

    pub fn roster_calls(&self) -> usize {
        self.roster_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObservationSource for FakeSource {
    async fn fetch_roster(&self) -> Result<Vec<Station>, SourceError> {
        self.roster_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.stations.clone())
    }

    async fn fetch_raw(&self, station_id: &str) -> Result<Vec<RawObservation>, SourceError> {
        self.raw_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(station_id) {
            return Err(SourceError::Malformed {
                station: station_id.to_string(),
                message: "unreachable".to_string(),
            });
        }
        self.observations
            .get(station_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("station {station_id}")))
    }
}
