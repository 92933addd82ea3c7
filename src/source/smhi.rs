//! Observation source backed by the SMHI Open Data Meteorological Observations API.
//!
//! Cloud coverage (parameter 16) and present weather (parameter 13) are
//! separate series upstream, each with its own station list and one
//! corrected-archive CSV per station.

use crate::config::SourceConfig;
use crate::source::error::SourceError;
use crate::source::rate_limit::RateLimiter;
use crate::source::ObservationSource;
use crate::types::observation::RawObservation;
use crate::types::station::Station;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use log::{debug, info};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Marks the header row of the data section in a corrected-archive CSV.
const DATA_HEADER_PREFIX: &str = "Datum;Tid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Series {
    CloudCoverage,
    PresentWeather,
}

impl Series {
    fn parameter_id(self) -> u32 {
        match self {
            Series::CloudCoverage => 16,
            Series::PresentWeather => 13,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ParameterStations {
    #[serde(default)]
    station: Vec<SmhiStation>,
}

#[derive(Debug, Clone, Deserialize)]
struct SmhiStation {
    key: String,
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    active: bool,
}

pub struct SmhiSource {
    client: ClientWithMiddleware,
    base_url: String,
    request_timeout: Duration,
    rate_limiter: RateLimiter,
}

impl SmhiSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(config.retry_min_backoff, config.retry_max_backoff)
            .build_with_max_retries(config.max_retries);
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(SourceError::ClientBuild)?;
        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            rate_limiter: RateLimiter::new(
                config.rate_limit_capacity,
                config.rate_limit_refill_per_sec,
            ),
        })
    }

    /// GETs `url` as text. A 404 is `Ok(None)`, any other non-success status an error.
    async fn get_text(&self, url: &str) -> Result<Option<String>, SourceError> {
        self.rate_limiter.acquire().await;
        debug!("requesting: {}", url);

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| SourceError::NetworkRequest(url.to_string(), e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::NetworkRequest(url.to_string(), e.into()))?;
        Ok(Some(body))
    }

    async fn fetch_station_list(&self, series: Series) -> Result<Vec<SmhiStation>, SourceError> {
        let url = format!("{}/parameter/{}.json", self.base_url, series.parameter_id());
        let Some(body) = self.get_text(&url).await? else {
            return Err(SourceError::NotFound(url));
        };
        let parsed: ParameterStations =
            serde_json::from_str(&body).map_err(|e| SourceError::JsonParse(url, e))?;
        Ok(parsed.station)
    }

    /// One series of a station, or `None` if the station does not publish it.
    async fn fetch_series(
        &self,
        station_id: &str,
        series: Series,
    ) -> Result<Option<Vec<RawObservation>>, SourceError> {
        let url = format!(
            "{}/parameter/{}/station/{}/period/corrected-archive/data.csv",
            self.base_url,
            series.parameter_id(),
            station_id
        );
        let Some(body) = self.get_text(&url).await? else {
            debug!("No {:?} archive for station {}", series, station_id);
            return Ok(None);
        };

        let station = station_id.to_string();
        let observations =
            tokio::task::spawn_blocking(move || parse_archive_csv(&station, &body, series))
                .await??;
        Ok(Some(observations))
    }
}

#[async_trait]
impl ObservationSource for SmhiSource {
    async fn fetch_roster(&self) -> Result<Vec<Station>, SourceError> {
        let (cloud, weather) = tokio::join!(
            self.fetch_station_list(Series::CloudCoverage),
            self.fetch_station_list(Series::PresentWeather)
        );
        let stations = merge_station_lists(cloud?, weather?);
        info!("Fetched roster of {} stations", stations.len());
        Ok(stations)
    }

    async fn fetch_raw(&self, station_id: &str) -> Result<Vec<RawObservation>, SourceError> {
        let (cloud, weather) = tokio::join!(
            self.fetch_series(station_id, Series::CloudCoverage),
            self.fetch_series(station_id, Series::PresentWeather)
        );
        match (cloud?, weather?) {
            (None, None) => Err(SourceError::NotFound(format!("station {station_id}"))),
            (cloud, weather) => {
                let mut observations = cloud.unwrap_or_default();
                observations.extend(weather.unwrap_or_default());
                info!(
                    "Fetched {} observations for station {}",
                    observations.len(),
                    station_id
                );
                Ok(observations)
            }
        }
    }
}

/// Merges the per-parameter station lists into one roster keyed by station id.
///
/// A station supports a signal if it is active in that parameter's list and
/// is active if it supports either.
fn merge_station_lists(cloud: Vec<SmhiStation>, weather: Vec<SmhiStation>) -> Vec<Station> {
    let mut merged: BTreeMap<String, Station> = BTreeMap::new();
    let tagged = cloud
        .into_iter()
        .map(|s| (s, Series::CloudCoverage))
        .chain(weather.into_iter().map(|s| (s, Series::PresentWeather)));

    for (raw, series) in tagged {
        let station = merged.entry(raw.key.clone()).or_insert_with(|| Station {
            id: raw.key.clone(),
            name: raw.name.clone(),
            latitude: raw.latitude,
            longitude: raw.longitude,
            has_cloud: false,
            has_lightning: false,
            active: false,
        });
        if raw.active {
            match series {
                Series::CloudCoverage => station.has_cloud = true,
                Series::PresentWeather => station.has_lightning = true,
            }
            station.active = true;
        }
    }
    merged.into_values().collect()
}

/// Parses a corrected-archive CSV into observations of one series.
///
/// The file starts with free-form metadata blocks; data begins at the row
/// whose first columns are `Datum;Tid`. Rows without a parsable date or value
/// are skipped.
fn parse_archive_csv(
    station_id: &str,
    text: &str,
    series: Series,
) -> Result<Vec<RawObservation>, SourceError> {
    let Some(offset) = find_data_section(text) else {
        if text.trim().is_empty() {
            return Ok(vec![]);
        }
        return Err(SourceError::Malformed {
            station: station_id.to_string(),
            message: format!("no '{DATA_HEADER_PREFIX}' header row"),
        });
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(text[offset..].as_bytes());

    let mut observations = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|source| SourceError::CsvRead {
            station: station_id.to_string(),
            source,
        })?;
        let date = record
            .get(0)
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());
        let value = record.get(2).and_then(|v| v.trim().parse::<f64>().ok());
        let (Some(date), Some(value)) = (date, value) else {
            skipped += 1;
            continue;
        };
        let time = record
            .get(1)
            .and_then(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M:%S").ok())
            .unwrap_or(NaiveTime::MIN);

        let (cloud_coverage, present_weather) = match series {
            Series::CloudCoverage => (Some(value), None),
            Series::PresentWeather => match weather_code(value) {
                Some(code) => (None, Some(code)),
                None => {
                    skipped += 1;
                    continue;
                }
            },
        };
        observations.push(RawObservation {
            station_id: station_id.to_string(),
            timestamp: date.and_time(time),
            cloud_coverage,
            present_weather,
        });
    }
    if skipped > 0 {
        debug!("Skipped {} unparsable rows for station {}", skipped, station_id);
    }
    Ok(observations)
}

fn find_data_section(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.starts_with(DATA_HEADER_PREFIX) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn weather_code(value: f64) -> Option<u16> {
    (value.is_finite() && value >= 0.0 && value <= u16::MAX as f64).then(|| value.trunc() as u16)
}
