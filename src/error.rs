use crate::source::error::SourceError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClimateError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("No station data available near ({latitude}, {longitude})")]
    NoDataAvailable { latitude: f64, longitude: f64 },

    #[error("Unknown station '{0}'")]
    UnknownStation(String),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Cache path '{0}' exists but is not a directory")]
    CacheDirNotADirectory(PathBuf),

    #[error("Failed to determine cache directory")]
    CacheDirResolution,

    #[error("Failed to read config file '{0}'")]
    ConfigRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{0}'")]
    ConfigParse(PathBuf, #[source] serde_json::Error),
}
