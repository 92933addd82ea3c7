use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to create cache directory '{0}'")]
    DirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to read cache file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to write cache file '{0}'")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("Failed to move cache file into place at '{0}'")]
    Persist(PathBuf, #[source] tempfile::PersistError),

    #[error("Failed to delete cache file '{0}'")]
    Delete(PathBuf, #[source] std::io::Error),

    #[error("Failed to decode cache data from '{0}'")]
    Decode(PathBuf, #[source] Box<bincode::error::DecodeError>),

    #[error("Cache file '{path}' has format version {found}, expected {expected}")]
    FormatVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Failed to encode cache data")]
    Encode(#[source] Box<bincode::error::EncodeError>),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl CacheError {
    /// A stored entry exists but cannot be used; it counts as a miss.
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Decode(..) | CacheError::FormatVersion { .. })
    }
}
