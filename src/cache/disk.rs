use crate::cache::error::CacheError;
use crate::cache::memory::CacheEntry;
use crate::types::resolution::Resolution;
use bincode::config::{Configuration, Fixint, LittleEndian, Limit};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Bumped whenever the layout of a persisted value changes.
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound on a decoded entry, so a corrupt length prefix cannot trigger a huge allocation.
const MAX_ENTRY_BYTES: usize = 1 << 30;

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint, Limit<MAX_ENTRY_BYTES>> =
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_limit::<MAX_ENTRY_BYTES>();

const ROSTER_FILE_NAME: &str = "roster.bin";
const RAW_DIR: &str = "raw";
const AGGREGATE_DIR: &str = "aggregates";

#[derive(Serialize)]
struct EnvelopeRef<'a, V> {
    format_version: u32,
    stored_at: DateTime<Utc>,
    value: &'a V,
}

#[derive(Deserialize)]
struct Envelope<V> {
    format_version: u32,
    stored_at: DateTime<Utc>,
    value: V,
}

/// Persisted cache tier: one bincode file per entry under the cache directory.
///
/// Files are written to a temporary file in the destination directory and
/// renamed over the target, so a reader sees either the old or the new file.
#[derive(Debug, Clone)]
pub struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn roster_path(&self) -> PathBuf {
        self.root.join(ROSTER_FILE_NAME)
    }

    pub fn raw_path(&self, station_id: &str) -> PathBuf {
        self.root
            .join(RAW_DIR)
            .join(format!("{}.bin", sanitize_id(station_id)))
    }

    pub fn aggregate_path(&self, station_id: &str, resolution: Resolution) -> PathBuf {
        self.root.join(AGGREGATE_DIR).join(format!(
            "{}-{}.bin",
            sanitize_id(station_id),
            resolution.path_segment()
        ))
    }

    /// Reads the entry at `path`.
    ///
    /// A missing file is `Ok(None)`. So is a corrupt or outdated file: it is
    /// logged and left for the next write to replace.
    pub async fn read<V>(&self, path: PathBuf) -> Result<Option<CacheEntry<V>>, CacheError>
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Read(path, e)),
        };

        let decoded = tokio::task::spawn_blocking(move || decode_entry::<V>(&path, &bytes)).await?;
        match decoded {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.is_corruption() => {
                warn!("Ignoring unreadable cache entry: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Atomically replaces the entry at `path`.
    pub async fn write<V>(&self, path: PathBuf, entry: &CacheEntry<V>) -> Result<(), CacheError>
    where
        V: Serialize + Send + Sync + 'static,
    {
        let value = Arc::clone(&entry.value);
        let stored_at = entry.stored_at;
        tokio::task::spawn_blocking(move || {
            let bytes = bincode::serde::encode_to_vec(
                EnvelopeRef {
                    format_version: FORMAT_VERSION,
                    stored_at,
                    value: value.as_ref(),
                },
                BINCODE_CONFIG,
            )
            .map_err(|e| CacheError::Encode(Box::new(e)))?;
            write_atomic(&path, &bytes)?;
            debug!("Wrote {} bytes to {}", bytes.len(), path.display());
            Ok(())
        })
        .await?
    }

    pub async fn remove(&self, path: PathBuf) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Delete(path, e)),
        }
    }
}

fn decode_entry<V: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<CacheEntry<V>, CacheError> {
    let (envelope, _) = bincode::serde::decode_from_slice::<Envelope<V>, _>(bytes, BINCODE_CONFIG)
        .map_err(|e| CacheError::Decode(path.to_path_buf(), Box::new(e)))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(CacheError::FormatVersion {
            path: path.to_path_buf(),
            found: envelope.format_version,
            expected: FORMAT_VERSION,
        });
    }
    Ok(CacheEntry {
        value: Arc::new(envelope.value),
        stored_at: envelope.stored_at,
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| CacheError::DirCreation(dir.to_path_buf(), e))?;

    let mut temp_file =
        NamedTempFile::new_in(dir).map_err(|e| CacheError::Write(path.to_path_buf(), e))?;
    temp_file
        .write_all(bytes)
        .and_then(|_| temp_file.as_file().sync_all())
        .map_err(|e| CacheError::Write(path.to_path_buf(), e))?;
    temp_file
        .persist(path)
        .map_err(|e| CacheError::Persist(path.to_path_buf(), e))?;
    Ok(())
}

/// Maps a station id onto a safe file name stem.
fn sanitize_id(station_id: &str) -> String {
    station_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::station::{test_station, Station};
    use tempfile::TempDir;

    #[test]
    fn paths_are_sanitized() {
        let disk = DiskTier::new(Path::new("/cache"));
        assert_eq!(disk.raw_path("98230"), PathBuf::from("/cache/raw/98230.bin"));
        assert_eq!(
            disk.aggregate_path("../etc/passwd", Resolution::Day),
            PathBuf::from("/cache/aggregates/___etc_passwd-day.bin")
        );
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let disk = DiskTier::new(dir.path());
        let entry = CacheEntry::new(vec![test_station("1", 59.0, 18.0)]);
        disk.write(disk.roster_path(), &entry).await.unwrap();

        let read: CacheEntry<Vec<Station>> = disk.read(disk.roster_path()).await.unwrap().unwrap();
        assert_eq!(read.value, entry.value);
        assert_eq!(read.stored_at, entry.stored_at);
    }

    #[tokio::test]
    async fn missing_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let disk = DiskTier::new(dir.path());
        let read: Option<CacheEntry<Vec<Station>>> = disk.read(disk.raw_path("nope")).await.unwrap();
        assert!(read.is_none());
        disk.remove(disk.raw_path("nope")).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let disk = DiskTier::new(dir.path());
        std::fs::write(disk.roster_path(), b"definitely not bincode").unwrap();
        let read: Option<CacheEntry<Vec<Station>>> = disk.read(disk.roster_path()).await.unwrap();
        assert!(read.is_none());

        // the next write replaces it
        disk.write(disk.roster_path(), &CacheEntry::new(Vec::<Station>::new()))
            .await
            .unwrap();
        let read: Option<CacheEntry<Vec<Station>>> = disk.read(disk.roster_path()).await.unwrap();
        assert!(read.is_some());
    }

    #[tokio::test]
    async fn other_format_version_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let disk = DiskTier::new(dir.path());
        let bytes = bincode::serde::encode_to_vec(
            EnvelopeRef {
                format_version: FORMAT_VERSION + 1,
                stored_at: Utc::now(),
                value: &Vec::<Station>::new(),
            },
            BINCODE_CONFIG,
        )
        .unwrap();
        std::fs::write(disk.roster_path(), bytes).unwrap();
        let read: Option<CacheEntry<Vec<Station>>> = disk.read(disk.roster_path()).await.unwrap();
        assert!(read.is_none());
    }
}
