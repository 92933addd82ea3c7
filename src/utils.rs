use crate::error::ClimateError;
use log::info;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_DIR_NAME: &str = "station_climate_cache";

pub fn get_cache_dir() -> Result<PathBuf, ClimateError> {
    dirs::cache_dir()
        .ok_or(ClimateError::CacheDirResolution)
        .map(|p| p.join(CACHE_DIR_NAME))
}

pub async fn ensure_cache_dir_exists(path: &Path) -> Result<(), ClimateError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(ClimateError::CacheDirNotADirectory(path.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating cache directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| ClimateError::CacheDirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(ClimateError::CacheDirCreation(path.to_path_buf(), e)),
    }
}
