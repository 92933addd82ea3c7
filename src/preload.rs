//! Background warming of the cache.
//!
//! A preload walks the active roster once, fetching every station's raw
//! observations and computing its aggregates at every resolution. Queries
//! never wait for it: anything not yet warmed is loaded on demand.

use crate::cache::CacheLayer;
use crate::source::error::SourceError;
use crate::types::resolution::Resolution;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadState {
    Idle,
    Running,
    /// Every station was attempted; some may have failed.
    Finished,
    /// The roster itself could not be loaded.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreloadStatus {
    pub state: PreloadState,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for PreloadStatus {
    fn default() -> Self {
        Self {
            state: PreloadState::Idle,
            total: 0,
            completed: 0,
            failed: 0,
            in_progress: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

impl PreloadStatus {
    pub fn is_done(&self) -> bool {
        matches!(self.state, PreloadState::Finished | PreloadState::Failed)
    }
}

pub struct Preloader {
    cache: Arc<CacheLayer>,
    workers: usize,
    started: Arc<AtomicBool>,
    status: Arc<watch::Sender<PreloadStatus>>,
}

impl Preloader {
    pub fn new(cache: Arc<CacheLayer>, workers: usize) -> Self {
        let (status, _) = watch::channel(PreloadStatus::default());
        Self {
            cache,
            workers: workers.max(1),
            started: Arc::new(AtomicBool::new(false)),
            status: Arc::new(status),
        }
    }

    /// Starts the preload on the current Tokio runtime and returns immediately.
    ///
    /// Returns `false` if a preload is already running or has finished. A
    /// preload that failed to load the roster may be started again.
    pub fn start(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.status.send_modify(|s| {
            *s = PreloadStatus {
                state: PreloadState::Running,
                started_at: Some(Utc::now()),
                ..PreloadStatus::default()
            }
        });
        tokio::spawn(run(
            Arc::clone(&self.cache),
            self.workers,
            Arc::clone(&self.started),
            Arc::clone(&self.status),
        ));
        true
    }

    pub fn status(&self) -> PreloadStatus {
        self.status.borrow().clone()
    }

    /// Waits until the current preload has finished or failed.
    pub async fn wait(&self) -> PreloadStatus {
        let mut receiver = self.status.subscribe();
        let done = match receiver.wait_for(PreloadStatus::is_done).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        done
    }
}

async fn run(
    cache: Arc<CacheLayer>,
    workers: usize,
    started: Arc<AtomicBool>,
    status: Arc<watch::Sender<PreloadStatus>>,
) {
    let roster = match cache.get_roster().await {
        Ok(roster) => roster,
        Err(e) => {
            warn!("Preload failed to load the roster: {}", e);
            status.send_modify(|s| {
                s.state = PreloadState::Failed;
                s.finished_at = Some(Utc::now());
            });
            started.store(false, Ordering::SeqCst);
            return;
        }
    };

    let stations: Vec<String> = roster.active().map(|s| s.id.clone()).collect();
    info!(
        "Preloading {} stations with {} workers",
        stations.len(),
        workers
    );
    status.send_modify(|s| s.total = stations.len());

    stream::iter(stations)
        .for_each_concurrent(workers, |station_id| {
            let cache = Arc::clone(&cache);
            let status = Arc::clone(&status);
            async move {
                status.send_modify(|s| s.in_progress += 1);
                let result = warm_station(&cache, &station_id).await;
                if let Err(e) = &result {
                    warn!("Preload of station {} failed: {}", station_id, e);
                    if e.is_not_found() {
                        cache.forget_station(&station_id).await;
                    }
                }
                status.send_modify(|s| {
                    s.in_progress -= 1;
                    match result {
                        Ok(()) => s.completed += 1,
                        Err(_) => s.failed += 1,
                    }
                });
            }
        })
        .await;

    status.send_modify(|s| {
        s.state = PreloadState::Finished;
        s.finished_at = Some(Utc::now());
    });
    let done = status.borrow().clone();
    info!(
        "Preload finished: {} completed, {} failed",
        done.completed, done.failed
    );
}

async fn warm_station(cache: &CacheLayer, station_id: &str) -> Result<(), SourceError> {
    for resolution in Resolution::ALL {
        cache.get_aggregate(station_id, resolution).await?;
    }
    Ok(())
}
