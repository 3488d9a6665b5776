// # Track Cache
//
// Registry of extracted track files keyed by `TrackKey`:
//
//   Unregistered -> Announced -> Available -> (reclaimed) Unregistered
//
// The first caller to find a key unregistered announces it and extracts; other
// callers wait on the condvar until the key is published or rolled back. All
// registry changes happen under one mutex, never across I/O. Available entries
// are reference counted and reclaimed by a background task once unreferenced
// and idle for longer than the TTL.

mod preload;
mod reclaim;
mod registry;

pub use registry::TrackState;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::album::{AlbumError, AlbumRegistry};
use crate::extract::{ExtractError, ExtractRequest, TrackExtractor};
use crate::fuse_path::{FusePath, TrackKey};
use registry::{Registry, Slot, TrackInfo};

pub const DEFAULT_TEMP_FILE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_PRELOAD_WORKERS: usize = 2;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("No such track: {0}")]
    NotFound(String),
    #[error("Extraction of {key} failed: {source}")]
    Extraction {
        key: String,
        #[source]
        source: ExtractError,
    },
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Album(#[from] AlbumError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TrackError {
    /// errno reported to the kernel
    pub fn errno(&self) -> i32 {
        match self {
            TrackError::NotFound(_) => libc::ENOENT,
            _ => libc::EIO,
        }
    }
}

/// Cache timing and location
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Idle time after which an unreferenced track file is deleted
    pub temp_file_ttl: Duration,
    /// Remaining play time at which the next track gets preloaded. Remaining
    /// time is estimated from the read offset's share of the file size, so keep
    /// this generous.
    pub preload_lead_time: Duration,
    pub preload_workers: usize,
    pub temp_dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            temp_file_ttl: DEFAULT_TEMP_FILE_TTL,
            preload_lead_time: DEFAULT_TEMP_FILE_TTL / 2,
            preload_workers: DEFAULT_PRELOAD_WORKERS,
            temp_dir: std::env::temp_dir(),
        }
    }
}

struct Shared {
    registry: Mutex<Registry>,
    /// Signalled whenever an announced key is published or rolled back
    resolved: Condvar,
    albums: Arc<AlbumRegistry>,
    extractor: Arc<dyn TrackExtractor>,
    settings: CacheSettings,
    runtime: Handle,
    preload_permits: Arc<Semaphore>,
}

/// Extraction manager; clones share one registry
#[derive(Clone)]
pub struct TrackManager {
    shared: Arc<Shared>,
}

/// Rolls an announced key back unless it got published
struct Announcement<'a> {
    manager: &'a TrackManager,
    key: TrackKey,
    published: bool,
}

impl Drop for Announcement<'_> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        let mut registry = self.manager.lock();
        if matches!(registry.slots.get(&self.key), Some(Slot::Announced)) {
            registry.slots.remove(&self.key);
        }
        drop(registry);
        self.manager.shared.resolved.notify_all();
    }
}

impl TrackManager {
    pub fn new(
        settings: CacheSettings,
        albums: Arc<AlbumRegistry>,
        extractor: Arc<dyn TrackExtractor>,
        runtime: Handle,
    ) -> Self {
        let workers = settings.preload_workers.max(1);
        TrackManager {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                resolved: Condvar::new(),
                albums,
                extractor,
                settings,
                runtime,
                preload_permits: Arc::new(Semaphore::new(workers)),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.shared.settings
    }

    pub fn albums(&self) -> &Arc<AlbumRegistry> {
        &self.shared.albums
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self, fp: &FusePath) -> TrackState {
        TrackState::from(self.lock().slots.get(&fp.track_key()))
    }

    /// Path of the materialized file of `fp`, extracting it if needed. Every
    /// successful call must be paired with a `release_track`.
    pub fn prepare_track(&self, fp: &FusePath) -> Result<PathBuf, TrackError> {
        let key = fp.track_key();
        info!("Prepare track {}", key);

        let mut registry = self.lock();
        loop {
            match registry.slots.get_mut(&key) {
                Some(Slot::Available(info)) => {
                    info.ref_count += 1;
                    info.last_accessed = Instant::now();
                    debug!("Track {} cached, {} references", key, info.ref_count);
                    return Ok(info.temp_file.clone());
                }
                Some(Slot::Announced) => {
                    debug!("Waiting for extraction of {}", key);
                    registry = self
                        .shared
                        .resolved
                        .wait(registry)
                        .unwrap_or_else(|e| e.into_inner());
                }
                None => {
                    registry.slots.insert(key.clone(), Slot::Announced);
                    break;
                }
            }
        }
        drop(registry);

        let mut announcement = Announcement {
            manager: self,
            key: key.clone(),
            published: false,
        };
        let (temp_file, info) = self.extract_track(fp, &key)?;

        let mut registry = self.lock();
        registry.slots.insert(key.clone(), Slot::Available(info));
        announcement.published = true;
        drop(registry);
        self.shared.resolved.notify_all();

        self.spawn_reclaimer(key, temp_file.clone());
        Ok(temp_file)
    }

    fn extract_track(&self, fp: &FusePath, key: &TrackKey) -> Result<(PathBuf, TrackInfo), TrackError> {
        let source = PathBuf::from(fp.source());
        let num = fp.num.ok_or_else(|| TrackError::NotFound(key.to_string()))?;
        if !source.is_file() {
            return Err(TrackError::NotFound(key.to_string()));
        }

        let album = self.shared.albums.get(&source);
        let track = album
            .track(num)
            .ok_or_else(|| TrackError::NotFound(key.to_string()))?
            .clone();
        let container = album.container()?;
        let request = ExtractRequest {
            source: source.clone(),
            format: container.format,
            num,
            start: track.start,
            end: track.end,
            tags: album.track_tags(num).unwrap_or_default(),
        };

        let temp = tempfile::Builder::new()
            .prefix("trackfs-")
            .suffix(fp.track_extension())
            .tempfile_in(&self.shared.settings.temp_dir)?
            .into_temp_path();

        if let Err(e) = self.shared.extractor.extract(&request, &temp) {
            error!("Failed to extract track {}: {}", key, e);
            return Err(match e {
                ExtractError::UnsupportedFormat(msg) => TrackError::UnsupportedFormat(msg),
                source => TrackError::Extraction {
                    key: key.to_string(),
                    source,
                },
            });
        }

        let size = std::fs::metadata(&temp)?.len();
        let temp_file = temp.keep().map_err(io::Error::from)?;
        info!("Extracted track {} to {:?} ({} bytes)", key, temp_file, size);
        Ok((
            temp_file.clone(),
            TrackInfo {
                temp_file,
                ref_count: 1,
                last_accessed: Instant::now(),
                size,
                duration: track.duration().seconds(),
            },
        ))
    }

    /// Drop one reference; the last release also lets go of a preloaded next track
    pub fn release_track(&self, fp: &FusePath) {
        let key = fp.track_key();
        info!("Release track {}", key);

        let next = {
            let mut registry = self.lock();
            let remaining = match registry.available_mut(&key) {
                Some(info) => {
                    info.ref_count = info.ref_count.saturating_sub(1);
                    info.last_accessed = Instant::now();
                    info.ref_count
                }
                None => {
                    warn!("Release of unknown track {}", key);
                    return;
                }
            };
            if remaining > 0 {
                return;
            }
            match registry.preloads.remove(&key) {
                Some(preload) if preload.held => Some(preload.next),
                _ => None,
            }
        };

        if let Some(next) = next {
            debug!("Releasing preloaded next track {}", next.track_key());
            self.release_track(&next);
        }
    }

    /// Size reported for a track: the real file size once extracted, else
    /// the PCM size of its duration
    pub fn estimate_track_file_size(&self, fp: &FusePath) -> Result<u64, TrackError> {
        let key = fp.track_key();
        let extracted = self
            .lock()
            .available(&key)
            .map(|info| (info.temp_file.clone(), info.size));
        if let Some((temp_file, size)) = extracted {
            return Ok(std::fs::metadata(&temp_file)
                .map(|m| m.len())
                .unwrap_or(size));
        }

        let source = PathBuf::from(fp.source());
        let num = fp.num.ok_or_else(|| TrackError::NotFound(key.to_string()))?;
        let album = self.shared.albums.get(&source);
        let track = album
            .track(num)
            .ok_or_else(|| TrackError::NotFound(key.to_string()))?;
        let container = album.container()?;
        Ok(container.pcm_size(track.duration().seconds()))
    }

    /// Delete every materialized track file; returns how many were removed
    pub fn purge(&self) -> usize {
        let files: Vec<PathBuf> = {
            let mut registry = self.lock();
            registry.preloads.clear();
            let keys: Vec<TrackKey> = registry
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Available(_)))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| match registry.slots.remove(key) {
                    Some(Slot::Available(info)) => Some(info.temp_file),
                    _ => None,
                })
                .collect()
        };
        for file in &files {
            remove_temp_file(file);
        }
        info!("Purged {} track files", files.len());
        files.len()
    }
}

fn remove_temp_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Cannot delete {:?}: {}", path, e);
        }
    }
}
