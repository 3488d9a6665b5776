// # Album Metadata
//
// `AlbumInfo` wraps one album file and lazily computes its container info,
// CUE sheet and tag sets. `AlbumRegistry` memoizes `AlbumInfo`s in a small LRU
// since only one or two albums are usually read at the same time.

pub mod container;
pub mod tags;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use lru::LruCache;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cue::{self, CueSheet, Track};
use crate::text_encoding;
use container::ContainerInfo;
use tags::TagSet;

pub const DEFAULT_ALBUM_CACHE_SIZE: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlbumError {
    #[error("IO error on {path:?}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("Cannot probe {0:?}: {1}")]
    Probe(PathBuf, String),
    #[error("No audio track in {0:?}")]
    NoAudioTrack(PathBuf),
}

pub struct AlbumInfo {
    path: PathBuf,
    ignore: Regex,
    container: OnceLock<Result<ContainerInfo, AlbumError>>,
    cue: OnceLock<Option<CueSheet>>,
    album_tags: OnceLock<TagSet>,
}

impl AlbumInfo {
    pub fn new(path: impl Into<PathBuf>, ignore: Regex) -> Self {
        AlbumInfo {
            path: path.into(),
            ignore,
            container: OnceLock::new(),
            cue: OnceLock::new(),
            album_tags: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn container(&self) -> Result<&ContainerInfo, AlbumError> {
        self.container
            .get_or_init(|| container::probe(&self.path))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Parsed CUE sheet; `None` for a plain audio file or an unusable sheet
    pub fn cue(&self) -> Option<&CueSheet> {
        self.cue.get_or_init(|| self.load_cue()).as_ref()
    }

    fn load_cue(&self) -> Option<CueSheet> {
        let container = match self.container() {
            Ok(c) => c,
            Err(e) => {
                debug!("No container info for {:?}: {}", self.path, e);
                return None;
            }
        };

        let text = match container.tag("CUESHEET") {
            Some(embedded) => {
                debug!("Using embedded CUE sheet of {:?}", self.path);
                embedded.to_string()
            }
            None => self.read_sidecar_cue()?,
        };

        match cue::parse(&text) {
            Ok(draft) => Some(draft.calc_track_times(container.duration())),
            Err(e) => {
                warn!("Ignoring CUE sheet of {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn read_sidecar_cue(&self) -> Option<String> {
        for ext in ["cue", "CUE"] {
            let cue_path = self.path.with_extension(ext);
            if !cue_path.is_file() {
                continue;
            }
            debug!("Found accompanying CUE sheet {:?}", cue_path);
            match text_encoding::read_text_file(&cue_path) {
                Ok(text) => return Some(text),
                Err(e) => {
                    warn!("Cannot read {:?}: {}", cue_path, e);
                    return None;
                }
            }
        }
        None
    }

    pub fn tracks(&self) -> Option<&[Track]> {
        self.cue().map(|c| c.tracks.as_slice())
    }

    pub fn track(&self, num: u32) -> Option<&Track> {
        self.cue()?.track(num)
    }

    pub fn next_track(&self, num: u32) -> Option<&Track> {
        self.cue()?.next_track(num)
    }

    pub fn album_tags(&self) -> &TagSet {
        self.album_tags.get_or_init(|| {
            let raw = self
                .container()
                .map(|c| c.tags.as_slice())
                .unwrap_or_default();
            tags::album_tags(
                raw.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                &self.ignore,
                self.cue().map(|c| &c.album),
            )
        })
    }

    /// Tags to write onto the extracted file of track `num`
    pub fn track_tags(&self, num: u32) -> Option<TagSet> {
        let track = self.track(num)?;
        let total = self.tracks().map(<[Track]>::len).unwrap_or(0);
        let tags = tags::track_tags(self.album_tags(), track, total);
        debug!("Tags for track {} of {:?}: {:?}", num, self.path, tags);
        Some(tags)
    }

    /// PCM size of track `num`, the size reported before it is extracted
    pub fn estimate_track_size(&self, num: u32) -> Option<u64> {
        let track = self.track(num)?;
        let container = self.container().ok()?;
        Some(container.pcm_size(track.duration().seconds()))
    }
}

/// Bounded, least-recently-used map of album file -> `AlbumInfo`
pub struct AlbumRegistry {
    albums: Mutex<LruCache<PathBuf, Arc<AlbumInfo>>>,
    ignore: Regex,
}

impl AlbumRegistry {
    pub fn new(capacity: usize, ignore: Regex) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        AlbumRegistry {
            albums: Mutex::new(LruCache::new(capacity)),
            ignore,
        }
    }

    pub fn get(&self, path: &Path) -> Arc<AlbumInfo> {
        let mut albums = self.albums.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(album) = albums.get(path) {
            return Arc::clone(album);
        }
        let album = Arc::new(AlbumInfo::new(path, self.ignore.clone()));
        albums.put(path.to_path_buf(), Arc::clone(&album));
        album
    }

    pub fn len(&self) -> usize {
        self.albums.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
