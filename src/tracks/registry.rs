use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::fuse_path::{FusePath, TrackKey};

/// A materialized track file
#[derive(Debug, Clone)]
pub(super) struct TrackInfo {
    pub temp_file: PathBuf,
    pub ref_count: u32,
    pub last_accessed: Instant,
    /// Byte size of `temp_file`
    pub size: u64,
    /// Track duration in seconds
    pub duration: f64,
}

#[derive(Debug)]
pub(super) enum Slot {
    /// Extraction in progress
    Announced,
    Available(TrackInfo),
}

/// Next-track preload scheduled on behalf of a track
#[derive(Debug)]
pub(super) struct Preload {
    /// Distinguishes marks of the same key across release / reopen cycles
    pub id: u64,
    pub next: FusePath,
    /// The preload finished and holds a reference on `next`
    pub held: bool,
}

#[derive(Debug, Default)]
pub(super) struct Registry {
    pub slots: HashMap<TrackKey, Slot>,
    pub preloads: HashMap<TrackKey, Preload>,
    next_preload_id: u64,
}

impl Registry {
    pub fn new_preload_id(&mut self) -> u64 {
        self.next_preload_id += 1;
        self.next_preload_id
    }

    pub fn available(&self, key: &TrackKey) -> Option<&TrackInfo> {
        match self.slots.get(key) {
            Some(Slot::Available(info)) => Some(info),
            _ => None,
        }
    }

    pub fn available_mut(&mut self, key: &TrackKey) -> Option<&mut TrackInfo> {
        match self.slots.get_mut(key) {
            Some(Slot::Available(info)) => Some(info),
            _ => None,
        }
    }

    pub fn ref_count(&self, key: &TrackKey) -> u32 {
        self.available(key).map(|i| i.ref_count).unwrap_or(0)
    }
}

/// Externally visible state of a track in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Unregistered,
    Announced,
    Available { ref_count: u32 },
}

impl From<Option<&Slot>> for TrackState {
    fn from(slot: Option<&Slot>) -> Self {
        match slot {
            None => TrackState::Unregistered,
            Some(Slot::Announced) => TrackState::Announced,
            Some(Slot::Available(info)) => TrackState::Available {
                ref_count: info.ref_count,
            },
        }
    }
}
