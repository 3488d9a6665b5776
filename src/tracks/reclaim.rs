use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::{remove_temp_file, TrackManager};
use crate::fuse_path::TrackKey;

/// Floor for the poll interval so tiny TTLs don't spin
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl TrackManager {
    /// Watch one published entry until it is unreferenced and idle past the TTL,
    /// then remove it and delete its file
    pub(super) fn spawn_reclaimer(&self, key: TrackKey, temp_file: PathBuf) {
        let manager = self.clone();
        let ttl = self.shared.settings.temp_file_ttl;
        let poll = (ttl / 2).max(MIN_POLL_INTERVAL);

        self.shared.runtime.spawn(async move {
            loop {
                tokio::time::sleep(poll).await;
                match manager.try_reclaim(&key, &temp_file, ttl) {
                    Reclaim::Keep => continue,
                    Reclaim::Removed => {
                        debug!("Deleting track {} ({:?})", key, temp_file);
                        remove_temp_file(&temp_file);
                        return;
                    }
                    Reclaim::Gone => return,
                }
            }
        });
    }

    fn try_reclaim(&self, key: &TrackKey, temp_file: &PathBuf, ttl: Duration) -> Reclaim {
        let mut registry = self.lock();
        let info = match registry.available(key) {
            // purged, or replaced by a newer extraction of the same track
            Some(info) if &info.temp_file == temp_file => info,
            _ => return Reclaim::Gone,
        };
        if info.ref_count > 0 || info.last_accessed.elapsed() <= ttl {
            return Reclaim::Keep;
        }
        registry.slots.remove(key);
        Reclaim::Removed
    }
}

enum Reclaim {
    Keep,
    Removed,
    Gone,
}
