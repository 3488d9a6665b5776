// Read-ahead of the next track. A sequential read close enough to the end of
// a track schedules `prepare_track` for the following track on the preload
// pool; the reference it takes is held until the current track's last release.

use tracing::{debug, info, warn};

use super::registry::Preload;
use super::TrackManager;
use crate::fuse_path::{FusePath, TrackKey};

impl TrackManager {
    /// Called for sequential reads; schedules the next track's preload once the
    /// estimated remaining play time drops to the lead time
    pub fn check_next_track(&self, fp: &FusePath, offset: u64) {
        let key = fp.track_key();

        let (size, duration) = {
            let registry = self.lock();
            if registry.preloads.contains_key(&key) {
                return;
            }
            match registry.available(&key) {
                Some(info) => (info.size, info.duration),
                None => return,
            }
        };

        // assumes a constant bitrate across the track
        let remaining = if size == 0 {
            0.0
        } else {
            (1.0 - offset as f64 / size as f64).max(0.0) * duration
        };
        let lead_time = self.shared.settings.preload_lead_time.as_secs_f64();
        if remaining > lead_time {
            return;
        }

        let Some(num) = fp.num else { return };
        let album = self.shared.albums.get(std::path::Path::new(&fp.source()));
        let next = match album.next_track(num) {
            Some(next) => fp.for_other_track(next.num, next.title.as_deref()),
            None => {
                debug!("Track {} is the last one; no preload", key);
                return;
            }
        };

        let id = {
            let mut registry = self.lock();
            if registry.preloads.contains_key(&key) || registry.ref_count(&key) == 0 {
                return;
            }
            let id = registry.new_preload_id();
            registry.preloads.insert(
                key.clone(),
                Preload {
                    id,
                    next: next.clone(),
                    held: false,
                },
            );
            id
        };

        info!(
            "Preloading {} (~{:.1}s left of {})",
            next.track_key(),
            remaining,
            key
        );
        self.schedule_preload(key, id, next);
    }

    fn schedule_preload(&self, key: TrackKey, id: u64, next: FusePath) {
        let manager = self.clone();
        let permits = self.shared.preload_permits.clone();
        self.shared.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let worker = manager.clone();
            let result = tokio::task::spawn_blocking(move || worker.run_preload(&key, id, &next)).await;
            if let Err(e) = result {
                warn!("Preload task failed: {}", e);
            }
        });
    }

    fn run_preload(&self, key: &TrackKey, id: u64, next: &FusePath) {
        if let Err(e) = self.prepare_track(next) {
            warn!("Preloading {} failed: {}", next.track_key(), e);
            let mut registry = self.lock();
            if registry.preloads.get(key).map(|p| p.id) == Some(id) {
                registry.preloads.remove(key);
            }
            return;
        }

        let keep = {
            let mut registry = self.lock();
            let still_open = registry.ref_count(key) > 0;
            match registry.preloads.get_mut(key) {
                Some(preload) if preload.id == id => {
                    if still_open {
                        preload.held = true;
                    } else {
                        registry.preloads.remove(key);
                    }
                    still_open
                }
                _ => false,
            }
        };
        if !keep {
            debug!("{} was released before its preload finished", key);
            self.release_track(next);
        }
    }
}
