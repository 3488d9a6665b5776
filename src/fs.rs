// # Filesystem Operations
//
// The mounted tree as plain calls on paths relative to the mount root. Tracks
// are resolved through the `TrackManager`; everything else passes through to
// the source tree. The FUSE adapter only translates inodes and replies.

use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{self, File};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::fuse_path::{Factory, FusePath};
use crate::tracks::{TrackError, TrackManager};

#[derive(Debug, Error)]
pub enum FsError {
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Read-only filesystem")]
    ReadOnly,
    #[error("Unknown file handle {0}")]
    BadHandle(u64),
    #[error("Path is not valid UTF-8: {0:?}")]
    InvalidPath(PathBuf),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::Track(e) => e.errno(),
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::ReadOnly => libc::EROFS,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::InvalidPath(_) => libc::ENOENT,
        }
    }
}

/// Attributes of an entry; `size` is the estimated or real track size for tracks
#[derive(Debug, Clone)]
pub struct Attributes {
    pub metadata: fs::Metadata,
    pub size: u64,
    pub is_track: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

struct OpenFile {
    file: File,
    fp: FusePath,
    /// Offset right after the previous read; only reads on this handle wait for it
    position: Mutex<u64>,
}

pub struct TrackFs {
    root: PathBuf,
    factory: Factory,
    tracks: TrackManager,
    open_files: Mutex<HashMap<u64, Arc<OpenFile>>>,
    next_fh: AtomicU64,
}

impl TrackFs {
    pub fn new(root: PathBuf, factory: Factory, tracks: TrackManager) -> Self {
        TrackFs {
            root,
            factory,
            tracks,
            open_files: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tracks(&self) -> &TrackManager {
        &self.tracks
    }

    fn fusepath(&self, rel: &Path) -> Result<FusePath, FsError> {
        let full = if rel.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        };
        match full.to_str() {
            Some(path) => Ok(self.factory.from_vpath(path)),
            None => Err(FsError::InvalidPath(full)),
        }
    }

    fn open_file(&self, fh: u64) -> Result<Arc<OpenFile>, FsError> {
        self.open_files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&fh)
            .cloned()
            .ok_or(FsError::BadHandle(fh))
    }

    pub fn getattr(&self, rel: &Path) -> Result<Attributes, FsError> {
        debug!("getattr {:?}", rel);
        let fp = self.fusepath(rel)?;
        let metadata = fs::symlink_metadata(fp.source())?;
        let size = if fp.is_track {
            self.tracks.estimate_track_file_size(&fp)?
        } else {
            metadata.len()
        };
        Ok(Attributes {
            metadata,
            size,
            is_track: fp.is_track,
        })
    }

    /// Open read-only; for a track this blocks until its file is materialized
    pub fn open(&self, rel: &Path, flags: i32) -> Result<u64, FsError> {
        info!("Open {:?}", rel);
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::ReadOnly);
        }
        let fp = self.fusepath(rel)?;
        let path = if fp.is_track {
            self.tracks.prepare_track(&fp)?
        } else {
            PathBuf::from(fp.source())
        };

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                if fp.is_track {
                    self.tracks.release_track(&fp);
                }
                return Err(e.into());
            }
        };

        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.open_files.lock().unwrap_or_else(|e| e.into_inner()).insert(
            fh,
            Arc::new(OpenFile {
                file,
                fp,
                position: Mutex::new(0),
            }),
        );
        debug!("Opened {:?} as {:?} with fh {}", rel, path, fh);
        Ok(fh)
    }

    /// Positional read; sequential reads on a track feed the preloader
    pub fn read(&self, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let open = self.open_file(fh)?;
        let mut position = open.position.lock().unwrap_or_else(|e| e.into_inner());
        if *position == offset {
            if open.fp.is_track {
                self.tracks.check_next_track(&open.fp, offset);
            }
        } else {
            debug!("Out of band read on fh {} at {}", fh, offset);
        }

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match open.file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        *position = offset + size as u64;
        Ok(buf)
    }

    pub fn release(&self, fh: u64) -> Result<(), FsError> {
        let open = self
            .open_files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&fh)
            .ok_or(FsError::BadHandle(fh))?;
        info!("Release fh {} ({})", fh, open.fp.vpath());
        if open.fp.is_track {
            self.tracks.release_track(&open.fp);
        }
        Ok(())
    }

    /// Entry names including "." and ".."
    pub fn readdir(&self, rel: &Path) -> Result<Vec<String>, FsError> {
        debug!("readdir {:?}", rel);
        let fp = self.fusepath(rel)?;
        Ok(self
            .factory
            .readdir(Path::new(&fp.source()), self.tracks.albums())?)
    }

    pub fn readlink(&self, rel: &Path) -> Result<PathBuf, FsError> {
        let fp = self.fusepath(rel)?;
        Ok(fs::read_link(fp.source())?)
    }

    pub fn statfs(&self, rel: &Path) -> Result<StatFs, FsError> {
        let fp = self.fusepath(rel)?;
        let source = PathBuf::from(fp.source());
        let c_path = CString::new(source.as_os_str().as_bytes())
            .map_err(|_| FsError::InvalidPath(source.clone()))?;

        // SAFETY: c_path is NUL terminated and st is a plain C struct
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(StatFs {
            blocks: st.f_blocks as u64,
            bfree: st.f_bfree as u64,
            bavail: st.f_bavail as u64,
            files: st.f_files as u64,
            ffree: st.f_ffree as u64,
            bsize: st.f_bsize as u32,
            namelen: st.f_namemax as u32,
            frsize: st.f_frsize as u32,
        })
    }

    /// Whether `fh` is an open track (as opposed to a passed-through file)
    pub fn is_track_handle(&self, fh: u64) -> bool {
        self.open_file(fh).map(|open| open.fp.is_track).unwrap_or(false)
    }

    pub fn open_handles(&self) -> usize {
        self.open_files.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
