//! `fuser` adapter for [`TrackFs`].
//!
//! Keeps a path <-> inode table (root is inode 1) and forwards every call to
//! `TrackFs`. Opening a track can take seconds while it is extracted, so
//! `open`, `read` and `readdir` run on the tokio blocking pool and reply from
//! there instead of stalling the FUSE session loop.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::consts::FOPEN_DIRECT_IO;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use libc::ENOENT;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::fs::{Attributes, TrackFs};

/// Time-to-live for attribute caching; short since track sizes change once extracted
const TTL: Duration = Duration::from_secs(1);

const ROOT_INODE: u64 = 1;

/// Reported in directory listings for entries the kernel has not looked up
const UNKNOWN_INODE: u64 = 0xffff_ffff;

struct Node {
    path: PathBuf,
    /// Kernel references handed out by `lookup`, dropped by `forget`
    lookups: u64,
}

/// Inodes live from the first `lookup` of a path until the kernel forgets it
struct InodeTable {
    nodes: HashMap<u64, Node>,
    inodes: HashMap<PathBuf, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = InodeTable {
            nodes: HashMap::new(),
            inodes: HashMap::new(),
            next: ROOT_INODE + 1,
        };
        table.nodes.insert(
            ROOT_INODE,
            Node {
                path: PathBuf::new(),
                lookups: 1,
            },
        );
        table.inodes.insert(PathBuf::new(), ROOT_INODE);
        table
    }

    fn path(&self, ino: u64) -> Option<PathBuf> {
        self.nodes.get(&ino).map(|node| node.path.clone())
    }

    fn existing(&self, path: &Path) -> Option<u64> {
        self.inodes.get(path).copied()
    }

    /// Inode of `path` with one more kernel reference
    fn lookup(&mut self, path: &Path) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.lookups += 1;
            }
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.nodes.insert(
            ino,
            Node {
                path: path.to_path_buf(),
                lookups: 1,
            },
        );
        self.inodes.insert(path.to_path_buf(), ino);
        ino
    }

    fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let Some(node) = self.nodes.get_mut(&ino) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(nlookup);
        if node.lookups == 0 {
            if let Some(node) = self.nodes.remove(&ino) {
                self.inodes.remove(&node.path);
            }
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}

fn file_type(metadata: &fs::Metadata) -> FileType {
    let ft = metadata.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    }
}

/// Read-only FUSE attributes
fn to_file_attr(ino: u64, attrs: &Attributes) -> FileAttr {
    let metadata = &attrs.metadata;
    let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
    let atime = metadata.accessed().unwrap_or(UNIX_EPOCH);
    let ctime = UNIX_EPOCH + Duration::from_secs(metadata.ctime().max(0) as u64);

    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(512),
        atime,
        mtime,
        ctime,
        crtime: mtime,
        kind: file_type(metadata),
        perm: (metadata.mode() & 0o7555) as u16,
        nlink: if attrs.is_track { 1 } else { metadata.nlink() as u32 },
        uid: metadata.uid(),
        gid: metadata.gid(),
        rdev: metadata.rdev() as u32,
        blksize: metadata.blksize() as u32,
        flags: 0,
    }
}

pub struct TrackFuse {
    fs: Arc<TrackFs>,
    inodes: Arc<Mutex<InodeTable>>,
    runtime: Handle,
}

impl TrackFuse {
    pub fn new(fs: Arc<TrackFs>, runtime: Handle) -> Self {
        TrackFuse {
            fs,
            inodes: Arc::new(Mutex::new(InodeTable::new())),
            runtime,
        }
    }

    fn path(&self, ino: u64) -> Option<PathBuf> {
        self.table().path(ino)
    }

    fn table(&self) -> MutexGuard<'_, InodeTable> {
        self.inodes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Track sizes are estimates until extraction, so reads of tracks bypass the
/// page cache and end wherever the real file ends
fn open_flags(is_track: bool) -> u32 {
    if is_track {
        FOPEN_DIRECT_IO
    } else {
        0
    }
}

/// Mount options for a read-only track tree
pub fn mount_options(allow_other: bool) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::RO,
        MountOption::NoDev,
        MountOption::NoSuid,
        MountOption::NoExec,
        MountOption::FSName("trackfs".to_string()),
        MountOption::Subtype("trackfs".to_string()),
        MountOption::AutoUnmount,
    ];
    if allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

impl Filesystem for TrackFuse {
    fn destroy(&mut self) {
        info!("Unmounting; {} files still open", self.fs.open_handles());
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path(parent) else {
            reply.error(ENOENT);
            return;
        };
        let child = parent_path.join(name);
        match self.fs.getattr(&child) {
            Ok(attrs) => {
                let ino = self.table().lookup(&child);
                reply.entry(&TTL, &to_file_attr(ino, &attrs), 0);
            }
            Err(e) => {
                debug!("lookup {:?}: {}", child, e);
                reply.error(e.errno());
            }
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        let mut table = self.table();
        table.forget(ino, nlookup);
        debug!("forget {} ({}), {} inodes left", ino, nlookup, table.len());
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attrs) => reply.attr(&TTL, &to_file_attr(ino, &attrs)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.readlink(&path) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn_blocking(move || match fs.open(&path, flags) {
            Ok(fh) => reply.opened(fh, open_flags(fs.is_track_handle(fh))),
            Err(e) => {
                warn!("Cannot open {:?}: {}", path, e);
                reply.error(e.errno());
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn_blocking(move || {
            match fs.read(fh, offset.max(0) as u64, size) {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let fs = Arc::clone(&self.fs);
        let inodes = Arc::clone(&self.inodes);

        self.runtime.spawn_blocking(move || {
            let names = match fs.readdir(&path) {
                Ok(names) => names,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            };

            let parent_ino = match path.parent() {
                Some(parent) => inodes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .existing(parent)
                    .unwrap_or(UNKNOWN_INODE),
                None => ROOT_INODE,
            };

            for (i, name) in names.iter().enumerate().skip(offset.max(0) as usize) {
                let (child_ino, kind) = match name.as_str() {
                    "." => (ino, FileType::Directory),
                    ".." => (parent_ino, FileType::Directory),
                    _ => {
                        let child = path.join(name);
                        let kind = fs
                            .getattr(&child)
                            .map(|a| file_type(&a.metadata))
                            .unwrap_or(FileType::RegularFile);
                        let child_ino = inodes
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .existing(&child)
                            .unwrap_or(UNKNOWN_INODE);
                        (child_ino, kind)
                    }
                };
                // true once the reply buffer is full
                if reply.add(child_ino, (i + 1) as i64, kind, name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = self.path(ino).unwrap_or_default();
        match self.fs.statfs(&path) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }
}
