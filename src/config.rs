use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use regex::Regex;
use thiserror::Error;
use tracing::info;

use crate::album::tags::{compile_ignore, DEFAULT_IGNORE_TAGS};
use crate::album::DEFAULT_ALBUM_CACHE_SIZE;
use crate::extract::{ToolSettings, DEFAULT_CODEC_TOOL};
use crate::fuse_path::{
    Factory, FactoryConfig, DEFAULT_ALBUM_EXTENSION, DEFAULT_MAX_TITLE_LEN,
    DEFAULT_TRACK_SEPARATOR, DEFAULT_VALID_CHARS,
};
use crate::tracks::{CacheSettings, DEFAULT_PRELOAD_WORKERS};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("{0:?} is not a valid mount point")]
    InvalidMountPoint(PathBuf),
    #[error("Cannot create mount point {path:?}: {source}")]
    CreateMountPoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid {what} pattern: {source}")]
    Pattern {
        what: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),
}

/// Command line; every option can also be set through a `TRACKFS_*` variable
#[derive(Parser, Debug, Clone)]
#[command(
    name = "trackfs",
    version,
    about = "Read-only FUSE filesystem exposing each CUE track of a FLAC or WAVE album as a file"
)]
pub struct Args {
    /// Separator between the album file name and the track number
    #[arg(short, long, env = "TRACKFS_SEPARATOR", default_value = DEFAULT_TRACK_SEPARATOR)]
    pub separator: String,

    /// Regex of container tags that are not copied to tracks
    #[arg(short, long, env = "TRACKFS_IGNORE_TAGS", default_value = DEFAULT_IGNORE_TAGS)]
    pub ignore_tags: String,

    /// Regex matching album file extensions (including the dot)
    #[arg(short, long, env = "TRACKFS_EXTENSION", default_value = DEFAULT_ALBUM_EXTENSION)]
    pub extension: String,

    /// Keep album files visible next to their tracks
    #[arg(short, long, env = "TRACKFS_KEEP_ALBUM")]
    pub keep_album: bool,

    /// Max length of the title fragment in track file names
    #[arg(short, long, env = "TRACKFS_TITLE_LENGTH", default_value_t = DEFAULT_MAX_TITLE_LEN)]
    pub title_length: usize,

    /// Extension of virtual track files, e.g. ".flac" (default: the album's own)
    #[arg(long, env = "TRACKFS_TRACK_EXTENSION")]
    pub track_extension: Option<String>,

    /// Seconds an unused track file is kept before deletion
    #[arg(long, env = "TRACKFS_TTL", default_value_t = 60)]
    pub ttl: u64,

    /// Remaining seconds of a track at which the next one is preloaded (default: ttl / 2)
    #[arg(long, env = "TRACKFS_LEAD_TIME")]
    pub lead_time: Option<u64>,

    /// Concurrent preload extractions
    #[arg(long, env = "TRACKFS_PRELOAD_WORKERS", default_value_t = DEFAULT_PRELOAD_WORKERS)]
    pub preload_workers: usize,

    /// Albums whose metadata is kept in memory
    #[arg(long, env = "TRACKFS_ALBUM_CACHE", default_value_t = DEFAULT_ALBUM_CACHE_SIZE)]
    pub album_cache: usize,

    /// Directory for extracted track files (default: system temp dir)
    #[arg(long, env = "TRACKFS_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Path of the flac codec tool
    #[arg(long, env = "TRACKFS_FLAC", default_value = DEFAULT_CODEC_TOOL)]
    pub flac: PathBuf,

    /// Let other users access the mount (needs user_allow_other in fuse.conf)
    #[arg(long, env = "TRACKFS_ALLOW_OTHER")]
    pub allow_other: bool,

    /// Allow running as root
    #[arg(long)]
    pub root_allowed: bool,

    /// Log at info level
    #[arg(short, long)]
    pub verbose: bool,

    /// Log at debug level
    #[arg(short, long)]
    pub debug: bool,

    /// Directory tree containing the albums
    #[arg(env = "TRACKFS_ROOT")]
    pub root: PathBuf,

    /// Where to mount the track view
    #[arg(env = "TRACKFS_MOUNT")]
    pub mount: PathBuf,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub mount: PathBuf,
    pub factory: FactoryConfig,
    pub ignore_tags: Regex,
    pub album_cache_size: usize,
    pub cache: CacheSettings,
    pub tools: ToolSettings,
    pub allow_other: bool,
    pub root_allowed: bool,
    pub verbose: bool,
    pub debug: bool,
}

impl Config {
    /// Parse the command line. Debug builds read a `.env` file first.
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if let Ok(path) = dotenvy::dotenv() {
                tracing::debug!("Loaded {}", path.display());
            }
        }

        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if !args.root.is_dir() {
            return Err(ConfigError::NotADirectory(args.root));
        }
        if args.mount.is_file() || args.mount.is_symlink() {
            return Err(ConfigError::InvalidMountPoint(args.mount));
        }
        if !args.mount.exists() {
            info!("Creating mount point {}", args.mount.display());
            std::fs::create_dir_all(&args.mount).map_err(|source| {
                ConfigError::CreateMountPoint {
                    path: args.mount.clone(),
                    source,
                }
            })?;
        }
        if args.title_length == 0 {
            return Err(ConfigError::NotPositive("title length"));
        }
        if args.ttl == 0 {
            return Err(ConfigError::NotPositive("ttl"));
        }
        if args.preload_workers == 0 {
            return Err(ConfigError::NotPositive("preload workers"));
        }
        if args.separator.is_empty() {
            return Err(ConfigError::NotPositive("separator length"));
        }

        let ignore_tags = compile_ignore(&args.ignore_tags).map_err(|source| {
            ConfigError::Pattern {
                what: "ignore-tags",
                source,
            }
        })?;

        let track_extension = args.track_extension.map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        });
        let factory = FactoryConfig {
            track_separator: args.separator,
            max_title_len: args.title_length,
            album_extension: args.extension,
            valid_filename_chars: DEFAULT_VALID_CHARS.to_string(),
            keep_album: args.keep_album,
            track_extension,
        };
        // Compile once here so a bad extension pattern fails at startup
        Factory::new(factory.clone()).map_err(|source| ConfigError::Pattern {
            what: "extension",
            source,
        })?;

        let temp_dir = args.temp_dir.unwrap_or_else(std::env::temp_dir);
        let ttl = Duration::from_secs(args.ttl);
        let cache = CacheSettings {
            temp_file_ttl: ttl,
            preload_lead_time: args.lead_time.map(Duration::from_secs).unwrap_or(ttl / 2),
            preload_workers: args.preload_workers,
            temp_dir: temp_dir.clone(),
        };
        let tools = ToolSettings {
            codec: args.flac,
            temp_dir,
        };

        Ok(Config {
            root: args.root,
            mount: args.mount,
            factory,
            ignore_tags,
            album_cache_size: args.album_cache.max(1),
            cache,
            tools,
            allow_other: args.allow_other,
            root_allowed: args.root_allowed,
            verbose: args.verbose,
            debug: args.debug,
        })
    }

    /// Log filter directive implied by `-v` / `-d`
    pub fn log_level(&self) -> Option<&'static str> {
        if self.debug {
            Some("debug")
        } else if self.verbose {
            Some("info")
        } else {
            None
        }
    }
}
