use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trackfs::album::AlbumRegistry;
use trackfs::config::Config;
use trackfs::extract::AudioExtractor;
use trackfs::fs::TrackFs;
use trackfs::fuse::{mount_options, TrackFuse};
use trackfs::fuse_path::Factory;
use trackfs::tracks::TrackManager;

fn init_logging(config: &Config) {
    let filter = match config.log_level() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("trackfs: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    // SAFETY: geteuid has no preconditions
    if unsafe { libc::geteuid() } == 0 && !config.root_allowed {
        error!("Refusing to run as root; pass --root-allowed to override");
        return ExitCode::FAILURE;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("trackfs-worker")
        .build()?;

    let factory = Factory::new(config.factory.clone())?;
    let albums = Arc::new(AlbumRegistry::new(
        config.album_cache_size,
        config.ignore_tags.clone(),
    ));
    let extractor = Arc::new(AudioExtractor::new(config.tools.clone()));
    let tracks = TrackManager::new(
        config.cache.clone(),
        albums,
        extractor,
        runtime.handle().clone(),
    );
    let fs = Arc::new(TrackFs::new(config.root.clone(), factory, tracks.clone()));

    info!(
        "Mounting {} on {}",
        config.root.display(),
        config.mount.display()
    );
    let result = fuser::mount2(
        TrackFuse::new(fs, runtime.handle().clone()),
        &config.mount,
        &mount_options(config.allow_other),
    );

    let purged = tracks.purge();
    info!("Unmounted; removed {} track files", purged);
    result?;
    Ok(())
}
