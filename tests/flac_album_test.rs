mod support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Runtime;

use crate::support::{
    album_registry, track_files, tracing_init, write_flac_album, write_script, FAILING_CODEC,
    FAKE_CODEC, THREE_TRACK_CUE,
};
use trackfs::extract::{AudioExtractor, ToolSettings};
use trackfs::fs::TrackFs;
use trackfs::fuse_path::{Factory, FactoryConfig};
use trackfs::tracks::{CacheSettings, TrackManager, TrackState};

const TRACK_2: &str = "album.flac.#-#.002.Second Song.flac";

/// Sidecar that loses against the embedded sheet
const SIDECAR_CUE: &str = r#"FILE "album.flac" WAVE
  TRACK 01 AUDIO
    TITLE "Sidecar Only"
    INDEX 01 00:00:00
"#;

struct FlacMount {
    _runtime: Runtime,
    _music: TempDir,
    temp: TempDir,
    tools: TempDir,
    fs: TrackFs,
}

fn flac_mount(codec_body: &str) -> FlacMount {
    tracing_init();
    let runtime = Runtime::new().unwrap();
    let music = TempDir::new().unwrap();
    let temp = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    write_flac_album(&music.path().join("album.flac"), THREE_TRACK_CUE);
    std::fs::write(music.path().join("album.cue"), SIDECAR_CUE).unwrap();

    let extractor = AudioExtractor::new(ToolSettings {
        codec: write_script(tools.path(), "codec", codec_body),
        temp_dir: temp.path().to_path_buf(),
    });
    let tracks = TrackManager::new(
        CacheSettings {
            temp_file_ttl: Duration::from_secs(60),
            preload_lead_time: Duration::from_secs(1),
            preload_workers: 1,
            temp_dir: temp.path().to_path_buf(),
        },
        Arc::new(album_registry()),
        Arc::new(extractor),
        runtime.handle().clone(),
    );
    let fs = TrackFs::new(
        music.path().to_path_buf(),
        Factory::new(FactoryConfig::default()).unwrap(),
        tracks,
    );
    FlacMount {
        _runtime: runtime,
        _music: music,
        temp,
        tools,
        fs,
    }
}

fn read_all(fs: &TrackFs, fh: u64) -> Vec<u8> {
    let mut data = Vec::new();
    loop {
        let chunk = fs.read(fh, data.len() as u64, 4096).unwrap();
        if chunk.is_empty() {
            return data;
        }
        data.extend_from_slice(&chunk);
    }
}

#[test]
fn test_embedded_cue_sheet_wins_over_sidecar() {
    let m = flac_mount(FAKE_CODEC);
    assert_eq!(
        m.fs.readdir(Path::new("")).unwrap(),
        vec![
            ".",
            "..",
            "album.cue",
            "album.flac.#-#.001.First Song.flac",
            TRACK_2,
            "album.flac.#-#.003.Third.flac",
        ]
    );

    // two seconds of 16-bit stereo at 44.1 kHz
    let attrs = m.fs.getattr(Path::new(TRACK_2)).unwrap();
    assert_eq!(attrs.size, 2 * 2 * 2 * 44100);
}

#[test]
fn test_flac_track_goes_through_codec_tool() {
    let m = flac_mount(FAKE_CODEC);
    let fh = m.fs.open(Path::new(TRACK_2), libc::O_RDONLY).unwrap();
    assert_eq!(read_all(&m.fs, fh), b"PCMFLAC");

    let args = std::fs::read_to_string(m.tools.path().join("encode.args")).unwrap();
    assert!(args.lines().any(|a| a == "--tag=TITLE=Second Song"));
    assert!(args.lines().any(|a| a == "--tag=TRACKNUMBER=2"));

    m.fs.release(fh).unwrap();
    assert_eq!(track_files(m.temp.path()).len(), 1);
}

#[test]
fn test_failed_codec_leaves_nothing_behind() {
    let m = flac_mount(FAILING_CODEC);
    let err = m.fs.open(Path::new(TRACK_2), libc::O_RDONLY).unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
    assert_eq!(m.fs.open_handles(), 0);

    let fp = Factory::new(FactoryConfig::default())
        .unwrap()
        .from_vpath(&m.fs.root().join(TRACK_2).display().to_string());
    assert_eq!(m.fs.tracks().state(&fp), TrackState::Unregistered);
    assert!(track_files(m.temp.path()).is_empty());
}
