use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use trackfs::album::tags::{compile_ignore, DEFAULT_IGNORE_TAGS};
use trackfs::album::AlbumRegistry;

pub const SAMPLE_RATE: u32 = 8000;
pub const ALBUM_SECONDS: u32 = 6;

/// Three two-second tracks
pub const THREE_TRACK_CUE: &str = r#"PERFORMER "Test Artist"
TITLE "Test Album"
REM DATE 2024
FILE "album.wav" WAVE
  TRACK 01 AUDIO
    TITLE "First Song"
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    TITLE "Second Song"
    PERFORMER "Guest"
    INDEX 00 00:01:60
    INDEX 01 00:02:00
  TRACK 03 AUDIO
    TITLE "Third"
    INDEX 01 00:04:00
"#;

/// Sample value at frame `i` of the fixture album
pub fn sample(i: u32) -> i16 {
    (i % 30000) as i16
}

/// Mono 16-bit PCM WAVE file whose samples count up from 0
pub fn write_wav(path: &Path, seconds: u32) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..SAMPLE_RATE * seconds {
        writer.write_sample(sample(i)).unwrap();
    }
    writer.finalize().unwrap();
}

/// `album.wav` plus `album.cue` in `dir`; returns the album path
pub fn write_album(dir: &Path) -> PathBuf {
    let album = dir.join("album.wav");
    write_wav(&album, ALBUM_SECONDS);
    std::fs::write(dir.join("album.cue"), THREE_TRACK_CUE).unwrap();
    album
}

/// Samples of the fixture album between two whole seconds
pub fn track_samples(first_second: u32, last_second: u32) -> Vec<i16> {
    (first_second * SAMPLE_RATE..last_second * SAMPLE_RATE)
        .map(sample)
        .collect()
}

/// Samples of a WAVE file held in memory
pub fn wav_samples(data: &[u8]) -> Vec<i16> {
    let mut reader = WavReader::new(Cursor::new(data)).unwrap();
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.spec().channels, 1);
    reader.samples::<i16>().map(|s| s.unwrap()).collect()
}

/// FLAC header with STREAMINFO for `ALBUM_SECONDS` of 44.1 kHz stereo and an
/// embedded CUESHEET comment. There are no audio frames; extraction goes
/// through a stand-in codec tool.
pub fn write_flac_album(path: &Path, cue: &str) {
    let mut info = metaflac::block::StreamInfo::new();
    info.min_block_size = 4096;
    info.max_block_size = 4096;
    info.sample_rate = 44100;
    info.num_channels = 2;
    info.bits_per_sample = 16;
    info.total_samples = 44100 * ALBUM_SECONDS as u64;
    info.md5 = vec![0; 16];

    let mut tag = metaflac::Tag::new();
    tag.push_block(metaflac::Block::StreamInfo(info));
    tag.set_vorbis("CUESHEET", vec![cue]);
    let mut file = std::fs::File::create(path).unwrap();
    tag.write_to(&mut file).unwrap();
}

/// Stand-in codec: decoding prints `PCM`, encoding writes its stdin plus
/// `FLAC` to the `-o` file and records its arguments next to itself
pub const FAKE_CODEC: &str = r#"#!/bin/sh
if [ "$1" = "-d" ]; then
    printf PCM
    exit 0
fi
printf '%s\n' "$@" > "$(dirname "$0")/encode.args"
out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then
        out="$2"
    fi
    shift
done
cat > "$out"
printf FLAC >> "$out"
"#;

pub const FAILING_CODEC: &str = "#!/bin/sh\nexit 1\n";

/// Executable shell script at `dir/name`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn album_registry() -> AlbumRegistry {
    AlbumRegistry::new(5, compile_ignore(DEFAULT_IGNORE_TAGS).unwrap())
}

/// Names of leftover extracted track files in `dir`
pub fn track_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("trackfs-"))
        .collect()
}
