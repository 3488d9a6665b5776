use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::{
    CodecType, CODEC_TYPE_FLAC, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision};
use symphonia::core::probe::Hint;
use tracing::debug;

use super::AlbumError;

/// How an album's audio can be extracted, decided by the codec of its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Flac,
    /// Integer or 32-bit float PCM in a WAVE container
    Wave,
    Other,
}

impl AudioFormat {
    pub fn from_codec(codec: CodecType) -> Self {
        match codec {
            CODEC_TYPE_FLAC => AudioFormat::Flac,
            CODEC_TYPE_PCM_U8
            | CODEC_TYPE_PCM_S16LE
            | CODEC_TYPE_PCM_S24LE
            | CODEC_TYPE_PCM_S32LE
            | CODEC_TYPE_PCM_F32LE => AudioFormat::Wave,
            _ => AudioFormat::Other,
        }
    }
}

/// Stream parameters and raw tags of an album file
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub format: AudioFormat,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub total_frames: u64,
    /// Raw (name, value) tag pairs in container order
    pub tags: Vec<(String, String)>,
}

impl ContainerInfo {
    /// Total duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.total_frames as f64 / self.sample_rate as f64
    }

    /// Uncompressed PCM size of `seconds` of audio
    pub fn pcm_size(&self, seconds: f64) -> u64 {
        let bytes = seconds
            * self.channels as f64
            * (self.bits_per_sample as f64 / 8.0)
            * self.sample_rate as f64;
        bytes.max(0.0).floor() as u64
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn push_tags(revision: &MetadataRevision, tags: &mut Vec<(String, String)>) {
    for tag in revision.tags() {
        tags.push((tag.key.clone(), tag.value.to_string()));
    }
}

/// Probe stream parameters and tags
pub fn probe(path: &Path) -> Result<ContainerInfo, AlbumError> {
    let io_error = |e: std::io::Error| AlbumError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let file = File::open(path).map_err(io_error)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AlbumError::Probe(path.to_path_buf(), e.to_string()))?;

    let mut tags = Vec::new();
    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            push_tags(revision, &mut tags);
        }
    }
    let mut reader = probed.format;
    if let Some(revision) = reader.metadata().current() {
        push_tags(revision, &mut tags);
    }

    let track = reader
        .default_track()
        .ok_or_else(|| AlbumError::NoAudioTrack(path.to_path_buf()))?;
    let params = &track.codec_params;

    let info = ContainerInfo {
        format: AudioFormat::from_codec(params.codec),
        channels: params.channels.map(|c| c.count() as u16).unwrap_or(2),
        bits_per_sample: params.bits_per_sample.unwrap_or(16) as u16,
        sample_rate: params
            .sample_rate
            .ok_or_else(|| AlbumError::Probe(path.to_path_buf(), "missing sample rate".into()))?,
        total_frames: params
            .n_frames
            .ok_or_else(|| AlbumError::Probe(path.to_path_buf(), "missing sample count".into()))?,
        tags,
    };
    debug!(
        "Probed {:?}: {:?} {}ch {}bit {}Hz {:.2}s",
        path,
        info.format,
        info.channels,
        info.bits_per_sample,
        info.sample_rate,
        info.duration()
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ContainerInfo {
        ContainerInfo {
            format: AudioFormat::Flac,
            channels: 2,
            bits_per_sample: 16,
            sample_rate: 44100,
            total_frames: 44100 * 200,
            tags: vec![("Artist".into(), "Zaz".into())],
        }
    }

    #[test]
    fn test_duration_and_pcm_size() {
        let info = info();
        assert_eq!(info.duration(), 200.0);
        assert_eq!(info.pcm_size(1.0), 176_400);
        assert_eq!(info.pcm_size(0.5), 88_200);
    }

    #[test]
    fn test_tag_lookup_ignores_case() {
        assert_eq!(info().tag("ARTIST"), Some("Zaz"));
        assert_eq!(info().tag("ALBUM"), None);
    }

    #[test]
    fn test_format_follows_codec() {
        use symphonia::core::codecs::{CODEC_TYPE_MP3, CODEC_TYPE_PCM_ALAW, CODEC_TYPE_PCM_F64LE};
        assert_eq!(AudioFormat::from_codec(CODEC_TYPE_FLAC), AudioFormat::Flac);
        assert_eq!(AudioFormat::from_codec(CODEC_TYPE_PCM_S24LE), AudioFormat::Wave);
        assert_eq!(AudioFormat::from_codec(CODEC_TYPE_PCM_F32LE), AudioFormat::Wave);
        // RIFF containers that hold something other than plain PCM
        assert_eq!(AudioFormat::from_codec(CODEC_TYPE_PCM_ALAW), AudioFormat::Other);
        assert_eq!(AudioFormat::from_codec(CODEC_TYPE_PCM_F64LE), AudioFormat::Other);
        assert_eq!(AudioFormat::from_codec(CODEC_TYPE_MP3), AudioFormat::Other);
    }

    #[test]
    fn test_probe_reads_wave_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..16000i16 {
            writer.write_sample(i).unwrap();
        }
        writer.finalize().unwrap();

        let info = probe(&path).unwrap();
        assert_eq!(info.format, AudioFormat::Wave);
        assert_eq!(info.channels, 2);
        assert_eq!(info.total_frames, 8000);
        assert_eq!(info.duration(), 1.0);
    }

    #[test]
    fn test_probe_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.flac");
        std::fs::write(&path, b"just some text, no audio here").unwrap();
        assert!(probe(&path).is_err());
    }
}
