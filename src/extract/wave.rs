// # WAVE Slicing
//
// Copies the sample frames of one track out of a WAVE album with hound, then
// appends the track's tags as a LIST/INFO chunk, which hound cannot write.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use hound::{Sample, SampleFormat, WavReader, WavWriter};
use tracing::debug;

use super::{ExtractError, ExtractRequest};
use crate::album::tags::{TagKey, TagSet};
use crate::cue::time::FRAMES_PER_SECOND;

impl From<hound::Error> for ExtractError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => ExtractError::Io(e),
            hound::Error::Unsupported => {
                ExtractError::UnsupportedFormat("WAVE encoding not supported".to_string())
            }
            other => ExtractError::Wave(other.to_string()),
        }
    }
}

/// Sample frame at a CD frame position, clamped to the album length
fn sample_frame(cd_frames: u64, sample_rate: u32, total: u32) -> u32 {
    let frame = cd_frames * sample_rate as u64 / FRAMES_PER_SECOND as u64;
    frame.min(total as u64) as u32
}

/// INFO chunk ids for the tags WAVE players understand
fn info_id(key: &TagKey) -> Option<&'static [u8; 4]> {
    match key {
        TagKey::Title => Some(b"INAM"),
        TagKey::Artist => Some(b"IART"),
        TagKey::Album => Some(b"IPRD"),
        TagKey::TrackNumber => Some(b"ITRK"),
        TagKey::Year => Some(b"ICRD"),
        TagKey::Composer => Some(b"IMUS"),
        TagKey::Other(name) if name == "GENRE" => Some(b"IGNR"),
        _ => None,
    }
}

/// LIST/INFO chunk (header included); empty when no tag maps to INFO
pub fn info_chunk(tags: &TagSet) -> Vec<u8> {
    let mut body = b"INFO".to_vec();
    for (key, values) in tags {
        let Some(id) = info_id(key) else { continue };
        let mut value = values.join("; ").into_bytes();
        value.push(0);
        let len = value.len();
        body.extend_from_slice(id);
        body.extend_from_slice(&(len as u32).to_le_bytes());
        body.extend_from_slice(&value);
        if len % 2 == 1 {
            body.push(0);
        }
    }
    if body.len() == 4 {
        return Vec::new();
    }
    let mut chunk = b"LIST".to_vec();
    chunk.extend_from_slice(&(body.len() as u32).to_le_bytes());
    chunk.extend_from_slice(&body);
    chunk
}

fn copy_samples<S, R, W>(
    reader: &mut WavReader<R>,
    writer: &mut WavWriter<W>,
    count: u64,
) -> Result<u64, ExtractError>
where
    S: Sample,
    R: Read,
    W: Write + Seek,
{
    let mut copied = 0u64;
    for sample in reader.samples::<S>().take(count as usize) {
        writer.write_sample(sample?)?;
        copied += 1;
    }
    Ok(copied)
}

/// Append `chunk` to a finished RIFF file and fix up the RIFF size
fn append_chunk(path: &Path, chunk: &[u8]) -> Result<(), ExtractError> {
    if chunk.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut len = file.seek(SeekFrom::End(0))?;
    if len % 2 == 1 {
        file.write_all(&[0])?;
        len += 1;
    }
    file.write_all(chunk)?;
    len += chunk.len() as u64;
    let riff_len = u32::try_from(len - 8)
        .map_err(|_| ExtractError::Wave("track too large for RIFF".to_string()))?;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&riff_len.to_le_bytes())?;
    file.flush()?;
    Ok(())
}

pub fn extract(request: &ExtractRequest, output: &Path) -> Result<(), ExtractError> {
    let mut reader = WavReader::open(&request.source)?;
    let spec = reader.spec();
    let total = reader.duration();

    let first = sample_frame(request.start.frames(), spec.sample_rate, total);
    let last = sample_frame(request.end.frames(), spec.sample_rate, total).max(first);
    let expected = (last - first) as u64 * spec.channels as u64;
    debug!(
        "Slicing frames {}..{} of {:?} ({} channels, {} bits)",
        first, last, request.source, spec.channels, spec.bits_per_sample
    );

    reader.seek(first)?;
    let mut writer = WavWriter::create(output, spec)?;
    let copied = match spec.sample_format {
        SampleFormat::Int => copy_samples::<i32, _, _>(&mut reader, &mut writer, expected)?,
        SampleFormat::Float => copy_samples::<f32, _, _>(&mut reader, &mut writer, expected)?,
    };
    if copied != expected {
        return Err(ExtractError::Wave(format!(
            "expected {} samples, found {}",
            expected, copied
        )));
    }
    writer.finalize()?;

    append_chunk(output, &info_chunk(&request.tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::container::AudioFormat;
    use crate::cue::Time;
    use hound::WavSpec;

    /// 8 kHz mono 16-bit, sample value == frame index
    fn write_album(path: &Path, frames: i16) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(i).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn request(source: &Path, start: Time, end: Time, tags: TagSet) -> ExtractRequest {
        ExtractRequest {
            source: source.to_path_buf(),
            format: AudioFormat::Wave,
            num: 2,
            start,
            end,
            tags,
        }
    }

    #[test]
    fn test_sample_frame_is_clamped() {
        assert_eq!(sample_frame(75, 44100, 1_000_000), 44100);
        assert_eq!(sample_frame(15, 8000, 48000), 1600);
        assert_eq!(sample_frame(75 * 60, 8000, 48000), 48000);
    }

    #[test]
    fn test_extract_slices_exact_frames() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("album.wav");
        write_album(&source, 8000);
        let output = dir.path().join("track.wav");

        let mut tags = TagSet::new();
        tags.insert(TagKey::Title, vec!["Second".into()]);
        // 15 CD frames = 0.2s = 1600 samples at 8 kHz
        let request = request(&source, Time::new(0, 0, 15), Time::new(0, 0, 30), tags);
        extract(&request, &output).unwrap();

        let mut reader = WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.duration(), 1600);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.first(), Some(&1600));
        assert_eq!(samples.last(), Some(&3199));

        let bytes = std::fs::read(&output).unwrap();
        let riff_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(riff_len as usize, bytes.len() - 8);
        assert!(bytes.windows(4).any(|w| w == b"INAM"));
    }

    #[test]
    fn test_last_track_stops_at_end_of_album() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("album.wav");
        write_album(&source, 8000);
        let output = dir.path().join("track.wav");

        // end lies past the album; no tags means no INFO chunk
        let request = request(&source, Time::new(0, 0, 60), Time::new(0, 2, 0), TagSet::new());
        extract(&request, &output).unwrap();

        let reader = WavReader::open(&output).unwrap();
        assert_eq!(reader.duration(), 8000 - 6400);
        let bytes = std::fs::read(&output).unwrap();
        assert!(!bytes.windows(4).any(|w| w == b"LIST"));
    }

    #[test]
    fn test_extract_rejects_non_wave_input() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("album.wav");
        std::fs::write(&source, b"fLaC0000000000000000000000000000").unwrap();
        let output = dir.path().join("track.wav");

        let request = request(&source, Time::ZERO, Time::new(0, 1, 0), TagSet::new());
        assert!(matches!(
            extract(&request, &output),
            Err(ExtractError::Wave(_))
        ));
    }

    #[test]
    fn test_info_chunk() {
        assert!(info_chunk(&TagSet::new()).is_empty());
        let mut tags = TagSet::new();
        tags.insert(TagKey::Artist, vec!["Zaz".into()]);
        tags.insert(TagKey::Isrc, vec!["FR2PY1403250".into()]);
        let chunk = info_chunk(&tags);
        assert_eq!(&chunk[0..4], b"LIST");
        assert_eq!(&chunk[8..12], b"INFO");
        assert_eq!(&chunk[12..16], b"IART");
        // "Zaz\0" is even, no padding
        assert_eq!(chunk.len(), 12 + 8 + 4);
    }
}
