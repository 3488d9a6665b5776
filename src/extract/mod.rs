// # Track Extraction
//
// Materializes one track of an album into a file. FLAC albums go through the
// external codec tool (decode range, re-encode with tags and cover art); WAVE
// albums are sliced in-process. The output format always mirrors the input.

pub mod cover;
pub mod flac;
pub mod wave;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::album::container::AudioFormat;
use crate::album::tags::TagSet;
use crate::cue::Time;

pub const DEFAULT_CODEC_TOOL: &str = "flac";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} failed: {status}")]
    ToolFailed { tool: String, status: String },
    #[error("Cannot run {tool}: {source}")]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAVE error: {0}")]
    Wave(String),
}

/// Everything needed to materialize one track
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub source: PathBuf,
    pub format: AudioFormat,
    pub num: u32,
    pub start: Time,
    pub end: Time,
    pub tags: TagSet,
}

/// Writes the audio of one track into `output`, which already exists and is empty
pub trait TrackExtractor: Send + Sync {
    fn extract(&self, request: &ExtractRequest, output: &Path) -> Result<(), ExtractError>;
}

/// External tool locations
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Codec tool used to decode / re-encode FLAC
    pub codec: PathBuf,
    /// Where scratch files (exported cover art) go
    pub temp_dir: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        ToolSettings {
            codec: PathBuf::from(DEFAULT_CODEC_TOOL),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Dispatches on the container format of the album
pub struct AudioExtractor {
    tools: ToolSettings,
}

impl AudioExtractor {
    pub fn new(tools: ToolSettings) -> Self {
        AudioExtractor { tools }
    }
}

impl TrackExtractor for AudioExtractor {
    fn extract(&self, request: &ExtractRequest, output: &Path) -> Result<(), ExtractError> {
        info!(
            "Extracting track {} [{}-{}] of {:?}",
            request.num, request.start, request.end, request.source
        );
        match request.format {
            AudioFormat::Flac => flac::extract(&self.tools, request, output),
            AudioFormat::Wave => wave::extract(request, output),
            AudioFormat::Other => Err(ExtractError::UnsupportedFormat(format!(
                "{:?} is neither FLAC nor WAVE",
                request.source
            ))),
        }
    }
}
