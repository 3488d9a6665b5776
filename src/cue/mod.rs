// # CUE Sheets
//
// Data model for parsed CUE sheets. `parse` produces a `CueDraft`; the only
// way to obtain a `CueSheet` is `CueDraft::calc_track_times`, which assigns
// every track's end from the following track's start (or the album's total
// duration for the last track).

mod parser;
pub mod time;

pub use time::Time;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CueError {
    #[error("Invalid time format: {0}")]
    InvalidTime(String),
    #[error("CUE parsing error: {0}")]
    CueParsing(String),
}

/// Track type as declared on the `TRACK` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackType {
    Audio,
    Cdg,
    /// Any of the data modes (`MODE1/2048`, `CDI/2352`, ...)
    Data(String),
}

impl TrackType {
    fn from_keyword(s: &str) -> Result<Self, CueError> {
        match s {
            "AUDIO" => Ok(TrackType::Audio),
            "CDG" => Ok(TrackType::Cdg),
            "MODE1/2048" | "MODE1/2352" | "MODE2/2336" | "MODE2/2352" | "CDI/2336"
            | "CDI/2352" => Ok(TrackType::Data(s.to_string())),
            other => Err(CueError::CueParsing(format!("unknown track type {:?}", other))),
        }
    }
}

/// A track as read from the sheet, before end times are known
#[derive(Debug, Clone, PartialEq)]
pub struct DraftTrack {
    pub num: u32,
    pub track_type: TrackType,
    pub artists: Vec<String>,
    pub composers: Vec<String>,
    pub title: Option<String>,
    pub isrc: Option<String>,
    pub start: Time,
}

/// Disc-level fields from PERFORMER/SONGWRITER/TITLE/CATALOG and known REM keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumFields {
    pub artists: Vec<String>,
    pub composers: Vec<String>,
    pub title: Option<String>,
    pub catalog: Option<String>,
    pub disc_id: Option<String>,
    pub year: Option<String>,
    pub disc_number: Option<String>,
    pub total_discs: Option<String>,
}

/// Result of a successful parse; needs `calc_track_times` to become a `CueSheet`
#[derive(Debug, Clone, PartialEq)]
pub struct CueDraft {
    pub album: AlbumFields,
    pub tracks: Vec<DraftTrack>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub num: u32,
    pub track_type: TrackType,
    pub artists: Vec<String>,
    pub composers: Vec<String>,
    pub title: Option<String>,
    pub isrc: Option<String>,
    pub start: Time,
    pub end: Time,
}

impl Track {
    pub fn duration(&self) -> Time {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CueSheet {
    pub album: AlbumFields,
    pub tracks: Vec<Track>,
}

impl CueSheet {
    pub fn track(&self, num: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.num == num)
    }

    /// Track following `num` in sheet order
    pub fn next_track(&self, num: u32) -> Option<&Track> {
        let idx = self.tracks.iter().position(|t| t.num == num)?;
        self.tracks.get(idx + 1)
    }
}

/// Parse CUE sheet text. End times are assigned by [`CueDraft::calc_track_times`].
pub fn parse(text: &str) -> Result<CueDraft, CueError> {
    parser::parse_cue(text)
}

impl CueDraft {
    /// Assign every track's end: the next track's start, or `total_seconds` for the last one
    pub fn calc_track_times(self, total_seconds: f64) -> CueSheet {
        let album_end = Time::from_seconds(total_seconds);
        let starts: Vec<Time> = self.tracks.iter().map(|t| t.start).collect();
        let tracks = self
            .tracks
            .into_iter()
            .enumerate()
            .map(|(i, t)| Track {
                end: starts.get(i + 1).copied().unwrap_or(album_end),
                num: t.num,
                track_type: t.track_type,
                artists: t.artists,
                composers: t.composers,
                title: t.title,
                isrc: t.isrc,
                start: t.start,
            })
            .collect();
        CueSheet {
            album: self.album,
            tracks,
        }
    }
}
