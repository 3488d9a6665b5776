use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use super::CueError;

/// CD frames per second (a CUE sheet's finest time resolution)
pub const FRAMES_PER_SECOND: u32 = 75;

const FRAMES_PER_MINUTE: u64 = FRAMES_PER_SECOND as u64 * 60;

/// Timestamp / duration with CD frame accuracy.
///
/// Always normalized: `ss < 60` and `ff < 75`. The textual form is the fixed
/// six digit `MMSSFF` string; [`Time::codec_time`] gives the `MM:SS.CC` form the
/// codec tool expects for `--skip` / `--until`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    mm: u32,
    ss: u32,
    ff: u32,
}

impl Time {
    pub const ZERO: Time = Time {
        mm: 0,
        ss: 0,
        ff: 0,
    };

    /// Build from minutes, seconds and frames, carrying overflow upwards
    pub fn new(mm: u32, ss: u32, ff: u32) -> Self {
        let total = mm as u64 * FRAMES_PER_MINUTE + ss as u64 * FRAMES_PER_SECOND as u64 + ff as u64;
        Self::from_frames(total)
    }

    pub fn from_triple((mm, ss, ff): (u32, u32, u32)) -> Self {
        Self::new(mm, ss, ff)
    }

    /// Seconds with fraction; the fraction is truncated to whole frames
    pub fn from_seconds(seconds: f64) -> Self {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Self::ZERO;
        }
        let whole = seconds.trunc();
        let frac = seconds - whole;
        let whole = whole as u64;
        let ff = ((frac * FRAMES_PER_SECOND as f64) as u32).min(FRAMES_PER_SECOND - 1);
        Self {
            mm: (whole / 60) as u32,
            ss: (whole % 60) as u32,
            ff,
        }
    }

    pub fn from_frames(frames: u64) -> Self {
        Self {
            mm: (frames / FRAMES_PER_MINUTE) as u32,
            ss: ((frames % FRAMES_PER_MINUTE) / FRAMES_PER_SECOND as u64) as u32,
            ff: (frames % FRAMES_PER_SECOND as u64) as u32,
        }
    }

    pub fn mm(&self) -> u32 {
        self.mm
    }

    pub fn ss(&self) -> u32 {
        self.ss
    }

    pub fn ff(&self) -> u32 {
        self.ff
    }

    /// Total number of CD frames
    pub fn frames(&self) -> u64 {
        self.mm as u64 * FRAMES_PER_MINUTE + self.ss as u64 * FRAMES_PER_SECOND as u64 + self.ff as u64
    }

    pub fn seconds(&self) -> f64 {
        self.frames() as f64 / FRAMES_PER_SECOND as f64
    }

    /// `MM:SS.CC` with frames rescaled to centiseconds
    pub fn codec_time(&self) -> String {
        format!(
            "{:02}:{:02}.{:02}",
            self.mm,
            self.ss,
            self.ff * 100 / FRAMES_PER_SECOND
        )
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}{:02}", self.mm, self.ss, self.ff)
    }
}

impl FromStr for Time {
    type Err = CueError;

    /// Parse the fixed `MMSSFF` form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CueError::InvalidTime(format!(
                "expected six digits MMSSFF, got {:?}",
                s
            )));
        }
        let field = |range: std::ops::Range<usize>| -> Result<u32, CueError> {
            s[range]
                .parse::<u32>()
                .map_err(|e| CueError::InvalidTime(format!("{:?}: {}", s, e)))
        };
        let (mm, ss, ff) = (field(0..2)?, field(2..4)?, field(4..6)?);
        if ss >= 60 || ff >= FRAMES_PER_SECOND {
            return Err(CueError::InvalidTime(format!(
                "{:?}: seconds must be < 60 and frames < {}",
                s, FRAMES_PER_SECOND
            )));
        }
        Ok(Self { mm, ss, ff })
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, other: Time) -> Time {
        Time::from_frames(self.frames() + other.frames())
    }
}

impl Sub for Time {
    type Output = Time;

    /// Borrows through frames -> seconds -> minutes; saturates at zero
    fn sub(self, other: Time) -> Time {
        Time::from_frames(self.frames().saturating_sub(other.frames()))
    }
}
