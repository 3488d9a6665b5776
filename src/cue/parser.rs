use nom::{
    branch::alt,
    bytes::complete::{take_till1, take_until, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, eof, map, map_res, rest},
    multi::separated_list1,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use tracing::debug;

use super::{AlbumFields, CueDraft, CueError, DraftTrack, Time, TrackType};

/// One line of a CUE sheet
#[derive(Debug, Clone, PartialEq)]
enum Line {
    /// Starts a new track
    Track(u32, TrackType),
    /// Applies to the current track, or to the album before the first TRACK
    Field(Entry),
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Catalog(String),
    Rem(String),
    Performer(String),
    Songwriter(String),
    Title(String),
    File,
    Isrc(String),
    Flags,
    Index(u32, Time),
    Gap,
}

/// Track under construction while its sub-entries are read
struct TrackBuilder {
    num: u32,
    track_type: TrackType,
    artists: Vec<String>,
    composers: Vec<String>,
    title: Option<String>,
    isrc: Option<String>,
    start: Option<Time>,
}

impl TrackBuilder {
    fn new(num: u32, track_type: TrackType) -> Self {
        Self {
            num,
            track_type,
            artists: Vec::new(),
            composers: Vec::new(),
            title: None,
            isrc: None,
            start: None,
        }
    }

    fn finish(self) -> Result<DraftTrack, CueError> {
        let start = self.start.ok_or_else(|| {
            CueError::CueParsing(format!("track {} has no INDEX 01", self.num))
        })?;
        Ok(DraftTrack {
            num: self.num,
            track_type: self.track_type,
            artists: self.artists,
            composers: self.composers,
            title: self.title,
            isrc: self.isrc,
            start,
        })
    }
}

pub(super) fn parse_cue(text: &str) -> Result<CueDraft, CueError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut album = AlbumFields::default();
    let mut tracks = Vec::new();
    let mut current: Option<TrackBuilder> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let entry = match all_consuming(terminated(parse_line, space0))(line) {
            Ok((_, Line::Field(entry))) => entry,
            Ok((_, Line::Track(num, track_type))) => {
                if let Some(done) = current.replace(TrackBuilder::new(num, track_type)) {
                    tracks.push(done.finish()?);
                }
                continue;
            }
            Err(e) => {
                return Err(CueError::CueParsing(format!(
                    "line {}: cannot parse {:?} ({})",
                    idx + 1,
                    line,
                    e
                )))
            }
        };

        match (entry, current.as_mut()) {
            (Entry::Performer(v), Some(track)) => track.artists.extend(split_values(&v)),
            (Entry::Performer(v), None) => album.artists.extend(split_values(&v)),
            (Entry::Songwriter(v), Some(track)) => track.composers.extend(split_values(&v)),
            (Entry::Songwriter(v), None) => album.composers.extend(split_values(&v)),
            (Entry::Title(v), Some(track)) => track.title = Some(v),
            (Entry::Title(v), None) => album.title = Some(v),
            (Entry::Catalog(v), _) => album.catalog = Some(v),
            (Entry::Rem(comment), None) => apply_rem(&mut album, &comment),
            (Entry::Rem(_), Some(_)) | (Entry::File, _) => {}
            (Entry::Isrc(v), Some(track)) => track.isrc = Some(v),
            (Entry::Index(1, time), Some(track)) => track.start = Some(time),
            (Entry::Index(..), Some(_)) | (Entry::Flags, Some(_)) | (Entry::Gap, Some(_)) => {}
            (entry, None) => {
                return Err(CueError::CueParsing(format!(
                    "line {}: {:?} outside of a TRACK",
                    idx + 1,
                    entry
                )))
            }
        }
    }

    if let Some(done) = current.take() {
        tracks.push(done.finish()?);
    }

    debug!("Parsed CUE sheet with {} tracks", tracks.len());
    Ok(CueDraft { album, tracks })
}

/// Rippers disagree on multiple PERFORMER lines versus `;`-separated values
fn split_values(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn apply_rem(album: &mut AlbumFields, comment: &str) {
    let comment = comment.trim();
    let (key, value) = match comment.split_once(char::is_whitespace) {
        Some((key, value)) => (key, unquote(value.trim())),
        None => return,
    };
    let slot = match key.to_ascii_uppercase().as_str() {
        "DISCID" => &mut album.disc_id,
        "DATE" => &mut album.year,
        "DISCNUMBER" => &mut album.disc_number,
        "TOTALDISCS" => &mut album.total_discs,
        _ => return,
    };
    *slot = Some(value.to_string());
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn parse_line(input: &str) -> IResult<&str, Line> {
    let (input, keyword) = take_while1(|c: char| c.is_ascii_alphabetic())(input)?;
    if keyword.eq_ignore_ascii_case("TRACK") {
        return map(
            tuple((
                space1,
                map_res(digit1, |s: &str| s.parse::<u32>()),
                space1,
                map_res(parse_word, TrackType::from_keyword),
            )),
            |(_, num, _, track_type)| Line::Track(num, track_type),
        )(input);
    }
    map(|i| parse_field(keyword, i), Line::Field)(input)
}

fn parse_field<'a>(keyword: &'a str, input: &'a str) -> IResult<&'a str, Entry> {
    match keyword.to_ascii_uppercase().as_str() {
        "CATALOG" => map(preceded(space1, parse_word), |s| Entry::Catalog(s.to_string()))(input),
        "REM" => map(rest, |s: &str| Entry::Rem(s.trim().to_string()))(input),
        "PERFORMER" => map(preceded(space1, parse_string), Entry::Performer)(input),
        "SONGWRITER" => map(preceded(space1, parse_string), Entry::Songwriter)(input),
        "TITLE" => map(preceded(space1, parse_string), Entry::Title)(input),
        "FILE" => map(
            tuple((space1, parse_file_name, space1, parse_word)),
            |_| Entry::File,
        )(input),
        "ISRC" => map(preceded(space1, parse_word), |s| Entry::Isrc(s.to_string()))(input),
        "FLAGS" => map(preceded(space1, separated_list1(space1, parse_word)), |_| {
            Entry::Flags
        })(input),
        "INDEX" => map(
            tuple((
                space1,
                map_res(digit1, |s: &str| s.parse::<u32>()),
                space1,
                parse_time,
            )),
            |(_, num, _, time)| Entry::Index(num, time),
        )(input),
        "PREGAP" | "POSTGAP" => map(preceded(space1, parse_time), |_| Entry::Gap)(input),
        _ => Err(nom::Err::Error(nom::error::Error::new(
            keyword,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

/// Parse a single whitespace-free token
fn parse_word(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c.is_whitespace())(input)
}

/// Parse quoted string
fn parse_quoted_string(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_until("\""), char('"'))(input)
}

/// Quoted string ending the line, or the bare rest of the line
fn parse_string(input: &str) -> IResult<&str, String> {
    alt((
        map(terminated(parse_quoted_string, tuple((space0, eof))), str::to_string),
        map(rest, |s: &str| s.trim_end().to_string()),
    ))(input)
}

fn parse_file_name(input: &str) -> IResult<&str, &str> {
    alt((parse_quoted_string, parse_word))(input)
}

/// Parse time in MM:SS:FF format
fn parse_time(input: &str) -> IResult<&str, Time> {
    map_res(
        tuple((digit1, char(':'), digit1, char(':'), digit1)),
        |(mm, _, ss, _, ff): (&str, char, &str, char, &str)| -> Result<Time, CueError> {
            let field = |s: &str| {
                s.parse::<u32>()
                    .map_err(|e| CueError::InvalidTime(format!("{:?}: {}", s, e)))
            };
            let (mm, ss, ff) = (field(mm)?, field(ss)?, field(ff)?);
            if ss >= 60 || ff >= super::time::FRAMES_PER_SECOND {
                return Err(CueError::InvalidTime(format!("{}:{}:{}", mm, ss, ff)));
            }
            Ok(Time::new(mm, ss, ff))
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        let (_, time) = parse_time("03:45:12").unwrap();
        assert_eq!(time, Time::new(3, 45, 12));
        assert!(parse_time("03:60:00").is_err());
        assert!(parse_time("03:00:75").is_err());
    }

    #[test]
    fn test_parse_quoted_string() {
        let (_, string) = parse_quoted_string("\"Test Album\"").unwrap();
        assert_eq!(string, "Test Album");
    }

    #[test]
    fn test_parse_string_bare_takes_rest_of_line() {
        let (_, s) = parse_string("Simon & Garfunkel").unwrap();
        assert_eq!(s, "Simon & Garfunkel");
        let (_, s) = parse_string("\"Quoted\"  ").unwrap();
        assert_eq!(s, "Quoted");
    }

    #[test]
    fn test_semicolon_and_repeated_performers_accumulate() {
        let cue = "PERFORMER \"A; B\"\nPERFORMER C\nTRACK 01 AUDIO\n  SONGWRITER \"X;Y\"\n  INDEX 01 00:00:00\n";
        let draft = parse_cue(cue).unwrap();
        assert_eq!(draft.album.artists, vec!["A", "B", "C"]);
        assert_eq!(draft.tracks[0].composers, vec!["X", "Y"]);
    }

    #[test]
    fn test_only_index_01_sets_start() {
        let cue = "TRACK 01 AUDIO\n  INDEX 00 00:00:00\n  INDEX 01 00:02:00\n  INDEX 02 00:05:00\n";
        let draft = parse_cue(cue).unwrap();
        assert_eq!(draft.tracks[0].start, Time::new(0, 2, 0));
    }

    #[test]
    fn test_pregap_postgap_flags_are_accepted() {
        let cue = "FILE album.wav WAVE\nTRACK 1 AUDIO\n  FLAGS DCP PRE\n  PREGAP 00:02:00\n  INDEX 01 00:00:00\n  POSTGAP 00:01:00\nTRACK 2 MODE1/2352\n  INDEX 01 01:00:00\n";
        let draft = parse_cue(cue).unwrap();
        assert_eq!(draft.tracks.len(), 2);
        assert_eq!(draft.tracks[1].track_type, TrackType::Data("MODE1/2352".into()));
    }

    #[test]
    fn test_disc_entries_in_any_order_with_crlf_and_bom() {
        let cue = "\u{feff}CATALOG 0123456789012\r\nTITLE \"T\"\r\nREM GENRE Pop\r\nSONGWRITER S\r\nPERFORMER P\r\n\r\nTRACK 01 AUDIO\r\n  INDEX 01 00:00:00\r\n";
        let draft = parse_cue(cue).unwrap();
        assert_eq!(draft.album.catalog.as_deref(), Some("0123456789012"));
        assert_eq!(draft.album.title.as_deref(), Some("T"));
        assert_eq!(draft.album.composers, vec!["S"]);
        assert_eq!(draft.album.artists, vec!["P"]);
        assert_eq!(draft.tracks.len(), 1);
    }

    #[test]
    fn test_rem_values_are_unquoted() {
        let draft = parse_cue("REM DATE \"1999\"\nREM DISCID 0A0B\n").unwrap();
        assert_eq!(draft.album.year.as_deref(), Some("1999"));
        assert_eq!(draft.album.disc_id.as_deref(), Some("0A0B"));
    }

    #[test]
    fn test_invalid_input_is_an_error() {
        for bad in [
            "GARBAGE here",
            "TRACK xx AUDIO\n",
            "TRACK 01 VIDEO\n  INDEX 01 00:00:00",
            "INDEX 01 00:00:00",
            "TRACK 01 AUDIO\n  INDEX 01 00:99:00",
            "TRACK 01 AUDIO\n  TITLE \"x\"",
        ] {
            assert!(
                matches!(parse_cue(bad), Err(CueError::CueParsing(_))),
                "{:?} should fail",
                bad
            );
        }
    }

    #[test]
    fn test_track_lines_are_split_from_fields() {
        assert_eq!(
            parse_line("track 3 AUDIO"),
            Ok(("", Line::Track(3, TrackType::Audio)))
        );
        assert_eq!(
            parse_line("TITLE \"Song\""),
            Ok(("", Line::Field(Entry::Title("Song".into()))))
        );
    }

    #[test]
    fn test_each_track_line_closes_the_previous_track() {
        let cue = "TRACK 01 AUDIO\n  TITLE A\n  INDEX 01 00:00:00\nTRACK 02 AUDIO\n  INDEX 01 00:10:00\nTRACK 03 AUDIO\n  TITLE C\n  INDEX 01 00:20:00\n";
        let draft = parse_cue(cue).unwrap();
        let titles: Vec<_> = draft.tracks.iter().map(|t| t.title.as_deref()).collect();
        assert_eq!(titles, vec![Some("A"), None, Some("C")]);
        assert_eq!(draft.tracks[2].start, Time::new(0, 20, 0));

        // the track being replaced must already carry its INDEX 01
        assert!(parse_cue("TRACK 01 AUDIO\nTRACK 02 AUDIO\n  INDEX 01 00:00:00\n").is_err());
    }
}
