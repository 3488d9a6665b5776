// # Virtual Paths
//
// Bidirectional mapping between album files in the source tree and the
// per-track file names shown in the mounted tree:
//
//   <album root><album ext><separator><NNN>[.<title fragment>]<track ext>
//
// The title fragment is cosmetic; a track is identified by its album file and
// track number only (see `TrackKey`).

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::album::AlbumRegistry;
use crate::cue::Track;

pub const DEFAULT_TRACK_SEPARATOR: &str = ".#-#.";
pub const DEFAULT_MAX_TITLE_LEN: usize = 20;
pub const DEFAULT_ALBUM_EXTENSION: &str = r"(\.flac|\.wav)";
pub const DEFAULT_VALID_CHARS: &str =
    "-_() abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Configuration for the virtual path codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryConfig {
    pub track_separator: String,
    pub max_title_len: usize,
    /// Regex an album file's extension (including the dot) must fully match
    pub album_extension: String,
    /// Characters kept as-is in a title fragment; everything else becomes `_`
    pub valid_filename_chars: String,
    /// Keep album files visible next to their tracks
    pub keep_album: bool,
    /// Extension of track files; `None` mirrors the album file's extension
    pub track_extension: Option<String>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        FactoryConfig {
            track_separator: DEFAULT_TRACK_SEPARATOR.to_string(),
            max_title_len: DEFAULT_MAX_TITLE_LEN,
            album_extension: DEFAULT_ALBUM_EXTENSION.to_string(),
            valid_filename_chars: DEFAULT_VALID_CHARS.to_string(),
            keep_album: false,
            track_extension: None,
        }
    }
}

#[derive(Debug)]
struct FactoryInner {
    config: FactoryConfig,
    track_file_regex: Regex,
    album_ext_regex: Regex,
}

/// Builds `FusePath`s; cheap to clone, immutable once constructed
#[derive(Debug, Clone)]
pub struct Factory {
    inner: Arc<FactoryInner>,
}

impl Factory {
    pub fn new(mut config: FactoryConfig) -> Result<Self, regex::Error> {
        // '.' separates the title fragment from the extension
        config.valid_filename_chars.retain(|c| c != '.');

        let track_ext = match &config.track_extension {
            Some(ext) => regex::escape(ext),
            None => r"\.[^.]+".to_string(),
        };
        let pattern = format!(
            r"^(?P<basename>.*)(?P<extension>{}){}(?P<num>\d+)(?P<title>\.[^.]{{0,{}}})?(?P<track_ext>{})$",
            config.album_extension,
            regex::escape(&config.track_separator),
            config.max_title_len,
            track_ext,
        );
        debug!("Track file regex: {}", pattern);
        let track_file_regex = Regex::new(&pattern)?;
        let album_ext_regex = Regex::new(&format!("^(?:{})$", config.album_extension))?;

        Ok(Factory {
            inner: Arc::new(FactoryInner {
                config,
                track_file_regex,
                album_ext_regex,
            }),
        })
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.inner.config
    }

    pub fn is_album_extension(&self, extension: &str) -> bool {
        self.inner.album_ext_regex.is_match(extension)
    }

    /// Decode a virtual path. Anything that is not a track file name passes
    /// through as a plain path.
    pub fn from_vpath(&self, vpath: &str) -> FusePath {
        if let Some(caps) = self.inner.track_file_regex.captures(vpath) {
            let extension = &caps["extension"];
            let mirrored = self.config().track_extension.is_some()
                || caps["track_ext"].eq_ignore_ascii_case(extension);
            if let (true, Ok(num)) = (mirrored, caps["num"].parse::<u32>()) {
                let title = caps
                    .name("title")
                    .map(|m| m.as_str().trim_start_matches('.'))
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);
                return FusePath {
                    source_root: caps["basename"].to_string(),
                    extension: extension.to_string(),
                    is_track: true,
                    num: Some(num),
                    title,
                    factory: self.clone(),
                };
            }
        }

        let (root, ext) = split_ext(vpath);
        FusePath {
            source_root: root.to_string(),
            extension: ext.to_string(),
            is_track: false,
            num: None,
            title: None,
            factory: self.clone(),
        }
    }

    pub fn from_track(&self, source_root: &str, extension: &str, track: &Track) -> FusePath {
        FusePath {
            source_root: source_root.to_string(),
            extension: extension.to_string(),
            is_track: true,
            num: Some(track.num),
            title: track.title.clone(),
            factory: self.clone(),
        }
    }

    /// NFKD-normalize, truncate, then replace characters outside the valid set.
    /// `None` when nothing is left.
    pub fn sanitize_title(&self, title: &str) -> Option<String> {
        let config = self.config();
        let clean: String = title
            .nfkd()
            .take(config.max_title_len)
            .map(|c| {
                if config.valid_filename_chars.contains(c) {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if clean.is_empty() {
            None
        } else {
            Some(clean)
        }
    }

    /// List a source directory the way it appears in the mounted tree: album
    /// files with tracks are replaced by one entry per track.
    pub fn readdir(&self, dir: &Path, albums: &AlbumRegistry) -> io::Result<Vec<String>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let filename = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    warn!("Skipping non UTF-8 file name {:?} in {:?}", name, dir);
                    continue;
                }
            };

            let (basename, extension) = split_ext(&filename);
            if !self.is_album_extension(extension) {
                entries.push(filename);
                continue;
            }

            let album = albums.get(&entry.path());
            match album.tracks() {
                Some(tracks) if !tracks.is_empty() => {
                    if self.config().keep_album {
                        entries.push(filename.clone());
                    }
                    entries.extend(
                        tracks
                            .iter()
                            .map(|t| self.from_track(basename, extension, t).vpath()),
                    );
                }
                _ => entries.push(filename),
            }
        }
        entries.sort();

        let mut listing = vec![".".to_string(), "..".to_string()];
        listing.extend(entries);
        debug!("Directory {:?} lists {} entries", dir, listing.len());
        Ok(listing)
    }
}

/// Split off the extension of the last path component, ignoring leading dots
/// (`.hidden` has no extension).
pub fn split_ext(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let name = &path[name_start..];
    let leading_dots = name.len() - name.trim_start_matches('.').len();
    match name[leading_dots..].rfind('.') {
        Some(pos) => path.split_at(name_start + leading_dots + pos),
        None => (path, ""),
    }
}

/// Cache identity of a track: album file plus zero-padded track number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackKey(String);

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry of the mounted tree, either a plain path or one track of an album
#[derive(Debug, Clone)]
pub struct FusePath {
    pub source_root: String,
    pub extension: String,
    pub is_track: bool,
    pub num: Option<u32>,
    pub title: Option<String>,
    factory: Factory,
}

impl PartialEq for FusePath {
    fn eq(&self, other: &Self) -> bool {
        self.source_root == other.source_root
            && self.extension == other.extension
            && self.is_track == other.is_track
            && self.num == other.num
            && self.title == other.title
    }
}

impl Eq for FusePath {}

impl FusePath {
    /// Path of the underlying file
    pub fn source(&self) -> String {
        format!("{}{}", self.source_root, self.extension)
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Fragment of the title that goes into the file name, including its leading '.'
    pub fn title_fragment(&self) -> String {
        self.title
            .as_deref()
            .and_then(|t| self.factory.sanitize_title(t))
            .map(|t| format!(".{}", t))
            .unwrap_or_default()
    }

    pub fn track_extension(&self) -> &str {
        self.factory
            .config()
            .track_extension
            .as_deref()
            .unwrap_or(&self.extension)
    }

    /// Name as seen in the mounted tree
    pub fn vpath(&self) -> String {
        match self.num {
            Some(num) if self.is_track => format!(
                "{}{}{}{:03}{}{}",
                self.source_root,
                self.extension,
                self.factory.config().track_separator,
                num,
                self.title_fragment(),
                self.track_extension(),
            ),
            _ => self.source(),
        }
    }

    pub fn track_key(&self) -> TrackKey {
        match self.num {
            Some(num) if self.is_track => TrackKey(format!(
                "{}{}{:03}",
                self.source(),
                self.factory.config().track_separator,
                num
            )),
            _ => TrackKey(self.source()),
        }
    }

    /// Path of another track of the same album
    pub fn for_other_track(&self, num: u32, title: Option<&str>) -> FusePath {
        FusePath {
            source_root: self.source_root.clone(),
            extension: self.extension.clone(),
            is_track: true,
            num: Some(num),
            title: title.map(str::to_string),
            factory: self.factory.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::{Time, TrackType};

    fn track(num: u32, title: Option<&str>) -> Track {
        Track {
            num,
            track_type: TrackType::Audio,
            artists: vec![],
            composers: vec![],
            title: title.map(str::to_string),
            isrc: None,
            start: Time::ZERO,
            end: Time::new(1, 0, 0),
        }
    }

    #[test]
    fn test_encode_track() {
        let factory = Factory::new(FactoryConfig::default()).unwrap();
        let fp = factory.from_track("music/Zaz - Paris", ".flac", &track(1, Some("Paris sera toujours Paris")));
        assert_eq!(
            fp.vpath(),
            "music/Zaz - Paris.flac.#-#.001.Paris sera toujours .flac"
        );
        assert_eq!(fp.source(), "music/Zaz - Paris.flac");
    }

    #[test]
    fn test_round_trip_keeps_identity() {
        let configs = [
            FactoryConfig::default(),
            FactoryConfig {
                track_separator: "[x]".into(),
                max_title_len: 5,
                ..FactoryConfig::default()
            },
            FactoryConfig {
                track_extension: Some(".flac".into()),
                keep_album: true,
                ..FactoryConfig::default()
            },
        ];
        let titles = [None, Some(""), Some("Sous le ciel de Paris"), Some("Ça.va/bien?"), Some("...")];
        for config in configs {
            let factory = Factory::new(config).unwrap();
            for ext in [".flac", ".wav"] {
                for (i, title) in titles.iter().enumerate() {
                    let t = track(i as u32 + 1, *title);
                    let encoded = factory.from_track("a/b.c/Album", ext, &t);
                    let decoded = factory.from_vpath(&encoded.vpath());
                    assert!(decoded.is_track, "{} should decode as a track", encoded.vpath());
                    assert_eq!(decoded.num, Some(t.num));
                    assert_eq!(decoded.source(), format!("a/b.c/Album{}", ext));
                    assert_eq!(decoded.track_key(), encoded.track_key());
                    assert_eq!(decoded.vpath(), encoded.vpath());
                }
            }
        }
    }

    #[test]
    fn test_title_does_not_affect_key() {
        let factory = Factory::new(FactoryConfig::default()).unwrap();
        let a = factory.from_vpath("Album.flac.#-#.002.Foo.flac");
        let b = factory.from_vpath("Album.flac.#-#.2.flac");
        assert_eq!(a.track_key(), b.track_key());
        assert_eq!(a.title.as_deref(), Some("Foo"));
        assert_eq!(b.title, None);
        assert_eq!(a.track_key().to_string(), "Album.flac.#-#.002");
    }

    #[test]
    fn test_non_track_passes_through() {
        let factory = Factory::new(FactoryConfig::default()).unwrap();
        for path in ["cover.jpg", "dir/Album.flac", "dir", ".hidden", "Album.flac.#-#.abc.flac"] {
            let fp = factory.from_vpath(path);
            assert!(!fp.is_track);
            assert_eq!(fp.source(), path);
            assert_eq!(fp.vpath(), path);
        }
    }

    #[test]
    fn test_mirrored_extension_must_match_album() {
        let factory = Factory::new(FactoryConfig::default()).unwrap();
        assert!(!factory.from_vpath("Album.flac.#-#.001.wav").is_track);
        assert!(factory.from_vpath("Album.wav.#-#.001.wav").is_track);
    }

    #[test]
    fn test_sanitize_title() {
        let factory = Factory::new(FactoryConfig::default()).unwrap();
        assert_eq!(factory.sanitize_title("Café/Noir").as_deref(), Some("Cafe__Noir"));
        assert_eq!(factory.sanitize_title(""), None);
        assert_eq!(
            factory.sanitize_title("a very long title that goes on").as_deref(),
            Some("a very long title th")
        );
    }

    #[test]
    fn test_sanitize_is_idempotent_and_restricted() {
        let factory = Factory::new(FactoryConfig::default()).unwrap();
        for s in ["Ünïcödé ﬁ ligature", "a.b.c", "   ", "日本語", "(Remix) - 2"] {
            let once = factory.sanitize_title(s).unwrap_or_default();
            let twice = factory.sanitize_title(&once).unwrap_or_default();
            assert_eq!(once, twice);
            assert!(once.chars().all(|c| DEFAULT_VALID_CHARS.contains(c) || c == '_'));
        }
    }

    #[test]
    fn test_for_other_track() {
        let factory = Factory::new(FactoryConfig::default()).unwrap();
        let fp = factory.from_vpath("x/Album.flac.#-#.001.One.flac");
        let next = fp.for_other_track(2, Some("Two"));
        assert_eq!(next.vpath(), "x/Album.flac.#-#.002.Two.flac");
    }

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext("a/b.c/file.flac"), ("a/b.c/file", ".flac"));
        assert_eq!(split_ext("a/b.c/file"), ("a/b.c/file", ""));
        assert_eq!(split_ext(".hidden"), (".hidden", ""));
        assert_eq!(split_ext("..x.cue"), ("..x", ".cue"));
    }
}
