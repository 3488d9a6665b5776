// # Tags
//
// Tag sets written onto extracted tracks. Album-level tags come from the
// container (minus ignored and multi-line ones), with CUE disc fields filling
// the gaps; track-level tags from the CUE track override them.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

use crate::cue::{AlbumFields, Track};

pub const DEFAULT_IGNORE_TAGS: &str = "CUE_TRACK.*|COMMENT";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagKey {
    Album,
    AlbumArtist,
    Artist,
    Composer,
    Title,
    TrackNumber,
    TrackTotal,
    Isrc,
    Catalog,
    DiscId,
    Year,
    DiscNumber,
    TotalDiscs,
    /// Any other tag, upper-cased
    Other(String),
}

impl TagKey {
    pub fn from_name(name: &str) -> TagKey {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "ALBUM" => TagKey::Album,
            "ALBUMARTIST" => TagKey::AlbumArtist,
            "ARTIST" => TagKey::Artist,
            "COMPOSER" => TagKey::Composer,
            "TITLE" => TagKey::Title,
            "TRACKNUMBER" => TagKey::TrackNumber,
            "TRACKTOTAL" => TagKey::TrackTotal,
            "ISRC" => TagKey::Isrc,
            "CATALOG" => TagKey::Catalog,
            "DISCID" => TagKey::DiscId,
            "YEAR" => TagKey::Year,
            "DISCNUMBER" => TagKey::DiscNumber,
            "TOTALDISCS" => TagKey::TotalDiscs,
            _ => TagKey::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TagKey::Album => "ALBUM",
            TagKey::AlbumArtist => "ALBUMARTIST",
            TagKey::Artist => "ARTIST",
            TagKey::Composer => "COMPOSER",
            TagKey::Title => "TITLE",
            TagKey::TrackNumber => "TRACKNUMBER",
            TagKey::TrackTotal => "TRACKTOTAL",
            TagKey::Isrc => "ISRC",
            TagKey::Catalog => "CATALOG",
            TagKey::DiscId => "DISCID",
            TagKey::Year => "YEAR",
            TagKey::DiscNumber => "DISCNUMBER",
            TagKey::TotalDiscs => "TOTALDISCS",
            TagKey::Other(name) => name,
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered tag name -> values
pub type TagSet = BTreeMap<TagKey, Vec<String>>;

/// Compile a tag ignore pattern; it must match at the start of the tag name
pub fn compile_ignore(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

/// Album tags from raw container tags, falling back to the CUE disc fields
pub fn album_tags<'a, I>(container_tags: I, ignore: &Regex, cue_album: Option<&AlbumFields>) -> TagSet
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut tags = TagSet::new();
    for (name, value) in container_tags {
        if value.lines().count() != 1 {
            continue;
        }
        let key = TagKey::from_name(name);
        if ignore.is_match(key.as_str()) {
            continue;
        }
        tags.entry(key).or_default().push(value.to_string());
    }

    // ARTIST / TITLE are sometimes used for the album itself
    if !tags.contains_key(&TagKey::AlbumArtist) {
        if let Some(artists) = tags.get(&TagKey::Artist).cloned() {
            tags.insert(TagKey::AlbumArtist, artists);
        }
    }
    if !tags.contains_key(&TagKey::Album) {
        if let Some(title) = tags.get(&TagKey::Title).cloned() {
            tags.insert(TagKey::Album, title);
        }
    }

    if let Some(cue) = cue_album {
        for (key, values) in cue_album_tags(cue) {
            tags.entry(key).or_insert(values);
        }
    }
    tags
}

fn cue_album_tags(cue: &AlbumFields) -> TagSet {
    let mut tags = TagSet::new();
    let single = |v: &Option<String>| v.as_ref().map(|s| vec![s.clone()]);
    let fields = [
        (TagKey::AlbumArtist, Some(cue.artists.clone()).filter(|v| !v.is_empty())),
        (TagKey::Composer, Some(cue.composers.clone()).filter(|v| !v.is_empty())),
        (TagKey::Album, single(&cue.title)),
        (TagKey::Catalog, single(&cue.catalog)),
        (TagKey::DiscId, single(&cue.disc_id)),
        (TagKey::Year, single(&cue.year)),
        (TagKey::DiscNumber, single(&cue.disc_number)),
        (TagKey::TotalDiscs, single(&cue.total_discs)),
    ];
    for (key, values) in fields {
        if let Some(values) = values {
            tags.insert(key, values);
        }
    }
    tags
}

/// Merge album tags with a track's own tags
pub fn track_tags(album: &TagSet, track: &Track, track_total: usize) -> TagSet {
    let mut tags = album.clone();
    if !track.artists.is_empty() {
        tags.insert(TagKey::Artist, track.artists.clone());
    }
    if !track.composers.is_empty() {
        tags.insert(TagKey::Composer, track.composers.clone());
    }
    if let Some(isrc) = &track.isrc {
        tags.insert(TagKey::Isrc, vec![isrc.clone()]);
    }
    if track.num > 0 {
        tags.insert(TagKey::TrackNumber, vec![track.num.to_string()]);
    }
    if let Some(title) = &track.title {
        tags.insert(TagKey::Title, vec![title.clone()]);
    }

    tags.entry(TagKey::TrackTotal)
        .or_insert_with(|| vec![track_total.to_string()]);
    // performer doubles as composer so compilations sort sensibly
    if let Some(artists) = tags.get(&TagKey::Artist).cloned() {
        tags.insert(TagKey::Composer, artists);
    }
    tags
}
