use std::io::Write;
use std::path::{Path, PathBuf};

use metaflac::block::PictureType;
use tempfile::TempPath;
use tracing::debug;

/// Cover art handed to the encoder
#[derive(Debug)]
pub enum CoverArt {
    /// Exported from the album's PICTURE block; deleted on drop
    Embedded(TempPath),
    Sidecar(PathBuf),
}

impl CoverArt {
    pub fn path(&self) -> &Path {
        match self {
            CoverArt::Embedded(temp) => temp.as_ref(),
            CoverArt::Sidecar(path) => path.as_path(),
        }
    }
}

/// Embedded front cover (else the first picture), falling back to
/// `<album>.jpg` or `folder.jpg` next to the album. Failures only mean no cover.
pub fn find_cover(source: &Path, temp_dir: &Path) -> Option<CoverArt> {
    match export_embedded(source, temp_dir) {
        Ok(Some(temp)) => return Some(CoverArt::Embedded(temp)),
        Ok(None) => debug!("No embedded picture in {:?}", source),
        Err(e) => debug!("Cannot export picture of {:?}: {}", source, e),
    }
    find_sidecar(source).map(CoverArt::Sidecar)
}

fn export_embedded(
    source: &Path,
    temp_dir: &Path,
) -> Result<Option<TempPath>, Box<dyn std::error::Error + Send + Sync>> {
    let tag = metaflac::Tag::read_from_path(source)?;
    let picture = tag
        .pictures()
        .find(|p| matches!(p.picture_type, PictureType::CoverFront))
        .or_else(|| tag.pictures().next());
    let picture = match picture {
        Some(p) if !p.data.is_empty() => p,
        _ => return Ok(None),
    };

    let suffix = match picture.mime_type.as_str() {
        "image/png" => ".png",
        "image/gif" => ".gif",
        _ => ".jpg",
    };
    let mut file = tempfile::Builder::new()
        .prefix("trackfs-cover-")
        .suffix(suffix)
        .tempfile_in(temp_dir)?;
    file.write_all(&picture.data)?;
    file.flush()?;
    debug!(
        "Exported {} byte picture of {:?} to {:?}",
        picture.data.len(),
        source,
        file.path()
    );
    Ok(Some(file.into_temp_path()))
}

fn find_sidecar(source: &Path) -> Option<PathBuf> {
    let mut candidates = vec![source.with_extension("jpg")];
    if let Some(dir) = source.parent() {
        candidates.push(dir.join("folder.jpg"));
    }
    candidates.into_iter().find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_album_image_wins_over_folder_image() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("Album.flac");
        std::fs::write(&album, b"not really flac").unwrap();
        std::fs::write(dir.path().join("folder.jpg"), b"jpg").unwrap();
        let cover = find_cover(&album, dir.path()).unwrap();
        assert_eq!(cover.path(), dir.path().join("folder.jpg"));

        std::fs::write(dir.path().join("Album.jpg"), b"jpg").unwrap();
        let cover = find_cover(&album, dir.path()).unwrap();
        assert_eq!(cover.path(), dir.path().join("Album.jpg"));
    }

    #[test]
    fn test_no_cover() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("Album.flac");
        std::fs::write(&album, b"not really flac").unwrap();
        assert!(find_cover(&album, dir.path()).is_none());
    }
}
