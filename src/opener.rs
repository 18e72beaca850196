//! Font type sniffing and dispatch to the per-format openers.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::font::{self, Font};
use crate::{CancelToken, Context, FontGogglesError};

/// How to count the faces in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceCount {
    One,
    /// Read from the sfnt collection header.
    Collection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opener {
    Otf,
    Ttx,
    Ufo,
    Ufoz,
    Designspace,
}

const REGISTRY: [(&str, FaceCount, Opener); 10] = [
    ("ttf", FaceCount::One, Opener::Otf),
    ("otf", FaceCount::One, Opener::Otf),
    ("woff", FaceCount::One, Opener::Otf),
    ("woff2", FaceCount::One, Opener::Otf),
    ("ttc", FaceCount::Collection, Opener::Otf),
    ("otc", FaceCount::Collection, Opener::Otf),
    ("ttx", FaceCount::One, Opener::Ttx),
    ("ufo", FaceCount::One, Opener::Ufo),
    ("ufoz", FaceCount::One, Opener::Ufoz),
    ("designspace", FaceCount::One, Opener::Designspace),
];

/// Leading bytes of binary font files and the suffix they stand for.
const MAGIC: [(&[u8; 4], &str); 6] = [
    (b"OTTO", "otf"),
    (b"\x00\x01\x00\x00", "ttf"),
    (b"true", "ttf"),
    (b"ttcf", "ttc"),
    (b"wOFF", "woff"),
    (b"wOF2", "woff2"),
];

fn lookup(suffix: &str) -> Option<(&'static str, FaceCount, Opener)> {
    REGISTRY
        .iter()
        .find(|(registered, _, _)| *registered == suffix)
        .copied()
}

fn sniff_content(path: &Path) -> Option<&'static str> {
    let mut magic = [0u8; 4];
    std::fs::File::open(path).ok()?.read_exact(&mut magic).ok()?;
    MAGIC
        .iter()
        .find(|(bytes, _)| **bytes == magic)
        .map(|(_, suffix)| *suffix)
}

/// The normalized suffix of a supported font file, or `None` when the path
/// is not something we can open. Files with an unknown suffix are
/// recognized by their content.
pub fn sniff_font_type(path: &Path) -> Option<&'static str> {
    let suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if let Some((suffix, _, _)) = suffix.as_deref().and_then(lookup) {
        return Some(suffix);
    }
    if path.is_file() {
        return sniff_content(path);
    }
    None
}

fn resolve(path: &Path) -> Result<(FaceCount, Opener), FontGogglesError> {
    sniff_font_type(path)
        .and_then(lookup)
        .map(|(_, count, opener)| (count, opener))
        .ok_or_else(|| FontGogglesError::UnsupportedSource {
            path: path.to_path_buf(),
        })
}

/// Number of faces in the file at `path`.
pub fn face_count(path: &Path) -> Result<u32, FontGogglesError> {
    match resolve(path)?.0 {
        FaceCount::One => Ok(1),
        FaceCount::Collection => {
            let mut header = [0u8; 12];
            std::fs::File::open(path)?.read_exact(&mut header)?;
            Ok(font::face_count(&header))
        }
    }
}

fn check_face_index(path: &Path, index: u32, count: u32) -> Result<(), FontGogglesError> {
    if index >= count {
        return Err(FontGogglesError::BadFaceIndex {
            path: path.to_path_buf(),
            index,
            count,
        });
    }
    Ok(())
}

/// Open face `face_index` of a binary font. Passing the bytes returned by
/// an earlier call for the same file skips reading it again.
pub fn open_otf(
    path: &Path,
    face_index: u32,
    bytes: Option<Arc<[u8]>>,
) -> Result<(Font, Arc<[u8]>), FontGogglesError> {
    let data = match bytes {
        Some(data) => data,
        None => font::read_sfnt(path)?,
    };
    check_face_index(path, face_index, font::face_count(&data))?;
    let font = font::open_sfnt(path, face_index, data.clone())?;
    Ok((font, data))
}

/// Unpack a zipped UFO. Returns the temporary directory and the UFO inside
/// it.
fn extract_ufoz(path: &Path) -> Result<(tempfile::TempDir, PathBuf), FontGogglesError> {
    let tmp = tempfile::tempdir()?;
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path)?)?;
    archive.extract(tmp.path())?;
    let mut ufo = None;
    for entry in std::fs::read_dir(tmp.path())? {
        let entry = entry?.path();
        if entry.extension().is_some_and(|e| e.eq_ignore_ascii_case("ufo")) {
            ufo = Some(entry);
            break;
        }
    }
    let ufo = match ufo {
        Some(ufo) => ufo,
        None if tmp.path().join("metainfo.plist").exists() => tmp.path().to_path_buf(),
        None => {
            return Err(FontGogglesError::UnsupportedSource {
                path: path.to_path_buf(),
            })
        }
    };
    log::debug!("Extracted {} to {}", path.display(), ufo.display());
    Ok((tmp, ufo))
}

/// Open any supported font. Binary fonts also return their raw bytes so
/// that other faces of the same file can share them.
pub async fn open_font(
    ctx: &Context,
    path: &Path,
    face_index: u32,
    bytes: Option<Arc<[u8]>>,
    cancel: &CancelToken,
) -> Result<(Font, Option<Arc<[u8]>>), FontGogglesError> {
    let (_, opener) = resolve(path)?;
    log::info!("Opening {} (face {})", path.display(), face_index);
    if opener != Opener::Otf {
        check_face_index(path, face_index, 1)?;
    }
    let font = match opener {
        Opener::Otf => {
            let owned = path.to_path_buf();
            let (font, data) =
                tokio::task::spawn_blocking(move || open_otf(&owned, face_index, bytes))
                    .await
                    .map_err(std::io::Error::other)??;
            return Ok((font, Some(data)));
        }
        Opener::Ttx => font::load_ttx(ctx, path, cancel).await?,
        Opener::Ufo => font::load_ufo(ctx, path, path, cancel).await?,
        Opener::Ufoz => {
            let archive = path.to_path_buf();
            let (tmp, ufo) = tokio::task::spawn_blocking(move || extract_ufoz(&archive))
                .await
                .map_err(std::io::Error::other)??;
            font::load_ufo(ctx, path, &ufo, cancel)
                .await?
                .with_archive(Arc::new(tmp))
        }
        Opener::Designspace => font::load_designspace(ctx, path, cancel).await?,
    };
    Ok((font, None))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("a.ttf", Some("ttf"))]
    #[case("A.OTF", Some("otf"))]
    #[case("a.woff2", Some("woff2"))]
    #[case("a.TTC", Some("ttc"))]
    #[case("Font.ufo", Some("ufo"))]
    #[case("Font.ufoz", Some("ufoz"))]
    #[case("Font.designspace", Some("designspace"))]
    #[case("font.ttx", Some("ttx"))]
    #[case("notes.txt", None)]
    #[case("no_suffix", None)]
    fn sniffs_by_suffix(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(sniff_font_type(Path::new(path)), expected);
    }

    #[test]
    fn sniffs_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mystery");
        std::fs::write(&path, b"wOF2 and the rest").unwrap();
        assert_eq!(sniff_font_type(&path), Some("woff2"));
        std::fs::write(&path, b"plain text").unwrap();
        assert_eq!(sniff_font_type(&path), None);
    }

    #[test]
    fn counts_faces() {
        let dir = tempfile::tempdir().unwrap();
        let ttc = dir.path().join("fonts.ttc");
        let mut header = b"ttcf\x00\x02\x00\x00".to_vec();
        header.extend_from_slice(&4u32.to_be_bytes());
        std::fs::write(&ttc, &header).unwrap();
        assert_eq!(face_count(&ttc).unwrap(), 4);
        assert_eq!(face_count(Path::new("whatever.ufo")).unwrap(), 1);
        assert!(matches!(
            face_count(Path::new("notes.txt")),
            Err(FontGogglesError::UnsupportedSource { .. })
        ));
    }

    #[test]
    fn rejects_bad_face_index() {
        let dir = tempfile::tempdir().unwrap();
        let ttc = dir.path().join("fonts.ttc");
        let mut header = b"ttcf\x00\x02\x00\x00".to_vec();
        header.extend_from_slice(&2u32.to_be_bytes());
        std::fs::write(&ttc, &header).unwrap();
        assert!(matches!(
            open_otf(&ttc, 2, None),
            Err(FontGogglesError::BadFaceIndex { index: 2, count: 2, .. })
        ));
    }
}
