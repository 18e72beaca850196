//! Fonts compiled from UFO sources. Shaping uses the compiled binary; glyph
//! outlines and metrics come from the UFO itself.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use smol_str::SmolStr;

use super::drawing::{notdef_box, ufo_outline, GlyphDrawing};
use super::{path_arg, run_compile_job, Font, FontKind, GlyphSource};
use crate::compilers::{
    features::external_includes,
    glif::{parse_glif, read_plist_pairs, VERTICAL_ORIGIN_KEY},
    ufo::{units_per_em, vertical_defaults, NOTDEF},
};
use crate::shaper::GlyphMetrics;
use crate::worker::COMPILE_UFO;
use crate::{CancelToken, Context, FontGogglesError, VariationLocation};

/// What the previewer keeps of one source glyph.
struct GlyphRecord {
    width: f64,
    height: f64,
    vertical_origin: f64,
    codepoints: BTreeSet<u32>,
    drawing: GlyphDrawing,
}

/// The glyphs of one UFO layer, with outlines already decomposed.
pub(crate) struct UfoGlyphs {
    path: PathBuf,
    glyphs: HashMap<SmolStr, GlyphRecord>,
    features: String,
}

impl UfoGlyphs {
    pub fn load(path: &Path, layer: Option<&str>) -> Result<Self, FontGogglesError> {
        let font = norad::Font::load(path)?;
        let source_layer = match layer {
            Some(name) => font
                .layers
                .get(name)
                .ok_or_else(|| FontGogglesError::UnsupportedSource {
                    path: path.join(name),
                })?,
            None => font.default_layer(),
        };
        let info = &font.font_info;
        let upem = units_per_em(info);
        let (default_height, default_origin) = vertical_defaults(info, upem);
        let mut glyphs: HashMap<SmolStr, GlyphRecord> = source_layer
            .iter()
            .map(|glyph| {
                let record = GlyphRecord {
                    width: glyph.width,
                    height: Some(glyph.height)
                        .filter(|h| *h != 0.0)
                        .unwrap_or(default_height),
                    vertical_origin: glyph
                        .lib
                        .get(VERTICAL_ORIGIN_KEY)
                        .and_then(|v| v.as_real().or_else(|| v.as_signed_integer().map(|i| i as f64)))
                        .unwrap_or(default_origin),
                    codepoints: glyph.codepoints.iter().map(|c| c as u32).collect(),
                    drawing: GlyphDrawing::new(ufo_outline(source_layer, glyph)),
                };
                (SmolStr::new(glyph.name().as_str()), record)
            })
            .collect();
        if !glyphs.contains_key(NOTDEF) {
            let width = (upem / 2.0).round();
            let ascender = info.ascender.unwrap_or(upem * 0.8);
            let descender = info.descender.unwrap_or(-upem * 0.2);
            let outline = notdef_box(width, ascender, descender, (upem * 0.05).round());
            glyphs.insert(
                SmolStr::new(NOTDEF),
                GlyphRecord {
                    width,
                    height: default_height,
                    vertical_origin: default_origin,
                    codepoints: BTreeSet::new(),
                    drawing: GlyphDrawing::new(outline),
                },
            );
        }
        log::debug!("Loaded {} glyphs from {}", glyphs.len(), path.display());
        Ok(UfoGlyphs {
            path: path.to_path_buf(),
            glyphs,
            features: font.features.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn drawing(&self, name: &str) -> Option<GlyphDrawing> {
        self.glyphs.get(name).map(|g| g.drawing.clone())
    }

    pub fn advance_width(&self, name: &str) -> Option<f64> {
        self.glyphs.get(name).map(|g| g.width)
    }

    pub fn vertical_advance(&self, name: &str) -> Option<f64> {
        self.glyphs.get(name).map(|g| g.height)
    }

    pub fn vertical_origin(&self, name: &str) -> Option<f64> {
        self.glyphs.get(name).map(|g| g.vertical_origin)
    }

    /// Include files named by the UFO's feature file.
    pub fn feature_includes(&self) -> Vec<PathBuf> {
        external_includes(&self.features, &self.path)
    }

    /// Kerning, groups and feature edits only change layout, and glyph
    /// edits that keep the glyph's name and code points only change
    /// outlines and metrics: both are picked up by recompiling.
    pub fn can_reload_in_place(&self, external_files: &[PathBuf], changed: &Path) -> bool {
        if external_files.iter().any(|f| f == changed) {
            return true;
        }
        let Ok(relative) = changed.strip_prefix(&self.path) else {
            return false;
        };
        match relative.to_str() {
            Some("features.fea" | "kerning.plist" | "groups.plist") => return true,
            _ => {}
        }
        if changed.extension().and_then(|e| e.to_str()) != Some("glif") {
            return false;
        }
        self.glif_keeps_identity(changed).unwrap_or(false)
    }

    fn glif_keeps_identity(&self, changed: &Path) -> Option<bool> {
        let dir = changed.parent()?;
        let file_name = changed.file_name()?.to_str()?;
        let name = read_plist_pairs(&dir.join("contents.plist"))
            .ok()?
            .into_iter()
            .find(|(_, file)| file == file_name)
            .map(|(name, _)| name)?;
        let current = &self.glyphs.get(name.as_str())?.codepoints;
        let data = std::fs::read_to_string(changed).ok()?;
        let info = parse_glif(&data, changed).ok()?;
        let edited: BTreeSet<u32> = info.unicodes.into_iter().collect();
        Some(*current == edited)
    }
}

impl GlyphMetrics for UfoGlyphs {
    fn advance_width(&self, glyph: &str, _location: &VariationLocation) -> Option<f64> {
        UfoGlyphs::advance_width(self, glyph)
    }

    fn vertical_advance(&self, glyph: &str, _location: &VariationLocation) -> Option<f64> {
        UfoGlyphs::vertical_advance(self, glyph)
    }

    fn vertical_origin(&self, glyph: &str, _location: &VariationLocation) -> Option<f64> {
        UfoGlyphs::vertical_origin(self, glyph)
    }
}

/// Compile `ufo_path` on the pool and open the result.
pub(crate) async fn load(
    ctx: &Context,
    path: &Path,
    ufo_path: &Path,
    cancel: &CancelToken,
) -> Result<Font, FontGogglesError> {
    let tmp = tempfile::tempdir()?;
    let tt_path = tmp.path().join("font.ttf");
    run_compile_job(
        ctx.pool(),
        COMPILE_UFO,
        vec![path_arg(ufo_path), path_arg(&tt_path)],
        ufo_path,
        cancel,
    )
    .await?;
    let data: Arc<[u8]> = tokio::fs::read(&tt_path).await?.into();
    let source = ufo_path.to_path_buf();
    let glyphs = tokio::task::spawn_blocking(move || UfoGlyphs::load(&source, None))
        .await
        .map_err(std::io::Error::other)??;
    let glyphs = Arc::new(glyphs);
    let includes = glyphs.feature_includes();
    let font = Font::from_sfnt(
        path,
        0,
        FontKind::Ufo,
        data,
        GlyphSource::Ufo(glyphs.clone()),
        Some(glyphs),
    )?;
    Ok(font.with_external_files(includes))
}
