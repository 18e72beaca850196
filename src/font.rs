//! Loaded fonts: shaping, glyph drawings and variation state for every
//! supported source format.

mod designspace;
mod drawing;
mod otf;
mod ttx;
mod ufo;
mod woff;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;

pub use drawing::{DrawingLayer, GlyphDrawing};
pub(crate) use designspace::load as load_designspace;
pub(crate) use otf::{face_count, open as open_sfnt, read_sfnt};
pub(crate) use ttx::load as load_ttx;
pub(crate) use ufo::load as load_ufo;

use self::designspace::DesignspaceGlyphs;
use self::drawing::sfnt_outline;
use self::ufo::UfoGlyphs;
use crate::compilers::UNMERGED_TAG;
use crate::{
    glyphsrun::Color,
    shaper::{Direction, GlyphMetrics, ShapeInput, ShapeOptions},
    AxisInfo, CancelToken, CompilerPool, Context, Features, FontGogglesError, GlyphInfo,
    GlyphsRun, Shaper, Tag, TextInfo, VariationLocation,
};

/// The source format a font was opened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontKind {
    Otf,
    Ttx,
    Ufo,
    Designspace,
}

/// Where glyph outlines come from.
pub(crate) enum GlyphSource {
    /// The `glyf`/`CFF` outlines of the binary itself.
    Sfnt,
    Ufo(Arc<UfoGlyphs>),
    Designspace {
        glyphs: Arc<DesignspaceGlyphs>,
        /// The current location, normalized against the designspace axes.
        normalized: VariationLocation,
    },
}

type DrawingCache = Mutex<HashMap<SmolStr, Arc<GlyphDrawing>>>;

/// A font opened for previewing.
pub struct Font {
    path: PathBuf,
    face_index: u32,
    kind: FontKind,
    shaper: Shaper,
    source: GlyphSource,
    axes: IndexMap<Tag, AxisInfo>,
    instances: Vec<(String, VariationLocation)>,
    palettes: Vec<Vec<Color>>,
    location: VariationLocation,
    external_files: Vec<PathBuf>,
    drawings: DrawingCache,
    color_drawings: DrawingCache,
    // Keeps an extracted archive alive as long as the font
    archive: Option<Arc<tempfile::TempDir>>,
}

impl std::fmt::Debug for Font {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Font")
            .field("path", &self.path)
            .field("face_index", &self.face_index)
            .field("kind", &self.kind)
            .field("location", &self.location)
            .finish()
    }
}

impl Font {
    /// Build a font over compiled sfnt data, reading axes, named instances
    /// and palettes from the binary.
    pub(crate) fn from_sfnt(
        path: &Path,
        face_index: u32,
        kind: FontKind,
        data: Arc<[u8]>,
        source: GlyphSource,
        metrics: Option<Arc<dyn GlyphMetrics>>,
    ) -> Result<Font, FontGogglesError> {
        let shaper = Shaper::new(data, face_index, None, metrics)?;
        let (axes, instances, palettes) = {
            let font = shaper.font_ref()?;
            let (axes, instances) = otf::axes_and_instances(&font)?;
            (axes, instances, otf::palettes(&font)?)
        };
        if shaper.units_per_em() == 0 {
            return Err(FontGogglesError::BadFontData {
                path: path.to_path_buf(),
            });
        }
        log::debug!(
            "Opened {} ({:?}, {} glyphs, {} axes)",
            path.display(),
            kind,
            shaper.glyph_order().len(),
            axes.len()
        );
        Ok(Font {
            path: path.to_path_buf(),
            face_index,
            kind,
            shaper,
            source,
            axes,
            instances,
            palettes,
            location: VariationLocation::new(),
            external_files: vec![],
            drawings: Mutex::new(HashMap::new()),
            color_drawings: Mutex::new(HashMap::new()),
            archive: None,
        })
    }

    pub(crate) fn with_external_files(mut self, files: Vec<PathBuf>) -> Self {
        self.external_files = files;
        self
    }

    pub(crate) fn with_archive(mut self, archive: Arc<tempfile::TempDir>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn face_index(&self) -> u32 {
        self.face_index
    }

    pub fn kind(&self) -> FontKind {
        self.kind
    }

    pub fn shaper(&self) -> &Shaper {
        &self.shaper
    }

    /// The sfnt data the font shapes with.
    pub fn data(&self) -> &Arc<[u8]> {
        self.shaper.data()
    }

    pub fn units_per_em(&self) -> u16 {
        self.shaper.units_per_em()
    }

    pub fn axes(&self) -> &IndexMap<Tag, AxisInfo> {
        &self.axes
    }

    /// Named instances as `(label, user location)`.
    pub fn instances(&self) -> &[(String, VariationLocation)] {
        &self.instances
    }

    pub fn location(&self) -> &VariationLocation {
        &self.location
    }

    pub fn color_palettes(&self) -> &[Vec<Color>] {
        &self.palettes
    }

    /// Files outside the font source that it depends on, such as feature
    /// files pulled in with `include()`.
    pub fn external_files(&self) -> &[PathBuf] {
        &self.external_files
    }

    pub fn glyph_names(&self) -> &[SmolStr] {
        self.shaper.glyph_order()
    }

    /// Unicode code points mapped to glyph names.
    pub fn cmap(&self) -> Result<BTreeMap<u32, SmolStr>, FontGogglesError> {
        let face = self.shaper.face(&VariationLocation::new())?;
        let mut cmap = BTreeMap::new();
        if let Some(table) = face.tables().cmap {
            for subtable in table.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    if let Some(gid) = subtable.glyph_index(cp) {
                        cmap.entry(cp)
                            .or_insert_with(|| self.shaper.glyph_name(gid.0 as u32));
                    }
                });
            }
        }
        Ok(cmap)
    }

    /// Feature tags of `GSUB` or `GPOS`.
    pub fn features(&self, table: Tag) -> Result<BTreeSet<Tag>, FontGogglesError> {
        self.shaper.features(table)
    }

    /// Scripts of `GSUB` or `GPOS` with their language systems.
    pub fn scripts(&self, table: Tag) -> Result<BTreeMap<Tag, BTreeSet<Tag>>, FontGogglesError> {
        self.shaper.scripts_and_languages(table)
    }

    pub fn stylistic_set_names(&self) -> Result<BTreeMap<Tag, String>, FontGogglesError> {
        self.shaper.stylistic_set_names()
    }

    /// Layout tables of a designspace font that were taken from the default
    /// master or left out instead of being merged, with the reason.
    pub fn unmerged_tables(&self) -> Result<BTreeMap<Tag, String>, FontGogglesError> {
        let font = self.shaper.font_ref()?;
        let Some(data) = font.table_data(UNMERGED_TAG) else {
            return Ok(BTreeMap::new());
        };
        let notes: BTreeMap<String, String> = serde_json::from_slice(data.as_bytes())?;
        Ok(notes
            .into_iter()
            .filter_map(|(tag, reason)| Some((crate::tag_from_str(&tag)?, reason)))
            .collect())
    }

    /// Move to a new location. Values for axes the font does not have are
    /// ignored. Returns whether anything changed; drawings are only
    /// invalidated when it did.
    pub fn set_variation_location(&mut self, location: &VariationLocation) -> bool {
        let location: VariationLocation = location
            .iter()
            .filter(|(tag, _)| self.axes.contains_key(*tag))
            .map(|(tag, value)| (*tag, *value))
            .collect();
        if location == self.location {
            return false;
        }
        self.location = location;
        self.drawings.lock().clear();
        self.color_drawings.lock().clear();
        if let GlyphSource::Designspace { glyphs, normalized } = &mut self.source {
            *normalized = glyphs.normalize(&self.location);
        }
        true
    }

    /// Shape at the current location. Any variations in `options` are
    /// replaced by the font's location.
    pub fn shape(
        &self,
        input: &ShapeInput,
        options: &ShapeOptions,
    ) -> Result<Vec<GlyphInfo>, FontGogglesError> {
        let options = ShapeOptions {
            variations: self.location.clone(),
            ..options.clone()
        };
        self.shaper.shape(input, &options)
    }

    /// Shape every segment of `text_info` in visual order and lay the
    /// result out as one run.
    pub fn glyph_run_from_text_info(
        &self,
        text_info: &TextInfo,
        features: &Features,
        palette_index: Option<usize>,
    ) -> Result<GlyphsRun, FontGogglesError> {
        let direction_override = text_info.direction_override();
        let mut glyphs = vec![];
        for segment in text_info.segments() {
            let window = segment.first_cluster..segment.first_cluster + segment.char_count();
            let direction = direction_override.or(segment.bidi_level.map(|level| {
                if level % 2 == 1 {
                    Direction::Rtl
                } else {
                    Direction::Ltr
                }
            }));
            let options = ShapeOptions {
                features: features
                    .iter()
                    .filter_map(|(tag, value)| Some((*tag, value.clip(window.clone())?)))
                    .collect(),
                variations: self.location.clone(),
                direction,
                language: text_info.language_override().map(str::to_string),
                script: text_info.script_override().or(segment.script),
            };
            let shaped = self
                .shaper
                .shape(&ShapeInput::Text(segment.run_chars.clone()), &options)?;
            glyphs.extend(shaped.into_iter().map(|mut glyph| {
                glyph.cluster += segment.first_cluster as u32;
                glyph
            }));
        }
        let vertical = direction_override.is_some_and(Direction::is_vertical);
        let palette = palette_index.and_then(|i| self.palettes.get(i)).cloned();
        let mut run = GlyphsRun::layout(glyphs, text_info.char_count(), self.units_per_em(), vertical)
            .with_color_palette(palette);
        run.set_bounds(|glyph| {
            self.draw_glyph(&glyph.name, false)
                .ok()
                .and_then(|drawing| drawing.bounds())
        });
        Ok(run)
    }

    /// The outline of `glyph` at the current location. With `color`, COLR
    /// layers are returned for glyphs that have them.
    pub fn draw_glyph(&self, glyph: &str, color: bool) -> Result<Arc<GlyphDrawing>, FontGogglesError> {
        let cache = if color {
            &self.color_drawings
        } else {
            &self.drawings
        };
        if let Some(drawing) = cache.lock().get(glyph) {
            return Ok(drawing.clone());
        }
        let drawing = match self.color_drawing(glyph, color)? {
            Some(drawing) => drawing,
            None => self.plain_drawing(glyph)?,
        };
        let drawing = Arc::new(drawing);
        cache.lock().insert(SmolStr::new(glyph), drawing.clone());
        Ok(drawing)
    }

    fn not_found(glyph: &str) -> FontGogglesError {
        FontGogglesError::GlyphNotFound {
            glyph: glyph.to_string(),
        }
    }

    fn color_drawing(&self, glyph: &str, color: bool) -> Result<Option<GlyphDrawing>, FontGogglesError> {
        if !color || !matches!(self.source, GlyphSource::Sfnt) {
            return Ok(None);
        }
        let Some(gid) = self.shaper.glyph_id(glyph) else {
            return Ok(None);
        };
        let Some(layers) = otf::color_layers(&self.shaper.font_ref()?, gid)? else {
            return Ok(None);
        };
        let face = self.shaper.face(&self.location)?;
        Ok(Some(GlyphDrawing {
            layers: layers
                .into_iter()
                .map(|(layer_gid, palette_index)| DrawingLayer {
                    path: sfnt_outline(&face, layer_gid as u16),
                    palette_index,
                })
                .collect(),
        }))
    }

    fn plain_drawing(&self, glyph: &str) -> Result<GlyphDrawing, FontGogglesError> {
        match &self.source {
            GlyphSource::Sfnt => {
                let gid = self.shaper.glyph_id(glyph).ok_or_else(|| Self::not_found(glyph))?;
                let face = self.shaper.face(&self.location)?;
                Ok(GlyphDrawing::new(sfnt_outline(&face, gid as u16)))
            }
            GlyphSource::Ufo(glyphs) => glyphs.drawing(glyph).ok_or_else(|| Self::not_found(glyph)),
            GlyphSource::Designspace { glyphs, normalized } => glyphs
                .drawing(glyph, normalized)?
                .ok_or_else(|| Self::not_found(glyph)),
        }
    }

    /// Whether a change to `changed_file` can be picked up by
    /// [`reload`](Self::reload) without reopening through the project.
    pub fn can_reload_in_place(&self, changed_file: &Path) -> bool {
        match &self.source {
            GlyphSource::Sfnt => false,
            GlyphSource::Ufo(glyphs) => glyphs.can_reload_in_place(&self.external_files, changed_file),
            GlyphSource::Designspace { glyphs, .. } => {
                glyphs.can_reload_in_place(&self.external_files, changed_file)
            }
        }
    }

    /// Load the font again from its source, keeping the current location.
    pub async fn reload(&mut self, ctx: &Context, cancel: &CancelToken) -> Result<(), FontGogglesError> {
        log::info!("Reloading {}", self.path.display());
        let (mut font, _) =
            crate::opener::open_font(ctx, &self.path, self.face_index, None, cancel).await?;
        let location = std::mem::take(&mut self.location);
        font.set_variation_location(&location);
        *self = font;
        Ok(())
    }
}

/// Run a compile job on the pool. A job that reports an error becomes a
/// [`FontGogglesError::Compile`] carrying the job output; otherwise the
/// output is logged as warnings and returned.
pub(crate) async fn run_compile_job(
    pool: &CompilerPool,
    func: &str,
    args: Vec<String>,
    source: &Path,
    cancel: &CancelToken,
) -> Result<String, FontGogglesError> {
    let mut output = String::new();
    let failed = pool
        .call_function_cancellable(
            func,
            &args,
            |line| {
                output.push_str(line);
                output.push('\n');
            },
            cancel,
        )
        .await?;
    if failed {
        return Err(FontGogglesError::Compile {
            path: source.to_path_buf(),
            output,
        });
    }
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        log::warn!("{}: {}", source.display(), line);
    }
    Ok(output)
}

/// A path as a job argument.
pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
