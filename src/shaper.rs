//! Shaping with rustybuzz, plus the layout-table queries the UI needs.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rustybuzz::ttf_parser::{self, GlyphId};
use smol_str::SmolStr;
use write_fonts::read::{
    tables::layout::{FeatureList, FeatureParams, ScriptList},
    FontRef, ReadError, TableProvider,
};
use write_fonts::types::{GlyphId16, NameId};
use write_fonts::{tables::cmap::Cmap, FontBuilder};

use crate::compilers::CompileError;
use crate::{FontGogglesError, GlyphInfo, Tag, VariationLocation};

/// Glyph IDs passed as code points are offset by this value.
pub const BIAS: u32 = 0x8000_0000;

pub const GSUB: Tag = Tag::new(b"GSUB");
pub const GPOS: Tag = Tag::new(b"GPOS");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ltr,
    Rtl,
    Ttb,
    Btt,
}

impl Direction {
    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Ttb | Direction::Btt)
    }
}

impl From<Direction> for rustybuzz::Direction {
    fn from(value: Direction) -> Self {
        match value {
            Direction::Ltr => rustybuzz::Direction::LeftToRight,
            Direction::Rtl => rustybuzz::Direction::RightToLeft,
            Direction::Ttb => rustybuzz::Direction::TopToBottom,
            Direction::Btt => rustybuzz::Direction::BottomToTop,
        }
    }
}

impl FromStr for Direction {
    type Err = FontGogglesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ltr" => Ok(Direction::Ltr),
            "rtl" => Ok(Direction::Rtl),
            "ttb" => Ok(Direction::Ttb),
            "btt" => Ok(Direction::Btt),
            _ => Err(FontGogglesError::InvalidDirection(s.to_string())),
        }
    }
}

/// The value a feature is set to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureValue {
    Bool(bool),
    /// An alternate index, as used by `aalt`, `salt` and friends.
    Alternate(u32),
    /// Per-range values; ranges are character indices into the shaped text.
    Ranged(Vec<(Range<usize>, u32)>),
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        FeatureValue::Bool(value)
    }
}

impl From<u32> for FeatureValue {
    fn from(value: u32) -> Self {
        FeatureValue::Alternate(value)
    }
}

impl FeatureValue {
    /// Restrict ranged values to `window`, re-expressed relative to its start.
    /// Plain values pass through unchanged.
    pub fn clip(&self, window: Range<usize>) -> Option<FeatureValue> {
        match self {
            FeatureValue::Ranged(ranges) => {
                let clipped: Vec<(Range<usize>, u32)> = ranges
                    .iter()
                    .filter_map(|(range, value)| {
                        let start = range.start.max(window.start);
                        let end = range.end.min(window.end);
                        (start < end)
                            .then(|| (start - window.start..end - window.start, *value))
                    })
                    .collect();
                (!clipped.is_empty()).then_some(FeatureValue::Ranged(clipped))
            }
            other => Some(other.clone()),
        }
    }
}

pub type Features = IndexMap<Tag, FeatureValue>;

fn to_rustybuzz_features(features: &Features) -> Vec<rustybuzz::Feature> {
    let mut result = vec![];
    for (tag, value) in features {
        let tag = ttf_tag(*tag);
        match value {
            FeatureValue::Bool(on) => result.push(rustybuzz::Feature::new(tag, *on as u32, ..)),
            FeatureValue::Alternate(n) => result.push(rustybuzz::Feature::new(tag, *n, ..)),
            FeatureValue::Ranged(ranges) => {
                for (range, value) in ranges {
                    result.push(rustybuzz::Feature::new(tag, *value, range.clone()));
                }
            }
        }
    }
    result
}

const OVERLAY_PLANE_15: u32 = 0xF_0000;
const OVERLAY_PLANE_16: u32 = 0x10_0000;
const OVERLAY_PLANE_SIZE: u32 = 0xFFFE;

fn overlay_char(gid: u32) -> Option<char> {
    if gid < OVERLAY_PLANE_SIZE {
        char::from_u32(OVERLAY_PLANE_15 + gid)
    } else if gid < 2 * OVERLAY_PLANE_SIZE {
        char::from_u32(OVERLAY_PLANE_16 + gid - OVERLAY_PLANE_SIZE)
    } else {
        None
    }
}

fn is_overlay_codepoint(cp: u32) -> bool {
    (OVERLAY_PLANE_15..OVERLAY_PLANE_15 + OVERLAY_PLANE_SIZE).contains(&cp)
        || (OVERLAY_PLANE_16..OVERLAY_PLANE_16 + OVERLAY_PLANE_SIZE).contains(&cp)
}

pub(crate) fn ttf_tag(tag: Tag) -> ttf_parser::Tag {
    ttf_parser::Tag::from_bytes(&tag.to_be_bytes())
}

/// What to shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeInput {
    Text(String),
    /// Code points, where values at or above [`BIAS`] are glyph IDs.
    Codepoints(Vec<u32>),
}

impl ShapeInput {
    pub fn glyph_ids(gids: impl IntoIterator<Item = u32>) -> Self {
        ShapeInput::Codepoints(gids.into_iter().map(|g| g + BIAS).collect())
    }
}

impl From<&str> for ShapeInput {
    fn from(value: &str) -> Self {
        ShapeInput::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeOptions {
    pub features: Features,
    pub variations: VariationLocation,
    pub direction: Option<Direction>,
    pub language: Option<String>,
    pub script: Option<Tag>,
}

/// Per-glyph metrics that override what is stored in the compiled font.
///
/// Fonts compiled from sources supply this so that advances and vertical
/// origins follow the source glyphs at every variation location.
pub trait GlyphMetrics: Send + Sync {
    fn advance_width(&self, glyph: &str, location: &VariationLocation) -> Option<f64>;
    fn vertical_advance(&self, glyph: &str, location: &VariationLocation) -> Option<f64>;
    fn vertical_origin(&self, glyph: &str, location: &VariationLocation) -> Option<f64>;
}

pub struct Shaper {
    data: Arc<[u8]>,
    face_index: u32,
    glyph_order: Vec<SmolStr>,
    metrics: Option<Arc<dyn GlyphMetrics>>,
    units_per_em: u16,
    overlay: Mutex<Option<Arc<[u8]>>>,
}

impl std::fmt::Debug for Shaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shaper")
            .field("face_index", &self.face_index)
            .field("glyphs", &self.glyph_order.len())
            .field("custom_metrics", &self.metrics.is_some())
            .finish()
    }
}

impl Shaper {
    /// Create a shaper over sfnt data. When `glyph_order` is `None` the glyph
    /// names come from the `post` table.
    pub fn new(
        data: Arc<[u8]>,
        face_index: u32,
        glyph_order: Option<Vec<SmolStr>>,
        metrics: Option<Arc<dyn GlyphMetrics>>,
    ) -> Result<Self, FontGogglesError> {
        let face = rustybuzz::Face::from_slice(&data, face_index)
            .ok_or(FontGogglesError::BadFace(face_index))?;
        let units_per_em = face.units_per_em() as u16;
        let num_glyphs = face.number_of_glyphs();
        let glyph_order = match glyph_order {
            Some(order) => order,
            None => {
                let font = FontRef::from_index(&data, face_index)?;
                let post = font.post().ok();
                (0..num_glyphs)
                    .map(|gid| {
                        post.as_ref()
                            .and_then(|post| post.glyph_name(GlyphId16::new(gid)))
                            .map(SmolStr::new)
                            .unwrap_or_else(|| SmolStr::new(format!("gid{gid}")))
                    })
                    .collect()
            }
        };
        Ok(Shaper {
            data,
            face_index,
            glyph_order,
            metrics,
            units_per_em,
            overlay: Mutex::new(None),
        })
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    pub fn face_index(&self) -> u32 {
        self.face_index
    }

    pub fn units_per_em(&self) -> u16 {
        self.units_per_em
    }

    pub fn glyph_order(&self) -> &[SmolStr] {
        &self.glyph_order
    }

    pub fn glyph_name(&self, gid: u32) -> SmolStr {
        self.glyph_order
            .get(gid as usize)
            .cloned()
            .unwrap_or_else(|| SmolStr::new(format!("gid{gid}")))
    }

    pub fn glyph_id(&self, name: &str) -> Option<u32> {
        self.glyph_order
            .iter()
            .position(|n| n == name)
            .map(|i| i as u32)
    }

    /// A face with the given variation location applied. Fonts with custom
    /// glyph metrics are shaped at their default location, since their
    /// advances come from the sources.
    pub(crate) fn face(
        &self,
        location: &VariationLocation,
    ) -> Result<rustybuzz::Face<'_>, FontGogglesError> {
        self.face_from(&self.data, self.face_index, location)
    }

    fn face_from<'a>(
        &self,
        data: &'a [u8],
        face_index: u32,
        location: &VariationLocation,
    ) -> Result<rustybuzz::Face<'a>, FontGogglesError> {
        let mut face = rustybuzz::Face::from_slice(data, face_index)
            .ok_or(FontGogglesError::BadFace(face_index))?;
        if !location.is_empty() && self.metrics.is_none() {
            let variations: Vec<rustybuzz::Variation> = location
                .iter()
                .map(|(tag, value)| rustybuzz::Variation {
                    tag: ttf_tag(*tag),
                    value: *value as f32,
                })
                .collect();
            face.set_variations(&variations);
        }
        Ok(face)
    }

    /// A copy of the font whose cmap also maps every glyph to a code point
    /// in the supplementary private use planes, so glyph IDs can go through
    /// the shaping engine.
    fn glyph_overlay(&self) -> Result<Arc<[u8]>, FontGogglesError> {
        let mut cached = self.overlay.lock();
        if let Some(data) = cached.as_ref() {
            return Ok(data.clone());
        }
        let font = self.font_ref()?;
        let mut mappings: Vec<(char, write_fonts::types::GlyphId)> = vec![];
        if let Some((_, _, subtable)) = font.cmap().ok().and_then(|cmap| cmap.best_subtable()) {
            mappings.extend(subtable.iter().filter_map(|(cp, gid)| {
                let c = char::from_u32(cp)?;
                (!is_overlay_codepoint(cp)).then_some((c, gid))
            }));
        }
        let num_glyphs = font.maxp()?.num_glyphs() as u32;
        mappings.extend(
            (0..num_glyphs)
                .filter_map(|gid| Some((overlay_char(gid)?, write_fonts::types::GlyphId::new(gid)))),
        );
        let cmap = Cmap::from_mappings(mappings).map_err(|e| CompileError::Cmap(e.to_string()))?;
        let mut builder = FontBuilder::new();
        builder.add_table(&cmap).map_err(CompileError::from)?;
        builder.copy_missing_tables(font);
        let data: Arc<[u8]> = Arc::from(builder.build());
        log::debug!("Built glyph overlay of {} bytes", data.len());
        *cached = Some(data.clone());
        Ok(data)
    }

    /// Translate a mixed code point and glyph ID sequence into characters
    /// for the overlay font, keeping each entry's input index as its cluster.
    fn overlay_chars(&self, codepoints: &[u32]) -> Result<Vec<(char, u32)>, FontGogglesError> {
        let face = ttf_parser::Face::parse(&self.data, self.face_index)
            .map_err(|_| FontGogglesError::BadFace(self.face_index))?;
        let num_glyphs = face.number_of_glyphs() as u32;
        Ok(codepoints
            .iter()
            .zip(0u32..)
            .filter_map(|(&cp, cluster)| {
                let c = if cp >= BIAS {
                    let gid = cp - BIAS;
                    overlay_char(if gid < num_glyphs { gid } else { 0 })?
                } else {
                    let c = char::from_u32(cp)?;
                    if is_overlay_codepoint(cp) {
                        overlay_char(face.glyph_index(c).map_or(0, |g| g.0 as u32))?
                    } else {
                        c
                    }
                };
                Some((c, cluster))
            })
            .collect())
    }

    pub(crate) fn font_ref(&self) -> Result<FontRef<'_>, FontGogglesError> {
        Ok(FontRef::from_index(&self.data, self.face_index)?)
    }

    pub fn shape(
        &self,
        input: &ShapeInput,
        options: &ShapeOptions,
    ) -> Result<Vec<GlyphInfo>, FontGogglesError> {
        let (chars, overlay): (Vec<(char, u32)>, Option<Arc<[u8]>>) = match input {
            ShapeInput::Text(text) => (text.chars().zip(0u32..).collect(), None),
            ShapeInput::Codepoints(cps) if cps.iter().any(|&cp| cp >= BIAS) => {
                (self.overlay_chars(cps)?, Some(self.glyph_overlay()?))
            }
            ShapeInput::Codepoints(cps) => (
                cps.iter()
                    .zip(0u32..)
                    .filter_map(|(&cp, i)| Some((char::from_u32(cp)?, i)))
                    .collect(),
                None,
            ),
        };
        let face = match &overlay {
            Some(data) => self.face_from(data, 0, &options.variations)?,
            None => self.face(&options.variations)?,
        };

        let mut buffer = rustybuzz::UnicodeBuffer::new();
        for (c, cluster) in chars {
            buffer.add(c, cluster);
        }
        if let Some(direction) = options.direction {
            buffer.set_direction(direction.into());
        }
        if let Some(script) = options
            .script
            .and_then(|tag| rustybuzz::Script::from_iso15924_tag(ttf_tag(tag)))
        {
            buffer.set_script(script);
        }
        if let Some(language) = options
            .language
            .as_deref()
            .and_then(|lang| rustybuzz::Language::from_str(lang).ok())
        {
            buffer.set_language(language);
        }
        buffer.guess_segment_properties();
        let vertical = matches!(
            buffer.direction(),
            rustybuzz::Direction::TopToBottom | rustybuzz::Direction::BottomToTop
        );

        let output = rustybuzz::shape(&face, &to_rustybuzz_features(&options.features), buffer);
        let mut glyphs: Vec<GlyphInfo> = output
            .glyph_infos()
            .iter()
            .zip(output.glyph_positions())
            .map(|(info, pos)| {
                let mut glyph = GlyphInfo::new(info.glyph_id, self.glyph_name(info.glyph_id), info.cluster);
                glyph.dx = pos.x_offset as f64;
                glyph.dy = pos.y_offset as f64;
                glyph.ax = pos.x_advance as f64;
                glyph.ay = pos.y_advance as f64;
                glyph
            })
            .collect();
        if let Some(metrics) = &self.metrics {
            for glyph in glyphs.iter_mut() {
                self.apply_metrics(&face, metrics.as_ref(), glyph, vertical, &options.variations);
            }
        }
        Ok(glyphs)
    }

    /// Engine default metrics for a glyph: horizontal advance, vertical
    /// advance and vertical origin.
    fn engine_metrics(&self, face: &rustybuzz::Face<'_>, gid: u32) -> (f64, f64, f64) {
        let glyph = GlyphId(gid as u16);
        let upem = self.units_per_em as f64;
        let h = face.glyph_hor_advance(glyph).map(f64::from).unwrap_or(0.0);
        let v = face.glyph_ver_advance(glyph).map(f64::from).unwrap_or(upem);
        let vorg = face
            .glyph_y_origin(glyph)
            .map(f64::from)
            .unwrap_or_else(|| face.ascender() as f64);
        (h, v, vorg)
    }

    fn apply_metrics(
        &self,
        face: &rustybuzz::Face<'_>,
        metrics: &dyn GlyphMetrics,
        glyph: &mut GlyphInfo,
        vertical: bool,
        location: &VariationLocation,
    ) {
        let (engine_h, engine_v, engine_vorg) = self.engine_metrics(face, glyph.gid);
        let custom_h = metrics.advance_width(&glyph.name, location);
        if vertical {
            if let Some(h) = custom_h {
                glyph.dx += (engine_h - h) / 2.0;
            }
            if let Some(v) = metrics.vertical_advance(&glyph.name, location) {
                glyph.ay += engine_v - v;
            }
            if let Some(vorg) = metrics.vertical_origin(&glyph.name, location) {
                glyph.dy += engine_vorg - vorg;
            }
        } else if let Some(h) = custom_h {
            glyph.ax += h - engine_h;
        }
    }

    fn layout_lists(
        &self,
        table: Tag,
    ) -> Result<Option<(ScriptList<'_>, FeatureList<'_>)>, FontGogglesError> {
        let font = self.font_ref()?;
        let lists = if table == GSUB {
            match font.gsub() {
                Ok(gsub) => Some((gsub.script_list()?, gsub.feature_list()?)),
                Err(ReadError::TableIsMissing(_)) => None,
                Err(e) => return Err(e.into()),
            }
        } else if table == GPOS {
            match font.gpos() {
                Ok(gpos) => Some((gpos.script_list()?, gpos.feature_list()?)),
                Err(ReadError::TableIsMissing(_)) => None,
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };
        Ok(lists)
    }

    /// The feature tags present in `GSUB` or `GPOS`.
    pub fn features(&self, table: Tag) -> Result<BTreeSet<Tag>, FontGogglesError> {
        Ok(match self.layout_lists(table)? {
            Some((_, features)) => features
                .feature_records()
                .iter()
                .map(|record| record.feature_tag())
                .collect(),
            None => BTreeSet::new(),
        })
    }

    /// Script tags mapped to their language system tags.
    pub fn scripts_and_languages(
        &self,
        table: Tag,
    ) -> Result<BTreeMap<Tag, BTreeSet<Tag>>, FontGogglesError> {
        let mut result = BTreeMap::new();
        let Some((scripts, _)) = self.layout_lists(table)? else {
            return Ok(result);
        };
        for record in scripts.script_records() {
            let script = record.script(scripts.offset_data())?;
            let languages: BTreeSet<Tag> = script
                .lang_sys_records()
                .iter()
                .map(|lang| lang.lang_sys_tag())
                .collect();
            result
                .entry(record.script_tag())
                .or_insert_with(BTreeSet::new)
                .extend(languages);
        }
        Ok(result)
    }

    /// UI labels of the stylistic sets, from their feature parameters.
    pub fn stylistic_set_names(&self) -> Result<BTreeMap<Tag, String>, FontGogglesError> {
        let mut result = BTreeMap::new();
        let Some((_, features)) = self.layout_lists(GSUB)? else {
            return Ok(result);
        };
        let font = self.font_ref()?;
        for record in features.feature_records() {
            let tag = record.feature_tag();
            let bytes = tag.to_be_bytes();
            if &bytes[..2] != b"ss" || result.contains_key(&tag) {
                continue;
            }
            let feature = record.feature(features.offset_data())?;
            if let Some(Ok(FeatureParams::StylisticSet(params))) = feature.feature_params() {
                if let Some(label) = name_string(&font, params.ui_name_id()) {
                    result.insert(tag, label);
                }
            }
        }
        Ok(result)
    }
}

/// A string from the `name` table, preferring the Windows English record.
pub(crate) fn name_string(font: &FontRef<'_>, name_id: NameId) -> Option<String> {
    let name = font.name().ok()?;
    let data = name.string_data();
    let mut fallback = None;
    for record in name.name_record() {
        if record.name_id() != name_id {
            continue;
        }
        let Ok(string) = record.string(data) else {
            continue;
        };
        let string = string.to_string();
        if record.platform_id() == 3 && record.language_id() == 0x409 {
            return Some(string);
        }
        fallback.get_or_insert(string);
    }
    fallback
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::compilers::{features::compile_features, tables::MinimalFont};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn kerned_shaper() -> Shaper {
        let glyph_order: Vec<String> = [".notdef", "A", "V"].iter().map(|s| s.to_string()).collect();
        let dir = tempfile::tempdir().unwrap();
        let layout =
            compile_features("feature kern { pos A V -80; } kern;", &glyph_order, dir.path()).unwrap();
        let data = MinimalFont {
            glyph_order,
            advance_widths: vec![500.0, 600.0, 600.0],
            advance_heights: vec![1000.0; 3],
            vertical_origins: vec![800.0; 3],
            cmap: BTreeMap::from([(0x41, "A".to_string()), (0x56, "V".to_string())]),
            units_per_em: 1000,
            ascender: 800.0,
            descender: -200.0,
            extra_tables: layout,
            ..Default::default()
        }
        .build()
        .unwrap();
        Shaper::new(Arc::from(data), 0, None, None).unwrap()
    }

    #[rstest]
    #[case::text(ShapeInput::from("AV"))]
    #[case::glyph_ids(ShapeInput::glyph_ids([1, 2]))]
    #[case::mixed(ShapeInput::Codepoints(vec![BIAS + 1, 'V' as u32]))]
    fn glyph_ids_go_through_layout(#[case] input: ShapeInput) {
        let shaper = kerned_shaper();
        let glyphs = shaper.shape(&input, &ShapeOptions::default()).unwrap();
        let names: Vec<&str> = glyphs.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["A", "V"]);
        assert_eq!(glyphs[0].ax, 520.0);
        assert_eq!(glyphs[1].ax, 600.0);
        assert_eq!(glyphs.iter().map(|g| g.cluster).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn unknown_glyph_ids_become_notdef() {
        let shaper = kerned_shaper();
        let input = ShapeInput::Codepoints(vec![BIAS + 99, 0xF_0001, 'A' as u32]);
        let glyphs = shaper.shape(&input, &ShapeOptions::default()).unwrap();
        let gids: Vec<u32> = glyphs.iter().map(|g| g.gid).collect();
        assert_eq!(gids, vec![0, 0, 1]);
    }

    #[test]
    fn glyph_id_encoding() {
        assert_eq!(
            ShapeInput::glyph_ids([0, 5]),
            ShapeInput::Codepoints(vec![BIAS, BIAS + 5])
        );
        assert_eq!(ShapeInput::from("fi"), ShapeInput::Text("fi".to_string()));
    }

    #[test]
    fn ranged_features_clip_to_segments() {
        let value = FeatureValue::Ranged(vec![(0..3, 1), (5..8, 2)]);
        assert_eq!(
            value.clip(2..6),
            Some(FeatureValue::Ranged(vec![(0..1, 1), (3..4, 2)]))
        );
        assert_eq!(value.clip(3..5), None);
        assert_eq!(FeatureValue::from(false).clip(3..5), Some(FeatureValue::Bool(false)));
    }

    #[test]
    fn directions() {
        assert!(Direction::Ttb.is_vertical());
        assert!(!Direction::Rtl.is_vertical());
        assert_eq!("RTL".parse::<Direction>().ok(), Some(Direction::Rtl));
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn rejects_garbage() {
        let data: Arc<[u8]> = Arc::from(&b"not a font"[..]);
        assert!(matches!(
            Shaper::new(data, 0, None, None),
            Err(FontGogglesError::BadFace(0))
        ));
    }
}
