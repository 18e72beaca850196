use std::collections::BTreeSet;
use std::sync::OnceLock;

use smol_str::SmolStr;

use crate::recttree::{Rect, RectTree};

/// One positioned glyph, as produced by the shaper.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphInfo {
    pub gid: u32,
    pub name: SmolStr,
    /// Index of the source character this glyph originates from.
    pub cluster: u32,
    pub dx: f64,
    pub dy: f64,
    pub ax: f64,
    pub ay: f64,
    /// Absolute position, set by layout.
    pub pos: (f64, f64),
    /// Bounding box in run coordinates, when known.
    pub bounds: Option<Rect>,
}

impl GlyphInfo {
    pub fn new(gid: u32, name: impl Into<SmolStr>, cluster: u32) -> Self {
        GlyphInfo {
            gid,
            name: name.into(),
            cluster,
            dx: 0.0,
            dy: 0.0,
            ax: 0.0,
            ay: 0.0,
            pos: (0.0, 0.0),
            bounds: None,
        }
    }
}

/// An RGBA color with components in `0.0..=1.0`.
pub type Color = [f32; 4];

/// A laid-out sequence of glyphs with glyph↔character mappings derived from
/// the cluster values.
#[derive(Debug, Clone)]
pub struct GlyphsRun {
    glyphs: Vec<GlyphInfo>,
    pub num_chars: usize,
    pub units_per_em: u16,
    pub vertical: bool,
    pub end_pos: (f64, f64),
    pub color_palette: Option<Vec<Color>>,
    glyph_to_chars: OnceLock<Vec<Vec<usize>>>,
    char_to_glyphs: OnceLock<Vec<Vec<usize>>>,
}

impl GlyphsRun {
    /// Lay out shaped glyphs: each glyph is placed at the pen position plus
    /// its offset, and the pen moves by the glyph's advance.
    pub fn layout(
        mut glyphs: Vec<GlyphInfo>,
        num_chars: usize,
        units_per_em: u16,
        vertical: bool,
    ) -> Self {
        let (mut x, mut y) = (0.0, 0.0);
        for glyph in glyphs.iter_mut() {
            glyph.pos = (x + glyph.dx, y + glyph.dy);
            x += glyph.ax;
            y += glyph.ay;
        }
        GlyphsRun {
            glyphs,
            num_chars,
            units_per_em,
            vertical,
            end_pos: (x, y),
            color_palette: None,
            glyph_to_chars: OnceLock::new(),
            char_to_glyphs: OnceLock::new(),
        }
    }

    pub fn with_color_palette(mut self, palette: Option<Vec<Color>>) -> Self {
        self.color_palette = palette;
        self
    }

    pub fn glyphs(&self) -> &[GlyphInfo] {
        &self.glyphs
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GlyphInfo> {
        self.glyphs.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.glyphs.iter().map(|g| g.name.as_str()).collect()
    }

    /// Fill in glyph bounds from a per-glyph bounding box lookup, offsetting
    /// each box by the glyph position.
    pub fn set_bounds(&mut self, mut lookup: impl FnMut(&GlyphInfo) -> Option<Rect>) {
        for glyph in self.glyphs.iter_mut() {
            glyph.bounds = lookup(glyph).map(|r| r + kurbo::Vec2::new(glyph.pos.0, glyph.pos.1));
        }
    }

    /// A tree over the glyph bounds for hit-testing; leaves are glyph indices.
    pub fn rect_tree(&self) -> RectTree<usize> {
        RectTree::from_seq(
            self.glyphs
                .iter()
                .enumerate()
                .filter_map(|(i, g)| g.bounds.map(|b| (b, i))),
        )
    }

    fn glyph_to_chars(&self) -> &Vec<Vec<usize>> {
        self.glyph_to_chars.get_or_init(|| {
            let mut clusters: Vec<usize> = self.glyphs.iter().map(|g| g.cluster as usize).collect();
            clusters.sort_unstable();
            clusters.dedup();
            let mut ranges = std::collections::HashMap::new();
            for (i, &cluster) in clusters.iter().enumerate() {
                let start = if i == 0 { 0 } else { cluster };
                let end = clusters
                    .get(i + 1)
                    .copied()
                    .unwrap_or(self.num_chars)
                    .max(start);
                ranges.insert(cluster, (start..end).collect::<Vec<usize>>());
            }
            self.glyphs
                .iter()
                .map(|g| ranges.get(&(g.cluster as usize)).cloned().unwrap_or_default())
                .collect()
        })
    }

    fn char_to_glyphs(&self) -> &Vec<Vec<usize>> {
        self.char_to_glyphs.get_or_init(|| {
            let mut map = vec![vec![]; self.num_chars];
            for (glyph_index, chars) in self.glyph_to_chars().iter().enumerate() {
                for &c in chars {
                    if let Some(slot) = map.get_mut(c) {
                        slot.push(glyph_index);
                    }
                }
            }
            map
        })
    }

    /// The character indices covered by the given glyphs.
    pub fn map_glyphs_to_chars(&self, glyphs: impl IntoIterator<Item = usize>) -> BTreeSet<usize> {
        let table = self.glyph_to_chars();
        glyphs
            .into_iter()
            .filter_map(|g| table.get(g))
            .flatten()
            .copied()
            .collect()
    }

    /// The glyph indices produced by the given characters.
    pub fn map_chars_to_glyphs(&self, chars: impl IntoIterator<Item = usize>) -> BTreeSet<usize> {
        let table = self.char_to_glyphs();
        chars
            .into_iter()
            .filter_map(|c| table.get(c))
            .flatten()
            .copied()
            .collect()
    }
}

impl<'a> IntoIterator for &'a GlyphsRun {
    type Item = &'a GlyphInfo;
    type IntoIter = std::slice::Iter<'a, GlyphInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.glyphs.iter()
    }
}
