use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use write_fonts::{
    tables::{
        cmap::Cmap,
        glyf::{GlyfLocaBuilder, SimpleGlyph},
        head::Head,
        loca::LocaFormat,
        hhea::Hhea,
        hmtx::{Hmtx, LongMetric},
        maxp::Maxp,
        name::{Name, NameRecord},
        post::Post,
    },
    types::{F2Dot14, FWord, Fixed, GlyphId, NameId, UfWord},
    FontBuilder,
};

use super::CompileError;
use crate::Tag;

/// Private table holding glyph anchors as JSON.
pub const ANCHORS_TAG: Tag = Tag::new(b"FGAx");
/// Private table holding the designspace master model as JSON.
pub const MASTER_MODEL_TAG: Tag = Tag::new(b"MPcl");
/// Private table mapping layout tables that were not merged across
/// designspace masters to the reason, as JSON.
pub const UNMERGED_TAG: Tag = Tag::new(b"FGnm");

pub(crate) const VHEA: Tag = Tag::new(b"vhea");
pub(crate) const VMTX: Tag = Tag::new(b"vmtx");
pub(crate) const VORG: Tag = Tag::new(b"VORG");
pub(crate) const AVAR: Tag = Tag::new(b"avar");

/// A number that serializes as an integer when it is integral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn parse(s: &str) -> Option<Number> {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return Some(Number::Int(i));
        }
        let f = s.parse::<f64>().ok()?;
        Some(Number::from(f))
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }
}

impl From<f64> for Number {
    fn from(f: f64) -> Self {
        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            Number::Int(f as i64)
        } else {
            Number::Float(f)
        }
    }
}

/// `(name, x, y, identifier)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord(
    pub Option<String>,
    pub Option<Number>,
    pub Option<Number>,
    pub Option<String>,
);

impl AnchorRecord {
    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.1?.as_f64(), self.2?.as_f64()))
    }
}

/// Big-endian byte writer for the tables we emit by hand.
#[derive(Default)]
pub(crate) struct BeWriter(Vec<u8>);

impl BeWriter {
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn f2dot14(&mut self, v: f64) -> &mut Self {
        self.0
            .extend_from_slice(&F2Dot14::from_f32(v as f32).to_be_bytes());
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

fn to_i16(v: f64) -> i16 {
    v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

fn to_u16(v: f64) -> u16 {
    v.round().clamp(0.0, u16::MAX as f64) as u16
}

pub(crate) fn vhea(ascender: f64, descender: f64, heights: &[f64]) -> Vec<u8> {
    let mut w = BeWriter::default();
    w.u32(0x0001_1000)
        .i16(to_i16(ascender))
        .i16(to_i16(descender))
        .i16(0)
        .u16(heights.iter().copied().map(to_u16).max().unwrap_or(0))
        .i16(0)
        .i16(0)
        .i16(0)
        .i16(1) // caretSlopeRise
        .i16(0)
        .i16(0);
    for _ in 0..4 {
        w.i16(0);
    }
    w.i16(0).u16(heights.len() as u16);
    w.into_inner()
}

pub(crate) fn vmtx(heights: &[f64]) -> Vec<u8> {
    let mut w = BeWriter::default();
    for height in heights {
        w.u16(to_u16(*height)).i16(0);
    }
    w.into_inner()
}

pub(crate) fn vorg(origins: &[f64], default: f64) -> Result<Vec<u8>, CompileError> {
    let default = to_i16(default);
    let mut records: Vec<(u16, i16)> = vec![];
    for (gid, v) in origins.iter().enumerate() {
        let v = to_i16(*v);
        if v == default {
            continue;
        }
        let gid = u16::try_from(gid).map_err(|_| CompileError::TooManyGlyphs(origins.len()))?;
        records.push((gid, v));
    }
    let mut w = BeWriter::default();
    w.u16(1).u16(0).i16(default).u16(records.len() as u16);
    for (gid, v) in records {
        w.u16(gid).i16(v);
    }
    Ok(w.into_inner())
}

/// An `avar` version 1 table; axes without segments get an identity map.
pub(crate) fn avar(segments: &[Option<Vec<(f64, f64)>>]) -> Vec<u8> {
    let identity = vec![(-1.0, -1.0), (0.0, 0.0), (1.0, 1.0)];
    let mut w = BeWriter::default();
    w.u16(1).u16(0).u16(0).u16(segments.len() as u16);
    for maps in segments {
        let maps = maps.as_ref().unwrap_or(&identity);
        w.u16(maps.len() as u16);
        for (from, to) in maps {
            w.f2dot14(*from).f2dot14(*to);
        }
    }
    w.into_inner()
}

/// Windows English name records, sorted as the table requires.
pub(crate) fn name_table(names: &[(NameId, String)]) -> Name {
    let mut name = Name::default();
    let mut records: Vec<NameRecord> = names
        .iter()
        .filter(|(_, s)| !s.is_empty())
        .map(|(id, s)| NameRecord::new(3, 1, 0x409, *id, s.clone().into()))
        .collect();
    records.sort();
    records.dedup_by(|a, b| a.name_id == b.name_id);
    name.name_record = records;
    name
}

/// Everything needed to write a shapeable font without outlines.
#[derive(Debug, Clone, Default)]
pub(crate) struct MinimalFont {
    pub glyph_order: Vec<String>,
    pub advance_widths: Vec<f64>,
    pub advance_heights: Vec<f64>,
    pub vertical_origins: Vec<f64>,
    /// Code point to glyph name
    pub cmap: BTreeMap<u32, String>,
    pub units_per_em: u16,
    pub ascender: f64,
    pub descender: f64,
    pub line_gap: f64,
    pub names: Vec<(NameId, String)>,
    pub anchors: BTreeMap<String, Vec<AnchorRecord>>,
    /// TrueType outlines in glyph order; empty for an outline-free font.
    pub outlines: Vec<SimpleGlyph>,
    /// Compiled layout and other binary tables, copied verbatim.
    pub extra_tables: Vec<(Tag, Vec<u8>)>,
}

impl MinimalFont {
    pub fn build(&self) -> Result<Vec<u8>, CompileError> {
        let num_glyphs = u16::try_from(self.glyph_order.len())
            .map_err(|_| CompileError::TooManyGlyphs(self.glyph_order.len()))?;
        let ids: HashMap<&str, u32> = self
            .glyph_order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i as u32))
            .collect();

        let mut builder = FontBuilder::new();
        let mut head = Head {
            units_per_em: self.units_per_em,
            ..Default::default()
        };
        let mut side_bearings = vec![0i16; self.glyph_order.len()];
        if !self.outlines.is_empty() {
            let mut glyf = GlyfLocaBuilder::new();
            for (glyph, name) in self.outlines.iter().zip(&self.glyph_order) {
                glyf.add_glyph(glyph).map_err(|e| CompileError::Outline {
                    glyph: name.clone(),
                    reason: e.to_string(),
                })?;
            }
            let (glyf, loca, format) = glyf.build();
            head.index_to_loc_format = match format {
                LocaFormat::Short => 0,
                LocaFormat::Long => 1,
            };
            for (lsb, glyph) in side_bearings.iter_mut().zip(&self.outlines) {
                *lsb = glyph.bbox.x_min;
            }
            builder.add_table(&glyf)?;
            builder.add_table(&loca)?;
        }
        builder.add_table(&head)?;
        builder.add_table(&Hhea {
            ascender: FWord::new(to_i16(self.ascender)),
            descender: FWord::new(to_i16(self.descender)),
            line_gap: FWord::new(to_i16(self.line_gap)),
            advance_width_max: UfWord::new(
                self.advance_widths
                    .iter()
                    .copied()
                    .map(to_u16)
                    .max()
                    .unwrap_or(0),
            ),
            min_left_side_bearing: FWord::new(0),
            min_right_side_bearing: FWord::new(0),
            x_max_extent: FWord::new(0),
            caret_slope_rise: 1,
            caret_slope_run: 0,
            caret_offset: 0,
            number_of_h_metrics: num_glyphs,
        })?;
        builder.add_table(&Maxp {
            num_glyphs,
            ..Default::default()
        })?;
        builder.add_table(&Hmtx {
            h_metrics: self
                .advance_widths
                .iter()
                .zip(&side_bearings)
                .map(|(w, lsb)| LongMetric {
                    advance: to_u16(*w),
                    side_bearing: *lsb,
                })
                .collect(),
            left_side_bearings: vec![],
        })?;
        builder.add_raw(VHEA, vhea(self.ascender, self.descender, &self.advance_heights));
        builder.add_raw(VMTX, vmtx(&self.advance_heights));
        builder.add_raw(VORG, vorg(&self.vertical_origins, self.ascender)?);

        let mappings: Vec<(char, GlyphId)> = self
            .cmap
            .iter()
            .filter_map(|(cp, name)| {
                Some((char::from_u32(*cp)?, GlyphId::new(*ids.get(name.as_str())?)))
            })
            .collect();
        let cmap = Cmap::from_mappings(mappings).map_err(|e| CompileError::Cmap(format!("{e:?}")))?;
        builder.add_table(&cmap)?;
        builder.add_table(&Post::new_v2(self.glyph_order.iter().map(String::as_str)))?;
        builder.add_table(&name_table(&self.names))?;
        if !self.anchors.is_empty() {
            builder.add_raw(ANCHORS_TAG, serde_json::to_vec(&self.anchors)?);
        }
        for (tag, data) in &self.extra_tables {
            if !builder.contains(*tag) {
                builder.add_raw(*tag, data.clone());
            }
        }
        Ok(builder.build())
    }
}

pub(crate) fn fixed(v: f64) -> Fixed {
    Fixed::from_f64(v)
}
