//! Compile TTX (the XML dump format of OpenType fonts) back to a binary.
//!
//! Only the tables needed for shaping and drawing are understood. Tables
//! dumped as `<hexdata>` are copied verbatim; other tables are skipped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use kurbo::{Affine, Point};
use roxmltree::Node;
use write_fonts::{
    read::tables::glyf::CurvePoint,
    tables::glyf::{Bbox, Contour, SimpleGlyph},
    types::NameId,
};

use super::{check_interrupt, tables::MinimalFont, CompileError};
use crate::{tag_from_str, Tag};

const MAX_COMPONENT_DEPTH: usize = 16;

const BUILT_TABLES: [&str; 13] = [
    "GlyphOrder",
    "head",
    "hhea",
    "maxp",
    "hmtx",
    "vhea",
    "vmtx",
    "VORG",
    "cmap",
    "post",
    "name",
    "glyf",
    "loca",
];

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }
    s.parse().ok()
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

/// The `value` attribute of the child element named `name`.
fn child_value(table: Node, name: &str) -> Option<f64> {
    elements(table)
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.attribute("value"))
        .and_then(parse_number)
}

fn number_attr(node: Node, name: &str) -> Option<f64> {
    node.attribute(name).and_then(parse_number)
}

fn metrics<'a>(table: Option<Node<'a, '_>>, attr: &str) -> HashMap<&'a str, f64> {
    let Some(table) = table else {
        return HashMap::new();
    };
    elements(table)
        .filter(|n| n.has_tag_name("mtx"))
        .filter_map(|n| Some((n.attribute("name")?, number_attr(n, attr)?)))
        .collect()
}

fn hexdata(table: Node) -> Option<Vec<u8>> {
    let hex: String = elements(table)
        .find(|n| n.has_tag_name("hexdata"))?
        .text()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();
    (0..hex.len() / 2)
        .map(|i| u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).ok())
        .collect()
}

/// A glyph as written in the TTX, before components are resolved.
#[derive(Debug, Default)]
struct TtxGlyph {
    contours: Vec<Vec<(Point, bool)>>,
    components: Vec<(String, Affine)>,
}

fn parse_glyph(node: Node) -> TtxGlyph {
    let mut glyph = TtxGlyph::default();
    for child in elements(node) {
        match child.tag_name().name() {
            "contour" => glyph.contours.push(
                elements(child)
                    .filter(|p| p.has_tag_name("pt"))
                    .map(|p| {
                        let x = number_attr(p, "x").unwrap_or(0.0);
                        let y = number_attr(p, "y").unwrap_or(0.0);
                        let on = number_attr(p, "on").map(|v| (v as i64) & 1 == 1);
                        (Point::new(x, y), on.unwrap_or(true))
                    })
                    .collect(),
            ),
            "component" => {
                let Some(base) = child.attribute("glyphName") else {
                    continue;
                };
                let num = |name: &str, default: f64| number_attr(child, name).unwrap_or(default);
                let scale = num("scale", 1.0);
                let transform = Affine::new([
                    num("scalex", scale),
                    num("scale01", 0.0),
                    num("scale10", 0.0),
                    num("scaley", scale),
                    num("x", 0.0),
                    num("y", 0.0),
                ]);
                glyph.components.push((base.to_string(), transform));
            }
            _ => {}
        }
    }
    glyph
}

fn flatten(
    name: &str,
    glyphs: &HashMap<String, TtxGlyph>,
    transform: Affine,
    seen: &mut HashSet<String>,
    out: &mut Vec<Vec<(Point, bool)>>,
) -> Result<(), CompileError> {
    if seen.len() > MAX_COMPONENT_DEPTH || !seen.insert(name.to_string()) {
        return Err(CompileError::Outline {
            glyph: name.to_string(),
            reason: "recursive component reference".to_string(),
        });
    }
    if let Some(glyph) = glyphs.get(name) {
        for contour in &glyph.contours {
            out.push(contour.iter().map(|(p, on)| (transform * *p, *on)).collect());
        }
        for (base, inner) in &glyph.components {
            flatten(base, glyphs, transform * *inner, seen, out)?;
        }
    } else {
        log::warn!("Component base glyph {name} not found");
    }
    seen.remove(name);
    Ok(())
}

fn simple_glyph(contours: Vec<Vec<(Point, bool)>>) -> SimpleGlyph {
    let contours: Vec<Vec<CurvePoint>> = contours
        .into_iter()
        .filter(|c| !c.is_empty())
        .map(|c| {
            c.into_iter()
                .map(|(p, on)| {
                    CurvePoint::new(p.x.round() as i16, p.y.round() as i16, on)
                })
                .collect()
        })
        .collect();
    let mut points = contours.iter().flatten();
    let bbox = match points.next() {
        None => Bbox::default(),
        Some(first) => points.fold(
            Bbox {
                x_min: first.x,
                y_min: first.y,
                x_max: first.x,
                y_max: first.y,
            },
            |b, p| Bbox {
                x_min: b.x_min.min(p.x),
                y_min: b.y_min.min(p.y),
                x_max: b.x_max.max(p.x),
                y_max: b.y_max.max(p.y),
            },
        ),
    };
    SimpleGlyph {
        bbox,
        contours: contours.into_iter().map(Contour::from).collect(),
        instructions: vec![],
    }
}

/// Compile a TTX document to an OpenType binary.
pub fn compile_ttx_str(
    text: &str,
    path: &Path,
    output: &mut dyn Write,
) -> Result<Vec<u8>, CompileError> {
    let doc = roxmltree::Document::parse(text).map_err(|e| CompileError::xml(path, e))?;
    let root = doc.root_element();
    if !root.has_tag_name("ttFont") {
        return Err(CompileError::Ttx("root element is not <ttFont>".to_string()));
    }
    let table = |name: &str| elements(root).find(|n| n.has_tag_name(name));

    let glyph_order: Vec<String> = table("GlyphOrder")
        .map(|order| {
            elements(order)
                .filter(|n| n.has_tag_name("GlyphID"))
                .filter_map(|n| n.attribute("name").map(String::from))
                .collect()
        })
        .unwrap_or_default();
    if glyph_order.is_empty() {
        return Err(CompileError::Ttx("missing GlyphOrder".to_string()));
    }

    let head = table("head");
    let hhea = table("hhea");
    let upem = head
        .and_then(|h| child_value(h, "unitsPerEm"))
        .unwrap_or(1000.0);
    let ascender = hhea.and_then(|h| child_value(h, "ascent")).unwrap_or(upem * 0.8);
    let mut font = MinimalFont {
        glyph_order: glyph_order.clone(),
        units_per_em: upem.round() as u16,
        ascender,
        descender: hhea
            .and_then(|h| child_value(h, "descent"))
            .unwrap_or(-upem * 0.2),
        line_gap: hhea.and_then(|h| child_value(h, "lineGap")).unwrap_or(0.0),
        ..Default::default()
    };

    let widths = metrics(table("hmtx"), "width");
    let heights = metrics(table("vmtx"), "height");
    let mut default_origin = ascender;
    let mut origins: HashMap<String, f64> = HashMap::new();
    if let Some(vorg) = table("VORG") {
        default_origin = child_value(vorg, "defaultVertOriginY").unwrap_or(ascender);
        for record in elements(vorg).filter(|n| n.has_tag_name("VOriginRecord")) {
            let glyph = elements(record)
                .find(|n| n.has_tag_name("glyphName"))
                .and_then(|n| n.attribute("value"));
            if let (Some(glyph), Some(origin)) = (glyph, child_value(record, "vOrigin")) {
                origins.insert(glyph.to_string(), origin);
            }
        }
    }
    for name in &glyph_order {
        font.advance_widths
            .push(widths.get(name.as_str()).copied().unwrap_or(0.0));
        font.advance_heights
            .push(heights.get(name.as_str()).copied().unwrap_or(upem));
        font.vertical_origins
            .push(origins.get(name).copied().unwrap_or(default_origin));
    }

    if let Some(cmap) = table("cmap") {
        let mut mappings: BTreeMap<u32, String> = BTreeMap::new();
        for subtable in elements(cmap).filter(|n| n.tag_name().name().starts_with("cmap_format_")) {
            let platform = number_attr(subtable, "platformID").unwrap_or(-1.0) as i64;
            let encoding = number_attr(subtable, "platEncID").unwrap_or(-1.0) as i64;
            if !(platform == 0 || (platform == 3 && (encoding == 1 || encoding == 10))) {
                continue;
            }
            for map in elements(subtable).filter(|n| n.has_tag_name("map")) {
                if let (Some(code), Some(name)) = (number_attr(map, "code"), map.attribute("name")) {
                    mappings.entry(code as u32).or_insert_with(|| name.to_string());
                }
            }
        }
        font.cmap = mappings;
    }

    if let Some(name) = table("name") {
        for record in elements(name).filter(|n| n.has_tag_name("namerecord")) {
            let platform = number_attr(record, "platformID");
            let language = number_attr(record, "langID");
            if platform != Some(3.0) || language != Some(1033.0) {
                continue;
            }
            if let Some(id) = number_attr(record, "nameID") {
                let text = record.text().unwrap_or_default().trim().to_string();
                font.names.push((NameId::new(id as u16), text));
            }
        }
    }

    if let Some(glyf) = table("glyf") {
        let glyphs: HashMap<String, TtxGlyph> = elements(glyf)
            .filter(|n| n.has_tag_name("TTGlyph"))
            .filter_map(|n| Some((n.attribute("name")?.to_string(), parse_glyph(n))))
            .collect();
        for name in &glyph_order {
            check_interrupt()?;
            let mut contours = vec![];
            flatten(name, &glyphs, Affine::IDENTITY, &mut HashSet::new(), &mut contours)?;
            font.outlines.push(simple_glyph(contours));
        }
    }

    for node in elements(root) {
        let name = node.tag_name().name();
        if BUILT_TABLES.contains(&name) {
            continue;
        }
        let tag: Option<Tag> = tag_from_str(if name == "OS_2" { "OS/2" } else { name });
        match (tag, hexdata(node)) {
            (Some(tag), Some(data)) => font.extra_tables.push((tag, data)),
            _ => {
                log::warn!("Skipping table {name} of {}", path.display());
                writeln!(output, "Skipping unsupported table {name}")?;
            }
        }
    }
    font.build()
}

pub fn compile_ttx(path: &Path, output: &mut dyn Write) -> Result<Vec<u8>, CompileError> {
    let text = std::fs::read_to_string(path)?;
    compile_ttx_str(&text, path, output)
}

/// Worker entry point: `compile_ttx_to_path(ttx, ttf)`.
pub fn compile_ttx_to_path(
    ttx_path: &Path,
    tt_path: &Path,
    output: &mut dyn Write,
) -> Result<(), CompileError> {
    let data = compile_ttx(ttx_path, output)?;
    std::fs::write(tt_path, data)?;
    Ok(())
}
