//! Fast extraction of the glyph data needed for shaping from `.glif` files.
//!
//! Most GLIF files are scanned with regular expressions; files containing XML
//! comments, or format 1 files that may carry anchors as single-point
//! contours, go through a real XML parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::{
    check_interrupt,
    tables::{AnchorRecord, Number},
    CompileError,
};

macro_rules! regex {
    ($name:ident, $re:expr) => {
        #[allow(clippy::unwrap_used)] // Literal pattern, checked by the tests
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).unwrap());
    };
}

regex!(ADVANCE_RE, r"<advance\s+([^>]*?)/?>");
regex!(UNICODE_RE, r#"<unicode\s+hex\s*=\s*["']([0-9A-Fa-f]+)["']"#);
regex!(ANCHOR_RE, r"<anchor\s+([^>]*?)/?>");
regex!(ATTR_RE, r#"([\w.:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#);
regex!(
    VERTICAL_ORIGIN_RE,
    r"<key>\s*public\.verticalOrigin\s*</key>\s*<(?:integer|real)>([^<]*)</"
);
regex!(FORMAT1_RE, r#"<glyph\s[^>]*format\s*=\s*["']1["']"#);

pub const VERTICAL_ORIGIN_KEY: &str = "public.verticalOrigin";

/// What the shaping font needs to know about one glyph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlifInfo {
    pub width: Option<Number>,
    pub height: Option<Number>,
    pub unicodes: Vec<u32>,
    pub anchors: Vec<AnchorRecord>,
    pub vertical_origin: Option<Number>,
}

fn attributes(s: &str) -> BTreeMap<&str, &str> {
    ATTR_RE
        .captures_iter(s)
        .filter_map(|cap| {
            let key = cap.get(1)?.as_str();
            let value = cap.get(2).or_else(|| cap.get(3))?.as_str();
            Some((key, value))
        })
        .collect()
}

fn anchor_from_attributes(attrs: &BTreeMap<&str, &str>) -> AnchorRecord {
    AnchorRecord(
        attrs.get("name").map(|s| s.to_string()),
        attrs.get("x").and_then(|s| Number::parse(s)),
        attrs.get("y").and_then(|s| Number::parse(s)),
        attrs.get("identifier").map(|s| s.to_string()),
    )
}

/// Parse a GLIF document, choosing the fast path when it is safe.
pub fn parse_glif(data: &str, path: &Path) -> Result<GlifInfo, CompileError> {
    let needs_xml = data.contains("<!--")
        || (FORMAT1_RE.is_match(data) && data.contains("move"));
    if needs_xml {
        parse_glif_xml(data, path)
    } else {
        Ok(parse_glif_fast(data))
    }
}

pub fn parse_glif_fast(data: &str) -> GlifInfo {
    let mut info = GlifInfo::default();
    if let Some(cap) = ADVANCE_RE.captures(data) {
        let attrs = attributes(&cap[1]);
        info.width = attrs.get("width").and_then(|s| Number::parse(s));
        info.height = attrs.get("height").and_then(|s| Number::parse(s));
    }
    info.unicodes = UNICODE_RE
        .captures_iter(data)
        .filter_map(|cap| u32::from_str_radix(&cap[1], 16).ok())
        .collect();
    info.anchors = ANCHOR_RE
        .captures_iter(data)
        .map(|cap| anchor_from_attributes(&attributes(&cap[1])))
        .collect();
    info.vertical_origin = VERTICAL_ORIGIN_RE
        .captures(data)
        .and_then(|cap| Number::parse(&cap[1]));
    info
}

fn element_children<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

pub fn parse_glif_xml(data: &str, path: &Path) -> Result<GlifInfo, CompileError> {
    let doc = roxmltree::Document::parse(data).map_err(|e| CompileError::xml(path, e))?;
    let root = doc.root_element();
    if root.tag_name().name() != "glyph" {
        return Err(CompileError::xml(path, "root element is not <glyph>"));
    }
    let format1 = root.attribute("format") == Some("1");
    let number = |node: roxmltree::Node, attr: &str| node.attribute(attr).and_then(Number::parse);
    let mut info = GlifInfo::default();
    for node in element_children(root) {
        match node.tag_name().name() {
            "advance" => {
                info.width = number(node, "width");
                info.height = number(node, "height");
            }
            "unicode" => {
                if let Some(cp) = node
                    .attribute("hex")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                {
                    info.unicodes.push(cp);
                }
            }
            "anchor" => info.anchors.push(AnchorRecord(
                node.attribute("name").map(String::from),
                number(node, "x"),
                number(node, "y"),
                node.attribute("identifier").map(String::from),
            )),
            "outline" if format1 => {
                for contour in element_children(node).filter(|n| n.has_tag_name("contour")) {
                    let points: Vec<_> = element_children(contour)
                        .filter(|n| n.has_tag_name("point"))
                        .collect();
                    if let [point] = points.as_slice() {
                        if point.attribute("type") == Some("move") {
                            info.anchors.push(AnchorRecord(
                                point.attribute("name").map(String::from),
                                number(*point, "x"),
                                number(*point, "y"),
                                None,
                            ));
                        }
                    }
                }
            }
            "lib" => {
                if let Some(dict) = element_children(node).find(|n| n.has_tag_name("dict")) {
                    let mut items = element_children(dict);
                    while let Some(key) = items.next() {
                        let value = items.next();
                        if key.text().map(str::trim) == Some(VERTICAL_ORIGIN_KEY) {
                            info.vertical_origin =
                                value.and_then(|v| v.text()).and_then(Number::parse);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(info)
}

/// Read the string pairs of a `contents.plist` (a dict) or a
/// `layercontents.plist` (an array of two-string arrays).
pub fn read_plist_pairs(path: &Path) -> Result<Vec<(String, String)>, CompileError> {
    let text = std::fs::read_to_string(path)?;
    let doc = roxmltree::Document::parse(&text).map_err(|e| CompileError::xml(path, e))?;
    let Some(top) = element_children(doc.root_element()).next() else {
        return Ok(vec![]);
    };
    let text_of = |n: roxmltree::Node| n.text().unwrap_or_default().to_string();
    let mut pairs = vec![];
    match top.tag_name().name() {
        "dict" => {
            let mut items = element_children(top);
            while let (Some(key), Some(value)) = (items.next(), items.next()) {
                pairs.push((text_of(key), text_of(value)));
            }
        }
        "array" => {
            for entry in element_children(top) {
                let strings: Vec<String> = element_children(entry).map(text_of).collect();
                if let [a, b] = &strings[..] {
                    pairs.push((a.clone(), b.clone()));
                }
            }
        }
        other => {
            return Err(CompileError::xml(
                path,
                format!("unexpected top-level <{other}>"),
            ))
        }
    }
    Ok(pairs)
}

/// The glyph directory of a UFO layer; `None` means the default layer.
pub fn layer_glyph_dir(ufo: &Path, layer: Option<&str>) -> Result<PathBuf, CompileError> {
    let layer_contents = ufo.join("layercontents.plist");
    let Some(layer) = layer else {
        return Ok(ufo.join("glyphs"));
    };
    if !layer_contents.exists() {
        return Err(CompileError::xml(
            &layer_contents,
            format!("no layer named {layer:?}"),
        ));
    }
    read_plist_pairs(&layer_contents)?
        .into_iter()
        .find(|(name, _)| name == layer)
        .map(|(_, dir)| ufo.join(dir))
        .ok_or_else(|| CompileError::xml(&layer_contents, format!("no layer named {layer:?}")))
}

/// Shaping-relevant data for a whole glyph set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlyphSetInfo {
    /// Glyph names in `contents.plist` order.
    pub names: Vec<String>,
    pub glyphs: BTreeMap<String, GlifInfo>,
    /// Code point to glyph name; the first glyph claiming a code point wins.
    pub cmap: BTreeMap<u32, String>,
    pub rev_cmap: BTreeMap<String, Vec<u32>>,
    /// `(code point, kept glyph, ignored glyph)`
    pub duplicates: Vec<(u32, String, String)>,
}

impl GlyphSetInfo {
    pub fn anchors(&self) -> BTreeMap<String, Vec<AnchorRecord>> {
        self.glyphs
            .iter()
            .filter(|(_, g)| !g.anchors.is_empty())
            .map(|(name, g)| (name.clone(), g.anchors.clone()))
            .collect()
    }
}

pub fn scan_glyph_set(dir: &Path) -> Result<GlyphSetInfo, CompileError> {
    scan_glyph_set_with(dir, check_interrupt)
}

/// [`scan_glyph_set`], calling `checkpoint` before each glyph.
pub(crate) fn scan_glyph_set_with(
    dir: &Path,
    mut checkpoint: impl FnMut() -> Result<(), CompileError>,
) -> Result<GlyphSetInfo, CompileError> {
    let mut set = GlyphSetInfo::default();
    for (name, file) in read_plist_pairs(&dir.join("contents.plist"))? {
        checkpoint()?;
        let path = dir.join(&file);
        let data = std::fs::read_to_string(&path)?;
        let info = parse_glif(&data, &path)?;
        for &cp in &info.unicodes {
            match set.cmap.get(&cp) {
                Some(existing) => {
                    log::warn!(
                        "U+{:04X} is mapped to both {} and {}; keeping {}",
                        cp,
                        existing,
                        name,
                        existing
                    );
                    set.duplicates.push((cp, existing.clone(), name.clone()));
                }
                None => {
                    set.cmap.insert(cp, name.clone());
                }
            }
        }
        set.rev_cmap.insert(name.clone(), info.unicodes.clone());
        set.names.push(name.clone());
        set.glyphs.insert(name, info);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    const GLIF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<glyph name="A" format="2">
  <advance width="600" height="950.5"/>
  <unicode hex="0041"/>
  <unicode hex="00C0"/>
  <anchor x="300" y="700" name="top" identifier="a1"/>
  <anchor name="bottom" x="300"/>
  <outline/>
  <lib>
    <dict>
      <key>public.verticalOrigin</key>
      <integer>880</integer>
    </dict>
  </lib>
</glyph>
"#;

    #[test]
    fn fast_path() {
        let info = parse_glif_fast(GLIF);
        assert_eq!(info.width, Some(Number::Int(600)));
        assert_eq!(info.height, Some(Number::Float(950.5)));
        assert_eq!(info.unicodes, vec![0x41, 0xC0]);
        assert_eq!(
            info.anchors,
            vec![
                AnchorRecord(
                    Some("top".into()),
                    Some(Number::Int(300)),
                    Some(Number::Int(700)),
                    Some("a1".into())
                ),
                AnchorRecord(Some("bottom".into()), Some(Number::Int(300)), None, None),
            ]
        );
        assert_eq!(info.vertical_origin, Some(Number::Int(880)));
    }

    #[test]
    fn both_paths_agree() {
        let path = Path::new("A_.glif");
        assert_eq!(parse_glif_xml(GLIF, path).unwrap(), parse_glif_fast(GLIF));
    }

    #[test]
    fn comments_hide_elements() {
        let data = r#"<glyph name="B" format="2">
  <!-- <unicode hex="0043"/> -->
  <advance width="500"/>
  <unicode hex="0042"/>
</glyph>"#;
        let info = parse_glif(data, Path::new("B_.glif")).unwrap();
        assert_eq!(info.unicodes, vec![0x42]);
        assert_eq!(info.width, Some(Number::Int(500)));
        assert_eq!(info.height, None);
    }

    #[test]
    fn format1_move_point_anchors() {
        let data = r#"<glyph name="a" format="1">
  <advance width="400"/>
  <outline>
    <contour><point x="200" y="500" type="move" name="top"/></contour>
    <contour>
      <point x="0" y="0" type="line"/>
      <point x="400" y="0" type="line"/>
      <point x="200" y="400" type="line"/>
    </contour>
  </outline>
</glyph>"#;
        let info = parse_glif(data, Path::new("a.glif")).unwrap();
        assert_eq!(
            info.anchors,
            vec![AnchorRecord(
                Some("top".into()),
                Some(Number::Int(200)),
                Some(Number::Int(500)),
                None
            )]
        );
    }

    #[test]
    fn glyph_set_keeps_the_first_unicode_owner() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("contents.plist"),
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>A</key><string>A_.glif</string>
<key>A.alt</key><string>A_.alt.glif</string>
</dict></plist>"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("A_.glif"), GLIF).unwrap();
        std::fs::write(
            dir.path().join("A_.alt.glif"),
            r#"<glyph name="A.alt" format="2"><advance width="610"/><unicode hex="0041"/></glyph>"#,
        )
        .unwrap();
        let set = scan_glyph_set(dir.path()).unwrap();
        assert_eq!(set.names, vec!["A", "A.alt"]);
        assert_eq!(set.cmap.get(&0x41).map(String::as_str), Some("A"));
        assert_eq!(set.duplicates, vec![(0x41, "A".to_string(), "A.alt".to_string())]);
        assert_eq!(set.rev_cmap["A.alt"], vec![0x41]);
        assert_eq!(set.anchors().len(), 1);
    }

    #[test]
    fn interrupt_stops_between_glyphs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("contents.plist"),
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>A</key><string>A_.glif</string>
<key>B</key><string>B_.glif</string>
<key>C</key><string>C_.glif</string>
</dict></plist>"#,
        )
        .unwrap();
        // Only the first glyph is readable; the scan must stop before the rest
        std::fs::write(dir.path().join("A_.glif"), GLIF).unwrap();
        let mut polls = 0;
        let result = scan_glyph_set_with(dir.path(), || {
            polls += 1;
            if polls > 1 {
                Err(CompileError::Interrupted)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(CompileError::Interrupted)));
        assert_eq!(polls, 2);
    }
}
