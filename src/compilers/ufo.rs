//! Compile a UFO into a minimal, outline-free OpenType font for shaping.

use std::io::Write;
use std::path::Path;

use write_fonts::types::NameId;

use super::{
    check_interrupt,
    features::{compile_features, features_with_generated, FeatureError},
    glif::{layer_glyph_dir, scan_glyph_set, GlyphSetInfo},
    tables::MinimalFont,
    CompileError,
};

pub const NOTDEF: &str = ".notdef";
pub const DEFAULT_UPEM: f64 = 1000.0;

/// Glyph order: `.notdef` first, then `public.glyphOrder`, then the rest in
/// glyph set order. `.notdef` is always present.
pub fn glyph_order(lib: &norad::Plist, names: &[String]) -> Vec<String> {
    let mut rest: Vec<String> = names.iter().filter(|n| *n != NOTDEF).cloned().collect();
    let mut order = vec![NOTDEF.to_string()];
    let listed = lib
        .get("public.glyphOrder")
        .and_then(|x| x.as_array())
        .map(|a| a.iter().flat_map(|x| x.as_string()).collect::<Vec<_>>())
        .unwrap_or_default();
    for name in listed {
        if let Some(pos) = rest.iter().position(|n| n == name) {
            order.push(rest.remove(pos));
        }
    }
    order.append(&mut rest);
    order
}

/// Vertical metrics defaults for glyphs that do not define their own.
pub(crate) fn vertical_defaults(info: &norad::FontInfo, upem: f64) -> (f64, f64) {
    let ascender = info
        .open_type_vhea_vert_typo_ascender
        .map(|v| v as f64)
        .or(info.ascender)
        .unwrap_or(upem * 0.8);
    (upem, ascender)
}

pub(crate) fn units_per_em(info: &norad::FontInfo) -> f64 {
    info.units_per_em
        .map(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(DEFAULT_UPEM)
}

fn font_names(info: &norad::FontInfo, ufo_path: &Path) -> Vec<(NameId, String)> {
    let family = info.family_name.clone().unwrap_or_else(|| {
        ufo_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".to_string())
    });
    let style = info
        .style_name
        .clone()
        .unwrap_or_else(|| "Regular".to_string());
    let postscript = info
        .postscript_font_name
        .clone()
        .unwrap_or_else(|| format!("{family}-{style}").replace(' ', ""));
    vec![
        (NameId::FAMILY_NAME, family.clone()),
        (NameId::SUBFAMILY_NAME, style.clone()),
        (NameId::FULL_NAME, format!("{family} {style}")),
        (NameId::POSTSCRIPT_NAME, postscript),
    ]
}

/// Everything the minimal compiler gathers from a UFO, before layout.
pub(crate) struct UfoSource {
    pub font: norad::Font,
    pub glyph_set: GlyphSetInfo,
    pub glyph_order: Vec<String>,
}

impl UfoSource {
    pub fn load(ufo_path: &Path, layer: Option<&str>) -> Result<Self, CompileError> {
        let request = norad::DataRequest::none()
            .lib(true)
            .groups(true)
            .kerning(true)
            .features(true);
        let font = norad::Font::load_requested_data(ufo_path, request)?;
        let glyph_set = scan_glyph_set(&layer_glyph_dir(ufo_path, layer)?)?;
        let glyph_order = glyph_order(&font.lib, &glyph_set.names);
        Ok(UfoSource {
            font,
            glyph_set,
            glyph_order,
        })
    }

    pub fn minimal_font(&self, ufo_path: &Path) -> MinimalFont {
        let info = &self.font.font_info;
        let upem = units_per_em(info);
        let (default_height, default_origin) = vertical_defaults(info, upem);
        let glyphs = &self.glyph_set.glyphs;
        let mut font = MinimalFont {
            glyph_order: self.glyph_order.clone(),
            cmap: self.glyph_set.cmap.clone(),
            units_per_em: upem.round() as u16,
            ascender: info.ascender.unwrap_or(upem * 0.8),
            descender: info.descender.unwrap_or(-upem * 0.2),
            line_gap: info.open_type_hhea_line_gap.map(|v| v as f64).unwrap_or(0.0),
            names: font_names(info, ufo_path),
            anchors: self.glyph_set.anchors(),
            ..Default::default()
        };
        for name in &self.glyph_order {
            let glyph = glyphs.get(name);
            let width = match glyph {
                Some(g) => g.width.map(|w| w.as_f64()).unwrap_or(0.0),
                None => (upem / 2.0).round(),
            };
            let height = glyph
                .and_then(|g| g.height)
                .map(|h| h.as_f64())
                .filter(|h| *h != 0.0)
                .unwrap_or(default_height);
            let origin = glyph
                .and_then(|g| g.vertical_origin)
                .map(|v| v.as_f64())
                .unwrap_or(default_origin);
            font.advance_widths.push(width);
            font.advance_heights.push(height);
            font.vertical_origins.push(origin);
        }
        font
    }
}

/// Compile the UFO at `ufo_path` (optionally a non-default layer). Feature
/// errors are reported to `output` and do not fail the compile.
pub fn compile_ufo(
    ufo_path: &Path,
    layer: Option<&str>,
    output: &mut dyn Write,
) -> Result<Vec<u8>, CompileError> {
    let source = UfoSource::load(ufo_path, layer)?;
    for (cp, kept, ignored) in &source.glyph_set.duplicates {
        writeln!(
            output,
            "Warning: U+{cp:04X} is mapped to both {kept} and {ignored}; using {kept}"
        )?;
    }
    check_interrupt()?;
    let mut font = source.minimal_font(ufo_path);
    let features = features_with_generated(
        &source.font.features,
        &source.glyph_order,
        &source.font.kerning,
        &source.font.groups,
        &font.anchors,
    );
    match compile_features(&features, &source.glyph_order, ufo_path) {
        Ok(layout) => font.extra_tables = layout,
        Err(FeatureError::Compile(message)) => {
            log::warn!("Features of {} did not compile", ufo_path.display());
            writeln!(output, "{message}")?;
        }
        Err(FeatureError::Read(e)) => return Err(e.into()),
    }
    check_interrupt()?;
    font.build()
}

/// Worker entry point: `compile_ufo_to_path(ufo, ttf, [layer])`.
pub fn compile_ufo_to_path(
    ufo_path: &Path,
    tt_path: &Path,
    layer: Option<&str>,
    output: &mut dyn Write,
) -> Result<(), CompileError> {
    let data = compile_ufo(ufo_path, layer, output)?;
    std::fs::write(tt_path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use write_fonts::read::{FontRef, TableProvider};

    pub(crate) fn write_glyph(dir: &Path, name: &str, body: &str) -> (String, String) {
        let file = format!("{}.glif", name.replace('.', "_"));
        std::fs::write(
            dir.join(&file),
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<glyph name=\"{name}\" format=\"2\">\n{body}\n</glyph>\n"
            ),
        )
        .unwrap();
        (name.to_string(), file)
    }

    fn write_ufo(root: &Path, glyphs: &[(&str, &str)], features: &str) -> std::path::PathBuf {
        let ufo = root.join("Test.ufo");
        let glyph_dir = ufo.join("glyphs");
        std::fs::create_dir_all(&glyph_dir).unwrap();
        std::fs::write(
            ufo.join("metainfo.plist"),
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>creator</key><string>org.test</string>
<key>formatVersion</key><integer>3</integer>
</dict></plist>"#,
        )
        .unwrap();
        std::fs::write(
            ufo.join("fontinfo.plist"),
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>familyName</key><string>Test</string>
<key>unitsPerEm</key><integer>1000</integer>
<key>ascender</key><integer>750</integer>
<key>descender</key><integer>-250</integer>
</dict></plist>"#,
        )
        .unwrap();
        std::fs::write(
            ufo.join("layercontents.plist"),
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><array>
<array><string>public.default</string><string>glyphs</string></array>
</array></plist>"#,
        )
        .unwrap();
        std::fs::write(ufo.join("features.fea"), features).unwrap();
        let mut contents = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\"><dict>\n",
        );
        for (name, body) in glyphs {
            let (name, file) = write_glyph(&glyph_dir, name, body);
            contents.push_str(&format!("<key>{name}</key><string>{file}</string>\n"));
        }
        contents.push_str("</dict></plist>\n");
        std::fs::write(glyph_dir.join("contents.plist"), contents).unwrap();
        ufo
    }

    #[test]
    fn order_starts_with_notdef() {
        let mut lib = norad::Plist::new();
        lib.insert(
            "public.glyphOrder".into(),
            norad::Plist::new().into(), // not an array, ignored
        );
        let names = vec!["b".to_string(), "a".to_string()];
        assert_eq!(glyph_order(&lib, &names), vec![".notdef", "b", "a"]);
    }

    #[test]
    fn compiles_metrics_and_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ufo = write_ufo(
            dir.path(),
            &[
                ("f", r#"<advance width="300"/><unicode hex="0066"/>"#),
                ("i", r#"<advance width="250" height="900"/><unicode hex="0069"/>"#),
                ("f_i", r#"<advance width="500"/>"#),
            ],
            "feature liga { sub f i by f_i; } liga;\n",
        );
        let mut output = vec![];
        let data = compile_ufo(&ufo, None, &mut output).unwrap();
        assert!(output.is_empty());
        let font = FontRef::new(&data).unwrap();
        assert_eq!(font.maxp().unwrap().num_glyphs(), 4);
        assert!(font.gsub().is_ok());

        let face = rustybuzz::Face::from_slice(&data, 0).unwrap();
        let i = face.glyph_index('i').unwrap();
        assert_eq!(face.glyph_hor_advance(i), Some(250));
        assert_eq!(face.glyph_ver_advance(i), Some(900));
        let notdef = rustybuzz::ttf_parser::GlyphId(0);
        assert_eq!(face.glyph_hor_advance(notdef), Some(500));
        assert_eq!(face.glyph_ver_advance(notdef), Some(1000));
        assert_eq!(face.glyph_y_origin(notdef), Some(750));
    }

    #[test]
    fn broken_features_still_build() {
        let dir = tempfile::tempdir().unwrap();
        let ufo = write_ufo(
            dir.path(),
            &[("a", r#"<advance width="500"/><unicode hex="0061"/>"#)],
            "feature liga { sub a by nothere; } liga;\n",
        );
        let mut output = vec![];
        let data = compile_ufo(&ufo, None, &mut output).unwrap();
        assert!(!output.is_empty());
        let font = FontRef::new(&data).unwrap();
        assert!(font.gsub().is_err());
        assert_eq!(font.maxp().unwrap().num_glyphs(), 2);
    }
}
