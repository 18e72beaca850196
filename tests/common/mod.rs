#![allow(dead_code, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use fontgoggles::{CompilerPool, Config, Context};

pub fn worker_program() -> &'static str {
    env!("CARGO_BIN_EXE_fontgoggles-worker")
}

pub fn context() -> Context {
    Context::new(Config::default().with_worker_program(worker_program()))
}

pub fn pool(max_workers: usize) -> CompilerPool {
    CompilerPool::with_program(worker_program(), vec![], vec![], max_workers)
}

/// A square-ish contour from (0, 0) to (`width`, 700).
pub fn box_outline(width: f64) -> String {
    format!(
        r#"<outline>
    <contour>
      <point x="0" y="0" type="line"/>
      <point x="{width}" y="0" type="line"/>
      <point x="{width}" y="700" type="line"/>
      <point x="0" y="700" type="line"/>
    </contour>
  </outline>"#
    )
}

pub struct GlyphSpec<'a> {
    pub name: &'a str,
    pub unicode: Option<u32>,
    pub width: f64,
    pub outline: String,
    pub height: Option<f64>,
    pub vertical_origin: Option<f64>,
}

impl<'a> GlyphSpec<'a> {
    pub fn new(name: &'a str, unicode: Option<u32>, width: f64) -> Self {
        GlyphSpec {
            name,
            unicode,
            width,
            outline: box_outline(width),
            height: None,
            vertical_origin: None,
        }
    }

    pub fn vertical(mut self, height: f64, origin: f64) -> Self {
        self.height = Some(height);
        self.vertical_origin = Some(origin);
        self
    }
}

/// Write a UFO 3 with the given glyphs and feature code.
pub fn write_ufo(path: &Path, family: &str, glyphs: &[GlyphSpec], features: &str) -> PathBuf {
    let glyph_dir = path.join("glyphs");
    std::fs::create_dir_all(&glyph_dir).unwrap();
    std::fs::write(
        path.join("metainfo.plist"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>creator</key><string>org.test</string>
<key>formatVersion</key><integer>3</integer>
</dict></plist>"#,
    )
    .unwrap();
    std::fs::write(
        path.join("fontinfo.plist"),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>familyName</key><string>{family}</string>
<key>unitsPerEm</key><integer>1000</integer>
<key>ascender</key><integer>750</integer>
<key>descender</key><integer>-250</integer>
</dict></plist>"#
        ),
    )
    .unwrap();
    std::fs::write(
        path.join("layercontents.plist"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><array>
<array><string>public.default</string><string>glyphs</string></array>
</array></plist>"#,
    )
    .unwrap();
    std::fs::write(path.join("features.fea"), features).unwrap();
    let mut contents =
        String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\"><dict>\n");
    for glyph in glyphs {
        let file = format!("{}.glif", glyph.name.replace('.', "_"));
        let unicode = glyph
            .unicode
            .map(|u| format!("<unicode hex=\"{u:04X}\"/>"))
            .unwrap_or_default();
        let height = glyph
            .height
            .map(|h| format!(" height=\"{h}\""))
            .unwrap_or_default();
        let lib = glyph
            .vertical_origin
            .map(|v| {
                format!("<lib><dict><key>public.verticalOrigin</key><integer>{v}</integer></dict></lib>")
            })
            .unwrap_or_default();
        std::fs::write(
            glyph_dir.join(&file),
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<glyph name=\"{}\" format=\"2\">\n  <advance width=\"{}\"{}/>\n  {}\n  {}\n  {}\n</glyph>\n",
                glyph.name, glyph.width, height, unicode, glyph.outline, lib
            ),
        )
        .unwrap();
        contents.push_str(&format!("<key>{}</key><string>{}</string>\n", glyph.name, file));
    }
    contents.push_str("</dict></plist>\n");
    std::fs::write(glyph_dir.join("contents.plist"), contents).unwrap();
    path.to_path_buf()
}

/// A UFO with `count` plain glyphs, slow enough to compile that a job on
/// it can be cancelled part way through.
pub fn write_large_ufo(dir: &Path, count: usize) -> PathBuf {
    let names: Vec<String> = (0..count).map(|i| format!("g{i:05}")).collect();
    let glyphs: Vec<GlyphSpec> = names
        .iter()
        .map(|name| GlyphSpec::new(name, None, 500.0))
        .collect();
    write_ufo(&dir.join("Large.ufo"), "Large", &glyphs, "")
}

pub const LIGA_FEATURES: &str = "languagesystem DFLT dflt;
languagesystem latn dflt;

feature liga {
    sub f i by f_i;
} liga;
";

/// A UFO that spells "fierce" with an `f_i` ligature.
pub fn write_liga_ufo(dir: &Path) -> PathBuf {
    let glyphs = [
        GlyphSpec::new("f", Some('f' as u32), 300.0),
        GlyphSpec::new("i", Some('i' as u32), 250.0),
        GlyphSpec::new("e", Some('e' as u32), 500.0),
        GlyphSpec::new("r", Some('r' as u32), 350.0),
        GlyphSpec::new("c", Some('c' as u32), 450.0),
        GlyphSpec::new("f_i", None, 520.0),
    ];
    write_ufo(&dir.join("Liga.ufo"), "Liga", &glyphs, LIGA_FEATURES)
}

/// A UFO with Latin and Hebrew letters; `A` carries its own vertical
/// metrics.
pub fn write_mixed_ufo(dir: &Path) -> PathBuf {
    let glyphs = [
        GlyphSpec::new("A", Some('A' as u32), 600.0).vertical(900.0, 820.0),
        GlyphSpec::new("B", Some('B' as u32), 500.0),
        GlyphSpec::new("a", Some('a' as u32), 450.0),
        GlyphSpec::new("b", Some('b' as u32), 460.0),
        GlyphSpec::new("alef", Some(0x05D0), 550.0),
        GlyphSpec::new("bet", Some(0x05D1), 530.0),
    ];
    write_ufo(&dir.join("Mixed.ufo"), "Mixed", &glyphs, "")
}

pub const DESIGNSPACE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<designspace format="4.1">
  <axes>
    <axis tag="wght" name="Weight" minimum="100" maximum="900" default="100"/>
  </axes>
  <sources>
    <source filename="Light.ufo" name="Light">
      <location><dimension name="Weight" xvalue="100"/></location>
    </source>
    <source filename="Bold.ufo" name="Bold">
      <location><dimension name="Weight" xvalue="900"/></location>
    </source>
  </sources>
  <instances>
    <instance name="Var Medium" stylename="Medium">
      <location><dimension name="Weight" xvalue="500"/></location>
    </instance>
  </instances>
</designspace>
"#;

/// Two masters whose `A` is 400 units wide when light and 800 when bold.
pub fn write_designspace(dir: &Path) -> PathBuf {
    write_ufo(
        &dir.join("Light.ufo"),
        "Var",
        &[GlyphSpec::new("A", Some('A' as u32), 400.0)],
        "",
    );
    write_ufo(
        &dir.join("Bold.ufo"),
        "Var",
        &[GlyphSpec::new("A", Some('A' as u32), 800.0)],
        "",
    );
    let path = dir.join("Var.designspace");
    std::fs::write(&path, DESIGNSPACE).unwrap();
    path
}
