//! Layout features for the minimal UFO compiler.
//!
//! The UFO's own `features.fea` is used as-is; `kern`, `mark` and `mkmk`
//! features are generated from kerning, groups and anchors when the feature
//! file does not define them itself.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use fea_rs_ast::fea_rs;
use fea_rs_ast::fea_rs::parse::{SourceLoadError, SourceResolver};
use regex::Regex;
use thiserror::Error;
use write_fonts::read::FontRef;

use super::tables::AnchorRecord;
use crate::Tag;

#[allow(clippy::unwrap_used)] // Literal pattern, checked by the tests
static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"include\s*\(\s*([^)\s]+)\s*\)").unwrap());

const ROOT_NAME: &str = "features.fea";
const LAYOUT_TABLES: [Tag; 3] = [Tag::new(b"GDEF"), Tag::new(b"GSUB"), Tag::new(b"GPOS")];

#[derive(Debug, Error)]
pub enum FeatureError {
    /// The feature file did not compile; the font is built without layout.
    #[error("{0}")]
    Compile(String),
    #[error("Could not read compiled features: {0}")]
    Read(#[from] write_fonts::read::ReadError),
}

/// Paths named by `include()` statements, resolved against `base`.
pub fn external_includes(features: &str, base: &Path) -> Vec<PathBuf> {
    INCLUDE_RE
        .captures_iter(features)
        .map(|cap| base.join(cap[1].trim_matches(|c| c == '"' || c == '\'')))
        .collect()
}

fn defines_feature(features: &str, tag: &str) -> bool {
    Regex::new(&format!(r"\bfeature\s+{tag}\s*\{{"))
        .map(|re| re.is_match(features))
        .unwrap_or(false)
}

/// A FEA-safe class or lookup name.
fn fea_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        out.insert(0, '_');
    }
    out.truncate(60);
    out
}

fn is_kern_group(name: &str) -> bool {
    name.starts_with("public.kern")
}

/// FEA for the `kern` feature; empty if there is nothing to kern.
pub fn kern_feature(
    kerning: &norad::Kerning,
    groups: &norad::Groups,
    glyphs: &HashSet<&str>,
) -> String {
    let mut classes = String::new();
    let mut defined: HashSet<&str> = HashSet::new();
    for (name, members) in groups.iter().filter(|(name, _)| is_kern_group(name)) {
        let members: Vec<&str> = members
            .iter()
            .map(|m| m.as_str())
            .filter(|m| glyphs.contains(m))
            .collect();
        if members.is_empty() {
            continue;
        }
        defined.insert(name.as_str());
        let _ = writeln!(classes, "@{} = [{}];", fea_name(name), members.join(" "));
    }
    let side = |name: &str| -> Option<(String, bool)> {
        if is_kern_group(name) {
            defined
                .contains(name)
                .then(|| (format!("@{}", fea_name(name)), true))
        } else {
            glyphs.contains(name).then(|| (name.to_string(), false))
        }
    };

    // Glyph pairs must come before class pairs so they take precedence.
    let (mut specific, mut exceptions, mut general) = (vec![], vec![], vec![]);
    for (left, rights) in kerning.iter() {
        for (right, value) in rights.iter() {
            let (Some((l, l_class)), Some((r, r_class))) = (side(left), side(right)) else {
                log::debug!("Skipping kerning pair {left} {right}");
                continue;
            };
            let value = value.round() as i64;
            match (l_class, r_class) {
                (false, false) => specific.push(format!("    pos {l} {r} {value};")),
                (true, true) => general.push(format!("    pos {l} {r} {value};")),
                _ => exceptions.push(format!("    enum pos {l} {r} {value};")),
            }
        }
    }
    if specific.is_empty() && exceptions.is_empty() && general.is_empty() {
        return String::new();
    }
    let mut fea = classes;
    fea.push_str("feature kern {\n");
    for line in specific.iter().chain(&exceptions).chain(&general) {
        fea.push_str(line);
        fea.push('\n');
    }
    fea.push_str("} kern;\n");
    fea
}

/// FEA for the `mark` and `mkmk` features, one lookup per anchor name.
pub fn mark_features(
    anchors: &BTreeMap<String, Vec<AnchorRecord>>,
    glyphs: &HashSet<&str>,
) -> (String, String) {
    // anchor name (without underscore) -> [(glyph, x, y)]
    let mut mark_anchors: BTreeMap<&str, Vec<(&str, i64, i64)>> = BTreeMap::new();
    let mut base_anchors: BTreeMap<&str, Vec<(&str, i64, i64)>> = BTreeMap::new();
    let mut marks: BTreeSet<&str> = BTreeSet::new();
    for (glyph, records) in anchors {
        if !glyphs.contains(glyph.as_str()) {
            continue;
        }
        for anchor in records {
            let (Some(name), Some((x, y))) = (anchor.name(), anchor.position()) else {
                continue;
            };
            let point = (glyph.as_str(), x.round() as i64, y.round() as i64);
            if let Some(stripped) = name.strip_prefix('_') {
                marks.insert(glyph.as_str());
                mark_anchors.entry(stripped).or_default().push(point);
            } else {
                base_anchors.entry(name).or_default().push(point);
            }
        }
    }

    let mut classes = String::new();
    for (name, points) in &mark_anchors {
        for (glyph, x, y) in points {
            let _ = writeln!(
                classes,
                "markClass {glyph} <anchor {x} {y}> @MC_{};",
                fea_name(name)
            );
        }
    }
    let mut mark = String::new();
    let mut mkmk = String::new();
    for (name, points) in &base_anchors {
        if !mark_anchors.contains_key(name) {
            continue;
        }
        let class = format!("@MC_{}", fea_name(name));
        let (on_marks, on_bases): (Vec<_>, Vec<_>) =
            points.iter().partition(|(glyph, _, _)| marks.contains(glyph));
        for (fea, kind, label, points) in [
            (&mut mark, "base", "mark", on_bases),
            (&mut mkmk, "mark", "mkmk", on_marks),
        ] {
            if points.is_empty() {
                continue;
            }
            let lookup = format!("{label}_{}", fea_name(name));
            let _ = writeln!(fea, "    lookup {lookup} {{");
            for (glyph, x, y) in points {
                let _ = writeln!(fea, "        pos {kind} {glyph} <anchor {x} {y}> mark {class};");
            }
            let _ = writeln!(fea, "    }} {lookup};");
        }
    }
    let wrap = |tag: &str, body: String| {
        if body.is_empty() {
            String::new()
        } else {
            format!("feature {tag} {{\n{body}}} {tag};\n")
        }
    };
    let mark = wrap("mark", mark);
    let mkmk = wrap("mkmk", mkmk);
    if mark.is_empty() && mkmk.is_empty() {
        return (String::new(), String::new());
    }
    (classes + &mark, mkmk)
}

/// The feature file text plus whatever generated features it lacks.
pub fn features_with_generated(
    features: &str,
    glyph_order: &[String],
    kerning: &norad::Kerning,
    groups: &norad::Groups,
    anchors: &BTreeMap<String, Vec<AnchorRecord>>,
) -> String {
    let glyphs: HashSet<&str> = glyph_order.iter().map(String::as_str).collect();
    let mut text = features.to_string();
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    if !defines_feature(features, "kern") {
        text.push_str(&kern_feature(kerning, groups, &glyphs));
    }
    // The mark classes travel with the generated `mark` feature.
    if !defines_feature(features, "mark") {
        let (mark, mkmk) = mark_features(anchors, &glyphs);
        text.push_str(&mark);
        if !defines_feature(features, "mkmk") {
            text.push_str(&mkmk);
        }
    }
    text
}

/// Serves the in-memory feature text as the root file and reads includes
/// from disk.
struct FeatureResolver {
    root: Arc<str>,
    files: fea_rs::parse::FileSystemResolver,
}

impl SourceResolver for FeatureResolver {
    fn get_contents(&self, path: &Path) -> Result<Arc<str>, SourceLoadError> {
        if path == Path::new(ROOT_NAME) {
            return Ok(self.root.clone());
        }
        log::info!("Resolving include: {}", path.display());
        self.files.get_contents(path)
    }

    fn resolve_raw_path(&self, path: &Path, included_from: Option<&Path>) -> PathBuf {
        if included_from.is_none() && path == Path::new(ROOT_NAME) {
            return path.to_path_buf();
        }
        self.files.resolve_raw_path(path, included_from)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, SourceLoadError> {
        if path == Path::new(ROOT_NAME) {
            return Ok(path.to_path_buf());
        }
        self.files.canonicalize(path)
    }
}

/// Compile feature text against `glyph_order`, resolving includes relative to
/// `include_dir`, and return the binary layout tables.
pub fn compile_features(
    features: &str,
    glyph_order: &[String],
    include_dir: &Path,
) -> Result<Vec<(Tag, Vec<u8>)>, FeatureError> {
    if features.trim().is_empty() {
        return Ok(vec![]);
    }
    let glyph_map = fea_rs::GlyphMap::from_iter(glyph_order.iter().map(String::as_str));
    let compiler = fea_rs::Compiler::<'_, fea_rs::compile::NopFeatureProvider, fea_rs::compile::NopVariationInfo>::new(ROOT_NAME, &glyph_map)
        .print_warnings(false)
        .with_resolver(FeatureResolver {
            root: Arc::from(features),
            files: fea_rs::parse::FileSystemResolver::new(include_dir.to_path_buf()),
        });
    let binary = compiler
        .compile_binary()
        .map_err(|e| FeatureError::Compile(e.to_string()))?;
    let font = FontRef::new(&binary)?;
    Ok(LAYOUT_TABLES
        .iter()
        .filter_map(|tag| {
            font.table_data(*tag)
                .map(|data| (*tag, data.as_bytes().to_vec()))
        })
        .collect())
}
