//! Build a shapeable variable font from the minimal master fonts of a
//! designspace.
//!
//! Only the default master's layout is kept. Other masters are checked for
//! layout compatibility; a `Merge` error names the offending table so the
//! caller can leave it out and try again. Tables kept or left out this way
//! are recorded in the output font.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use norad::designspace::{DesignSpaceDocument, Dimension};
use write_fonts::{
    from_obj::ToOwnedTable,
    read::{FontRef, ReadError, TableProvider},
    tables::fvar::{AxisInstanceArrays, Fvar, InstanceRecord, VariationAxisRecord},
    types::NameId,
    FontBuilder,
};

use super::{
    check_interrupt,
    tables::{avar, fixed, name_table, AVAR, MASTER_MODEL_TAG, UNMERGED_TAG},
    CompileError,
};
use crate::{
    axis::DesignAxis,
    model::{VariationModel, VariationModelError},
    shaper::name_string,
    Tag, VariationLocation,
};

pub const GSUB: Tag = Tag::new(b"GSUB");
pub const GPOS: Tag = Tag::new(b"GPOS");
pub const GDEF: Tag = Tag::new(b"GDEF");
const FVAR: Tag = Tag::new(b"fvar");
const NAME: Tag = Tag::new(b"name");

/// Tables never carried into the variable font.
pub const DEFAULT_EXCLUDE: [Tag; 4] = [
    Tag::new(b"MVAR"),
    Tag::new(b"HVAR"),
    Tag::new(b"VVAR"),
    Tag::new(b"STAT"),
];

/// One master of a designspace.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignspaceSource {
    pub name: String,
    pub path: PathBuf,
    pub layer: Option<String>,
    /// Design coordinates for every axis.
    pub location: VariationLocation,
    pub normalized: VariationLocation,
}

/// A named instance in user coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignspaceInstance {
    pub name: String,
    pub location: VariationLocation,
}

/// The parts of a designspace document the previewer needs.
#[derive(Debug, Clone)]
pub struct Designspace {
    pub path: PathBuf,
    pub axes: Vec<DesignAxis>,
    pub sources: Vec<DesignspaceSource>,
    pub instances: Vec<DesignspaceInstance>,
    pub default_index: usize,
}

impl Designspace {
    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let ds = DesignSpaceDocument::load(path)?;
        let axes = ds
            .axes
            .iter()
            .map(DesignAxis::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CompileError::Designspace(e.to_string()))?;
        if axes.is_empty() {
            return Err(CompileError::Designspace("no axes".to_string()));
        }
        let base = path.parent().unwrap_or(Path::new(""));
        let sources: Vec<DesignspaceSource> = ds
            .sources
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let location = design_location(&axes, &source.location);
                DesignspaceSource {
                    name: source
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("master {i}")),
                    path: base.join(&source.filename),
                    layer: source.layer.clone(),
                    normalized: normalize(&axes, &location),
                    location,
                }
            })
            .collect();
        let default_index = sources
            .iter()
            .position(|s| s.normalized.values().all(|v| *v == 0.0))
            .ok_or_else(|| CompileError::Designspace("no default master".to_string()))?;
        let instances = ds
            .instances
            .iter()
            .enumerate()
            .map(|(i, instance)| DesignspaceInstance {
                name: instance
                    .stylename
                    .clone()
                    .or_else(|| instance.name.clone())
                    .unwrap_or_else(|| format!("Instance {}", i + 1)),
                location: user_location(&axes, &instance.location),
            })
            .collect();
        Ok(Designspace {
            path: path.to_path_buf(),
            axes,
            sources,
            instances,
            default_index,
        })
    }

    pub fn default_source(&self) -> &DesignspaceSource {
        &self.sources[self.default_index]
    }

    pub fn axis_order(&self) -> Vec<Tag> {
        self.axes.iter().map(|a| a.tag).collect()
    }

    /// The interpolation model over all masters.
    pub fn model(&self) -> Result<VariationModel, VariationModelError> {
        let locations: Vec<VariationLocation> =
            self.sources.iter().map(|s| s.normalized.clone()).collect();
        VariationModel::new(&locations, self.axis_order())
    }

    /// Normalize a user-space location; missing axes are at their default.
    pub fn normalize_user_location(&self, location: &VariationLocation) -> VariationLocation {
        self.axes
            .iter()
            .map(|axis| {
                let value = location.get(&axis.tag).copied().unwrap_or(axis.default);
                (axis.tag, axis.normalize_userspace_value(value))
            })
            .collect()
    }

    /// Where the worker writes the minimal font of master `index`.
    pub fn master_tt_path(tt_folder: &Path, index: usize) -> PathBuf {
        tt_folder.join(format!("master_{index}.ttf"))
    }
}

fn dimension_value<'a>(axis: &DesignAxis, dims: &'a [Dimension]) -> Option<&'a Dimension> {
    dims.iter().find(|d| d.name == axis.name)
}

fn design_location(axes: &[DesignAxis], dims: &[Dimension]) -> VariationLocation {
    axes.iter()
        .map(|axis| {
            let dim = dimension_value(axis, dims);
            let value = dim
                .and_then(|d| d.xvalue)
                .map(|v| v as f64)
                .or_else(|| {
                    dim.and_then(|d| d.uservalue)
                        .map(|u| axis.userspace_to_designspace(u as f64))
                })
                .unwrap_or_else(|| axis.userspace_to_designspace(axis.default));
            (axis.tag, value)
        })
        .collect()
}

fn user_location(axes: &[DesignAxis], dims: &[Dimension]) -> VariationLocation {
    axes.iter()
        .map(|axis| {
            let dim = dimension_value(axis, dims);
            let value = dim
                .and_then(|d| d.uservalue)
                .map(|v| v as f64)
                .or_else(|| {
                    dim.and_then(|d| d.xvalue)
                        .map(|x| axis.designspace_to_userspace(x as f64))
                })
                .unwrap_or(axis.default);
            (axis.tag, value)
        })
        .collect()
}

fn normalize(axes: &[DesignAxis], design: &VariationLocation) -> VariationLocation {
    axes.iter()
        .map(|axis| {
            let value = design.get(&axis.tag).copied().unwrap_or(0.0);
            (axis.tag, axis.normalize_designspace_value(value))
        })
        .collect()
}

/// Feature tags with their lookup indices, plus the lookup count.
type LayoutShape = (Vec<(Tag, Vec<u16>)>, u16);

fn gpos_shape(font: &FontRef) -> Result<Option<LayoutShape>, ReadError> {
    let gpos = match font.gpos() {
        Err(ReadError::TableIsMissing(_)) => return Ok(None),
        other => other?,
    };
    let feature_list = gpos.feature_list()?;
    let mut features = vec![];
    for record in feature_list.feature_records() {
        let feature = record.feature(feature_list.offset_data())?;
        features.push((
            record.feature_tag(),
            feature
                .lookup_list_indices()
                .iter()
                .map(|i| i.get())
                .collect(),
        ));
    }
    Ok(Some((features, gpos.lookup_list()?.lookup_count())))
}

/// Layout differences that leave the default master's table in place.
pub type MergeNotes = BTreeMap<Tag, String>;

/// Check that the masters' layout can share one set of tables. Positioning
/// that differs only in its values is kept from the default master and
/// noted in `notes`.
fn check_compatible(
    ds: &Designspace,
    masters: &[Vec<u8>],
    exclude: &BTreeSet<Tag>,
    notes: &mut MergeNotes,
) -> Result<(), CompileError> {
    let default = FontRef::new(&masters[ds.default_index])?;
    let default_gsub = owned_gsub(&default)?;
    let default_gpos_shape = gpos_shape(&default)?;
    let default_gpos = owned_gpos(&default)?;
    let mut differing_values = vec![];
    for (source, data) in ds.sources.iter().zip(masters) {
        check_interrupt()?;
        let font = FontRef::new(data)?;
        if !exclude.contains(&GSUB) && owned_gsub(&font)? != default_gsub {
            return Err(CompileError::Merge {
                table: GSUB,
                reason: format!("substitutions of {} differ from the default", source.name),
            });
        }
        if exclude.contains(&GPOS) {
            continue;
        }
        if gpos_shape(&font)? != default_gpos_shape {
            return Err(CompileError::Merge {
                table: GPOS,
                reason: format!("positioning lookups of {} differ from the default", source.name),
            });
        }
        if owned_gpos(&font)? != default_gpos {
            differing_values.push(source.name.clone());
        }
    }
    if !differing_values.is_empty() {
        notes.insert(
            GPOS,
            format!(
                "positioning values of {} differ; using the default master's",
                differing_values.join(", ")
            ),
        );
    }
    Ok(())
}

fn owned_gsub(font: &FontRef) -> Result<Option<write_fonts::tables::gsub::Gsub>, ReadError> {
    match font.gsub() {
        Err(ReadError::TableIsMissing(_)) => Ok(None),
        other => Ok(Some(other?.to_owned_table())),
    }
}

fn owned_gpos(font: &FontRef) -> Result<Option<write_fonts::tables::gpos::Gpos>, ReadError> {
    match font.gpos() {
        Err(ReadError::TableIsMissing(_)) => Ok(None),
        other => Ok(Some(other?.to_owned_table())),
    }
}

/// Merge the compiled masters (in source order) into one variable font.
/// Tables taken from the default master without merging are listed, with
/// the reason, in the [`UNMERGED_TAG`] table; `notes` seeds that list.
pub fn merge_masters(
    ds: &Designspace,
    masters: &[Vec<u8>],
    exclude: &BTreeSet<Tag>,
    notes: &MergeNotes,
) -> Result<Vec<u8>, CompileError> {
    if masters.len() != ds.sources.len() {
        return Err(CompileError::Designspace(format!(
            "expected {} masters, got {}",
            ds.sources.len(),
            masters.len()
        )));
    }
    let mut notes = notes.clone();
    check_compatible(ds, masters, exclude, &mut notes)?;
    let default = FontRef::new(&masters[ds.default_index])?;

    let family = name_string(&default, NameId::FAMILY_NAME).unwrap_or_else(|| {
        ds.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".to_string())
    });
    let mut names = vec![
        (NameId::FAMILY_NAME, family.clone()),
        (
            NameId::SUBFAMILY_NAME,
            name_string(&default, NameId::SUBFAMILY_NAME).unwrap_or_else(|| "Regular".into()),
        ),
        (NameId::FULL_NAME, format!("{family} Variable")),
        (
            NameId::POSTSCRIPT_NAME,
            format!("{family}-Variable").replace(' ', ""),
        ),
    ];
    let mut next_id = 256u16;
    let mut axes = vec![];
    let mut instances = vec![];
    for axis in &ds.axes {
        names.push((NameId::new(next_id), axis.name.clone()));
        axes.push(VariationAxisRecord {
            axis_tag: axis.tag,
            min_value: fixed(axis.min),
            default_value: fixed(axis.default),
            max_value: fixed(axis.max),
            flags: if axis.hidden { 0x0001 } else { 0 },
            axis_name_id: NameId::new(next_id),
        });
        next_id += 1;
    }
    for instance in &ds.instances {
        names.push((NameId::new(next_id), instance.name.clone()));
        instances.push(InstanceRecord {
            subfamily_name_id: NameId::new(next_id),
            coordinates: ds
                .axes
                .iter()
                .map(|axis| fixed(instance.location.get(&axis.tag).copied().unwrap_or(axis.default)))
                .collect(),
            ..Default::default()
        });
        next_id += 1;
    }
    let fvar = Fvar::new(AxisInstanceArrays::new(axes, instances));

    let mut builder = FontBuilder::new();
    builder.add_table(&fvar)?;
    builder.add_table(&name_table(&names))?;
    let segments: Vec<Option<Vec<(f64, f64)>>> =
        ds.axes.iter().map(|a| a.avar_segments()).collect();
    if segments.iter().any(Option::is_some) {
        builder.add_raw(AVAR, avar(&segments));
    }
    let model = ds
        .model()
        .map_err(|e| CompileError::Designspace(e.to_string()))?;
    builder.add_raw(MASTER_MODEL_TAG, serde_json::to_vec(&model.to_serialized())?);
    if !notes.is_empty() {
        let notes: BTreeMap<String, &String> =
            notes.iter().map(|(tag, reason)| (tag.to_string(), reason)).collect();
        builder.add_raw(UNMERGED_TAG, serde_json::to_vec(&notes)?);
    }

    let mut dropped = exclude.clone();
    if exclude.contains(&GPOS) {
        dropped.insert(GDEF);
    }
    for record in default.table_directory().table_records() {
        check_interrupt()?;
        let tag = record.tag();
        if dropped.contains(&tag) || builder.contains(tag) || tag == FVAR || tag == NAME {
            continue;
        }
        if let Some(data) = default.table_data(tag) {
            builder.add_raw(tag, data.as_bytes().to_vec());
        }
    }
    Ok(builder.build())
}

/// Worker entry point: merge `master_<i>.ttf` files from `tt_folder` into
/// a variable font at `out_path`. A layout merge failure is retried once
/// without the offending table.
pub fn compile_designspace_to_path(
    ds_path: &Path,
    tt_folder: &Path,
    out_path: &Path,
    extra_exclude: &[Tag],
    output: &mut dyn Write,
) -> Result<(), CompileError> {
    let ds = Designspace::load(ds_path)?;
    let mut masters = Vec::with_capacity(ds.sources.len());
    for index in 0..ds.sources.len() {
        check_interrupt()?;
        masters.push(std::fs::read(Designspace::master_tt_path(tt_folder, index))?);
    }
    let mut exclude: BTreeSet<Tag> = DEFAULT_EXCLUDE.iter().chain(extra_exclude).copied().collect();
    let data = match merge_masters(&ds, &masters, &exclude, &MergeNotes::new()) {
        Err(CompileError::Merge { table, reason }) if table == GSUB || table == GPOS => {
            log::warn!("Merging {} failed in {}: {}", ds_path.display(), table, reason);
            writeln!(output, "Could not merge {table}: {reason}; leaving it out")?;
            exclude.insert(table);
            if table == GPOS {
                exclude.insert(GDEF);
            }
            let notes = MergeNotes::from([(table, format!("left out: {reason}"))]);
            merge_masters(&ds, &masters, &exclude, &notes)?
        }
        other => other?,
    };
    std::fs::write(out_path, data)?;
    Ok(())
}

/// Parse a comma-separated table list such as `MVAR,HVAR`.
pub fn parse_exclude(s: &str) -> Vec<Tag> {
    s.split(',')
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| crate::tag_from_str(t.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::compilers::features::compile_features;
    use crate::compilers::tables::MinimalFont;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use write_fonts::read::tables::fvar::Fvar as ReadFvar;

    const DS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<designspace format="4.1">
  <axes>
    <axis tag="wght" name="Weight" minimum="100" maximum="900" default="100">
      <map input="100" output="0"/>
      <map input="900" output="1000"/>
    </axis>
  </axes>
  <sources>
    <source filename="Light.ufo" name="Light">
      <location><dimension name="Weight" xvalue="0"/></location>
    </source>
    <source filename="Bold.ufo" name="Bold">
      <location><dimension name="Weight" xvalue="1000"/></location>
    </source>
  </sources>
  <instances>
    <instance name="Test Medium" stylename="Medium">
      <location><dimension name="Weight" xvalue="500"/></location>
    </instance>
  </instances>
</designspace>
"#;

    fn master(width: f64) -> Vec<u8> {
        MinimalFont {
            glyph_order: vec![".notdef".into(), "A".into()],
            advance_widths: vec![500.0, width],
            advance_heights: vec![1000.0, 1000.0],
            vertical_origins: vec![800.0, 800.0],
            cmap: BTreeMap::from([(0x41, "A".to_string())]),
            units_per_em: 1000,
            ascender: 800.0,
            descender: -200.0,
            names: vec![(NameId::FAMILY_NAME, "Test".to_string())],
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    #[test]
    fn loads_sources_and_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Test.designspace");
        std::fs::write(&path, DS).unwrap();
        let ds = Designspace::load(&path).unwrap();
        assert_eq!(ds.default_index, 0);
        assert_eq!(ds.sources[1].path, dir.path().join("Bold.ufo"));
        assert_eq!(
            ds.sources[1].normalized,
            VariationLocation::from([(Tag::new(b"wght"), 1.0)])
        );
        assert_eq!(ds.instances[0].name, "Medium");
        assert_eq!(
            ds.instances[0].location,
            VariationLocation::from([(Tag::new(b"wght"), 500.0)])
        );
    }

    #[test]
    fn merges_into_a_variable_font() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Test.designspace");
        std::fs::write(&path, DS).unwrap();
        std::fs::write(Designspace::master_tt_path(dir.path(), 0), master(500.0)).unwrap();
        std::fs::write(Designspace::master_tt_path(dir.path(), 1), master(700.0)).unwrap();
        let out = dir.path().join("Test.ttf");
        let mut output = vec![];
        compile_designspace_to_path(&path, dir.path(), &out, &[], &mut output).unwrap();
        assert!(output.is_empty());

        let data = std::fs::read(&out).unwrap();
        let font = FontRef::new(&data).unwrap();
        let fvar: ReadFvar = font.fvar().unwrap();
        let axes = fvar.axes().unwrap();
        assert_eq!(axes.len(), 1);
        assert_eq!(axes[0].axis_tag(), Tag::new(b"wght"));
        assert_eq!(axes[0].max_value().to_f64(), 900.0);
        assert_eq!(fvar.instances().unwrap().len(), 1);
        assert!(font.table_data(MASTER_MODEL_TAG).is_some());
        assert!(font.table_data(AVAR).is_none());
        assert_eq!(
            name_string(&font, NameId::new(257)).as_deref(),
            Some("Medium")
        );
        let face = rustybuzz::Face::from_slice(&data, 0).unwrap();
        assert_eq!(face.variation_axes().len(), 1);
    }

    fn layout_master(features: &str) -> Vec<u8> {
        let glyph_order: Vec<String> = [".notdef", "A", "V", "A.alt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let layout = compile_features(features, &glyph_order, dir.path()).unwrap();
        MinimalFont {
            glyph_order,
            advance_widths: vec![500.0, 600.0, 600.0, 600.0],
            advance_heights: vec![1000.0; 4],
            vertical_origins: vec![800.0; 4],
            cmap: BTreeMap::from([(0x41, "A".to_string()), (0x56, "V".to_string())]),
            units_per_em: 1000,
            ascender: 800.0,
            descender: -200.0,
            names: vec![(NameId::FAMILY_NAME, "Test".to_string())],
            extra_tables: layout,
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    /// Merge two masters and return the variable font plus the job output.
    fn merge_pair(light: Vec<u8>, bold: Vec<u8>) -> (Vec<u8>, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Test.designspace");
        std::fs::write(&path, DS).unwrap();
        std::fs::write(Designspace::master_tt_path(dir.path(), 0), light).unwrap();
        std::fs::write(Designspace::master_tt_path(dir.path(), 1), bold).unwrap();
        let out = dir.path().join("Test.ttf");
        let mut output = vec![];
        compile_designspace_to_path(&path, dir.path(), &out, &[], &mut output).unwrap();
        (std::fs::read(&out).unwrap(), String::from_utf8(output).unwrap())
    }

    fn unmerged(data: &[u8]) -> Option<BTreeMap<String, String>> {
        let font = FontRef::new(data).unwrap();
        font.table_data(UNMERGED_TAG)
            .map(|d| serde_json::from_slice(d.as_bytes()).unwrap())
    }

    fn kerned_advance(data: &[u8]) -> i32 {
        let face = rustybuzz::Face::from_slice(data, 0).unwrap();
        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str("AV");
        let output = rustybuzz::shape(&face, &[], buffer);
        output.glyph_positions()[0].x_advance
    }

    #[test]
    fn identical_layout_merges_cleanly() {
        let fea = "feature salt { sub A by A.alt; } salt;\nfeature kern { pos A V -80; } kern;\n";
        let (data, output) = merge_pair(layout_master(fea), layout_master(fea));
        assert_eq!(output, "");
        let font = FontRef::new(&data).unwrap();
        assert!(font.gsub().is_ok());
        assert!(font.gpos().is_ok());
        assert_eq!(unmerged(&data), None);
        assert_eq!(kerned_advance(&data), 520);
    }

    #[test]
    fn differing_kerning_is_recorded() {
        let (data, output) = merge_pair(
            layout_master("feature kern { pos A V -80; } kern;"),
            layout_master("feature kern { pos A V -120; } kern;"),
        );
        assert_eq!(output, "");
        assert_eq!(
            unmerged(&data),
            Some(BTreeMap::from([(
                "GPOS".to_string(),
                "positioning values of Bold differ; using the default master's".to_string()
            )]))
        );
        // The default master's kerning is what gets shaped
        assert_eq!(kerned_advance(&data), 520);
    }

    #[test]
    fn differing_substitutions_are_left_out() {
        let (data, output) = merge_pair(
            layout_master("feature salt { sub A by A.alt; } salt;"),
            layout_master("feature salt { sub V by A.alt; } salt;"),
        );
        assert!(output.starts_with("Could not merge GSUB: substitutions of Bold differ"));
        let font = FontRef::new(&data).unwrap();
        assert!(font.gsub().is_err());
        let notes = unmerged(&data).unwrap();
        assert!(notes["GSUB"].starts_with("left out: substitutions of Bold differ"));
    }

    #[test]
    fn exclude_lists() {
        assert_eq!(
            parse_exclude("GSUB, GPOS,"),
            vec![Tag::new(b"GSUB"), Tag::new(b"GPOS")]
        );
    }
}
