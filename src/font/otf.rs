//! Fonts opened straight from OpenType binaries, and the `fvar`, `COLR` and
//! `CPAL` queries shared by every font kind.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use write_fonts::read::{FontRef, ReadError, TableProvider};
use write_fonts::types::GlyphId;

use super::{woff::normalize_sfnt, Font, FontKind, GlyphSource};
use crate::{glyphsrun::Color, shaper::name_string, AxisInfo, FontGogglesError, Tag, VariationLocation};

/// The color index that means "use the foreground color".
const FOREGROUND: u16 = 0xFFFF;
const HIDDEN_AXIS: u16 = 0x0001;

/// Read a font file, unwrapping WOFF and WOFF2.
pub(crate) fn read_sfnt(path: &Path) -> Result<Arc<[u8]>, FontGogglesError> {
    let data = std::fs::read(path)?;
    Ok(normalize_sfnt(data, path)?.into())
}

/// Open face `face_index` of sfnt `data`.
pub(crate) fn open(path: &Path, face_index: u32, data: Arc<[u8]>) -> Result<Font, FontGogglesError> {
    Font::from_sfnt(
        path,
        face_index,
        FontKind::Otf,
        data,
        GlyphSource::Sfnt,
        None,
    )
}

fn instance_label(location: &VariationLocation) -> String {
    location
        .iter()
        .map(|(tag, value)| format!("{tag}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Axes and named instances from `fvar`, in user coordinates.
pub(crate) fn axes_and_instances(
    font: &FontRef<'_>,
) -> Result<(IndexMap<Tag, AxisInfo>, Vec<(String, VariationLocation)>), ReadError> {
    let fvar = match font.fvar() {
        Ok(fvar) => fvar,
        Err(ReadError::TableIsMissing(_)) => return Ok((IndexMap::new(), vec![])),
        Err(e) => return Err(e),
    };
    let records = fvar.axes()?;
    let mut axes = IndexMap::new();
    for record in records {
        let tag = record.axis_tag();
        let name = name_string(font, record.axis_name_id()).unwrap_or_else(|| tag.to_string());
        let mut info = AxisInfo::new(
            name,
            record.min_value().to_f64(),
            record.default_value().to_f64(),
            record.max_value().to_f64(),
        );
        info.hidden = record.flags() & HIDDEN_AXIS != 0;
        axes.insert(tag, info);
    }
    let mut instances = vec![];
    for instance in fvar.instances()?.iter() {
        let instance = instance?;
        let location: VariationLocation = records
            .iter()
            .zip(instance.coordinates)
            .map(|(record, value)| (record.axis_tag(), value.get().to_f64()))
            .collect();
        let label = name_string(font, instance.subfamily_name_id)
            .unwrap_or_else(|| instance_label(&location));
        instances.push((label, location));
    }
    Ok((axes, instances))
}

/// CPAL palettes as RGBA colors.
pub(crate) fn palettes(font: &FontRef<'_>) -> Result<Vec<Vec<Color>>, ReadError> {
    let cpal = match font.cpal() {
        Ok(cpal) => cpal,
        Err(ReadError::TableIsMissing(_)) => return Ok(vec![]),
        Err(e) => return Err(e),
    };
    let Some(records) = cpal.color_records_array().transpose()? else {
        return Ok(vec![]);
    };
    let entries = cpal.num_palette_entries() as usize;
    let palettes = cpal
        .color_record_indices()
        .iter()
        .map(|first| {
            let first = first.get() as usize;
            records
                .iter()
                .skip(first)
                .take(entries)
                .map(|c| {
                    [
                        c.red() as f32 / 255.0,
                        c.green() as f32 / 255.0,
                        c.blue() as f32 / 255.0,
                        c.alpha() as f32 / 255.0,
                    ]
                })
                .collect()
        })
        .collect();
    Ok(palettes)
}

/// COLRv0 layers of `gid`: layer glyph and palette index (`None` for the
/// foreground color). `None` when the glyph has no color layers.
pub(crate) fn color_layers(
    font: &FontRef<'_>,
    gid: u32,
) -> Result<Option<Vec<(u32, Option<u16>)>>, ReadError> {
    let colr = match font.colr() {
        Ok(colr) => colr,
        Err(ReadError::TableIsMissing(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    if colr.base_glyph_records().is_none() {
        return Ok(None);
    }
    let Some(range) = colr.v0_base_glyph(GlyphId::new(gid))? else {
        return Ok(None);
    };
    let layers = range
        .map(|index| {
            colr.v0_layer(index).map(|(glyph, palette_index)| {
                (
                    glyph.to_u32(),
                    (palette_index != FOREGROUND).then_some(palette_index),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(layers))
}

/// Number of faces in sfnt data: the collection header count for `ttcf`
/// data, otherwise 1.
pub(crate) fn face_count(data: &[u8]) -> u32 {
    if data.starts_with(b"ttcf") {
        data.get(8..12)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0)
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use write_fonts::{
        tables::cpal::{ColorRecord, Cpal},
        FontBuilder,
    };

    #[test]
    fn collection_counts() {
        let mut ttc = b"ttcf\x00\x02\x00\x00".to_vec();
        ttc.extend_from_slice(&3u32.to_be_bytes());
        assert_eq!(face_count(&ttc), 3);
        assert_eq!(face_count(b"ttcf"), 0);
        assert_eq!(face_count(b"\x00\x01\x00\x00"), 1);
    }

    #[test]
    fn labels_from_locations() {
        let location = VariationLocation::from([(Tag::new(b"wdth"), 75.0), (Tag::new(b"wght"), 700.0)]);
        assert_eq!(instance_label(&location), "wdth=75,wght=700");
    }

    #[test]
    fn reads_palettes() {
        let mut cpal = Cpal {
            num_palettes: 2,
            num_palette_entries: 1,
            num_color_records: 2,
            color_record_indices: vec![0, 1],
            ..Default::default()
        };
        cpal.color_records_array.set(vec![
            ColorRecord {
                blue: 0,
                green: 0,
                red: 255,
                alpha: 255,
            },
            ColorRecord {
                blue: 255,
                green: 0,
                red: 0,
                alpha: 0,
            },
        ]);
        let mut builder = FontBuilder::new();
        builder.add_table(&cpal).unwrap();
        let data = builder.build();
        let font = FontRef::new(&data).unwrap();
        assert_eq!(
            palettes(&font).unwrap(),
            vec![vec![[1.0, 0.0, 0.0, 1.0]], vec![[0.0, 0.0, 1.0, 0.0]]]
        );
        assert_eq!(color_layers(&font, 0).unwrap(), None);
    }
}
