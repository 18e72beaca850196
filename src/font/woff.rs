//! Unwrapping WOFF and WOFF2 files into plain sfnt data.

use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use write_fonts::FontBuilder;

use crate::{FontGogglesError, Tag};

const WOFF: [u8; 4] = *b"wOFF";
const WOFF2: [u8; 4] = *b"wOF2";
const HEADER_SIZE: usize = 44;
const TABLE_ENTRY_SIZE: usize = 20;

fn be_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn is_woff(data: &[u8]) -> bool {
    data.starts_with(&WOFF) || data.starts_with(&WOFF2)
}

/// Return `data` unchanged unless it is WOFF or WOFF2, in which case the
/// decoded sfnt is returned.
pub(crate) fn normalize_sfnt(data: Vec<u8>, path: &Path) -> Result<Vec<u8>, FontGogglesError> {
    if !is_woff(&data) {
        return Ok(data);
    }
    if data.starts_with(&WOFF) {
        decode_woff(&data).ok_or_else(|| FontGogglesError::BadFontData {
            path: path.to_path_buf(),
        })
    } else {
        woff2_patched::decode::convert_woff2_to_ttf(&mut data.as_slice()).map_err(|_| {
            FontGogglesError::BadFontData {
                path: path.to_path_buf(),
            }
        })
    }
}

fn decode_woff(data: &[u8]) -> Option<Vec<u8>> {
    let num_tables = be_u16(data, 12)? as usize;
    let mut builder = FontBuilder::new();
    for i in 0..num_tables {
        let entry = HEADER_SIZE + i * TABLE_ENTRY_SIZE;
        let tag = Tag::from_be_bytes(be_u32(data, entry)?.to_be_bytes());
        let offset = be_u32(data, entry + 4)? as usize;
        let comp_length = be_u32(data, entry + 8)? as usize;
        let orig_length = be_u32(data, entry + 12)? as usize;
        let stored = data.get(offset..offset.checked_add(comp_length)?)?;
        let table = if comp_length < orig_length {
            let mut table = Vec::with_capacity(orig_length);
            ZlibDecoder::new(stored).read_to_end(&mut table).ok()?;
            if table.len() != orig_length {
                log::warn!("WOFF table {tag} decompressed to the wrong size");
                return None;
            }
            table
        } else {
            stored.to_vec()
        };
        builder.add_raw(tag, table);
    }
    Some(builder.build())
}
