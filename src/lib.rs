#![deny(clippy::unwrap_used, clippy::expect_used)]
//! Text shaping and font loading core for interactive font previewing.
//!
//! Text goes through [`TextInfo`] (bidi resolution, script segmentation),
//! then through a [`Font`] which shapes each segment and lays the result out
//! as a [`GlyphsRun`]. Fonts are opened through the [`opener`] registry and
//! collected in a [`Project`]; source formats (UFO, designspace, TTX) are
//! compiled to minimal OpenType binaries by worker subprocesses managed by a
//! [`CompilerPool`].

mod axis;
pub mod bidi;
pub mod compilers;
mod config;
mod context;
mod error;
pub mod font;
mod glyphsrun;
pub mod model;
pub mod opener;
pub mod pool;
mod project;
pub mod recttree;
pub mod shaper;
mod textinfo;
pub mod worker;

pub use crate::{
    axis::{AxisInfo, DesignAxis},
    bidi::{BidiResult, Segment},
    config::Config,
    context::Context,
    error::FontGogglesError,
    font::{Font, FontKind, GlyphDrawing},
    glyphsrun::{GlyphInfo, GlyphsRun},
    pool::{CancelToken, CompilerPool, PoolError},
    project::{FontEntry, FontState, Project, SharedBytes},
    recttree::{Rect, RectTree},
    shaper::{Direction, FeatureValue, Features, ShapeInput, ShapeOptions, Shaper},
    textinfo::{Alignment, TextInfo},
};
pub use write_fonts::types::Tag;

/// A variation location in user coordinates, keyed by axis tag.
pub type VariationLocation = std::collections::BTreeMap<Tag, f64>;

/// Build a [`Tag`] from a string, padding short tags with spaces.
pub(crate) fn tag_from_str(s: &str) -> Option<Tag> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 4 {
        return None;
    }
    let mut tag = [b' '; 4];
    tag[..bytes.len()].copy_from_slice(bytes);
    Some(Tag::new(&tag))
}
