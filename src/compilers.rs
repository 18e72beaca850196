//! Minimal compilers from font sources to shapeable OpenType binaries.
//!
//! These run inside worker processes (see [`crate::worker`]). They produce
//! just enough of a font for shaping: glyph order, metrics, cmap, names and
//! layout tables. Outlines are only compiled for TTX sources; UFO-based
//! fonts draw their glyphs from the sources directly.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::Tag;

pub mod designspace;
pub mod features;
pub mod glif;
pub(crate) mod tables;
pub mod ttx;
pub mod ufo;

pub use tables::{AnchorRecord, ANCHORS_TAG, MASTER_MODEL_TAG, UNMERGED_TAG};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Ask the running compile to stop at its next checkpoint.
pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn clear_interrupt() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Checkpoint for long compile loops.
pub(crate) fn check_interrupt() -> Result<(), CompileError> {
    if interrupted() {
        Err(CompileError::Interrupted)
    } else {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Could not parse {path:?}: {reason}")]
    Xml { path: PathBuf, reason: String },

    #[error("Error loading UFO: {0}")]
    UfoLoad(#[from] norad::error::FontLoadError),

    #[error("Error parsing designspace file: {0}")]
    DesignSpaceLoad(#[from] norad::error::DesignSpaceLoadError),

    #[error("Bad designspace: {0}")]
    Designspace(String),

    #[error("Error building font: {0}")]
    Build(#[from] write_fonts::BuilderError),

    #[error("Could not compile outline of {glyph}: {reason}")]
    Outline { glyph: String, reason: String },

    #[error("Conflicting cmap entries: {0}")]
    Cmap(String),

    #[error("Error reading compiled font: {0}")]
    Read(#[from] write_fonts::read::ReadError),

    #[error("Masters are not compatible in {table}: {reason}")]
    Merge { table: Tag, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TTX: {0}")]
    Ttx(String),

    #[error("Font has {0} glyphs; at most 65535 are allowed")]
    TooManyGlyphs(usize),

    #[error("Interrupted")]
    Interrupted,
}

impl CompileError {
    pub(crate) fn xml(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CompileError::Xml {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
