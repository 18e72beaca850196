use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::{compilers::CompileError, model::VariationModelError, pool::PoolError};

#[derive(Debug, Error)]
pub enum FontGogglesError {
    #[error("Unsupported source {path:?}")]
    UnsupportedSource { path: PathBuf },

    #[error("Face index {index} out of range for {path:?}, which has {count} face(s)")]
    BadFaceIndex {
        path: PathBuf,
        index: u32,
        count: u32,
    },

    #[error("Could not parse font data in {path:?}")]
    BadFontData { path: PathBuf },

    #[error("Unknown text direction {0:?}")]
    InvalidDirection(String),

    #[error("Could not open face {0} for shaping")]
    BadFace(u32),

    #[error("Compiling {path:?} failed:\n{output}")]
    Compile { path: PathBuf, output: String },

    #[error("Worker pool error: {0}")]
    Pool(PoolError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Font failed to load: {0}")]
    LoadFailed(Arc<FontGogglesError>),

    #[error("Font at index {0} is not loaded")]
    NotLoaded(usize),

    #[error("No font entry at index {0}")]
    NoSuchEntry(usize),

    #[error("IO Error: {0}")]
    IO(#[from] io::Error),

    #[error("Error loading UFO: {0}")]
    UfoLoad(#[from] norad::error::FontLoadError),

    #[error("Error parsing designspace file: {0}")]
    DesignSpaceLoad(#[from] norad::error::DesignSpaceLoadError),

    #[error("Compiler error: {0}")]
    Compiler(#[from] CompileError),

    #[error("Error reading font: {0}")]
    FontRead(#[from] write_fonts::read::ReadError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error reading archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Ill-defined axis {axis_name}: {reason}")]
    IllDefinedAxis { axis_name: String, reason: String },

    #[error("Glyph {glyph} not found")]
    GlyphNotFound { glyph: String },

    #[error("Glyph {glyph} not interpolatable: {reason}")]
    GlyphNotInterpolatable { glyph: String, reason: String },

    #[error("Variation model error: {0}")]
    VariationModel(#[from] VariationModelError),
}

impl From<PoolError> for FontGogglesError {
    fn from(value: PoolError) -> Self {
        match value {
            PoolError::Cancelled => FontGogglesError::Cancelled,
            other => FontGogglesError::Pool(other),
        }
    }
}

impl FontGogglesError {
    /// Whether this error is a cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FontGogglesError::Cancelled)
    }
}
