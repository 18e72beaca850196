//! Variable fonts built from designspace documents.
//!
//! Every master UFO is compiled on the pool, then the masters are merged
//! into one variable font. Outlines and metrics are interpolated from the
//! master UFOs with the designspace's variation model.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use super::drawing::{from_coordinate_list, signature, to_coordinate_list, GlyphDrawing};
use super::ufo::UfoGlyphs;
use super::{path_arg, run_compile_job, Font, FontKind, GlyphSource};
use crate::compilers::designspace::Designspace;
use crate::model::VariationModel;
use crate::shaper::GlyphMetrics;
use crate::worker::{COMPILE_DESIGNSPACE, COMPILE_UFO};
use crate::{CancelToken, Context, FontGogglesError, VariationLocation};

/// The master glyph sets of a designspace, one per source.
pub(crate) struct DesignspaceGlyphs {
    designspace: Designspace,
    masters: Vec<Arc<UfoGlyphs>>,
    model: VariationModel,
}

impl DesignspaceGlyphs {
    pub fn load(designspace: Designspace) -> Result<Self, FontGogglesError> {
        let model = designspace.model()?;
        let mut loaded: Vec<(PathBuf, Option<String>, Arc<UfoGlyphs>)> = vec![];
        let mut masters = vec![];
        for source in &designspace.sources {
            let cached = loaded
                .iter()
                .find(|(path, layer, _)| *path == source.path && *layer == source.layer)
                .map(|(_, _, glyphs)| glyphs.clone());
            let glyphs = match cached {
                Some(glyphs) => glyphs,
                None => {
                    let glyphs = Arc::new(UfoGlyphs::load(&source.path, source.layer.as_deref())?);
                    loaded.push((source.path.clone(), source.layer.clone(), glyphs.clone()));
                    glyphs
                }
            };
            masters.push(glyphs);
        }
        Ok(DesignspaceGlyphs {
            designspace,
            masters,
            model,
        })
    }

    fn default_master(&self) -> &UfoGlyphs {
        &self.masters[self.designspace.default_index]
    }

    /// Normalize a user location against the designspace axes.
    pub fn normalize(&self, location: &VariationLocation) -> VariationLocation {
        self.designspace.normalize_user_location(location)
    }

    /// Interpolate a per-glyph value. Masters without the glyph contribute
    /// the default master's value.
    fn interpolate_metric(
        &self,
        location: &VariationLocation,
        value: impl Fn(&UfoGlyphs) -> Option<f64>,
    ) -> Option<f64> {
        let default = value(self.default_master())?;
        if location.is_empty() {
            return Some(default);
        }
        let values: Vec<f64> = self
            .masters
            .iter()
            .map(|master| value(Arc::as_ref(master)).unwrap_or(default))
            .collect();
        self.model
            .interpolate_scalar(&self.normalize(location), &values)
            .ok()
    }

    /// The outline of `glyph` at a normalized location.
    pub fn drawing(
        &self,
        glyph: &str,
        normalized: &VariationLocation,
    ) -> Result<Option<GlyphDrawing>, FontGogglesError> {
        let Some(default) = self.default_master().drawing(glyph) else {
            return Ok(None);
        };
        if normalized.values().all(|v| *v == 0.0) {
            return Ok(Some(default));
        }
        let template = default.path();
        let expected = signature(&template);
        let mut rows = Vec::with_capacity(self.masters.len());
        for (master, source) in self.masters.iter().zip(&self.designspace.sources) {
            let path = match master.drawing(glyph) {
                Some(drawing) => drawing.path(),
                None => template.clone(),
            };
            if signature(&path) != expected {
                return Err(FontGogglesError::GlyphNotInterpolatable {
                    glyph: glyph.to_string(),
                    reason: format!("outline in {} is incompatible with the default", source.name),
                });
            }
            rows.push(to_coordinate_list(&path));
        }
        let rows: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        let coords = self.model.interpolate(normalized, &rows)?;
        Ok(Some(GlyphDrawing::new(from_coordinate_list(&template, &coords))))
    }

    /// Master UFOs and the feature files they include.
    pub fn external_files(&self) -> Vec<PathBuf> {
        let mut seen = BTreeSet::new();
        let mut files = vec![];
        for master in &self.masters {
            if seen.insert(master.path().to_path_buf()) {
                files.push(master.path().to_path_buf());
                files.extend(master.feature_includes());
            }
        }
        files
    }

    pub fn can_reload_in_place(&self, external_files: &[PathBuf], changed: &Path) -> bool {
        let is_master_root = self.masters.iter().any(|m| m.path() == changed);
        if !is_master_root && external_files.iter().any(|f| f == changed) {
            return true;
        }
        self.masters
            .iter()
            .filter(|m| changed.starts_with(m.path()))
            .any(|m| m.can_reload_in_place(&[], changed))
    }
}

impl GlyphMetrics for DesignspaceGlyphs {
    fn advance_width(&self, glyph: &str, location: &VariationLocation) -> Option<f64> {
        self.interpolate_metric(location, |m| m.advance_width(glyph))
    }

    fn vertical_advance(&self, glyph: &str, location: &VariationLocation) -> Option<f64> {
        self.interpolate_metric(location, |m| m.vertical_advance(glyph))
    }

    fn vertical_origin(&self, glyph: &str, location: &VariationLocation) -> Option<f64> {
        self.interpolate_metric(location, |m| m.vertical_origin(glyph))
    }
}

/// Compile the masters of `path` concurrently, merge them and open the
/// variable font.
pub(crate) async fn load(
    ctx: &Context,
    path: &Path,
    cancel: &CancelToken,
) -> Result<Font, FontGogglesError> {
    let designspace = Designspace::load(path)?;
    let tmp = tempfile::tempdir()?;

    let mut jobs = JoinSet::new();
    for (index, source) in designspace.sources.iter().enumerate() {
        let mut args = vec![
            path_arg(&source.path),
            path_arg(&Designspace::master_tt_path(tmp.path(), index)),
        ];
        args.extend(source.layer.clone());
        let pool = ctx.pool().clone();
        let cancel = cancel.clone();
        let source_path = source.path.clone();
        jobs.spawn(async move {
            run_compile_job(&pool, COMPILE_UFO, args, &source_path, &cancel).await
        });
    }
    while let Some(joined) = jobs.join_next().await {
        joined.map_err(std::io::Error::other)??;
    }

    let out_path = tmp.path().join("variable.ttf");
    let mut args = vec![path_arg(path), path_arg(tmp.path()), path_arg(&out_path)];
    if !ctx.config().merge_exclude.is_empty() {
        args.push(ctx.config().merge_exclude.join(","));
    }
    run_compile_job(ctx.pool(), COMPILE_DESIGNSPACE, args, path, cancel).await?;
    let data: Arc<[u8]> = tokio::fs::read(&out_path).await?.into();

    let glyphs = tokio::task::spawn_blocking(move || DesignspaceGlyphs::load(designspace))
        .await
        .map_err(std::io::Error::other)??;
    let glyphs = Arc::new(glyphs);
    let external_files = glyphs.external_files();
    let normalized = glyphs.normalize(&VariationLocation::new());
    let font = Font::from_sfnt(
        path,
        0,
        FontKind::Designspace,
        data,
        GlyphSource::Designspace {
            glyphs: glyphs.clone(),
            normalized,
        },
        Some(glyphs),
    )?;
    Ok(font.with_external_files(external_files))
}
