use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::opener::open_font;
use crate::{CancelToken, Context, Font, FontGogglesError};

/// Raw font file contents shared between faces of one file during a load.
pub type SharedBytes = HashMap<PathBuf, Arc<[u8]>>;

/// Load state of a project entry.
#[derive(Debug, Default)]
pub enum FontState {
    #[default]
    Unloaded,
    Loading,
    Loaded(Font),
    /// The load failed; the error is returned again on every later load.
    Failed(Arc<FontGogglesError>),
}

/// One `(path, face)` in a project.
#[derive(Debug)]
pub struct FontEntry {
    pub path: PathBuf,
    pub face_index: u32,
    /// Stable opaque key for the entry.
    pub identifier: String,
    state: FontState,
}

impl FontEntry {
    fn new(path: PathBuf, face_index: u32) -> Self {
        FontEntry {
            path,
            face_index,
            identifier: uuid::Uuid::new_v4().to_string(),
            state: FontState::Unloaded,
        }
    }

    pub fn state(&self) -> &FontState {
        &self.state
    }

    pub fn font(&self) -> Option<&Font> {
        match &self.state {
            FontState::Loaded(font) => Some(font),
            _ => None,
        }
    }

    pub fn font_mut(&mut self) -> Option<&mut Font> {
        match &mut self.state {
            FontState::Loaded(font) => Some(font),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, FontState::Loaded(_))
    }
}

/// An ordered list of fonts and their load state. The same `(path, face)`
/// may appear more than once.
#[derive(Debug, Default)]
pub struct Project {
    entries: Vec<FontEntry>,
}

impl Project {
    pub fn new() -> Self {
        Project::default()
    }

    /// Append an unloaded entry and return its index.
    pub fn add_font(&mut self, path: impl AsRef<Path>, face_index: u32) -> usize {
        self.entries
            .push(FontEntry::new(path.as_ref().to_path_buf(), face_index));
        self.entries.len() - 1
    }

    pub fn remove_font(&mut self, index: usize) -> Option<FontEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn entries(&self) -> &[FontEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&FontEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, identifier: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.identifier == identifier)
    }

    pub fn entry_by_identifier(&self, identifier: &str) -> Option<&FontEntry> {
        self.index_of(identifier).map(|i| &self.entries[i])
    }

    /// The loaded font at `index`.
    pub fn font(&self, index: usize) -> Result<&Font, FontGogglesError> {
        self.entries
            .get(index)
            .ok_or(FontGogglesError::NoSuchEntry(index))?
            .font()
            .ok_or(FontGogglesError::NotLoaded(index))
    }

    pub fn font_mut(&mut self, index: usize) -> Result<&mut Font, FontGogglesError> {
        self.entries
            .get_mut(index)
            .ok_or(FontGogglesError::NoSuchEntry(index))?
            .font_mut()
            .ok_or(FontGogglesError::NotLoaded(index))
    }

    /// Forget the loaded font (or the failure) so the next load starts over.
    pub fn purge_font(&mut self, index: usize) -> Result<(), FontGogglesError> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(FontGogglesError::NoSuchEntry(index))?;
        entry.state = FontState::Unloaded;
        Ok(())
    }

    /// Load the entry at `index`. A loaded entry is left alone; a failed
    /// entry returns its original error. Binary file contents are taken from
    /// and added to `shared`. A cancelled load leaves the entry unloaded.
    pub async fn load_font(
        &mut self,
        ctx: &Context,
        index: usize,
        shared: &mut SharedBytes,
        cancel: &CancelToken,
    ) -> Result<(), FontGogglesError> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(FontGogglesError::NoSuchEntry(index))?;
        match &entry.state {
            FontState::Loaded(_) => return Ok(()),
            FontState::Failed(error) => return Err(FontGogglesError::LoadFailed(error.clone())),
            // A load that was dropped midway starts again
            FontState::Loading | FontState::Unloaded => {}
        }
        entry.state = FontState::Loading;
        let path = entry.path.clone();
        let face_index = entry.face_index;

        let bytes = shared.get(&path).cloned();
        let result = open_font(ctx, &path, face_index, bytes, cancel).await;
        let entry = &mut self.entries[index];
        match result {
            Ok((font, bytes)) => {
                if let Some(bytes) = bytes {
                    shared.entry(path).or_insert(bytes);
                }
                entry.state = FontState::Loaded(font);
                Ok(())
            }
            Err(error) if error.is_cancelled() => {
                log::debug!("Loading {} was cancelled", path.display());
                entry.state = FontState::Unloaded;
                Err(error)
            }
            Err(error) => {
                log::warn!("Could not load {}: {}", path.display(), error);
                let error = Arc::new(error);
                entry.state = FontState::Failed(error.clone());
                Err(FontGogglesError::LoadFailed(error))
            }
        }
    }

    /// Load every entry in order. Failures are recorded on their entries;
    /// only cancellation stops the batch.
    pub async fn load_fonts(&mut self, ctx: &Context, cancel: &CancelToken) -> Result<(), FontGogglesError> {
        let mut shared = SharedBytes::new();
        let yield_every = ctx.config().yield_every.max(1);
        for index in 0..self.entries.len() {
            match self.load_font(ctx, index, &mut shared, cancel).await {
                Err(error) if error.is_cancelled() => return Err(error),
                Err(_) | Ok(()) => {}
            }
            if (index + 1) % yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::compilers::tables::MinimalFont;
    use crate::Config;
    use pretty_assertions::assert_eq;

    fn write_font(dir: &Path, name: &str) -> PathBuf {
        let font = MinimalFont {
            glyph_order: vec![".notdef".into(), "A".into()],
            cmap: [(0x41, "A".to_string())].into(),
            units_per_em: 1000,
            ascender: 800.0,
            descender: -200.0,
            advance_widths: vec![500.0, 600.0],
            advance_heights: vec![1000.0; 2],
            vertical_origins: vec![800.0; 2],
            ..Default::default()
        };
        let path = dir.join(name);
        std::fs::write(&path, font.build().unwrap()).unwrap();
        path
    }

    #[test]
    fn entries_keep_order_and_identity() {
        let mut project = Project::new();
        let a = project.add_font("a.ttf", 0);
        let b = project.add_font("a.ttf", 0);
        assert_eq!((a, b), (0, 1));
        let id = project.entries()[1].identifier.clone();
        assert_ne!(id, project.entries()[0].identifier);
        assert_eq!(project.index_of(&id), Some(1));
        project.remove_font(0).unwrap();
        assert_eq!(project.index_of(&id), Some(0));
        assert!(project.remove_font(5).is_none());
        assert!(matches!(project.font(0), Err(FontGogglesError::NotLoaded(0))));
        assert!(matches!(project.font(3), Err(FontGogglesError::NoSuchEntry(3))));
    }

    #[tokio::test]
    async fn loads_once_and_shares_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_font(dir.path(), "font.ttf");
        let ctx = Context::new(Config::default());
        let cancel = CancelToken::new();
        let mut project = Project::new();
        project.add_font(&path, 0);
        project.add_font(&path, 0);
        project.load_fonts(&ctx, &cancel).await.unwrap();
        assert!(project.entries().iter().all(FontEntry::is_loaded));
        let first = project.font(0).unwrap().data().clone();
        let second = project.font(1).unwrap().data().clone();
        assert!(Arc::ptr_eq(&first, &second));

        // Loading a loaded entry keeps the font
        let mut shared = SharedBytes::new();
        project.load_font(&ctx, 0, &mut shared, &cancel).await.unwrap();
        assert!(Arc::ptr_eq(project.font(0).unwrap().data(), &first));
        assert!(shared.is_empty());
    }

    #[tokio::test]
    async fn failures_are_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(Config::default());
        let cancel = CancelToken::new();
        let mut project = Project::new();
        project.add_font(dir.path().join("missing.ttf"), 0);
        project.add_font(write_font(dir.path(), "ok.ttf"), 0);
        project.load_fonts(&ctx, &cancel).await.unwrap();
        assert!(matches!(project.entries()[0].state(), FontState::Failed(_)));
        assert!(project.entries()[1].is_loaded());

        let mut shared = SharedBytes::new();
        let again = project.load_font(&ctx, 0, &mut shared, &cancel).await;
        assert!(matches!(again, Err(FontGogglesError::LoadFailed(_))));

        // Purging allows another attempt
        write_font(dir.path(), "missing.ttf");
        project.purge_font(0).unwrap();
        project.load_font(&ctx, 0, &mut shared, &cancel).await.unwrap();
        assert!(project.entries()[0].is_loaded());
    }

    #[tokio::test]
    async fn bad_face_index_fails_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(Config::default());
        let mut project = Project::new();
        project.add_font(write_font(dir.path(), "font.ttf"), 1);
        let mut shared = SharedBytes::new();
        let result = project
            .load_font(&ctx, 0, &mut shared, &CancelToken::new())
            .await;
        let Err(FontGogglesError::LoadFailed(error)) = result else {
            panic!("expected a failed load");
        };
        assert!(matches!(*error, FontGogglesError::BadFaceIndex { index: 1, count: 1, .. }));
    }

    #[tokio::test]
    async fn cancelled_loads_revert_to_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(Config::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut project = Project::new();
        project.add_font(dir.path().join("Font.ufo"), 0);
        let result = project.load_fonts(&ctx, &cancel).await;
        assert!(matches!(result, Err(FontGogglesError::Cancelled)));
        assert!(matches!(project.entries()[0].state(), FontState::Unloaded));
    }
}
